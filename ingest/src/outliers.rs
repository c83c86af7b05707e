//! Statistical depth-outlier removal and noise estimation.

use roomscan_core::frame::DepthMap;

const WINDOW: i32 = 2; // 5x5 neighborhood

/// Mean absolute deviation of a valid pixel from its valid neighbors.
fn local_spread(depth: &DepthMap, x: u32, y: u32) -> Option<f32> {
    let center = depth.sample(x, y)?;
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for ky in -WINDOW..=WINDOW {
        for kx in -WINDOW..=WINDOW {
            if kx == 0 && ky == 0 {
                continue;
            }
            let nx = x as i32 + kx;
            let ny = y as i32 + ky;
            if nx < 0 || ny < 0 || nx >= depth.width as i32 || ny >= depth.height as i32 {
                continue;
            }
            if let Some(n) = depth.sample(nx as u32, ny as u32) {
                sum += (n - center).abs();
                count += 1;
            }
        }
    }

    (count > 0).then(|| sum / count as f32)
}

/// Sensor noise estimate: the median local spread over valid samples.
/// The outlier threshold is expressed as a multiple of this, so it has to
/// be robust to the outliers themselves; the median is.
pub fn estimate_depth_noise(depth: &DepthMap) -> f32 {
    let mut spreads: Vec<f32> = Vec::new();
    for y in 0..depth.height {
        for x in 0..depth.width {
            if let Some(s) = local_spread(depth, x, y) {
                spreads.push(s);
            }
        }
    }
    if spreads.is_empty() {
        return 0.0;
    }
    spreads.sort_by(|a, b| a.total_cmp(b));
    spreads[spreads.len() / 2]
}

/// Invalidate samples whose local spread exceeds `std_ratio` times the
/// noise estimate. Returns the filtered map, the number of samples removed,
/// and the noise estimate used.
pub fn remove_depth_outliers(depth: &DepthMap, std_ratio: f32) -> (DepthMap, usize, f32) {
    let noise = estimate_depth_noise(depth);
    if std_ratio <= 0.0 || noise <= 0.0 {
        return (depth.clone(), 0, noise);
    }

    let threshold = std_ratio * noise;
    let mut out = depth.clone();
    let mut removed = 0usize;

    for y in 0..depth.height {
        for x in 0..depth.width {
            if let Some(s) = local_spread(depth, x, y) {
                if s > threshold {
                    out.data[(y * depth.width + x) as usize] = 0.0;
                    removed += 1;
                }
            }
        }
    }

    (out, removed, noise)
}
