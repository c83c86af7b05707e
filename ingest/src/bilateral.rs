//! Edge-preserving depth smoothing.
//!
//! Bilateral filter over the depth map: spatial and range Gaussians,
//! computed over valid samples only. Invalid samples contribute nothing and
//! receive nothing, so smoothing never bleeds background depth across a
//! foreground discontinuity and never resurrects an invalidated sample.

use rayon::prelude::*;

use roomscan_core::frame::DepthMap;

#[derive(Debug, Clone, Copy)]
pub struct BilateralParams {
    /// Filter size (odd).
    pub kernel_size: i32,
    /// Spatial sigma in pixels; larger = more smoothing.
    pub sigma_spatial: f32,
    /// Range sigma in meters; smaller = stronger edge preservation.
    pub sigma_range: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            kernel_size: 5,
            sigma_spatial: 3.0,
            sigma_range: 0.05,
        }
    }
}

/// Filter valid samples of `depth` in place of a fresh map.
pub fn bilateral_filter_depth(depth: &DepthMap, params: BilateralParams) -> DepthMap {
    let width = depth.width as usize;
    let height = depth.height as usize;
    let half = params.kernel_size / 2;
    let sigma_spatial_sq = 2.0 * params.sigma_spatial * params.sigma_spatial;
    let sigma_range_sq = 2.0 * params.sigma_range * params.sigma_range;

    let mut output = vec![0.0f32; depth.data.len()];
    output
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as i32;
            for x in 0..width {
                let idx = y as usize * width + x;
                let center = depth.data[idx];

                if !DepthMap::is_valid(center) {
                    row[x] = 0.0;
                    continue;
                }

                let mut sum = 0.0f32;
                let mut weight_sum = 0.0f32;

                for ky in -half..=half {
                    for kx in -half..=half {
                        let nx = x as i32 + kx;
                        let ny = y + ky;
                        if nx < 0 || nx >= width as i32 || ny < 0 || ny >= height as i32 {
                            continue;
                        }
                        let neighbor = depth.data[ny as usize * width + nx as usize];
                        if !DepthMap::is_valid(neighbor) {
                            continue;
                        }

                        let spatial = (kx * kx + ky * ky) as f32;
                        let spatial_weight = (-spatial / sigma_spatial_sq).exp();
                        let range = center - neighbor;
                        let range_weight = (-range * range / sigma_range_sq).exp();

                        let weight = spatial_weight * range_weight;
                        sum += neighbor * weight;
                        weight_sum += weight;
                    }
                }

                // The center sample always contributes to itself, so a valid
                // sample can never be zeroed here.
                row[x] = if weight_sum > 0.0 { sum / weight_sum } else { center };
            }
        });

    DepthMap::new(depth.width, depth.height, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_samples_stay_invalid_and_valid_stay_valid() {
        let data = vec![
            1.0, 1.0, 0.0, //
            1.0, 1.1, 0.0, //
            1.0, 1.0, 0.0,
        ];
        let depth = DepthMap::new(3, 3, data);
        let filtered = bilateral_filter_depth(&depth, BilateralParams::default());

        for (before, after) in depth.data.iter().zip(&filtered.data) {
            assert_eq!(DepthMap::is_valid(*before), DepthMap::is_valid(*after));
        }
    }

    #[test]
    fn no_bleeding_across_depth_discontinuity() {
        // Left half near (0.5 m), right half far (3.0 m): a foreground edge.
        let mut data = vec![0.0f32; 8 * 8];
        for y in 0..8 {
            for x in 0..8 {
                data[y * 8 + x] = if x < 4 { 0.5 } else { 3.0 };
            }
        }
        let depth = DepthMap::new(8, 8, data);
        let filtered = bilateral_filter_depth(&depth, BilateralParams::default());

        for y in 0..8 {
            for x in 0..8 {
                let d = filtered.get(x, y);
                // Every output stays close to its own side of the edge; the
                // range kernel suppresses the far side almost entirely.
                if x < 4 {
                    assert!((d - 0.5).abs() < 0.01, "bled at ({x},{y}): {d}");
                } else {
                    assert!((d - 3.0).abs() < 0.01, "bled at ({x},{y}): {d}");
                }
            }
        }
    }

    #[test]
    fn smooths_gaussian_noise_on_flat_region() {
        let mut data = vec![0.0f32; 16 * 16];
        for (i, d) in data.iter_mut().enumerate() {
            // Deterministic +-2 mm ripple around 1 m.
            *d = 1.0 + ((i * 31 % 7) as f32 - 3.0) * 0.002 / 3.0;
        }
        let depth = DepthMap::new(16, 16, data);
        let filtered = bilateral_filter_depth(&depth, BilateralParams::default());

        let spread = |m: &DepthMap| {
            let mean = m.data.iter().sum::<f32>() / m.data.len() as f32;
            m.data.iter().map(|d| (d - mean).powi(2)).sum::<f32>()
        };
        assert!(spread(&filtered) < spread(&depth));
    }
}
