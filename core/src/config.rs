//! Run configuration.
//!
//! The surrounding service owns config-file parsing; it hands the pipeline
//! an opaque key/value collection which [`ReconConfig::apply`] folds into a
//! typed record. Unrecognized keys are returned to the caller, never fatal.

/// Reconstruction strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconMode {
    /// Volumetric TSDF fusion of sensor depth (default).
    #[default]
    Fusion,
    /// Dense multi-view stereo from color + poses.
    Stereo,
}

/// Where the fusion inner loop should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionTarget {
    /// GPU-accelerated execution.
    Accelerated,
    /// General-purpose CPU execution.
    #[default]
    General,
}

/// Execution-target request plus the once-per-run fallback decision input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPolicy {
    pub target: ExecutionTarget,
    /// Whether falling back from accelerated to general-purpose execution is
    /// permitted when no accelerated device is available.
    pub allow_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Voxel edge length in meters.
    pub voxel_length: f32,
    /// Truncation distance in meters, shared by depth conditioning and the
    /// signed-distance band.
    pub truncation: f32,
    /// Bilateral filter kernel size (odd).
    pub filter_kernel_size: i32,
    pub filter_sigma_spatial: f32,
    pub filter_sigma_range: f32,
    /// Statistical-outlier threshold as a multiple of the noise estimate.
    /// Non-positive disables the pass.
    pub outlier_std_ratio: f32,
    pub outlier_neighbors: usize,
    pub smooth_iterations: usize,
    pub smooth_lambda: f32,
    pub subdivide: bool,
    /// Simplification budget; the output mesh never exceeds this many
    /// triangles.
    pub target_triangles: usize,
    pub mode: ReconMode,
    pub execution: ExecutionPolicy,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            voxel_length: 0.01,
            truncation: 0.04,
            filter_kernel_size: 5,
            filter_sigma_spatial: 3.0,
            filter_sigma_range: 0.05,
            outlier_std_ratio: 3.0,
            outlier_neighbors: 8,
            smooth_iterations: 3,
            smooth_lambda: 0.5,
            subdivide: false,
            target_triangles: 500_000,
            mode: ReconMode::Fusion,
            execution: ExecutionPolicy::default(),
        }
    }
}

impl ReconConfig {
    /// Apply one recognized option. Returns `false` for unknown keys or
    /// unparseable values so the caller can report them.
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "voxel_length" => parse_into(value, &mut self.voxel_length),
            "truncation" => parse_into(value, &mut self.truncation),
            "filter_kernel_size" => parse_into(value, &mut self.filter_kernel_size),
            "filter_sigma_spatial" => parse_into(value, &mut self.filter_sigma_spatial),
            "filter_sigma_range" => parse_into(value, &mut self.filter_sigma_range),
            "outlier_std_ratio" => parse_into(value, &mut self.outlier_std_ratio),
            "outlier_neighbors" => parse_into(value, &mut self.outlier_neighbors),
            "smooth_iterations" => parse_into(value, &mut self.smooth_iterations),
            "smooth_lambda" => parse_into(value, &mut self.smooth_lambda),
            "subdivide" => parse_into(value, &mut self.subdivide),
            "target_triangles" => parse_into(value, &mut self.target_triangles),
            "mode" => match value {
                "fusion" => {
                    self.mode = ReconMode::Fusion;
                    true
                }
                "stereo" => {
                    self.mode = ReconMode::Stereo;
                    true
                }
                _ => false,
            },
            "execution" => match value {
                "accelerated" => {
                    self.execution.target = ExecutionTarget::Accelerated;
                    true
                }
                "general" => {
                    self.execution.target = ExecutionTarget::General;
                    true
                }
                _ => false,
            },
            "allow_fallback" => parse_into(value, &mut self.execution.allow_fallback),
            _ => false,
        }
    }

    /// Fold a whole key/value collection, returning the rejected keys.
    pub fn apply_all<'a, I>(&mut self, options: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        options
            .into_iter()
            .filter(|(k, v)| !self.apply(k, v))
            .map(|(k, _)| k)
            .collect()
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}
