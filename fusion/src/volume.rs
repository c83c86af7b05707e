//! Sparse block-hashed TSDF volume.
//!
//! The working volume is unbounded a priori, so storage is a hash map from
//! block index to a dense 8x8x8 block, allocated lazily on first touch.
//! Memory stays proportional to the observed surface band rather than to
//! any bounding box.

use std::collections::HashMap;

use nalgebra::Point3;

/// Integer voxel coordinate in the volume lattice.
pub type VoxelCoord = (i32, i32, i32);
/// Block index (voxel coordinate divided by the block size).
pub type BlockCoord = (i32, i32, i32);

/// Dense 8x8x8 voxel block.
#[derive(Debug, Clone)]
pub struct VoxelBlock {
    pub tsdf: Vec<f32>,
    pub weights: Vec<f32>,
    pub colors: Vec<[f32; 3]>,
}

impl VoxelBlock {
    pub const SIZE: usize = 8;
    pub const VOXELS: usize = Self::SIZE * Self::SIZE * Self::SIZE;

    pub fn new() -> Self {
        Self {
            // Positive = free space, until evidence says otherwise.
            tsdf: vec![1.0; Self::VOXELS],
            weights: vec![0.0; Self::VOXELS],
            colors: vec![[0.0; 3]; Self::VOXELS],
        }
    }

    pub fn index(local: (usize, usize, usize)) -> usize {
        local.0 + local.1 * Self::SIZE + local.2 * Self::SIZE * Self::SIZE
    }
}

impl Default for VoxelBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-back of one observed voxel.
#[derive(Debug, Clone, Copy)]
pub struct VoxelSample {
    pub tsdf: f32,
    pub weight: f32,
    pub color: [f32; 3],
}

pub struct TsdfVolume {
    voxel_size: f32,
    truncation: f32,
    max_weight: f32,
    blocks: HashMap<BlockCoord, VoxelBlock>,
    frames_integrated: usize,
}

impl TsdfVolume {
    pub fn new(voxel_size: f32, truncation: f32) -> Self {
        Self {
            voxel_size,
            truncation,
            max_weight: 100.0,
            blocks: HashMap::new(),
            frames_integrated: 0,
        }
    }

    pub fn with_max_weight(mut self, max_weight: f32) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn truncation(&self) -> f32 {
        self.truncation
    }

    pub fn max_weight(&self) -> f32 {
        self.max_weight
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn frames_integrated(&self) -> usize {
        self.frames_integrated
    }

    pub(crate) fn bump_frames(&mut self) {
        self.frames_integrated += 1;
    }

    pub fn split_coord(voxel: VoxelCoord) -> (BlockCoord, (usize, usize, usize)) {
        let size = VoxelBlock::SIZE as i32;
        let block = (
            voxel.0.div_euclid(size),
            voxel.1.div_euclid(size),
            voxel.2.div_euclid(size),
        );
        let local = (
            voxel.0.rem_euclid(size) as usize,
            voxel.1.rem_euclid(size) as usize,
            voxel.2.rem_euclid(size) as usize,
        );
        (block, local)
    }

    /// World position of a lattice point.
    pub fn voxel_to_world(&self, voxel: VoxelCoord) -> Point3<f32> {
        Point3::new(
            voxel.0 as f32 * self.voxel_size,
            voxel.1 as f32 * self.voxel_size,
            voxel.2 as f32 * self.voxel_size,
        )
    }

    /// Lattice point nearest a world position.
    pub fn world_to_voxel(&self, p: &Point3<f32>) -> VoxelCoord {
        (
            (p.x / self.voxel_size).round() as i32,
            (p.y / self.voxel_size).round() as i32,
            (p.z / self.voxel_size).round() as i32,
        )
    }

    /// Observed voxel at a lattice coordinate. A voxel never touched by any
    /// frame reads back as `None`, whether or not its enclosing block was
    /// allocated for a neighbor.
    pub fn voxel(&self, voxel: VoxelCoord) -> Option<VoxelSample> {
        let (block, local) = Self::split_coord(voxel);
        let block = self.blocks.get(&block)?;
        let idx = VoxelBlock::index(local);
        let weight = block.weights[idx];
        (weight > 0.0).then(|| VoxelSample {
            tsdf: block.tsdf[idx],
            weight,
            color: block.colors[idx],
        })
    }

    /// Normalized signed distance at an observed lattice point.
    pub fn tsdf_at(&self, voxel: VoxelCoord) -> Option<f32> {
        self.voxel(voxel).map(|s| s.tsdf)
    }

    pub fn observed_voxels(&self) -> usize {
        self.blocks
            .values()
            .map(|b| b.weights.iter().filter(|w| **w > 0.0).count())
            .sum()
    }

    /// Lattice coordinates of every observed voxel.
    pub fn observed_coords(&self) -> Vec<VoxelCoord> {
        let size = VoxelBlock::SIZE as i32;
        let mut coords = Vec::new();
        for (&(bx, by, bz), block) in &self.blocks {
            for z in 0..VoxelBlock::SIZE {
                for y in 0..VoxelBlock::SIZE {
                    for x in 0..VoxelBlock::SIZE {
                        if block.weights[VoxelBlock::index((x, y, z))] > 0.0 {
                            coords.push((
                                bx * size + x as i32,
                                by * size + y as i32,
                                bz * size + z as i32,
                            ));
                        }
                    }
                }
            }
        }
        coords
    }

    pub(crate) fn ensure_block(&mut self, block: BlockCoord) {
        self.blocks.entry(block).or_default();
    }

    pub(crate) fn take_blocks(&mut self, coords: &[BlockCoord]) -> Vec<(BlockCoord, VoxelBlock)> {
        coords
            .iter()
            .filter_map(|c| self.blocks.remove(c).map(|b| (*c, b)))
            .collect()
    }

    pub(crate) fn put_blocks(&mut self, blocks: Vec<(BlockCoord, VoxelBlock)>) {
        for (coord, block) in blocks {
            self.blocks.insert(coord, block);
        }
    }
}
