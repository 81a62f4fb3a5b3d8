use crate::error::ConfigError;
use nalgebra::Vector3;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default sort block size. Must stay a power of two.
pub const DEFAULT_BLOCK_SIZE: usize = 512;
pub const DEFAULT_TREE_CAPACITY: usize = 4;
pub const DEFAULT_RADIUS: f64 = 0.25;
/// Quadtree nodes at this depth stop subdividing and keep an overflow list.
pub const MAX_TREE_DEPTH: u32 = 32;

// Below this many particles `query_all` stays on the calling thread.
const DEFAULT_PARALLEL_THRESHOLD: usize = 256;

static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

pub fn get_parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

pub fn set_parallel_threshold(val: usize) {
    PARALLEL_THRESHOLD.store(val, Ordering::Relaxed);
}

/// Which buckets a grid query scans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NeighborMode {
    /// Every bucket whose box comes within the radius of the query point.
    #[default]
    NearestRadius,
    /// The 3x3 (3x3x3) block around the query's own bucket. Only exact when
    /// the radius is at most one bucket width.
    ThreeByThreeBlock,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Backend {
    #[default]
    UniformGrid,
    AdaptiveTree,
    BruteForce,
}

/// Axis-aligned boundary split into a uniform lattice of buckets.
///
/// Two-dimensional grids are stored with a single bucket on z and ignore the
/// z coordinate entirely.
#[derive(Clone, Debug, PartialEq)]
pub struct GridConfig {
    min: Vector3<f64>,
    max: Vector3<f64>,
    buckets: Vector3<usize>,
    dims: usize,
}

impl GridConfig {
    pub fn new_2d(min: [f64; 2], max: [f64; 2], buckets: [usize; 2]) -> Result<Self, ConfigError> {
        Self::validated(
            Vector3::new(min[0], min[1], 0.0),
            Vector3::new(max[0], max[1], 1.0),
            Vector3::new(buckets[0], buckets[1], 1),
            2,
        )
    }

    pub fn new_3d(min: [f64; 3], max: [f64; 3], buckets: [usize; 3]) -> Result<Self, ConfigError> {
        Self::validated(
            Vector3::from(min),
            Vector3::from(max),
            Vector3::from(buckets),
            3,
        )
    }

    fn validated(
        min: Vector3<f64>,
        max: Vector3<f64>,
        buckets: Vector3<usize>,
        dims: usize,
    ) -> Result<Self, ConfigError> {
        for axis in 0..dims {
            if buckets[axis] == 0 {
                return Err(ConfigError::ZeroBuckets { axis });
            }
            let (lo, hi) = (min[axis], max[axis]);
            if !lo.is_finite() || !hi.is_finite() || hi <= lo {
                return Err(ConfigError::DegenerateBoundary {
                    axis,
                    min: lo,
                    max: hi,
                });
            }
        }
        Ok(Self {
            min,
            max,
            buckets,
            dims,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn is_planar(&self) -> bool {
        self.dims == 2
    }

    pub fn min(&self) -> &Vector3<f64> {
        &self.min
    }

    pub fn max(&self) -> &Vector3<f64> {
        &self.max
    }

    pub fn buckets(&self) -> &Vector3<usize> {
        &self.buckets
    }

    pub fn cell_count(&self) -> usize {
        self.buckets.x * self.buckets.y * self.buckets.z
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Width of one bucket along each axis.
    pub fn bucket_width(&self) -> Vector3<f64> {
        self.extent()
            .component_div(&self.buckets.map(|b| b as f64))
    }

    /// True when the position lies inside the closed boundary box.
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..self.dims).all(|a| p[a] >= self.min[a] && p[a] <= self.max[a])
    }

    /// Bucket index of a coordinate on one axis, clamped into range.
    pub fn axis_index(&self, axis: usize, value: f64) -> usize {
        let n = self.buckets[axis];
        if axis >= self.dims {
            return 0;
        }
        let lo = self.min[axis];
        let hi = self.max[axis];
        // NaN falls through `clamp` unchanged; pin it to the first bucket.
        let clamped = if value.is_nan() { lo } else { value.clamp(lo, hi) };
        let t = (clamped - lo) / (hi - lo) * n as f64;
        (t.floor() as usize).min(n - 1)
    }

    pub fn cell_coords(&self, p: &Vector3<f64>) -> Vector3<usize> {
        Vector3::new(
            self.axis_index(0, p.x),
            self.axis_index(1, p.y),
            self.axis_index(2, p.z),
        )
    }

    /// Linear bucket id, x fastest: `ix + nx * (iy + ny * iz)`.
    pub fn linear_index(&self, c: &Vector3<usize>) -> usize {
        c.x + self.buckets.x * (c.y + self.buckets.y * c.z)
    }

    pub fn cell_id(&self, p: &Vector3<f64>) -> usize {
        self.linear_index(&self.cell_coords(p))
    }

    /// Inverse of [`GridConfig::linear_index`].
    pub fn cell_coords_of(&self, cell: usize) -> Vector3<usize> {
        let nx = self.buckets.x;
        let ny = self.buckets.y;
        Vector3::new(cell % nx, (cell / nx) % ny, cell / (nx * ny))
    }

    /// Box covered by one bucket, as `(min, max)`.
    pub fn cell_bounds(&self, cell: usize) -> (Vector3<f64>, Vector3<f64>) {
        let c = self.cell_coords_of(cell).map(|v| v as f64);
        let w = self.bucket_width();
        let lo = self.min + c.component_mul(&w);
        (lo, lo + w)
    }

    pub fn distance_sq(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        let mut d = b - a;
        if self.is_planar() {
            d.z = 0.0;
        }
        d.norm_squared()
    }
}

/// Everything the engine needs to build and query one index per step.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub grid: GridConfig,
    pub backend: Backend,
    pub block_size: usize,
    pub tree_capacity: usize,
    pub radius: f64,
    pub mode: NeighborMode,
}

impl EngineConfig {
    pub fn new(grid: GridConfig) -> Self {
        Self {
            grid,
            backend: Backend::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            tree_capacity: DEFAULT_TREE_CAPACITY,
            radius: DEFAULT_RADIUS,
            mode: NeighborMode::default(),
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_tree_capacity(mut self, capacity: usize) -> Self {
        self.tree_capacity = capacity;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_mode(mut self, mode: NeighborMode) -> Self {
        self.mode = mode;
        self
    }

    /// Checks everything that does not depend on the particle count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_radius(self.radius)?;
        match self.backend {
            Backend::UniformGrid => {
                if self.block_size < 2 || !self.block_size.is_power_of_two() {
                    return Err(ConfigError::InvalidBlockSize {
                        block_size: self.block_size,
                    });
                }
            }
            Backend::AdaptiveTree => {
                if self.tree_capacity == 0 {
                    return Err(ConfigError::ZeroCapacity);
                }
                if !self.grid.is_planar() {
                    return Err(ConfigError::TreeRequiresPlanar);
                }
            }
            Backend::BruteForce => {}
        }
        Ok(())
    }
}

pub fn validate_radius(radius: f64) -> Result<(), ConfigError> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRadius { radius })
    }
}
