use crate::brute::BruteForceIndex;
use crate::config::{Backend, EngineConfig, NeighborMode, get_parallel_threshold, validate_radius};
use crate::error::{ConfigError, IndexError};
use crate::grid::UniformGridIndex;
use crate::neighbors::NeighborLists;
use crate::sort::BitonicNetwork;
use crate::tree::{Aabb, QuadTree, TreeEntry};
use nalgebra::{Point2, Vector3};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

const PARALLEL_TASKS_PER_THREAD: usize = 64;

/// The backend-specific half of a snapshot.
pub enum SpatialIndex {
    Grid(UniformGridIndex),
    Tree {
        tree: QuadTree,
        /// Particles outside the root region; they can query but are never
        /// found by anyone else.
        rejected: Vec<usize>,
    },
    BruteForce(BruteForceIndex),
}

impl SpatialIndex {
    pub fn backend(&self) -> Backend {
        match self {
            SpatialIndex::Grid(_) => Backend::UniformGrid,
            SpatialIndex::Tree { .. } => Backend::AdaptiveTree,
            SpatialIndex::BruteForce(_) => Backend::BruteForce,
        }
    }
}

/// Immutable index over one step's positions.
pub struct IndexSnapshot {
    index: SpatialIndex,
    positions: Vec<Vector3<f64>>,
}

impl IndexSnapshot {
    pub fn build(positions: &[Vector3<f64>], config: &EngineConfig) -> Result<Self, ConfigError> {
        let _span = info_span!(
            "IndexSnapshot::build",
            n_particles = positions.len(),
            backend = ?config.backend
        )
        .entered();
        config.validate()?;

        let index = match config.backend {
            Backend::UniformGrid => {
                let network = BitonicNetwork::new(config.block_size)?;
                SpatialIndex::Grid(UniformGridIndex::build(positions, &config.grid, &network)?)
            }
            Backend::AdaptiveTree => {
                let (min, max) = (config.grid.min(), config.grid.max());
                let region =
                    Aabb::from_min_max(Point2::new(min.x, min.y), Point2::new(max.x, max.y));
                let points = positions
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, Point2::new(p.x, p.y)));
                let (tree, rejected) = QuadTree::build(region, config.tree_capacity, points)?;
                if !rejected.is_empty() {
                    warn!(
                        rejected = rejected.len(),
                        "particles outside the tree region were not inserted"
                    );
                }
                SpatialIndex::Tree { tree, rejected }
            }
            Backend::BruteForce => {
                SpatialIndex::BruteForce(BruteForceIndex::new(positions, config.grid.is_planar()))
            }
        };

        Ok(Self {
            index,
            positions: positions.to_vec(),
        })
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn backend(&self) -> Backend {
        self.index.backend()
    }

    /// Positions in their original order.
    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn grid(&self) -> Option<&UniformGridIndex> {
        match &self.index {
            SpatialIndex::Grid(g) => Some(g),
            _ => None,
        }
    }

    pub fn tree(&self) -> Option<&QuadTree> {
        match &self.index {
            SpatialIndex::Tree { tree, .. } => Some(tree),
            _ => None,
        }
    }

    /// Sorted-to-original index map; only the grid backend reorders.
    pub fn permutation(&self) -> Option<&[usize]> {
        self.grid().map(UniformGridIndex::permutation)
    }

    pub fn rejected(&self) -> &[usize] {
        match &self.index {
            SpatialIndex::Tree { rejected, .. } => rejected,
            _ => &[],
        }
    }

    /// Neighbors of `particle` within `radius`, excluding the particle itself.
    /// `mode` only affects the grid backend.
    pub fn query(
        &self,
        particle: usize,
        radius: f64,
        mode: NeighborMode,
    ) -> Result<Vec<usize>, IndexError> {
        validate_radius(radius)?;
        if particle >= self.len() {
            return Err(IndexError::ParticleOutOfRange {
                index: particle,
                len: self.len(),
            });
        }
        Ok(self.query_unchecked(particle, radius, mode))
    }

    fn query_unchecked(&self, particle: usize, radius: f64, mode: NeighborMode) -> Vec<usize> {
        match &self.index {
            SpatialIndex::Grid(grid) => grid.query_particle(particle, radius, mode),
            SpatialIndex::Tree { tree, .. } => {
                let p = &self.positions[particle];
                let mut hits: Vec<TreeEntry> = Vec::new();
                tree.query_into(&Point2::new(p.x, p.y), radius, &mut hits);
                hits.into_iter()
                    .map(|e| e.index)
                    .filter(|&j| j != particle)
                    .collect()
            }
            SpatialIndex::BruteForce(brute) => brute.query_particle(particle, radius),
        }
    }

    /// Neighbor lists for every particle.
    pub fn query_all(&self, radius: f64, mode: NeighborMode) -> Result<NeighborLists, IndexError> {
        validate_radius(radius)?;
        let _span = info_span!("IndexSnapshot::query_all", n_particles = self.len()).entered();
        let n = self.len();

        let lists: Vec<Vec<usize>> = if n >= get_parallel_threshold() {
            let num_threads = rayon::current_num_threads();
            let min_len = (n / (num_threads * PARALLEL_TASKS_PER_THREAD)).max(1);
            (0..n)
                .into_par_iter()
                .with_min_len(min_len)
                .map(|i| self.query_unchecked(i, radius, mode))
                .collect()
        } else {
            (0..n)
                .map(|i| self.query_unchecked(i, radius, mode))
                .collect()
        };

        let lists = NeighborLists::from_lists(lists);
        debug!(entries = lists.num_entries(), "neighbor lists built");
        Ok(lists)
    }
}

/// Owns the configuration and the current snapshot.
///
/// Each step calls [`rebuild`](Self::rebuild) with fresh positions; the old
/// snapshot is released (callers still holding its `Arc` keep a consistent
/// view) and a new one takes its place.
pub struct NeighborQueryEngine {
    config: EngineConfig,
    snapshot: Option<Arc<IndexSnapshot>>,
}

impl NeighborQueryEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            snapshot: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the configuration. The current snapshot was built for the old
    /// one and is dropped.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.snapshot = None;
        Ok(())
    }

    /// Builds a fresh snapshot. On error no snapshot is retained.
    pub fn rebuild(&mut self, positions: &[Vector3<f64>]) -> Result<Arc<IndexSnapshot>, ConfigError> {
        self.snapshot = None;
        let snapshot = Arc::new(IndexSnapshot::build(positions, &self.config)?);
        self.snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> Option<&Arc<IndexSnapshot>> {
        self.snapshot.as_ref()
    }

    fn current(&self) -> Result<&IndexSnapshot, IndexError> {
        self.snapshot.as_deref().ok_or(IndexError::NotBuilt)
    }

    pub fn query(
        &self,
        particle: usize,
        radius: f64,
        mode: NeighborMode,
    ) -> Result<Vec<usize>, IndexError> {
        self.current()?.query(particle, radius, mode)
    }

    pub fn query_all(&self, radius: f64, mode: NeighborMode) -> Result<NeighborLists, IndexError> {
        self.current()?.query_all(radius, mode)
    }

    /// Neighbor lists at the configured radius and mode.
    pub fn neighbors(&self) -> Result<NeighborLists, IndexError> {
        self.query_all(self.config.radius, self.config.mode)
    }

    /// Rebuild then [`neighbors`](Self::neighbors).
    pub fn step(&mut self, positions: &[Vector3<f64>]) -> Result<NeighborLists, IndexError> {
        self.rebuild(positions)?;
        self.neighbors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use std::collections::BTreeSet;

    fn lcg(seed: &mut u64) -> f64 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (*seed >> 11) as f64 / (1u64 << 53) as f64
    }

    fn scattered(n: usize, extent: f64, seed: u64) -> Vec<Vector3<f64>> {
        let mut s = seed;
        (0..n)
            .map(|_| Vector3::new(lcg(&mut s) * extent, lcg(&mut s) * extent, 0.0))
            .collect()
    }

    fn planar_config() -> EngineConfig {
        let grid = GridConfig::new_2d([0.0, 0.0], [4.0, 4.0], [8, 8]).unwrap();
        EngineConfig::new(grid).with_block_size(16).with_radius(0.6)
    }

    fn as_sets(lists: &NeighborLists) -> Vec<BTreeSet<usize>> {
        lists.iter().map(|(_, l)| l.iter().copied().collect()).collect()
    }

    #[test]
    fn test_not_built() {
        let engine = NeighborQueryEngine::new(planar_config()).unwrap();
        assert!(engine.snapshot().is_none());
        assert_eq!(engine.neighbors(), Err(IndexError::NotBuilt));
        assert_eq!(
            engine.query(0, 1.0, NeighborMode::NearestRadius),
            Err(IndexError::NotBuilt)
        );
    }

    #[test]
    fn test_rejects_count_not_power_of_two() {
        let grid = GridConfig::new_2d([0.0, 0.0], [4.0, 4.0], [8, 8]).unwrap();
        let mut engine = NeighborQueryEngine::new(EngineConfig::new(grid)).unwrap();
        let positions = scattered(300, 4.0, 1);
        assert_eq!(
            engine.rebuild(&positions).err(),
            Some(ConfigError::NotPowerOfTwo { len: 300 })
        );
        assert!(engine.snapshot().is_none());
    }

    #[test]
    fn test_failed_rebuild_drops_previous_snapshot() {
        let mut engine = NeighborQueryEngine::new(planar_config()).unwrap();
        engine.rebuild(&scattered(64, 4.0, 2)).unwrap();
        assert!(engine.rebuild(&scattered(65, 4.0, 2)).is_err());
        assert!(engine.snapshot().is_none());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut engine = NeighborQueryEngine::new(planar_config()).unwrap();
        let positions = scattered(128, 4.0, 3);
        let first = engine.step(&positions).unwrap();
        let second = engine.step(&positions).unwrap();
        assert_eq!(as_sets(&first), as_sets(&second));
    }

    #[test]
    fn test_old_snapshot_survives_rebuild() {
        let mut engine = NeighborQueryEngine::new(planar_config()).unwrap();
        let old = engine.rebuild(&scattered(64, 4.0, 4)).unwrap();
        let new = engine.rebuild(&scattered(128, 4.0, 5)).unwrap();
        assert_eq!(old.len(), 64);
        assert_eq!(new.len(), 128);
        assert_eq!(old.permutation().map(<[usize]>::len), Some(64));
    }

    #[test]
    fn test_backends_agree() {
        let positions = scattered(256, 4.0, 6);
        let mut results = Vec::new();
        for backend in [Backend::UniformGrid, Backend::AdaptiveTree, Backend::BruteForce] {
            let mut engine =
                NeighborQueryEngine::new(planar_config().with_backend(backend)).unwrap();
            let snapshot = engine.rebuild(&positions).unwrap();
            assert_eq!(snapshot.backend(), backend);
            results.push(as_sets(&engine.neighbors().unwrap()));
        }
        assert_eq!(results[0], results[2]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn test_parallel_and_serial_query_all_agree() {
        let mut engine = NeighborQueryEngine::new(planar_config()).unwrap();
        let snapshot = engine.rebuild(&scattered(128, 4.0, 7)).unwrap();
        let lists = snapshot.query_all(0.6, NeighborMode::NearestRadius).unwrap();
        for i in 0..snapshot.len() {
            let single: BTreeSet<usize> = snapshot
                .query(i, 0.6, NeighborMode::NearestRadius)
                .unwrap()
                .into_iter()
                .collect();
            let from_all: BTreeSet<usize> = lists.get(i).iter().copied().collect();
            assert_eq!(single, from_all);
        }
    }

    #[test]
    fn test_reconfigure_drops_snapshot() {
        let mut engine = NeighborQueryEngine::new(planar_config()).unwrap();
        engine.rebuild(&scattered(64, 4.0, 8)).unwrap();
        engine
            .reconfigure(planar_config().with_backend(Backend::BruteForce))
            .unwrap();
        assert!(engine.snapshot().is_none());
        assert_eq!(engine.config().backend, Backend::BruteForce);

        assert_eq!(
            engine.reconfigure(planar_config().with_radius(-1.0)),
            Err(ConfigError::InvalidRadius { radius: -1.0 })
        );
        assert_eq!(engine.config().backend, Backend::BruteForce);
    }

    #[test]
    fn test_tree_records_rejected() {
        let config = planar_config().with_backend(Backend::AdaptiveTree);
        let mut engine = NeighborQueryEngine::new(config).unwrap();
        let positions = vec![
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(1.2, 1.0, 0.0),
            Vector3::new(-0.2, 1.0, 0.0),
        ];
        let snapshot = engine.rebuild(&positions).unwrap();
        assert_eq!(snapshot.rejected(), &[2]);
        assert!(snapshot.tree().is_some());
        assert!(snapshot.permutation().is_none());

        // The outsider still queries, but nobody finds it.
        let lists = engine.query_all(1.5, NeighborMode::NearestRadius).unwrap();
        let mut outsider = lists.get(2).to_vec();
        outsider.sort_unstable();
        assert_eq!(outsider, vec![0, 1]);
        assert_eq!(lists.get(0), &[1]);
        assert_eq!(lists.get(1), &[0]);
    }

    #[test]
    fn test_tree_requires_planar() {
        let grid = GridConfig::new_3d([0.0; 3], [1.0; 3], [2, 2, 2]).unwrap();
        let config = EngineConfig::new(grid).with_backend(Backend::AdaptiveTree);
        assert_eq!(
            NeighborQueryEngine::new(config).err(),
            Some(ConfigError::TreeRequiresPlanar)
        );
    }

    #[test]
    fn test_query_errors() {
        let mut engine = NeighborQueryEngine::new(planar_config()).unwrap();
        engine.rebuild(&scattered(16, 4.0, 9)).unwrap();
        assert_eq!(
            engine.query(16, 1.0, NeighborMode::NearestRadius),
            Err(IndexError::ParticleOutOfRange { index: 16, len: 16 })
        );
        assert!(matches!(
            engine.query(0, f64::NAN, NeighborMode::NearestRadius),
            Err(IndexError::Config(ConfigError::InvalidRadius { .. }))
        ));
    }
}
