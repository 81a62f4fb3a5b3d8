//! Spatial neighbor search for particle systems.
//!
//! Three interchangeable backends sit behind [`NeighborQueryEngine`]: a
//! uniform bucket grid sorted with a bitonic network, an adaptive quadtree,
//! and an all-pairs brute-force reference.

pub mod api;
pub mod brute;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod neighbors;
pub mod sort;
pub mod tree;

pub use api::{NeighborList, build_neighborlists};
pub use config::{Backend, EngineConfig, GridConfig, NeighborMode};
pub use engine::{IndexSnapshot, NeighborQueryEngine, SpatialIndex};
pub use error::{ConfigError, IndexError};
pub use grid::{CellId, CellRange, ParticleCellPair, UniformGridIndex};
pub use neighbors::NeighborLists;
pub use sort::BitonicNetwork;
pub use tree::{Aabb, QuadTree};

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber. `RUST_LOG` wins over `level`, which
/// wins over `info`. Later calls are no-ops.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(true)
        .try_init();
}

/// Size of the rayon pool that parallel builds and queries run on.
pub fn get_num_threads() -> usize {
    rayon::current_num_threads()
}
