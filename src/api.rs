use crate::config::EngineConfig;
use crate::engine::NeighborQueryEngine;
use crate::error::IndexError;
use nalgebra::Vector3;
use std::borrow::Cow;

/// Flat neighbor list for callers that work with plain arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborList {
    /// Edge indices: [source_0, source_1, ..., target_0, target_1, ...]
    /// Length is 2 * num_edges.
    pub edge_index: Vec<i64>,
}

impl NeighborList {
    pub fn num_edges(&self) -> usize {
        self.edge_index.len() / 2
    }

    pub fn sources(&self) -> &[i64] {
        &self.edge_index[..self.num_edges()]
    }

    pub fn targets(&self) -> &[i64] {
        &self.edge_index[self.num_edges()..]
    }
}

/// Reinterprets `[f64; 3]` rows as vectors without copying when the layout
/// allows it.
pub fn as_vectors(positions: &[[f64; 3]]) -> Cow<'_, [Vector3<f64>]> {
    match bytemuck::try_cast_slice::<[f64; 3], Vector3<f64>>(positions) {
        Ok(v) => Cow::Borrowed(v),
        Err(_) => Cow::Owned(positions.iter().map(|p| Vector3::from(*p)).collect()),
    }
}

/// One-shot neighbor search: builds an index for `positions` under `config`
/// and returns every directed edge within the configured radius.
pub fn build_neighborlists(
    positions: &[[f64; 3]],
    config: &EngineConfig,
) -> Result<NeighborList, IndexError> {
    let positions = as_vectors(positions);
    let mut engine = NeighborQueryEngine::new(config.clone())?;
    let lists = engine.step(&positions)?;
    let (mut edge_index, targets) = lists.to_edge_index();
    edge_index.extend(targets);
    Ok(NeighborList { edge_index })
}
