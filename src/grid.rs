use crate::config::{GridConfig, NeighborMode};
use crate::error::{ConfigError, IndexError};
use crate::sort::BitonicNetwork;
use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::{debug, info_span, warn};

pub type CellId = usize;

/// Sort record: one particle and the bucket it falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParticleCellPair {
    pub particle: usize,
    pub cell: CellId,
}

/// Contiguous span of the sorted pair array owned by one bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellRange {
    pub start: usize,
    pub count: usize,
}

impl CellRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Bucket-sorted snapshot of one step's particle positions.
pub struct UniformGridIndex {
    config: GridConfig,
    /// Pairs sorted by cell id.
    pairs: Vec<ParticleCellPair>,
    /// ranges[cell] = span of `pairs` in that cell
    ranges: Vec<CellRange>,
    /// permutation[sorted_idx] = original_idx
    permutation: Vec<usize>,
    /// slot_of[original_idx] = sorted_idx
    slot_of: Vec<usize>,
    /// Positions in sorted order (index matches sorted_idx).
    sorted_positions: Vec<Vector3<f64>>,
}

impl UniformGridIndex {
    pub fn build(
        positions: &[Vector3<f64>],
        config: &GridConfig,
        network: &BitonicNetwork,
    ) -> Result<Self, ConfigError> {
        let _span = info_span!("UniformGridIndex::build", n_particles = positions.len()).entered();
        network.check_len(positions.len())?;
        let n = positions.len();

        // 1. Assign cell ids
        let mut pairs: Vec<ParticleCellPair> = {
            let _s = info_span!("assign_cells").entered();
            positions
                .par_iter()
                .enumerate()
                .map(|(i, p)| ParticleCellPair {
                    particle: i,
                    cell: config.cell_id(p),
                })
                .collect()
        };

        let clamped = positions.par_iter().filter(|p| !config.contains(p)).count();
        if clamped > 0 {
            warn!(
                clamped,
                "particles outside the grid boundary were clamped into edge buckets"
            );
        }

        // 2. Sort by cell id
        network.sort(&mut pairs)?;

        // 3-4. Range table from run starts
        let mut ranges = vec![CellRange::default(); config.cell_count()];
        {
            let _s = info_span!("build_ranges").entered();
            let run_starts: Vec<usize> = (0..n)
                .into_par_iter()
                .filter(|&i| i == 0 || pairs[i].cell != pairs[i - 1].cell)
                .collect();
            for (k, &start) in run_starts.iter().enumerate() {
                let end = run_starts.get(k + 1).copied().unwrap_or(n);
                ranges[pairs[start].cell] = CellRange {
                    start,
                    count: end - start,
                };
            }
            debug!(
                occupied_cells = run_starts.len(),
                total_cells = ranges.len(),
                "range table built"
            );
        }

        // 5. Permutation and rearranged positions
        let permutation: Vec<usize> = pairs.iter().map(|p| p.particle).collect();
        let sorted_positions: Vec<Vector3<f64>> =
            permutation.par_iter().map(|&i| positions[i]).collect();
        let mut slot_of = vec![0; n];
        for (slot, &original) in permutation.iter().enumerate() {
            slot_of[original] = slot;
        }

        Ok(Self {
            config: config.clone(),
            pairs,
            ranges,
            permutation,
            slot_of,
            sorted_positions,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[ParticleCellPair] {
        &self.pairs
    }

    pub fn ranges(&self) -> &[CellRange] {
        &self.ranges
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn sorted_positions(&self) -> &[Vector3<f64>] {
        &self.sorted_positions
    }

    pub fn cell_of(&self, particle: usize) -> Option<CellId> {
        self.slot_of.get(particle).map(|&s| self.pairs[s].cell)
    }

    /// Original indices of the particles in one bucket.
    pub fn particles_in_cell(&self, cell: CellId) -> &[usize] {
        match self.ranges.get(cell) {
            Some(r) => &self.permutation[r.start..r.end()],
            None => &[],
        }
    }

    /// Rearranges a per-particle payload into bucket order.
    pub fn permute<T: Clone>(&self, payload: &[T]) -> Result<Vec<T>, IndexError> {
        if payload.len() != self.len() {
            return Err(IndexError::PayloadLength {
                expected: self.len(),
                found: payload.len(),
            });
        }
        Ok(self
            .permutation
            .iter()
            .map(|&i| payload[i].clone())
            .collect())
    }

    /// Neighbors of an indexed particle, never including the particle itself.
    pub fn query_particle(&self, particle: usize, radius: f64, mode: NeighborMode) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(&slot) = self.slot_of.get(particle) {
            let pos = self.sorted_positions[slot];
            self.query_into(&pos, radius, mode, Some(particle), &mut out);
        }
        out
    }

    /// Every indexed particle within `radius` of an arbitrary point.
    pub fn query_point(&self, position: &Vector3<f64>, radius: f64, mode: NeighborMode) -> Vec<usize> {
        let mut out = Vec::new();
        self.query_into(position, radius, mode, None, &mut out);
        out
    }

    pub fn query_into(
        &self,
        position: &Vector3<f64>,
        radius: f64,
        mode: NeighborMode,
        exclude: Option<usize>,
        out: &mut Vec<usize>,
    ) {
        let radius_sq = radius * radius;
        let buckets = self.config.buckets();
        let (lo, hi) = match mode {
            NeighborMode::NearestRadius => {
                let r = Vector3::repeat(radius);
                (
                    self.config.cell_coords(&(position - r)),
                    self.config.cell_coords(&(position + r)),
                )
            }
            NeighborMode::ThreeByThreeBlock => {
                let c = self.config.cell_coords(position);
                (
                    c.map(|v| v.saturating_sub(1)),
                    Vector3::new(
                        (c.x + 1).min(buckets.x - 1),
                        (c.y + 1).min(buckets.y - 1),
                        (c.z + 1).min(buckets.z - 1),
                    ),
                )
            }
        };

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let cell = self.config.linear_index(&Vector3::new(x, y, z));
                    let range = self.ranges[cell];
                    for slot in range.start..range.end() {
                        let j = self.permutation[slot];
                        if Some(j) == exclude {
                            continue;
                        }
                        if self.config.distance_sq(position, &self.sorted_positions[slot])
                            <= radius_sq
                        {
                            out.push(j);
                        }
                    }
                }
            }
        }
    }
}
