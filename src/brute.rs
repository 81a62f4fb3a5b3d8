use crate::neighbors::NeighborLists;
use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::info_span;
use wide::{CmpLe, f64x4};

/// All-pairs reference search over structure-of-arrays positions.
///
/// O(n) per query; used as a backend for small systems and as the ground
/// truth the bucketed backends are checked against.
pub struct BruteForceIndex {
    px: Vec<f64>,
    py: Vec<f64>,
    pz: Vec<f64>,
    planar: bool,
}

impl BruteForceIndex {
    pub fn new(positions: &[Vector3<f64>], planar: bool) -> Self {
        let n = positions.len();
        let mut px = Vec::with_capacity(n);
        let mut py = Vec::with_capacity(n);
        let mut pz = Vec::with_capacity(n);
        for p in positions {
            px.push(p.x);
            py.push(p.y);
            pz.push(if planar { 0.0 } else { p.z });
        }
        Self { px, py, pz, planar }
    }

    pub fn len(&self) -> usize {
        self.px.len()
    }

    pub fn is_empty(&self) -> bool {
        self.px.is_empty()
    }

    pub fn position(&self, i: usize) -> Option<Vector3<f64>> {
        if i < self.len() {
            Some(Vector3::new(self.px[i], self.py[i], self.pz[i]))
        } else {
            None
        }
    }

    pub fn query_into(
        &self,
        position: &Vector3<f64>,
        radius: f64,
        exclude: Option<usize>,
        out: &mut Vec<usize>,
    ) {
        let n = self.len();
        let radius_sq = radius * radius;
        let qz_scalar = if self.planar { 0.0 } else { position.z };
        let qx = f64x4::splat(position.x);
        let qy = f64x4::splat(position.y);
        let qz = f64x4::splat(qz_scalar);
        let radius_sq_v = f64x4::splat(radius_sq);

        let lanes = |v: &[f64], j: usize| f64x4::new([v[j], v[j + 1], v[j + 2], v[j + 3]]);

        let mut j = 0;
        while j + 4 <= n {
            let dx = lanes(&self.px[..], j) - qx;
            let dy = lanes(&self.py[..], j) - qy;
            let dz = lanes(&self.pz[..], j) - qz;
            let d2 = dx * dx + dy * dy + dz * dz;
            let mask = d2.cmp_le(radius_sq_v).to_array();
            for (lane, m) in mask.iter().enumerate() {
                let k = j + lane;
                if m.to_bits() != 0 && Some(k) != exclude {
                    out.push(k);
                }
            }
            j += 4;
        }
        for k in j..n {
            if Some(k) == exclude {
                continue;
            }
            let dx = self.px[k] - position.x;
            let dy = self.py[k] - position.y;
            let dz = self.pz[k] - qz_scalar;
            if dx * dx + dy * dy + dz * dz <= radius_sq {
                out.push(k);
            }
        }
    }

    pub fn query_particle(&self, particle: usize, radius: f64) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(p) = self.position(particle) {
            self.query_into(&p, radius, Some(particle), &mut out);
        }
        out
    }
}

/// Neighbor lists for every particle by exhaustive comparison.
pub fn brute_force_neighbors(positions: &[Vector3<f64>], radius: f64, planar: bool) -> NeighborLists {
    let _span = info_span!("brute_force_neighbors", n_particles = positions.len()).entered();
    let index = BruteForceIndex::new(positions, planar);
    let lists: Vec<Vec<usize>> = (0..positions.len())
        .into_par_iter()
        .map(|i| index.query_particle(i, radius))
        .collect();
    NeighborLists::from_lists(lists)
}
