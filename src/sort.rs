//! Bitonic sorting network with a block-local compare-exchange kernel.
//!
//! The network never branches on data: every pass compares fixed index pairs,
//! so each pass is one data-parallel loop. Merges wider than a block are
//! turned into block-local ones by reinterpreting the array as a matrix with
//! `block_size` columns and transposing it, which is why the input length is
//! bounded by `block_size²`.

use crate::config::DEFAULT_BLOCK_SIZE;
use crate::error::ConfigError;
use crate::grid::ParticleCellPair;
use rayon::prelude::*;
use tracing::{debug_span, info_span};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitonicNetwork {
    block_size: usize,
}

impl Default for BitonicNetwork {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl BitonicNetwork {
    pub fn new(block_size: usize) -> Result<Self, ConfigError> {
        if block_size < 2 || !block_size.is_power_of_two() {
            return Err(ConfigError::InvalidBlockSize { block_size });
        }
        Ok(Self { block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Largest input the network can sort.
    pub fn max_len(&self) -> usize {
        self.block_size.saturating_mul(self.block_size)
    }

    /// Rejects lengths the network cannot sort without padding or truncation.
    pub fn check_len(&self, len: usize) -> Result<(), ConfigError> {
        if !len.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { len });
        }
        if len < self.block_size {
            return Err(ConfigError::BelowBlockSize {
                len,
                block_size: self.block_size,
            });
        }
        if len > self.max_len() {
            return Err(ConfigError::ExceedsNetworkCapacity {
                len,
                max: self.max_len(),
            });
        }
        Ok(())
    }

    /// Sorts particle/cell pairs ascending by cell id.
    pub fn sort(&self, pairs: &mut [ParticleCellPair]) -> Result<(), ConfigError> {
        self.sort_by_key(pairs, |p| p.cell)
    }

    /// Sorts ascending by `key`. Order among equal keys is unspecified.
    pub fn sort_by_key<T, K, F>(&self, data: &mut [T], key: F) -> Result<(), ConfigError>
    where
        T: Copy + Send + Sync,
        K: Ord,
        F: Fn(&T) -> K + Sync,
    {
        let n = data.len();
        self.check_len(n)?;
        let _span = info_span!("BitonicNetwork::sort", n, block = self.block_size).entered();

        let block = self.block_size;
        let width = block;
        let height = n / block;

        // 1. Levels that fit in a block: sort rows directly.
        {
            let _s = debug_span!("block_levels").entered();
            let mut level = 2;
            while level <= block {
                block_pass(data, block, level, level, &key);
                level <<= 1;
            }
        }

        if height == 1 {
            return Ok(());
        }

        // 2. Wider levels: transpose, sort columns, transpose back, sort rows.
        let _s = debug_span!("transpose_levels", height).entered();
        let mut scratch = data.to_vec();
        let mut level = block << 1;
        while level <= n {
            transpose(data, &mut scratch, width, height);
            block_pass(&mut scratch, block, level / block, (level & !n) / block, &key);
            transpose(&scratch, data, height, width);
            block_pass(data, block, block, level, &key);
            level <<= 1;
        }
        Ok(())
    }
}

/// One bitonic merge stage inside every block.
///
/// `level` is the size of the bitonic sequences being merged; the direction
/// of each pair comes from `index & level_mask`, with `index` the global
/// position in `data`.
fn block_pass<T, K, F>(data: &mut [T], block: usize, level: usize, level_mask: usize, key: &F)
where
    T: Copy + Send + Sync,
    K: Ord,
    F: Fn(&T) -> K + Sync,
{
    data.par_chunks_mut(block)
        .enumerate()
        .for_each(|(b, chunk)| {
            let base = b * block;
            let mut j = level >> 1;
            while j > 0 {
                for lo in 0..chunk.len() {
                    if lo & j != 0 {
                        continue;
                    }
                    let hi = lo | j;
                    let descending = (base + lo) & level_mask != 0;
                    let out_of_order = if descending {
                        key(&chunk[lo]) < key(&chunk[hi])
                    } else {
                        key(&chunk[lo]) > key(&chunk[hi])
                    };
                    if out_of_order {
                        chunk.swap(lo, hi);
                    }
                }
                j >>= 1;
            }
        });
}

/// Transposes `input`, read as `height` rows of `width`, into `output` as
/// `width` rows of `height`.
fn transpose<T: Copy + Send + Sync>(input: &[T], output: &mut [T], width: usize, height: usize) {
    output
        .par_chunks_mut(height)
        .enumerate()
        .for_each(|(x, row)| {
            for (y, slot) in row.iter_mut().enumerate() {
                *slot = input[y * width + x];
            }
        });
}
