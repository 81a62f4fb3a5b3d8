/// Per-particle neighbor lists in compressed (CSR) form.
///
/// `indices[offsets[i]..offsets[i + 1]]` are the neighbors of particle `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborLists {
    offsets: Vec<usize>,
    indices: Vec<usize>,
}

impl NeighborLists {
    pub fn from_lists(lists: Vec<Vec<usize>>) -> Self {
        let total: usize = lists.iter().map(Vec::len).sum();
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let mut indices = Vec::with_capacity(total);
        offsets.push(0);
        for list in lists {
            indices.extend(list);
            offsets.push(indices.len());
        }
        Self { offsets, indices }
    }

    /// Number of particles (not pairs).
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Neighbors of particle `i`; empty when `i` is out of range.
    pub fn get(&self, i: usize) -> &[usize] {
        match (self.offsets.get(i), self.offsets.get(i + 1)) {
            (Some(&a), Some(&b)) => &self.indices[a..b],
            _ => &[],
        }
    }

    pub fn count(&self, i: usize) -> usize {
        self.get(i).len()
    }

    /// Total number of directed (i, j) entries.
    pub fn num_entries(&self) -> usize {
        self.indices.len()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        (0..self.len()).map(move |i| (i, self.get(i)))
    }

    /// Source/target arrays of every directed entry, sources first.
    pub fn to_edge_index(&self) -> (Vec<i64>, Vec<i64>) {
        let mut edge_i = Vec::with_capacity(self.indices.len());
        let mut edge_j = Vec::with_capacity(self.indices.len());
        for (i, neighbors) in self.iter() {
            for &j in neighbors {
                edge_i.push(i as i64);
                edge_j.push(j as i64);
            }
        }
        (edge_i, edge_j)
    }

    /// Same lists with every entry sorted, for order-insensitive comparison.
    pub fn canonical(&self) -> Self {
        let mut out = self.clone();
        for w in out.offsets.windows(2) {
            out.indices[w[0]..w[1]].sort_unstable();
        }
        out
    }
}
