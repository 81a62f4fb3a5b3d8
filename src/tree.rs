//! Arena-backed adaptive quadtree.
//!
//! Nodes live in one `Vec` and refer to their children by index: a node is
//! either a leaf holding up to `capacity` points, or an internal node whose
//! four children are stored contiguously starting at `first_child`.
//!
//! Quadrant layout:
//! ```text
//! +-------+-------+
//! |   2   |   3   |
//! +-------+-------+
//! |   0   |   1   |
//! +-------+-------+
//! ```

use crate::config::MAX_TREE_DEPTH;
use crate::error::ConfigError;
use nalgebra::{Point2, Vector2};
use tracing::{debug, info_span};

/// Axis-aligned box. Children share their parent's midpoint exactly, so a
/// point routed by [`Aabb::quadrant`] always lies inside the child's bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point2<f64>,
    pub max: Point2<f64>,
}

impl Aabb {
    /// Box from a center point and half extents.
    pub fn new(center: Point2<f64>, half: Vector2<f64>) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn from_min_max(min: Point2<f64>, max: Point2<f64>) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Point2<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn half_extents(&self) -> Vector2<f64> {
        (self.max - self.min) / 2.0
    }

    /// Closed-box containment.
    pub fn contains(&self, p: &Point2<f64>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Quadrant of `p` relative to the center; ties go up and right.
    pub fn quadrant(&self, p: &Point2<f64>) -> usize {
        let c = self.center();
        let x_bit = (p.x >= c.x) as usize;
        let y_bit = (p.y >= c.y) as usize;
        x_bit | (y_bit << 1)
    }

    pub fn child(&self, quadrant: usize) -> Aabb {
        let c = self.center();
        let (x0, x1) = if quadrant & 1 != 0 {
            (c.x, self.max.x)
        } else {
            (self.min.x, c.x)
        };
        let (y0, y1) = if quadrant & 2 != 0 {
            (c.y, self.max.y)
        } else {
            (self.min.y, c.y)
        };
        Aabb::from_min_max(Point2::new(x0, y0), Point2::new(x1, y1))
    }

    /// Squared distance from `p` to the closest point of the box (zero inside).
    pub fn distance_sq(&self, p: &Point2<f64>) -> f64 {
        let near = Point2::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
        );
        (near - p).norm_squared()
    }

    /// Coarse test: the box grown by `radius` contains `p`. Admits false
    /// positives near the corners, never false negatives.
    pub fn expanded_contains(&self, p: &Point2<f64>, radius: f64) -> bool {
        p.x >= self.min.x - radius
            && p.x <= self.max.x + radius
            && p.y >= self.min.y - radius
            && p.y <= self.max.y + radius
    }

    /// Exact disc/box intersection.
    pub fn intersects_disc(&self, center: &Point2<f64>, radius: f64) -> bool {
        self.expanded_contains(center, radius) && self.distance_sq(center) <= radius * radius
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeEntry {
    pub index: usize,
    pub position: Point2<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

#[derive(Clone, Debug)]
struct Node {
    region: Aabb,
    depth: u32,
    points: Vec<TreeEntry>,
    first_child: Option<usize>,
}

impl Node {
    fn leaf(region: Aabb, depth: u32) -> Self {
        Self {
            region,
            depth,
            points: Vec::new(),
            first_child: None,
        }
    }
}

pub struct QuadTree {
    nodes: Vec<Node>,
    capacity: usize,
    max_depth: u32,
    len: usize,
}

impl QuadTree {
    pub fn new(region: Aabb, capacity: usize) -> Result<Self, ConfigError> {
        Self::with_max_depth(region, capacity, MAX_TREE_DEPTH)
    }

    /// Nodes at `max_depth` stop splitting and keep every point they receive.
    pub fn with_max_depth(region: Aabb, capacity: usize, max_depth: u32) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            nodes: vec![Node::leaf(region, 0)],
            capacity,
            max_depth,
            len: 0,
        })
    }

    /// Builds a tree by inserting points in order. Returns the tree and the
    /// indices of points that fell outside `region`.
    pub fn build(
        region: Aabb,
        capacity: usize,
        points: impl IntoIterator<Item = (usize, Point2<f64>)>,
    ) -> Result<(Self, Vec<usize>), ConfigError> {
        let _span = info_span!("QuadTree::build", capacity).entered();
        let mut tree = Self::new(region, capacity)?;
        let mut rejected = Vec::new();
        for (index, p) in points {
            if !tree.insert(index, p) {
                rejected.push(index);
            }
        }
        debug!(
            points = tree.len,
            nodes = tree.nodes.len(),
            rejected = rejected.len(),
            "quadtree built"
        );
        Ok((tree, rejected))
    }

    pub fn region(&self) -> &Aabb {
        &self.nodes[0].region
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf-to-internal transitions so far.
    pub fn subdivisions(&self) -> usize {
        (self.nodes.len() - 1) / 4
    }

    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn node_kind(&self, node: usize) -> Option<NodeKind> {
        self.nodes.get(node).map(|n| match n.first_child {
            Some(_) => NodeKind::Internal,
            None => NodeKind::Leaf,
        })
    }

    /// Leaf regions with their resident points.
    pub fn leaves(&self) -> impl Iterator<Item = (&Aabb, &[TreeEntry])> + '_ {
        self.nodes
            .iter()
            .filter(|n| n.first_child.is_none())
            .map(|n| (&n.region, n.points.as_slice()))
    }

    /// Inserts a point. Returns false, leaving the tree unchanged, when the
    /// point lies outside the root region.
    pub fn insert(&mut self, index: usize, position: Point2<f64>) -> bool {
        if !self.nodes[0].region.contains(&position) {
            return false;
        }
        let entry = TreeEntry { index, position };
        let mut node = 0;
        loop {
            if let Some(first) = self.nodes[node].first_child {
                node = first + self.nodes[node].region.quadrant(&position);
                continue;
            }
            let n = &self.nodes[node];
            if n.points.len() < self.capacity || n.depth >= self.max_depth {
                self.nodes[node].points.push(entry);
                self.len += 1;
                return true;
            }
            self.subdivide(node);
        }
    }

    fn subdivide(&mut self, node: usize) {
        let first = self.nodes.len();
        let region = self.nodes[node].region;
        let depth = self.nodes[node].depth + 1;
        for q in 0..4 {
            self.nodes.push(Node::leaf(region.child(q), depth));
        }
        let residents = std::mem::take(&mut self.nodes[node].points);
        self.nodes[node].first_child = Some(first);
        for e in residents {
            let child = first + region.quadrant(&e.position);
            self.nodes[child].points.push(e);
        }
    }

    /// Every stored point within `radius` of `center`, the query point
    /// itself included if it was inserted.
    pub fn query(&self, center: &Point2<f64>, radius: f64) -> Vec<TreeEntry> {
        let mut out = Vec::new();
        self.query_into(center, radius, &mut out);
        out
    }

    pub fn query_into(&self, center: &Point2<f64>, radius: f64, out: &mut Vec<TreeEntry>) {
        let radius_sq = radius * radius;
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if !node.region.intersects_disc(center, radius) {
                continue;
            }
            for e in &node.points {
                if (e.position - center).norm_squared() <= radius_sq {
                    out.push(*e);
                }
            }
            if let Some(first) = node.first_child {
                stack.extend(first..first + 4);
            }
        }
    }
}
