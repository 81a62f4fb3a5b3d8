use nalgebra::{Point2, Vector2, Vector3};
use neighborindex_rs::tree::Aabb;
use neighborindex_rs::{
    Backend, BitonicNetwork, ConfigError, EngineConfig, GridConfig, NeighborMode,
    NeighborQueryEngine, QuadTree, UniformGridIndex,
};
use std::collections::BTreeSet;

fn set(v: Vec<usize>) -> BTreeSet<usize> {
    v.into_iter().collect()
}

#[test]
fn test_line_of_eight() {
    let positions: Vec<Vector3<f64>> = (0..8).map(|i| Vector3::new(i as f64, 0.5, 0.0)).collect();
    let grid = GridConfig::new_2d([0.0, 0.0], [8.0, 1.0], [4, 1]).unwrap();
    let config = EngineConfig::new(grid).with_block_size(4).with_radius(1.5);
    let mut engine = NeighborQueryEngine::new(config).unwrap();
    engine.rebuild(&positions).unwrap();

    let q = |i| set(engine.query(i, 1.5, NeighborMode::NearestRadius).unwrap());
    assert_eq!(q(3), BTreeSet::from([2, 4]));
    assert_eq!(q(0), BTreeSet::from([1]));
    assert_eq!(q(7), BTreeSet::from([6]));
}

#[test]
fn test_grid_outputs() {
    let positions: Vec<Vector3<f64>> = (0..8).map(|i| Vector3::new(i as f64, 0.5, 0.0)).collect();
    let grid = GridConfig::new_2d([0.0, 0.0], [8.0, 1.0], [4, 1]).unwrap();
    let index = UniformGridIndex::build(&positions, &grid, &BitonicNetwork::new(4).unwrap()).unwrap();

    assert!(index.pairs().windows(2).all(|w| w[0].cell <= w[1].cell));
    assert_eq!(index.ranges().len(), 4);
    for (cell, range) in index.ranges().iter().enumerate() {
        assert_eq!(range.count, 2);
        let members = set(index.particles_in_cell(cell).to_vec());
        assert_eq!(members, BTreeSet::from([2 * cell, 2 * cell + 1]));
    }
    let labels: Vec<char> = "abcdefgh".chars().collect();
    let permuted = index.permute(&labels).unwrap();
    for (slot, &original) in index.permutation().iter().enumerate() {
        assert_eq!(permuted[slot], labels[original]);
    }
}

#[test]
fn test_three_hundred_particles_rejected() {
    let positions = vec![Vector3::new(0.5, 0.5, 0.0); 300];
    let grid = GridConfig::new_2d([0.0, 0.0], [1.0, 1.0], [4, 4]).unwrap();
    let mut engine = NeighborQueryEngine::new(EngineConfig::new(grid)).unwrap();
    let err = engine.rebuild(&positions).err();
    assert_eq!(err, Some(ConfigError::NotPowerOfTwo { len: 300 }));

    let positions = vec![Vector3::new(0.5, 0.5, 0.0); 256];
    assert_eq!(
        engine.rebuild(&positions).err(),
        Some(ConfigError::BelowBlockSize {
            len: 256,
            block_size: 512
        })
    );
}

#[test]
fn test_quadtree_diagonal() {
    let region = Aabb::new(Point2::new(2.0, 2.0), Vector2::new(2.0, 2.0));
    let points = (0..4).map(|i| (i, Point2::new(i as f64, i as f64)));
    let (tree, rejected) = QuadTree::build(region, 1, points).unwrap();
    assert!(rejected.is_empty());
    assert_eq!(tree.len(), 4);
    assert_eq!(tree.subdivisions(), 3);
    let occupied: Vec<usize> = tree
        .leaves()
        .map(|(_, pts)| pts.len())
        .filter(|&n| n > 0)
        .collect();
    assert_eq!(occupied, vec![1, 1, 1, 1]);
}

#[test]
fn test_coincident_particles_are_neighbors() {
    let positions = vec![Vector3::new(0.25, 0.25, 0.0); 4];
    let grid = GridConfig::new_2d([0.0, 0.0], [1.0, 1.0], [2, 2]).unwrap();
    for backend in [Backend::UniformGrid, Backend::AdaptiveTree, Backend::BruteForce] {
        let config = EngineConfig::new(grid.clone())
            .with_backend(backend)
            .with_block_size(4)
            .with_tree_capacity(1)
            .with_radius(0.0);
        let mut engine = NeighborQueryEngine::new(config).unwrap();
        let lists = engine.step(&positions).unwrap();
        for i in 0..4 {
            let expected: BTreeSet<usize> = (0..4).filter(|&j| j != i).collect();
            assert_eq!(set(lists.get(i).to_vec()), expected, "{:?}", backend);
        }
    }
}
