//! End-to-end connectivity scenarios over the interner and forest.

mod support;

use std::collections::HashSet;

use addrcluster::test_support::{disjoint_pairs, random_edges};
use addrcluster::AddressId;
use support::cluster_edges;

#[test]
fn three_edges_form_one_cluster_in_any_order() -> anyhow::Result<()> {
    let edges = [("A", "B"), ("C", "D"), ("B", "C")];
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let ordered: Vec<_> = order.iter().map(|&i| edges[i]).collect();
        let (interner, mut forest) = cluster_edges(&ordered)?;
        assert_eq!(interner.size(), 4);
        assert_eq!(forest.root_count(interner.size()), 1, "order {order:?}");

        let root = forest.find(interner.get("A").unwrap());
        for address in ["B", "C", "D"] {
            assert_eq!(forest.find(interner.get(address).unwrap()), root);
        }
    }
    Ok(())
}

#[test]
fn self_pair_is_a_single_cluster() -> anyhow::Result<()> {
    let (interner, mut forest) = cluster_edges(&[("A", "A")])?;
    assert_eq!(interner.size(), 1);
    assert_eq!(forest.root_count(interner.size()), 1);

    let a = interner.get("A").unwrap();
    assert!(!forest.union(a, a)?);
    Ok(())
}

#[test]
fn disjoint_pairs_stay_disjoint() -> anyhow::Result<()> {
    let pairs = disjoint_pairs(500);
    let refs: Vec<(&str, &str)> = pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let (interner, forest) = cluster_edges(&refs)?;
    assert_eq!(interner.size(), 1_000);
    assert_eq!(forest.root_count(interner.size()), 500);
    Ok(())
}

#[test]
fn connectivity_is_transitive_regardless_of_order() -> anyhow::Result<()> {
    for edges in [[("A", "B"), ("B", "C")], [("B", "C"), ("A", "B")]] {
        let (interner, mut forest) = cluster_edges(&edges)?;
        let a = forest.find(interner.get("A").unwrap());
        let b = forest.find(interner.get("B").unwrap());
        let c = forest.find(interner.get("C").unwrap());
        assert_eq!(a, b);
        assert_eq!(b, c);
    }
    Ok(())
}

#[test]
fn cluster_count_equals_distinct_roots() -> anyhow::Result<()> {
    let edges = random_edges(2_000, 1_500, 7);
    let refs: Vec<(&str, &str)> = edges.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let (interner, mut forest) = cluster_edges(&refs)?;

    let size = interner.size();
    let roots: HashSet<AddressId> = (0..size as u32)
        .map(|i| forest.find(AddressId(i)))
        .collect();
    assert_eq!(forest.root_count(size), roots.len());
    Ok(())
}

#[test]
fn every_find_is_one_hop_after_compression() -> anyhow::Result<()> {
    let edges = random_edges(500, 800, 11);
    let refs: Vec<(&str, &str)> = edges.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let (interner, mut forest) = cluster_edges(&refs)?;

    for i in 0..interner.size() as u32 {
        let root = forest.find(AddressId(i));
        assert_eq!(forest.parent_of(AddressId(i)), Some(root));
    }
    Ok(())
}
