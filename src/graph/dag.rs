//! Deterministic topological ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

/// Orders `nodes` so every node comes after its predecessors.
///
/// `predecessors[n]` lists the nodes that must come before `n`; entries not
/// in `nodes` are ignored. Among ready nodes, the one earliest in `nodes`
/// goes first, so the result is stable for a given input order.
///
/// # Errors
///
/// Returns the nodes of one cycle, in edge order, if there is no valid order.
pub fn topological_order<K>(nodes: &[K], predecessors: &HashMap<K, BTreeSet<K>>) -> Result<Vec<K>, Vec<K>>
where
    K: Clone + Eq + Hash + Ord,
{
    let position: HashMap<&K, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();

    let mut remaining: Vec<usize> = vec![0; nodes.len()];
    let mut successors: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        let Some(preds) = predecessors.get(node) else {
            continue;
        };
        for pred in preds {
            if let Some(&p) = position.get(pred)
                && p != i
            {
                remaining[i] += 1;
                successors.entry(p).or_default().push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        order.push(nodes[i].clone());
        for &next in successors.get(&i).into_iter().flatten() {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        Err(find_cycle(nodes, &position, predecessors, &remaining))
    }
}

/// Follows predecessor edges from an unresolved node until a node repeats.
fn find_cycle<K>(
    nodes: &[K],
    position: &HashMap<&K, usize>,
    predecessors: &HashMap<K, BTreeSet<K>>,
    remaining: &[usize],
) -> Vec<K>
where
    K: Clone + Eq + Hash + Ord,
{
    let Some(start) = (0..nodes.len()).find(|&i| remaining[i] > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut seen: HashMap<usize, usize> = HashMap::new();
    let mut current = start;
    loop {
        if let Some(&at) = seen.get(&current) {
            return path[at..].iter().map(|&i| nodes[i].clone()).collect();
        }
        seen.insert(current, path.len());
        path.push(current);

        // Every unresolved node has at least one unresolved predecessor.
        let next = predecessors.get(&nodes[current]).and_then(|preds| {
            preds
                .iter()
                .filter_map(|p| position.get(p).copied())
                .find(|&p| remaining[p] > 0)
        });
        match next {
            Some(p) => current = p,
            None => return path.iter().map(|&i| nodes[i].clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preds(edges: &[(&'static str, &'static str)]) -> HashMap<&'static str, BTreeSet<&'static str>> {
        let mut map: HashMap<_, BTreeSet<_>> = HashMap::new();
        for (node, pred) in edges {
            map.entry(*node).or_default().insert(*pred);
        }
        map
    }

    #[test]
    fn test_ties_follow_input_order() {
        let nodes = ["c", "a", "b"];
        let order = topological_order(&nodes, &HashMap::new()).expect("acyclic");
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependencies_first() {
        let nodes = ["route", "subnet", "vpc", "igw"];
        let edges = preds(&[("route", "igw"), ("subnet", "vpc"), ("igw", "vpc"), ("route", "subnet")]);
        let order = topological_order(&nodes, &edges).expect("acyclic");
        assert_eq!(order, vec!["vpc", "subnet", "igw", "route"]);
    }

    #[test]
    fn test_cycle_reported() {
        let nodes = ["x", "a", "b", "c"];
        let edges = preds(&[("a", "c"), ("b", "a"), ("c", "b")]);
        let cycle = topological_order(&nodes, &edges).unwrap_err();
        assert_eq!(cycle.len(), 3);
        for node in ["a", "b", "c"] {
            assert!(cycle.contains(&node));
        }
    }

    #[test]
    fn test_unknown_predecessors_ignored() {
        let nodes = ["a"];
        let edges = preds(&[("a", "gone")]);
        assert_eq!(topological_order(&nodes, &edges), Ok(vec!["a"]));
    }
}
