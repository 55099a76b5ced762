//! Huffman tree for hierarchical softmax, stored as an index arena.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

/// Tree node. Leaves are `0..nleaves`; internal nodes follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub parent: Option<u32>,
    pub left: Option<u32>,
    pub right: Option<u32>,
    pub count: u64,
    /// True when this node is its parent's right child.
    pub binary: bool,
}

/// Binary tree over class frequencies; frequent classes sit near the root.
///
/// Built once before training and never modified afterwards. Internal node
/// `n` scores with output row `n - nleaves`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuffmanTree {
    nleaves: usize,
    nodes: Vec<Node>,
    /// Per leaf, the output rows from leaf to root.
    paths: Vec<Vec<u32>>,
    /// Per leaf, the branch taken at each step of `paths`.
    codes: Vec<Vec<bool>>,
}

impl HuffmanTree {
    /// Build from per-class counts. Ties merge the lower index first.
    pub fn new(counts: &[u64]) -> Self {
        let nleaves = counts.len();
        let mut nodes: Vec<Node> = counts
            .iter()
            .map(|&count| Node {
                parent: None,
                left: None,
                right: None,
                count,
                binary: false,
            })
            .collect();

        let mut heap: BinaryHeap<Reverse<(u64, u32)>> = counts
            .iter()
            .enumerate()
            .map(|(i, &c)| Reverse((c, i as u32)))
            .collect();
        while heap.len() > 1 {
            let (Some(Reverse((c1, a))), Some(Reverse((c2, b)))) = (heap.pop(), heap.pop()) else {
                break;
            };
            let id = nodes.len() as u32;
            nodes.push(Node {
                parent: None,
                left: Some(a),
                right: Some(b),
                count: c1 + c2,
                binary: false,
            });
            nodes[a as usize].parent = Some(id);
            nodes[b as usize].parent = Some(id);
            nodes[b as usize].binary = true;
            heap.push(Reverse((c1 + c2, id)));
        }

        let mut paths = Vec::with_capacity(nleaves);
        let mut codes = Vec::with_capacity(nleaves);
        for leaf in 0..nleaves {
            let mut path = Vec::new();
            let mut code = Vec::new();
            let mut node = leaf;
            while let Some(parent) = nodes[node].parent {
                path.push(parent - nleaves as u32);
                code.push(nodes[node].binary);
                node = parent as usize;
            }
            paths.push(path);
            codes.push(code);
        }

        Self {
            nleaves,
            nodes,
            paths,
            codes,
        }
    }

    pub fn nleaves(&self) -> usize {
        self.nleaves
    }

    /// Root node index; a single-leaf tree is its own root.
    pub fn root(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn is_leaf(&self, i: usize) -> bool {
        i < self.nleaves
    }

    /// Output rows on the path of `leaf`, leaf to root.
    pub fn path(&self, leaf: usize) -> &[u32] {
        &self.paths[leaf]
    }

    /// Branches on the path of `leaf`.
    pub fn code(&self, leaf: usize) -> &[bool] {
        &self.codes[leaf]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequent_leaves_are_shallow() {
        let tree = HuffmanTree::new(&[100, 50, 10, 5, 1]);
        assert_eq!(tree.nleaves(), 5);
        assert_eq!(tree.root(), 8);
        assert!(tree.path(0).len() < tree.path(4).len());
        for leaf in 0..5 {
            assert_eq!(tree.path(leaf).len(), tree.code(leaf).len());
            assert!(tree.path(leaf).iter().all(|&row| row < 4));
            assert_eq!(*tree.path(leaf).last().unwrap() as usize, tree.root() - 5);
        }
        assert_eq!(tree.node(tree.root()).count, 166);
    }

    #[test]
    fn test_codes_distinguish_leaves() {
        let tree = HuffmanTree::new(&[3, 3, 3, 3]);
        let mut seen: Vec<(Vec<u32>, Vec<bool>)> = (0..4)
            .map(|l| (tree.path(l).to_vec(), tree.code(l).to_vec()))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_single_leaf() {
        let tree = HuffmanTree::new(&[7]);
        assert_eq!(tree.root(), 0);
        assert!(tree.is_leaf(tree.root()));
        assert!(tree.path(0).is_empty());
    }
}
