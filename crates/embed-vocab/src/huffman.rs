//! Huffman coding of the vocabulary for hierarchical softmax.
//!
//! The tree lives in `2n - 1` slots: leaves `0..n` (entries sorted by
//! descending count) followed by internal nodes `n..2n-1`, created in order of
//! increasing weight. Two cursors walk the slots, one down from the last leaf
//! and one up through the internal nodes, and each step merges the two
//! lightest available nodes. No priority queue is needed because both
//! sequences are already monotonic.
//!
//! Bit order: `code` starts at 1 (a length sentinel) and gains one bit per
//! edge while walking from the leaf to the root, so the bit nearest the
//! sentinel belongs to the leaf and the least-significant bit belongs to the
//! child of the root. `points[d]` is the internal node (relative to `n`) that
//! bit `d` branches from, root first: `points[0]` is always `n - 2`.

use crate::{VocabError, Vocabulary};

/// Maximum Huffman code length (and number of points) per word.
pub const MAX_CODE_LENGTH: usize = 40;

/// Weight of an internal node that has not been created yet.
const UNBUILT: u64 = u64::MAX;

struct Node {
    weight: u64,
    parent: usize,
    /// Set when this node was the second one taken in its merge.
    bit: bool,
}

impl Vocabulary {
    /// Assign a Huffman code and point path to every entry.
    ///
    /// Entries are first stably sorted by descending count (so ids become
    /// frequency ranks) and the index is rebuilt.
    pub fn encode(&mut self) -> Result<(), VocabError> {
        let n = self.entries.len();
        if n == 0 {
            return Err(VocabError::EmptyVocabulary);
        }
        if n >= (u32::MAX / 2) as usize {
            return Err(VocabError::TooLarge { len: n });
        }

        self.sort_by_count();
        self.rebuild_index();

        let mut nodes: Vec<Node> = Vec::new();
        embed_core::reserve_pow2(&mut nodes, 2 * n)?;
        nodes.extend(self.entries.iter().map(|e| Node {
            weight: u64::from(e.count),
            parent: 0,
            bit: false,
        }));
        nodes.extend((n..2 * n).map(|_| Node {
            weight: UNBUILT,
            parent: 0,
            bit: false,
        }));

        // `leaf` is the next unmerged leaf (moving down), `inner` the next
        // unmerged internal node (moving up).
        let mut leaf = n as isize - 1;
        let mut inner = n;
        let mut take = |nodes: &[Node]| -> usize {
            if leaf >= 0 && nodes[leaf as usize].weight < nodes[inner].weight {
                leaf -= 1;
                (leaf + 1) as usize
            } else {
                inner += 1;
                inner - 1
            }
        };

        for a in 0..n - 1 {
            let m1 = take(nodes.as_slice());
            let m2 = take(nodes.as_slice());
            let parent = n + a;
            nodes[parent].weight = nodes[m1].weight + nodes[m2].weight;
            nodes[m1].parent = parent;
            nodes[m2].parent = parent;
            nodes[m2].bit = true;
        }

        let root = 2 * n - 2;
        let mut codes: Vec<(u64, Vec<u32>)> = Vec::new();
        embed_core::reserve_pow2(&mut codes, n)?;
        let mut path = Vec::with_capacity(MAX_CODE_LENGTH);
        for i in 0..n {
            let mut code = 1u64;
            path.clear();
            let mut b = i;
            while b != root {
                if path.len() == MAX_CODE_LENGTH {
                    return Err(VocabError::CodeTooLong {
                        depth: path.len() + 1,
                    });
                }
                code = (code << 1) | u64::from(nodes[b].bit);
                b = nodes[b].parent;
                path.push(b);
            }
            // path holds the ancestors leaf-first; points are root-first.
            let points: Vec<u32> = path.iter().rev().map(|&p| (p - n) as u32).collect();
            codes.push((code, points));
        }

        for (entry, (code, points)) in self.entries.iter_mut().zip(codes) {
            entry.code = code;
            entry.points = points;
        }
        self.encoded = true;
        tracing::debug!(words = n, "encoded vocabulary");
        Ok(())
    }
}
