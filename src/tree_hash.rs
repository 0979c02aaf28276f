//! RFC 6962 §2.1 Merkle Tree Hash, recomputed by streaming over an archive.
//!
//! The tree is never materialized: [`StreamingHasher`] keeps only a stack of
//! at most `log2(n)` partial hashes, merging equal-sized subtrees as they
//! appear (the same trick a binary counter uses to track carries).

use crate::archive::Archive;
use crate::progress::{CoalescingReporter, OperationStatus};
use crate::utils::sha256;
use crate::Error;

/// How many leaves pass between progress reports during [`hash_archive`].
/// Coarse enough that a multi-million-entry log doesn't fire the callback
/// once per leaf (§4.4).
const PROGRESS_INTERVAL: u64 = 10_000;

const LEAF_PREFIX: u8 = 0x00;
const INTERNAL_PREFIX: u8 = 0x01;

/// `HASH(0x00 || leaf_input)`, the RFC 6962 leaf hash. The empty tree's hash
/// is `HASH()` with no prefix at all (see [`empty_hash`]).
pub fn leaf_hash(leaf_input: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(1 + leaf_input.len());
    buf.push(LEAF_PREFIX);
    buf.extend_from_slice(leaf_input);
    sha256(&buf)
}

/// `HASH(0x01 || left || right)`, the RFC 6962 internal node hash.
pub fn internal_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 65];
    buf[0] = INTERNAL_PREFIX;
    buf[1..33].copy_from_slice(left);
    buf[33..65].copy_from_slice(right);
    sha256(&buf)
}

/// The hash of a tree with no leaves at all: `SHA256("")`.
pub fn empty_hash() -> [u8; 32] {
    sha256(&[])
}

/// Accumulates leaves one at a time and produces the Merkle Tree Hash of
/// everything seen so far without ever holding the whole tree in memory.
///
/// Internally this is a stack of `(level, hash)` pairs, one per "carry bit"
/// of the leaf count seen so far, mirroring how RFC 6962's recursive MTH
/// definition groups a sequence into a largest power-of-two-sized left
/// subtree and a (possibly uneven) right remainder.
pub struct StreamingHasher {
    // Pushed as (level, hash). Two entries of equal level are merged into
    // one at level+1, bottom-up, exactly like carrying in binary addition.
    stack: Vec<(u32, [u8; 32])>,
    leaf_count: u64,
}

impl StreamingHasher {
    pub fn new() -> Self {
        StreamingHasher {
            stack: Vec::new(),
            leaf_count: 0,
        }
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Fold in the next leaf, in order.
    pub fn add_leaf(&mut self, leaf_input: &[u8]) {
        self.add_leaf_hash(leaf_hash(leaf_input));
    }

    fn add_leaf_hash(&mut self, hash: [u8; 32]) {
        self.leaf_count += 1;
        self.stack.push((0, hash));
        while self.stack.len() >= 2 {
            let top = self.stack[self.stack.len() - 1];
            let below = self.stack[self.stack.len() - 2];
            if top.0 != below.0 {
                break;
            }
            let combined = internal_hash(&below.1, &top.1);
            self.stack.pop();
            self.stack.pop();
            self.stack.push((top.0 + 1, combined));
        }
    }

    /// The Merkle Tree Hash of every leaf folded in so far.
    ///
    /// When `leaf_count` is not a power of two the stack holds more than one
    /// entry, largest subtree first. RFC 6962's MTH splits a sequence of
    /// length `n` at the largest power of two `k < n`: `MTH(D) =
    /// HASH(0x01 || MTH(D[0:k]) || MTH(D[k:n]))`. Applied repeatedly, the
    /// overall hash is obtained by starting from the smallest (most
    /// recently pushed, right-most) subtree and folding leftward, each time
    /// combining the next-larger subtree on the left with the accumulator
    /// on the right.
    pub fn finish(&self) -> [u8; 32] {
        if self.stack.is_empty() {
            return empty_hash();
        }
        let mut iter = self.stack.iter().rev();
        let mut acc = iter.next().unwrap().1;
        for (_, hash) in iter {
            acc = internal_hash(hash, &acc);
        }
        acc
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream the first `target_size` entries of `archive`, in order, through a
/// [`StreamingHasher`], reporting progress via `report` at coarse intervals
/// (not per leaf, per §4.4) and failing fast on the first archive error (a
/// corrupt local archive is always treated as fatal, never skipped).
/// Entries beyond `target_size`, if the archive holds any, are left unread
/// (the Merkle Tree Hash is only ever defined over the first `N` leaves the
/// STH committed to).
pub fn hash_archive(
    archive: &Archive,
    target_size: u64,
    report: impl FnMut(OperationStatus),
) -> Result<(u64, [u8; 32]), Error> {
    let mut reporter = CoalescingReporter::new(PROGRESS_INTERVAL, report);
    let mut hasher = StreamingHasher::new();
    for entry in archive.iter()?.take(target_size as usize) {
        let entry = entry?;
        hasher.add_leaf(&entry.leaf_input);
        reporter.report(OperationStatus {
            start: 0,
            current: hasher.leaf_count(),
            length: target_size,
        });
    }
    Ok((hasher.leaf_count(), hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lh(b: &[u8]) -> [u8; 32] {
        leaf_hash(b)
    }
    fn ih(l: &[u8; 32], r: &[u8; 32]) -> [u8; 32] {
        internal_hash(l, r)
    }

    #[test]
    fn empty_tree_hash() {
        let hasher = StreamingHasher::new();
        assert_eq!(hasher.finish(), empty_hash());
    }

    #[test]
    fn single_leaf_hash_is_the_leaf_hash() {
        let mut hasher = StreamingHasher::new();
        hasher.add_leaf(b"l0");
        assert_eq!(hasher.finish(), lh(b"l0"));
    }

    #[test]
    fn four_leaves_is_a_balanced_tree() {
        let leaves: Vec<&[u8]> = vec![b"l0", b"l1", b"l2", b"l3"];
        let mut hasher = StreamingHasher::new();
        for l in &leaves {
            hasher.add_leaf(l);
        }
        let (h0, h1, h2, h3) = (lh(leaves[0]), lh(leaves[1]), lh(leaves[2]), lh(leaves[3]));
        let expected = ih(&ih(&h0, &h1), &ih(&h2, &h3));
        assert_eq!(hasher.finish(), expected);
    }

    #[test]
    fn five_leaves_matches_rfc6962_uneven_split() {
        // MTH(D[0:5]) = HASH(0x01 || MTH(D[0:4]) || MTH(D[4:5]))
        //             = IH( IH(IH(L0,L1), IH(L2,L3)), L4 )
        let leaves: Vec<&[u8]> = vec![b"l0", b"l1", b"l2", b"l3", b"l4"];
        let mut hasher = StreamingHasher::new();
        for l in &leaves {
            hasher.add_leaf(l);
        }
        let (h0, h1, h2, h3, h4) = (
            lh(leaves[0]),
            lh(leaves[1]),
            lh(leaves[2]),
            lh(leaves[3]),
            lh(leaves[4]),
        );
        let left = ih(&ih(&h0, &h1), &ih(&h2, &h3));
        let expected = ih(&left, &h4);
        assert_eq!(hasher.finish(), expected);
    }

    #[test]
    fn seven_leaves_matches_rfc6962_uneven_split() {
        // MTH(D[0:7]) = HASH(0x01 || MTH(D[0:4]) || MTH(D[4:7]))
        //             = IH( IH(IH(L0,L1),IH(L2,L3)), IH(IH(L4,L5),L6) )
        let leaves: Vec<&[u8]> = vec![b"l0", b"l1", b"l2", b"l3", b"l4", b"l5", b"l6"];
        let mut hasher = StreamingHasher::new();
        for l in &leaves {
            hasher.add_leaf(l);
        }
        let hs: Vec<[u8; 32]> = leaves.iter().map(|l| lh(l)).collect();
        let left = ih(&ih(&hs[0], &hs[1]), &ih(&hs[2], &hs[3]));
        let right = ih(&ih(&hs[4], &hs[5]), &hs[6]);
        let expected = ih(&left, &right);
        assert_eq!(hasher.finish(), expected);
    }

    #[test]
    fn leaf_count_tracks_additions() {
        let mut hasher = StreamingHasher::new();
        for i in 0..13u32 {
            hasher.add_leaf(&i.to_le_bytes());
        }
        assert_eq!(hasher.leaf_count(), 13);
    }
}
