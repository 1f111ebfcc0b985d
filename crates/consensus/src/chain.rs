//! The header tree.

use slotchain_core::{BlockHeader, Hash};
use slotchain_storage::StoredHeader;
use std::collections::HashMap;
use std::sync::Arc;

/// Number of ancestors the median time past is taken over.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// A header annotated with its height and cumulative chain work, linked to
/// its parent.
#[derive(Debug)]
pub struct ChainedHeader {
    pub header: BlockHeader,
    pub hash: Hash,
    pub height: u32,
    pub chain_work: u128,
    pub previous: Option<Arc<ChainedHeader>>,
}

impl ChainedHeader {
    pub fn genesis(header: BlockHeader) -> Arc<Self> {
        Arc::new(Self {
            hash: header.hash(),
            chain_work: block_work(header.bits),
            header,
            height: 0,
            previous: None,
        })
    }

    /// Link `header` on top of `previous`.
    pub fn extend(previous: &Arc<ChainedHeader>, header: BlockHeader) -> Arc<Self> {
        Arc::new(Self {
            hash: header.hash(),
            chain_work: previous.chain_work.saturating_add(block_work(header.bits)),
            height: previous.height + 1,
            header,
            previous: Some(Arc::clone(previous)),
        })
    }

    /// Ancestor at `height`, or `None` when above this header.
    pub fn get_ancestor(&self, height: u32) -> Option<&ChainedHeader> {
        if height > self.height {
            return None;
        }
        let mut current = self;
        while current.height > height {
            current = current.previous.as_deref()?;
        }
        Some(current)
    }

    /// Median timestamp of this header and up to ten ancestors.
    pub fn median_time_past(&self) -> u64 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut current = Some(self);
        while let Some(h) = current {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            times.push(h.header.timestamp);
            current = h.previous.as_deref();
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    pub fn to_stored(&self) -> StoredHeader {
        StoredHeader {
            header: self.header.clone(),
            height: self.height,
            chain_work: self.chain_work,
        }
    }
}

/// Work represented by a compact target: `2^128 / (target + 1)` with the
/// target clamped to 128 bits, never less than one.
pub fn block_work(bits: u32) -> u128 {
    let exponent = bits >> 24;
    let mantissa = (bits & 0x007f_ffff) as u128;
    let target = if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        let shift = 8 * (exponent - 3);
        if shift >= 128 || mantissa.leading_zeros() < shift {
            u128::MAX
        } else {
            mantissa << shift
        }
    };
    (u128::MAX / target.saturating_add(1)).max(1)
}

/// Every known header by hash.
#[derive(Debug, Default)]
pub struct ChainIndex {
    headers: HashMap<Hash, Arc<ChainedHeader>>,
}

impl ChainIndex {
    pub fn new(genesis: Arc<ChainedHeader>) -> Self {
        let mut index = Self::default();
        index.insert(genesis);
        index
    }

    /// Rebuild the tree from stored headers. Headers whose parent is not
    /// present are skipped.
    pub fn from_stored(mut stored: Vec<StoredHeader>) -> Self {
        stored.sort_by_key(|s| s.height);
        let mut index = Self::default();
        for s in stored {
            let chained = match index.get(&s.header.prev_hash) {
                Some(prev) => ChainedHeader::extend(&prev, s.header),
                None if s.height == 0 => ChainedHeader::genesis(s.header),
                None => continue,
            };
            index.insert(chained);
        }
        index
    }

    pub fn insert(&mut self, header: Arc<ChainedHeader>) {
        self.headers.insert(header.hash, header);
    }

    pub fn get(&self, hash: &Hash) -> Option<Arc<ChainedHeader>> {
        self.headers.get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.headers.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(prev: Hash, timestamp: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: prev,
            merkle_root: Hash::ZERO,
            timestamp,
            bits: 0x207f_ffff,
            signature: None,
        }
    }

    fn chain(len: u32) -> Arc<ChainedHeader> {
        let mut tip = ChainedHeader::genesis(header(Hash::ZERO, 0));
        for i in 1..len {
            tip = ChainedHeader::extend(&tip, header(tip.hash, i as u64 * 16));
        }
        tip
    }

    #[test]
    fn test_ancestor_walk() {
        let tip = chain(20);
        assert_eq!(tip.height, 19);
        assert_eq!(tip.get_ancestor(5).unwrap().header.timestamp, 80);
        assert!(tip.get_ancestor(20).is_none());
        assert_eq!(tip.get_ancestor(19).unwrap().hash, tip.hash);
    }

    #[test]
    fn test_median_time_past() {
        let tip = chain(20);
        // timestamps 144..=304 step 16, median is 224
        assert_eq!(tip.median_time_past(), 224);
        let short = chain(3);
        assert_eq!(short.median_time_past(), 16);
    }

    #[test]
    fn test_chain_work_accumulates() {
        let tip = chain(4);
        assert_eq!(tip.chain_work, 4 * block_work(0x207f_ffff));
        assert!(block_work(0x1000_ffff) > block_work(0x207f_ffff));
    }

    #[test]
    fn test_index_rebuild_from_stored() {
        let tip = chain(5);
        let mut stored = Vec::new();
        let mut current = Some(tip.as_ref());
        while let Some(h) = current {
            stored.push(h.to_stored());
            current = h.previous.as_deref();
        }
        let index = ChainIndex::from_stored(stored);
        assert_eq!(index.len(), 5);
        assert_eq!(index.get(&tip.hash).unwrap().height, 4);
    }
}
