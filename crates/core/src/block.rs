//! Block and block header structures.

use crate::crypto::{Keypair, PublicKey, Signature};
use crate::hash::{hash_serialized, Hash};
use crate::merkle::{merkle_root, merkle_root_checked};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The header of a block containing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    /// Hash of the previous block.
    pub prev_hash: Hash,
    /// Merkle root of transaction ids.
    pub merkle_root: Hash,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Difficulty target. Fixed to a network constant under proof of authority.
    pub bits: u32,
    /// Signer's signature over [`BlockHeader::hash`].
    pub signature: Option<Signature>,
}

/// Header fields covered by the block hash.
#[derive(Serialize)]
struct UnsignedHeader<'a> {
    version: i32,
    prev_hash: &'a Hash,
    merkle_root: &'a Hash,
    timestamp: u64,
    bits: u32,
}

impl BlockHeader {
    /// Calculate the hash of this header. The signature is excluded so the
    /// signer can sign the hash itself.
    pub fn hash(&self) -> Hash {
        hash_serialized(&UnsignedHeader {
            version: self.version,
            prev_hash: &self.prev_hash,
            merkle_root: &self.merkle_root,
            timestamp: self.timestamp,
            bits: self.bits,
        })
    }

    /// Sign the header hash.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = Some(keypair.sign_hash(&self.hash()));
    }

    /// Whether the header carries a canonical signature by `key`.
    pub fn is_signed_by(&self, key: &PublicKey) -> bool {
        match &self.signature {
            Some(sig) => key.verify_canonical(self.hash().as_bytes(), sig).is_ok(),
            None => false,
        }
    }

    /// Get the current Unix timestamp.
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A complete block: header plus transactions, coinbase first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new unsigned block, computing its merkle root.
    pub fn new(
        version: i32,
        prev_hash: Hash,
        timestamp: u64,
        bits: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Self {
            header: BlockHeader {
                version,
                prev_hash,
                merkle_root: Hash::ZERO,
                timestamp,
                bits,
                signature: None,
            },
            transactions,
        };
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    /// Create the genesis block.
    pub fn genesis(timestamp: u64, bits: u32, coinbase: Transaction) -> Self {
        Self::new(1, Hash::ZERO, timestamp, bits, vec![coinbase])
    }

    /// Get the block hash (hash of the header).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash == Hash::ZERO
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Sign the block with the signer's keypair.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.header.sign(keypair);
    }

    /// Create a signed block.
    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    pub fn txids(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.txid()).collect()
    }

    pub fn compute_merkle_root(&self) -> Hash {
        merkle_root(&self.txids())
    }

    /// Recompute the merkle root, also reporting a mutated transaction list.
    pub fn check_merkle_root(&self) -> (Hash, bool) {
        merkle_root_checked(&self.txids())
    }

    /// Block weight: sum of transaction weights.
    pub fn weight(&self) -> usize {
        self.transactions.iter().map(|tx| tx.weight()).sum()
    }

    /// Serialized size without witness data.
    pub fn base_size(&self) -> usize {
        self.transactions.iter().map(|tx| tx.base_size()).sum()
    }
}
