//! In-memory overlay over a coin view.
//!
//! Reads fall through to the base view and are cached. Spends and new
//! outputs only touch the overlay; [`CoinViewCache::into_changes`] hands
//! the accumulated writes to the caller, and dropping the cache discards
//! them without the base ever being touched.

use crate::coins::{CoinView, Coins};
use crate::db::Result;
use slotchain_core::{Amount, Hash, OutPoint, Transaction, TxOut};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct CacheEntry {
    coins: Option<Coins>,
    /// Differs from the base view.
    dirty: bool,
    /// Absent from the base view, so deleting it needs no write.
    fresh: bool,
}

/// Writes accumulated by a [`CoinViewCache`].
#[derive(Debug, Clone, Default)]
pub struct CoinChanges {
    /// `None` deletes the record.
    pub writes: Vec<(Hash, Option<Coins>)>,
    pub best_block: Option<Hash>,
}

impl CoinChanges {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.best_block.is_none()
    }
}

/// A spent output together with the metadata of the record it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentCoin {
    pub output: TxOut,
    pub height: u32,
    pub coinbase: bool,
}

/// Mutable overlay over a [`CoinView`].
pub struct CoinViewCache<'a> {
    base: &'a dyn CoinView,
    entries: HashMap<Hash, CacheEntry>,
    best_block: Option<Hash>,
}

impl<'a> CoinViewCache<'a> {
    pub fn new(base: &'a dyn CoinView) -> Self {
        Self {
            base,
            entries: HashMap::new(),
            best_block: None,
        }
    }

    fn entry(&mut self, txid: &Hash) -> Result<&mut CacheEntry> {
        match self.entries.entry(*txid) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let coins = self.base.fetch_coins(txid)?;
                let fresh = coins.is_none();
                Ok(slot.insert(CacheEntry {
                    coins,
                    dirty: false,
                    fresh,
                }))
            }
        }
    }

    /// Look up the coins of a transaction.
    pub fn access_coins(&mut self, txid: &Hash) -> Result<Option<&Coins>> {
        Ok(self.entry(txid)?.coins.as_ref().filter(|c| !c.is_pruned()))
    }

    /// Whether any unspent output of `txid` exists.
    pub fn have_coins(&mut self, txid: &Hash) -> Result<bool> {
        Ok(self.access_coins(txid)?.is_some())
    }

    /// Unspent output at `outpoint`.
    pub fn output(&mut self, outpoint: &OutPoint) -> Result<Option<TxOut>> {
        Ok(self
            .access_coins(&outpoint.txid)?
            .and_then(|c| c.output(outpoint.vout))
            .cloned())
    }

    /// Whether every input of `tx` refers to an unspent output.
    pub fn have_inputs(&mut self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        for input in &tx.inputs {
            if self.output(&input.prevout)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sum of the values spent by `tx`; `None` if an input is missing or the
    /// sum overflows.
    pub fn value_in(&mut self, tx: &Transaction) -> Result<Option<Amount>> {
        let mut total: Amount = 0;
        for input in &tx.inputs {
            match self.output(&input.prevout)? {
                Some(out) => match total.checked_add(out.value) {
                    Some(t) => total = t,
                    None => return Ok(None),
                },
                None => return Ok(None),
            }
        }
        Ok(Some(total))
    }

    /// Spend an output, returning it with its record metadata.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Result<Option<SpentCoin>> {
        let entry = self.entry(&outpoint.txid)?;
        let Some(coins) = entry.coins.as_mut() else {
            return Ok(None);
        };
        let (height, coinbase) = (coins.height, coins.coinbase);
        match coins.spend(outpoint.vout) {
            Some(output) => {
                entry.dirty = true;
                Ok(Some(SpentCoin {
                    output,
                    height,
                    coinbase,
                }))
            }
            None => Ok(None),
        }
    }

    /// Add the outputs of `tx` at `height`, replacing any fully spent record.
    pub fn add_transaction(&mut self, tx: &Transaction, height: u32) -> Result<()> {
        let coins = Coins::from_transaction(tx, height);
        let entry = self.entry(&tx.txid())?;
        entry.coins = Some(coins);
        entry.dirty = true;
        Ok(())
    }

    pub fn set_best_block(&mut self, hash: Hash) {
        self.best_block = Some(hash);
    }

    /// Number of records currently held in memory.
    pub fn cached_len(&self) -> usize {
        self.entries.len()
    }

    /// Consume the overlay, yielding the writes needed to bring the base
    /// view up to date.
    pub fn into_changes(self) -> CoinChanges {
        let mut writes: Vec<(Hash, Option<Coins>)> = self
            .entries
            .into_iter()
            .filter(|(_, e)| e.dirty)
            .filter_map(|(txid, e)| {
                let coins = e.coins.filter(|c| !c.is_pruned());
                match (coins, e.fresh) {
                    // created and spent inside the overlay
                    (None, true) => None,
                    (coins, _) => Some((txid, coins)),
                }
            })
            .collect();
        writes.sort_by(|a, b| a.0.cmp(&b.0));
        CoinChanges {
            writes,
            best_block: self.best_block,
        }
    }
}

impl CoinView for CoinViewCache<'_> {
    fn fetch_coins(&self, txid: &Hash) -> Result<Option<Coins>> {
        match self.entries.get(txid) {
            Some(entry) => Ok(entry.coins.clone().filter(|c| !c.is_pruned())),
            None => self.base.fetch_coins(txid),
        }
    }

    fn best_block(&self) -> Result<Hash> {
        match self.best_block {
            Some(hash) => Ok(hash),
            None => self.base.best_block(),
        }
    }
}
