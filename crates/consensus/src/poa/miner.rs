//! Slot-driven block production.

use super::federation::{Federation, FederationError};
use crate::chain::ChainedHeader;
use crate::params::ConsensusParams;
use crate::time::TimeSource;
use slotchain_core::{Amount, Block, Keypair, PublicKey, Script, Transaction, TxOut};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProposerError {
    #[error("timestamp {0} is not on a slot boundary")]
    InvalidTimestamp(u64),
    #[error("slot {timestamp} belongs to {expected}")]
    NotMyTurn { expected: PublicKey, timestamp: u64 },
    #[error("timestamp {timestamp} does not follow the parent at {parent}")]
    NotAfterParent { timestamp: u64, parent: u64 },
    #[error("coinbase value overflows")]
    CoinbaseOverflow,
}

/// Where the local signer stands in the slot rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    /// The current time is one of our slots and it has not been used yet.
    SigningTurn { slot: u64 },
    NotMyTurn { next_slot: u64 },
}

/// Tracks the local member's slots.
pub struct SlotMiner {
    federation: Arc<Federation>,
    key: PublicKey,
    state: MinerState,
    last_signed: Option<u64>,
}

impl SlotMiner {
    pub fn new(federation: Arc<Federation>, key: PublicKey) -> Result<Self, FederationError> {
        if !federation.is_member(&key) {
            return Err(FederationError::NotMember(key));
        }
        Ok(Self {
            federation,
            key,
            state: MinerState::Idle,
            last_signed: None,
        })
    }

    pub fn state(&self) -> MinerState {
        self.state
    }

    /// Recompute the state at `now`.
    pub fn tick(&mut self, now: u64) -> MinerState {
        let Some(mut slot) = self.federation.next_slot_for(&self.key, now) else {
            self.state = MinerState::Idle;
            return self.state;
        };
        if self.last_signed == Some(slot) {
            slot += self.federation.round_length();
        }
        self.state = if slot == now {
            MinerState::SigningTurn { slot }
        } else {
            MinerState::NotMyTurn { next_slot: slot }
        };
        self.state
    }

    /// Record that `slot` was used so it is not signed twice.
    pub fn mark_signed(&mut self, slot: u64) {
        self.last_signed = Some(slot);
        self.state = MinerState::NotMyTurn {
            next_slot: slot + self.federation.round_length(),
        };
    }

    /// Sleep until our next slot. Returns `None` when cancelled.
    pub async fn wait_for_turn(
        &mut self,
        time: &dyn TimeSource,
        cancel: &CancellationToken,
    ) -> Option<u64> {
        loop {
            if cancel.is_cancelled() {
                self.state = MinerState::Idle;
                return None;
            }
            let now = time.now();
            match self.tick(now) {
                MinerState::SigningTurn { slot } => return Some(slot),
                MinerState::NotMyTurn { next_slot } => {
                    let wait = Duration::from_secs(next_slot.saturating_sub(now).max(1));
                    debug!(next_slot, wait = ?wait, "waiting for slot");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.state = MinerState::Idle;
                            return None;
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                MinerState::Idle => return None,
            }
        }
    }
}

/// Builds and signs blocks for the local member.
pub struct BlockProposer {
    keypair: Keypair,
    federation: Arc<Federation>,
    params: ConsensusParams,
    version: i32,
}

impl BlockProposer {
    pub fn new(keypair: Keypair, federation: Arc<Federation>, params: ConsensusParams) -> Self {
        Self {
            keypair,
            federation,
            version: params.min_block_version.max(1),
            params,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key
    }

    pub fn can_propose_at(&self, timestamp: u64) -> bool {
        self.federation.is_valid_timestamp(timestamp)
            && *self.federation.slot_owner(timestamp) == self.keypair.public_key
    }

    /// Propose the block following `previous` at `timestamp`, paying the
    /// subsidy and `fees` to the local key.
    pub fn propose_block(
        &self,
        previous: &ChainedHeader,
        timestamp: u64,
        transactions: Vec<Transaction>,
        fees: Amount,
    ) -> Result<Block, ProposerError> {
        if !self.federation.is_valid_timestamp(timestamp) {
            return Err(ProposerError::InvalidTimestamp(timestamp));
        }
        let expected = *self.federation.slot_owner(timestamp);
        if expected != self.keypair.public_key {
            return Err(ProposerError::NotMyTurn {
                expected,
                timestamp,
            });
        }
        if timestamp <= previous.header.timestamp {
            return Err(ProposerError::NotAfterParent {
                timestamp,
                parent: previous.header.timestamp,
            });
        }

        let height = previous.height + 1;
        let reward = self
            .params
            .subsidy(height)
            .checked_add(fees)
            .ok_or(ProposerError::CoinbaseOverflow)?;
        let coinbase = Transaction::coinbase(
            height,
            vec![TxOut::new(reward, Script::pay_to_pubkey(&self.keypair.public_key))],
            &timestamp.to_le_bytes(),
        );

        let mut body = Vec::with_capacity(transactions.len() + 1);
        body.push(coinbase);
        body.extend(transactions);

        let block = Block::new(self.version, previous.hash, timestamp, self.params.poa_bits, body)
            .signed(&self.keypair);
        info!(height, timestamp, txs = block.tx_count(), "proposed block");
        Ok(block)
    }
}
