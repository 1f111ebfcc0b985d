//! The signing federation and its slot schedule.
//!
//! Time is divided into rounds of `members × slot_spacing` seconds. Each
//! round hands one slot to every member, in list order.

use serde::{Deserialize, Serialize};
use slotchain_core::{CryptoError, PublicKey};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FederationError {
    #[error("federation has no members")]
    Empty,
    #[error("slot spacing must be positive")]
    ZeroSpacing,
    #[error("round of {members} slots of {spacing}s overflows the clock")]
    RoundTooLong { members: usize, spacing: u64 },
    #[error("member {0} is listed twice")]
    DuplicateMember(PublicKey),
    #[error("{0} is not a federation member")]
    NotMember(PublicKey),
    #[error("invalid member key {index}: {source}")]
    InvalidKey { index: usize, source: CryptoError },
}

/// Federation as written in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Hex-encoded public keys, in slot order.
    pub members: Vec<String>,
    pub slot_spacing_seconds: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            slot_spacing_seconds: 16,
        }
    }
}

impl FederationConfig {
    pub fn to_federation(&self) -> Result<Federation, FederationError> {
        let members = self
            .members
            .iter()
            .enumerate()
            .map(|(index, hex)| {
                PublicKey::from_hex(hex).map_err(|source| FederationError::InvalidKey { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Federation::new(members, self.slot_spacing_seconds)
    }
}

/// Ordered, fixed list of signers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Federation {
    members: Vec<PublicKey>,
    slot_spacing: u64,
}

impl Federation {
    pub fn new(members: Vec<PublicKey>, slot_spacing: u64) -> Result<Self, FederationError> {
        if members.is_empty() {
            return Err(FederationError::Empty);
        }
        if slot_spacing == 0 {
            return Err(FederationError::ZeroSpacing);
        }
        if (members.len() as u64).checked_mul(slot_spacing).is_none() {
            return Err(FederationError::RoundTooLong {
                members: members.len(),
                spacing: slot_spacing,
            });
        }
        let mut seen = HashSet::with_capacity(members.len());
        for key in &members {
            if !seen.insert(*key) {
                return Err(FederationError::DuplicateMember(*key));
            }
        }
        Ok(Self {
            members,
            slot_spacing,
        })
    }

    pub fn members(&self) -> &[PublicKey] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn slot_spacing(&self) -> u64 {
        self.slot_spacing
    }

    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.members.iter().position(|m| m == key)
    }

    pub fn is_member(&self, key: &PublicKey) -> bool {
        self.index_of(key).is_some()
    }

    pub fn round_length(&self) -> u64 {
        self.members.len() as u64 * self.slot_spacing
    }

    /// Start of the round containing `timestamp`.
    pub fn round_start(&self, timestamp: u64) -> u64 {
        timestamp - timestamp % self.round_length()
    }

    /// Whether `timestamp` falls exactly on a slot boundary.
    pub fn is_valid_timestamp(&self, timestamp: u64) -> bool {
        timestamp % self.slot_spacing == 0
    }

    /// Position within its round of the slot containing `timestamp`.
    pub fn slot_index(&self, timestamp: u64) -> usize {
        ((timestamp - self.round_start(timestamp)) / self.slot_spacing) as usize
    }

    /// Member allowed to sign at `timestamp`.
    pub fn slot_owner(&self, timestamp: u64) -> &PublicKey {
        &self.members[self.slot_index(timestamp)]
    }

    /// Earliest slot at or after `now` owned by `key`.
    ///
    /// A slot of the current round that has already passed is pushed to
    /// the next round.
    pub fn next_slot_for(&self, key: &PublicKey, now: u64) -> Option<u64> {
        let index = self.index_of(key)? as u64;
        let slot = self.round_start(now) + index * self.slot_spacing;
        if slot < now {
            Some(slot + self.round_length())
        } else {
            Some(slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotchain_core::Keypair;

    fn keys(n: usize) -> Vec<PublicKey> {
        (0..n).map(|_| Keypair::generate().public_key).collect()
    }

    #[test]
    fn test_owner_rotates_once_per_round() {
        let members = keys(3);
        let federation = Federation::new(members.clone(), 16).unwrap();
        assert_eq!(federation.round_length(), 48);

        let start = 1_700_000_016 - 1_700_000_016 % 48;
        let owners: Vec<_> = (0..3)
            .map(|i| *federation.slot_owner(start + i * 16))
            .collect();
        assert_eq!(owners, members);
        assert_eq!(*federation.slot_owner(start + 48), members[0]);
        // inside a slot the owner does not change
        assert_eq!(*federation.slot_owner(start + 17), members[1]);
    }

    #[test]
    fn test_timestamps_must_be_on_slot_boundary() {
        let federation = Federation::new(keys(2), 16).unwrap();
        assert!(federation.is_valid_timestamp(160));
        assert!(!federation.is_valid_timestamp(161));
    }

    #[test]
    fn test_next_slot_rolls_to_next_round() {
        let members = keys(3);
        let federation = Federation::new(members.clone(), 16).unwrap();
        // round starts at 480
        assert_eq!(federation.next_slot_for(&members[2], 480), Some(512));
        assert_eq!(federation.next_slot_for(&members[0], 480), Some(480));
        assert_eq!(federation.next_slot_for(&members[0], 481), Some(528));
        assert_eq!(federation.next_slot_for(&members[1], 500), Some(544));
        assert_eq!(federation.next_slot_for(&Keypair::generate().public_key, 0), None);
    }

    #[test]
    fn test_config_validation() {
        let members = keys(2);
        let config = FederationConfig {
            members: members.iter().map(|k| k.to_hex()).collect(),
            slot_spacing_seconds: 16,
        };
        assert_eq!(config.to_federation().unwrap().members(), &members[..]);

        let dup = FederationConfig {
            members: vec![members[0].to_hex(), members[0].to_hex()],
            ..config.clone()
        };
        assert_eq!(dup.to_federation(), Err(FederationError::DuplicateMember(members[0])));

        let bad = FederationConfig {
            members: vec!["zz".into()],
            ..config.clone()
        };
        assert!(matches!(bad.to_federation(), Err(FederationError::InvalidKey { index: 0, .. })));

        assert_eq!(Federation::new(vec![], 16), Err(FederationError::Empty));
        assert_eq!(Federation::new(members, 0), Err(FederationError::ZeroSpacing));
    }

    #[test]
    fn test_round_length_must_fit_u64() {
        let config = FederationConfig {
            members: keys(3).iter().map(|k| k.to_hex()).collect(),
            slot_spacing_seconds: u64::MAX / 2,
        };
        assert_eq!(
            config.to_federation(),
            Err(FederationError::RoundTooLong {
                members: 3,
                spacing: u64::MAX / 2
            })
        );

        let federation = Federation::new(keys(1), u64::MAX).unwrap();
        assert_eq!(federation.round_length(), u64::MAX);
    }
}
