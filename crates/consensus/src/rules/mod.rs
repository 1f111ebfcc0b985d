//! Rule registry.
//!
//! A [`RuleSet`] is a tagged list of named rule functions. The engine runs
//! the four phases in fixed order; within a phase, rules run in registration
//! order and the first failure aborts the pass.

pub mod full;
pub mod header;
pub mod integrity;
pub mod partial;
pub mod transaction;

use crate::chain::ChainedHeader;
use crate::error::Result;
use crate::params::ConsensusParams;
use slotchain_core::{Amount, Block, BlockHeader, Hash, ScriptFlags, ScriptVerifier};
use slotchain_storage::CoinViewCache;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Validation phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Header alone plus its parent. No coin view access.
    Header,
    /// Block body against the validated header. No coin view access.
    Integrity,
    /// Block-level policy needing chain context but not the coin view.
    Partial,
    /// Coin view checks and updates, applied atomically.
    Full,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Header, Phase::Integrity, Phase::Partial, Phase::Full];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Header => "header",
            Phase::Integrity => "integrity",
            Phase::Partial => "partial",
            Phase::Full => "full",
        };
        f.write_str(name)
    }
}

/// Inputs to header rules.
pub struct HeaderContext<'a> {
    pub params: &'a ConsensusParams,
    pub header: &'a BlockHeader,
    pub hash: Hash,
    pub previous: &'a ChainedHeader,
    /// Height the header would have.
    pub height: u32,
    /// Local time the header is judged against.
    pub now: u64,
}

/// Deployment-dependent behavior for one block, derived during partial
/// validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentFlags {
    pub script_flags: ScriptFlags,
    /// Coinbase must start with the block height.
    pub enforce_bip34: bool,
    /// Relative lock-times are enforced.
    pub enforce_bip68: bool,
    /// Time absolute lock-times are compared against.
    pub lock_time_cutoff: u64,
}

impl Default for DeploymentFlags {
    fn default() -> Self {
        Self {
            script_flags: ScriptFlags::MANDATORY,
            enforce_bip34: false,
            enforce_bip68: false,
            lock_time_cutoff: 0,
        }
    }
}

/// Per-block state shared by integrity, partial and full rules.
pub struct BlockContext<'a> {
    pub params: &'a ConsensusParams,
    pub block: &'a Block,
    pub hash: Hash,
    pub previous: &'a ChainedHeader,
    pub height: u32,
    pub now: u64,
    pub flags: DeploymentFlags,
    /// Fees collected by full validation.
    pub fees: Amount,
    pub sigops_cost: usize,
    pub verifier: &'a dyn ScriptVerifier,
    pub cancel: &'a CancellationToken,
}

impl BlockContext<'_> {
    pub fn header_context(&self) -> HeaderContext<'_> {
        HeaderContext {
            params: self.params,
            header: &self.block.header,
            hash: self.hash,
            previous: self.previous,
            height: self.height,
            now: self.now,
        }
    }
}

pub type HeaderRule = Box<dyn Fn(&HeaderContext<'_>) -> Result<()> + Send + Sync>;
pub type BlockRule = Box<dyn Fn(&mut BlockContext<'_>) -> Result<()> + Send + Sync>;
pub type FullRule =
    Box<dyn Fn(&mut BlockContext<'_>, &mut CoinViewCache<'_>) -> Result<()> + Send + Sync>;

/// A rule tagged with its phase.
pub enum Rule {
    Header(HeaderRule),
    Integrity(BlockRule),
    Partial(BlockRule),
    Full(FullRule),
}

impl Rule {
    pub fn phase(&self) -> Phase {
        match self {
            Rule::Header(_) => Phase::Header,
            Rule::Integrity(_) => Phase::Integrity,
            Rule::Partial(_) => Phase::Partial,
            Rule::Full(_) => Phase::Full,
        }
    }
}

/// A named rule.
pub struct RegisteredRule {
    pub name: &'static str,
    pub rule: Rule,
}

/// Ordered rule registrations.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<RegisteredRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header<F>(mut self, name: &'static str, rule: F) -> Self
    where
        F: Fn(&HeaderContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.rules.push(RegisteredRule {
            name,
            rule: Rule::Header(Box::new(rule)),
        });
        self
    }

    pub fn integrity<F>(mut self, name: &'static str, rule: F) -> Self
    where
        F: Fn(&mut BlockContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.rules.push(RegisteredRule {
            name,
            rule: Rule::Integrity(Box::new(rule)),
        });
        self
    }

    pub fn partial<F>(mut self, name: &'static str, rule: F) -> Self
    where
        F: Fn(&mut BlockContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.rules.push(RegisteredRule {
            name,
            rule: Rule::Partial(Box::new(rule)),
        });
        self
    }

    pub fn full<F>(mut self, name: &'static str, rule: F) -> Self
    where
        F: Fn(&mut BlockContext<'_>, &mut CoinViewCache<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.rules.push(RegisteredRule {
            name,
            rule: Rule::Full(Box::new(rule)),
        });
        self
    }

    /// Rules of `phase` in registration order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &RegisteredRule> {
        self.rules.iter().filter(move |r| r.rule.phase() == phase)
    }

    /// Rule names of `phase`, in execution order.
    pub fn names(&self, phase: Phase) -> Vec<&'static str> {
        self.phase(phase).map(|r| r.name).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The chain-agnostic rules every network runs.
    pub fn standard() -> Self {
        let set = header::register(Self::new());
        Self::with_body_rules(set)
    }

    /// Add the integrity, partial and full rules to `set`.
    pub fn with_body_rules(set: Self) -> Self {
        full::register(partial::register(integrity::register(set)))
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for phase in Phase::ALL {
            map.entry(&phase, &self.names(phase));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering_is_registration_order() {
        let set = RuleSet::new()
            .full("f1", |_, _| Ok(()))
            .header("h1", |_| Ok(()))
            .full("f2", |_, _| Ok(()))
            .header("h2", |_| Ok(()));
        assert_eq!(set.names(Phase::Header), vec!["h1", "h2"]);
        assert_eq!(set.names(Phase::Full), vec!["f1", "f2"]);
        assert!(set.names(Phase::Integrity).is_empty());
    }

    #[test]
    fn test_standard_set_covers_every_phase() {
        let set = RuleSet::standard();
        for phase in Phase::ALL {
            assert!(!set.names(phase).is_empty(), "no rules for {phase}");
        }
        assert!(Phase::Header < Phase::Full);
    }
}
