//! Header rules. These see the header and its parent only.

use super::{HeaderContext, RuleSet};
use crate::error::{ConsensusError, Result};

pub fn check_version(ctx: &HeaderContext<'_>) -> Result<()> {
    if ctx.header.version < ctx.params.min_block_version {
        return Err(ConsensusError::BadVersion(ctx.header.version));
    }
    Ok(())
}

/// The timestamp must be above the median time past of the parent.
pub fn check_time_too_old(ctx: &HeaderContext<'_>) -> Result<()> {
    if ctx.header.timestamp <= ctx.previous.median_time_past() {
        return Err(ConsensusError::TimeTooOld);
    }
    Ok(())
}

pub fn check_time_too_new(ctx: &HeaderContext<'_>) -> Result<()> {
    if ctx.header.timestamp > ctx.now.saturating_add(ctx.params.max_future_block_time) {
        return Err(ConsensusError::TimeTooNew);
    }
    Ok(())
}

pub fn register(set: RuleSet) -> RuleSet {
    set.header("version", check_version)
        .header("time-too-old", check_time_too_old)
        .header("time-too-new", check_time_too_new)
}
