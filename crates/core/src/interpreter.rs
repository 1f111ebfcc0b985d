//! Reference script interpreter.
//!
//! Evaluates an input's unlocking script followed by the locking script of
//! the output it spends. Policy flags tighten evaluation; the consensus
//! ("mandatory") flag set is always a subset of the relay ("standard") set,
//! so anything valid under standard flags is valid under mandatory flags.

use crate::crypto::{PublicKey, Signature};
use crate::hash::short_hash;
use crate::script::{
    decode_num, encode_num, is_minimal_push, opcodes::*, Instruction, Script, ScriptParseError,
    MAX_PUBKEYS_PER_MULTISIG, MAX_PUSH_SIZE, MAX_SCRIPT_SIZE,
};
use crate::transaction::{
    Amount, Transaction, TxOut, LOCKTIME_THRESHOLD, SEQUENCE_FINAL,
    SEQUENCE_LOCKTIME_DISABLE_FLAG, SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;

const MAX_STACK_SIZE: usize = 1000;

/// Set of script verification flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub const NONE: Self = Self(0);
    /// Unlocking scripts may only contain pushes.
    pub const SIGPUSHONLY: Self = Self(1 << 0);
    /// Signatures must be 64 bytes and canonical, keys must parse.
    pub const STRICT_SIG: Self = Self(1 << 1);
    /// Pushes must use the shortest encoding.
    pub const MINIMALDATA: Self = Self(1 << 2);
    /// Exactly one element may remain after evaluation.
    pub const CLEANSTACK: Self = Self(1 << 3);
    pub const CHECKLOCKTIMEVERIFY: Self = Self(1 << 4);
    pub const CHECKSEQUENCEVERIFY: Self = Self(1 << 5);

    /// Flags every block enforces regardless of deployments.
    pub const MANDATORY: Self = Self::SIGPUSHONLY.union(Self::STRICT_SIG);

    /// Flags enforced for relay.
    pub const STANDARD: Self = Self::MANDATORY
        .union(Self::MINIMALDATA)
        .union(Self::CLEANSTACK)
        .union(Self::CHECKLOCKTIMEVERIFY)
        .union(Self::CHECKSEQUENCEVERIFY);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl BitOr for ScriptFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for ScriptFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ScriptFlags, &str); 6] = [
            (ScriptFlags::SIGPUSHONLY, "SIGPUSHONLY"),
            (ScriptFlags::STRICT_SIG, "STRICT_SIG"),
            (ScriptFlags::MINIMALDATA, "MINIMALDATA"),
            (ScriptFlags::CLEANSTACK, "CLEANSTACK"),
            (ScriptFlags::CHECKLOCKTIMEVERIFY, "CHECKLOCKTIMEVERIFY"),
            (ScriptFlags::CHECKSEQUENCEVERIFY, "CHECKSEQUENCEVERIFY"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ScriptFlags({})", set.join("|"))
    }
}

/// Reasons a script fails to verify.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("input {0} does not exist")]
    InputIndex(usize),
    #[error("script evaluated to false")]
    EvalFalse,
    #[error("script too large")]
    ScriptSize,
    #[error("push exceeds maximum element size")]
    PushSize,
    #[error("stack size limit exceeded")]
    StackSize,
    #[error("operation on an empty stack")]
    InvalidStackOperation,
    #[error("OP_RETURN encountered")]
    OpReturn,
    #[error("opcode 0x{0:02x} is not supported")]
    BadOpcode(u8),
    #[error("OP_VERIFY failed")]
    Verify,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerify,
    #[error("OP_CHECKSIGVERIFY failed")]
    CheckSigVerify,
    #[error("OP_CHECKMULTISIGVERIFY failed")]
    CheckMultiSigVerify,
    #[error("unlocking script is not push only")]
    SigPushOnly,
    #[error("signature has an invalid encoding")]
    SigEncoding,
    #[error("signature is not canonical")]
    SigNonCanonical,
    #[error("public key has an invalid encoding")]
    PubKeyType,
    #[error("invalid public key count")]
    PubKeyCount,
    #[error("invalid signature count")]
    SigCount,
    #[error("push is not minimally encoded")]
    MinimalData,
    #[error("stack not clean after evaluation")]
    CleanStack,
    #[error("number does not fit in the allowed width")]
    NumberOverflow,
    #[error("negative lock-time")]
    NegativeLockTime,
    #[error("lock-time requirement not satisfied")]
    UnsatisfiedLockTime,
    #[error(transparent)]
    Parse(#[from] ScriptParseError),
}

/// Script evaluation service used by consensus and mempool validation.
pub trait ScriptVerifier: Send + Sync {
    /// Verify input `input_index` of `tx` against the output it spends.
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &TxOut,
        flags: ScriptFlags,
    ) -> Result<(), ScriptError>;
}

/// The built-in stack machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

struct SpendContext<'a> {
    tx: &'a Transaction,
    index: usize,
    script_code: &'a Script,
    amount: Amount,
}

type Stack = Vec<Vec<u8>>;

impl ScriptVerifier for Interpreter {
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &TxOut,
        flags: ScriptFlags,
    ) -> Result<(), ScriptError> {
        let input = tx
            .inputs
            .get(input_index)
            .ok_or(ScriptError::InputIndex(input_index))?;

        if flags.contains(ScriptFlags::SIGPUSHONLY) && !input.script_sig.is_push_only() {
            return Err(ScriptError::SigPushOnly);
        }

        let ctx = SpendContext {
            tx,
            index: input_index,
            script_code: &prevout.script_pubkey,
            amount: prevout.value,
        };

        let mut stack = Stack::new();
        eval(&input.script_sig, &mut stack, flags, &ctx)?;
        eval(&prevout.script_pubkey, &mut stack, flags, &ctx)?;

        match stack.last() {
            Some(top) if cast_to_bool(top) => {}
            _ => return Err(ScriptError::EvalFalse),
        }
        if flags.contains(ScriptFlags::CLEANSTACK) && stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
        Ok(())
    }
}

fn eval(
    script: &Script,
    stack: &mut Stack,
    flags: ScriptFlags,
    ctx: &SpendContext<'_>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let mut instructions = script.instructions();
    loop {
        let start = instructions.position();
        let instruction = match instructions.next() {
            Some(ins) => ins?,
            None => break,
        };
        match instruction {
            Instruction::Push(data) => {
                if data.len() > MAX_PUSH_SIZE {
                    return Err(ScriptError::PushSize);
                }
                if flags.contains(ScriptFlags::MINIMALDATA)
                    && !is_minimal_push(instructions.position() - start, data)
                {
                    return Err(ScriptError::MinimalData);
                }
                stack.push(data.to_vec());
            }
            Instruction::Op(op) => execute(op, stack, flags, ctx)?,
        }
        if stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }
    Ok(())
}

fn execute(
    op: u8,
    stack: &mut Stack,
    flags: ScriptFlags,
    ctx: &SpendContext<'_>,
) -> Result<(), ScriptError> {
    match op {
        OP_0 => stack.push(Vec::new()),
        OP_1NEGATE => stack.push(encode_num(-1)),
        OP_1..=OP_16 => stack.push(encode_num((op - OP_1 + 1) as i64)),
        OP_NOP => {}
        OP_VERIFY => {
            if !cast_to_bool(&pop(stack)?) {
                return Err(ScriptError::Verify);
            }
        }
        OP_RETURN => return Err(ScriptError::OpReturn),
        OP_DROP => {
            pop(stack)?;
        }
        OP_DUP => {
            let top = stack.last().ok_or(ScriptError::InvalidStackOperation)?.clone();
            stack.push(top);
        }
        OP_EQUAL | OP_EQUALVERIFY => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            let equal = a == b;
            if op == OP_EQUALVERIFY {
                if !equal {
                    return Err(ScriptError::EqualVerify);
                }
            } else {
                stack.push(bool_item(equal));
            }
        }
        OP_HASH => {
            let data = pop(stack)?;
            stack.push(short_hash(&data).to_vec());
        }
        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
            let key = pop(stack)?;
            let sig = pop(stack)?;
            let ok = check_sig(&sig, &key, flags, ctx)?;
            if op == OP_CHECKSIGVERIFY {
                if !ok {
                    return Err(ScriptError::CheckSigVerify);
                }
            } else {
                stack.push(bool_item(ok));
            }
        }
        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
            let ok = check_multisig(stack, flags, ctx)?;
            if op == OP_CHECKMULTISIGVERIFY {
                if !ok {
                    return Err(ScriptError::CheckMultiSigVerify);
                }
            } else {
                stack.push(bool_item(ok));
            }
        }
        OP_CHECKLOCKTIMEVERIFY => {
            if flags.contains(ScriptFlags::CHECKLOCKTIMEVERIFY) {
                check_lock_time(stack, ctx)?;
            }
        }
        OP_CHECKSEQUENCEVERIFY => {
            if flags.contains(ScriptFlags::CHECKSEQUENCEVERIFY) {
                check_sequence(stack, ctx)?;
            }
        }
        other => return Err(ScriptError::BadOpcode(other)),
    }
    Ok(())
}

fn pop(stack: &mut Stack) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::InvalidStackOperation)
}

fn bool_item(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

/// Any non-zero value is true; negative zero is false.
fn cast_to_bool(item: &[u8]) -> bool {
    for (i, b) in item.iter().enumerate() {
        if *b != 0 {
            return !(i == item.len() - 1 && *b == 0x80);
        }
    }
    false
}

fn check_sig(
    sig: &[u8],
    key: &[u8],
    flags: ScriptFlags,
    ctx: &SpendContext<'_>,
) -> Result<bool, ScriptError> {
    let strict = flags.contains(ScriptFlags::STRICT_SIG);
    if sig.is_empty() {
        return Ok(false);
    }
    let signature = match Signature::from_slice(sig) {
        Ok(s) => s,
        Err(_) if strict => return Err(ScriptError::SigEncoding),
        Err(_) => return Ok(false),
    };
    let key = match PublicKey::from_bytes(key) {
        Ok(k) => k,
        Err(_) if strict => return Err(ScriptError::PubKeyType),
        Err(_) => return Ok(false),
    };

    let digest = ctx.tx.signature_hash(ctx.index, ctx.script_code, ctx.amount);
    if strict {
        if !signature.is_canonical() {
            return Err(ScriptError::SigNonCanonical);
        }
        Ok(key.verify_canonical(digest.as_bytes(), &signature).is_ok())
    } else {
        Ok(key.verify(digest.as_bytes(), &signature).is_ok())
    }
}

/// `<sig>... <m> <key>... <n> CHECKMULTISIG`. Signatures must appear in
/// the same order as their keys.
fn check_multisig(
    stack: &mut Stack,
    flags: ScriptFlags,
    ctx: &SpendContext<'_>,
) -> Result<bool, ScriptError> {
    let n = pop_count(stack, MAX_PUBKEYS_PER_MULTISIG, ScriptError::PubKeyCount)?;
    let mut keys = Vec::with_capacity(n);
    for _ in 0..n {
        keys.push(pop(stack)?);
    }
    keys.reverse();

    let m = pop_count(stack, n, ScriptError::SigCount)?;
    let mut sigs = Vec::with_capacity(m);
    for _ in 0..m {
        sigs.push(pop(stack)?);
    }
    sigs.reverse();

    let mut key_iter = keys.iter();
    for sig in &sigs {
        loop {
            let Some(key) = key_iter.next() else {
                return Ok(false);
            };
            if check_sig(sig, key, flags, ctx)? {
                break;
            }
        }
    }
    Ok(true)
}

fn pop_count(stack: &mut Stack, max: usize, err: ScriptError) -> Result<usize, ScriptError> {
    let item = pop(stack)?;
    let value = decode_num(&item, 4).ok_or(ScriptError::NumberOverflow)?;
    if value < 0 || value as usize > max {
        return Err(err);
    }
    Ok(value as usize)
}

fn peek_lock(stack: &Stack) -> Result<i64, ScriptError> {
    let top = stack.last().ok_or(ScriptError::InvalidStackOperation)?;
    // five bytes so lock values up to 2^39 - 1 are expressible
    let value = decode_num(top, 5).ok_or(ScriptError::NumberOverflow)?;
    if value < 0 {
        return Err(ScriptError::NegativeLockTime);
    }
    Ok(value)
}

fn check_lock_time(stack: &Stack, ctx: &SpendContext<'_>) -> Result<(), ScriptError> {
    let lock = peek_lock(stack)?;
    let tx_lock = ctx.tx.lock_time as i64;
    let threshold = LOCKTIME_THRESHOLD as i64;

    if (lock < threshold) != (tx_lock < threshold) || lock > tx_lock {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    // a final input would let the lock-time be ignored
    if ctx.tx.inputs[ctx.index].sequence == SEQUENCE_FINAL {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    Ok(())
}

fn check_sequence(stack: &Stack, ctx: &SpendContext<'_>) -> Result<(), ScriptError> {
    let required = peek_lock(stack)? as u64;
    if required & SEQUENCE_LOCKTIME_DISABLE_FLAG as u64 != 0 {
        return Ok(());
    }
    if ctx.tx.version < 2 {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    let tx_sequence = ctx.tx.inputs[ctx.index].sequence;
    if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
        return Err(ScriptError::UnsatisfiedLockTime);
    }

    let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
    let required = required as u32 & mask;
    let actual = tx_sequence & mask;
    let same_kind = (required < SEQUENCE_LOCKTIME_TYPE_FLAG) == (actual < SEQUENCE_LOCKTIME_TYPE_FLAG);
    if !same_kind || required > actual {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    Ok(())
}
