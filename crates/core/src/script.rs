//! Locking and unlocking scripts.
//!
//! Scripts are byte strings in a small stack language. This module only
//! parses and classifies them; evaluation lives in [`crate::interpreter`].

use crate::crypto::{Address, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opcode values.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    /// Largest opcode that pushes its own value as the data length.
    pub const OP_PUSHBYTES_75: u8 = 0x4b;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_NOP: u8 = 0x61;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH: u8 = 0xa9;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
    pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
    pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
}

use opcodes::*;

/// Maximum script length accepted by the interpreter.
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Maximum size of a single push.
pub const MAX_PUSH_SIZE: usize = 520;
/// Sigops charged for a bare multisig opcode.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptParseError {
    #[error("push runs past the end of the script")]
    TruncatedPush,
}

/// A single parsed script element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Push(&'a [u8]),
    Op(u8),
}

/// Standard script shapes relay policy recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTemplate {
    /// `<pubkey> OP_CHECKSIG`
    PayToPubKey(PublicKey),
    /// `OP_DUP OP_HASH <address> OP_EQUALVERIFY OP_CHECKSIG`
    PayToAddress(Address),
    /// `OP_RETURN <pushes>`, provably unspendable data carrier.
    NullData,
    NonStandard,
}

/// A serialized script.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a data push using the smallest encoding.
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        match data.len() {
            0 => self.0.push(OP_0),
            n if n <= OP_PUSHBYTES_75 as usize => self.0.push(n as u8),
            n if n <= u8::MAX as usize => {
                self.0.push(OP_PUSHDATA1);
                self.0.push(n as u8);
            }
            n => {
                self.0.push(OP_PUSHDATA2);
                self.0.extend_from_slice(&(n as u16).to_le_bytes());
            }
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Append a small integer or minimally encoded number push.
    pub fn push_int(self, value: i64) -> Self {
        if value == 0 {
            return self.push_opcode(OP_0);
        }
        if value == -1 {
            return self.push_opcode(OP_1NEGATE);
        }
        if (1..=16).contains(&value) {
            return self.push_opcode(OP_1 + (value as u8) - 1);
        }
        self.push_slice(&encode_num(value))
    }

    pub fn push_opcode(mut self, op: u8) -> Self {
        self.0.push(op);
        self
    }

    pub fn pay_to_pubkey(key: &PublicKey) -> Self {
        Script::new().push_slice(&key.to_bytes()).push_opcode(OP_CHECKSIG)
    }

    pub fn pay_to_address(address: &Address) -> Self {
        Script::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH)
            .push_slice(address.as_bytes())
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
    }

    pub fn null_data(data: &[u8]) -> Self {
        Script::new().push_opcode(OP_RETURN).push_slice(data)
    }

    /// Unlocking script for a pay-to-pubkey output.
    pub fn sig_for_pubkey(signature: &Signature) -> Self {
        Script::new().push_slice(signature.as_bytes())
    }

    /// Unlocking script for a pay-to-address output.
    pub fn sig_for_address(signature: &Signature, key: &PublicKey) -> Self {
        Script::new()
            .push_slice(signature.as_bytes())
            .push_slice(&key.to_bytes())
    }

    /// Iterate over instructions; stops with an error on a truncated push.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            data: &self.0,
            pos: 0,
        }
    }

    /// Whether every element is a data push (small integers count as pushes).
    pub fn is_push_only(&self) -> bool {
        self.instructions().all(|ins| match ins {
            Ok(Instruction::Push(_)) => true,
            Ok(Instruction::Op(op)) => op == OP_1NEGATE || (OP_1..=OP_16).contains(&op),
            Err(_) => false,
        })
    }

    /// Outputs starting with `OP_RETURN` can never be spent.
    pub fn is_unspendable(&self) -> bool {
        self.0.first() == Some(&OP_RETURN) || self.0.len() > MAX_SCRIPT_SIZE
    }

    pub fn template(&self) -> ScriptTemplate {
        let b = &self.0;
        if b.len() == 34 && b[0] == 32 && b[33] == OP_CHECKSIG {
            return match PublicKey::from_bytes(&b[1..33]) {
                Ok(key) => ScriptTemplate::PayToPubKey(key),
                Err(_) => ScriptTemplate::NonStandard,
            };
        }
        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&b[3..23]);
            return ScriptTemplate::PayToAddress(Address(addr));
        }
        if b.first() == Some(&OP_RETURN) && Script(b[1..].to_vec()).is_push_only() {
            return ScriptTemplate::NullData;
        }
        ScriptTemplate::NonStandard
    }

    /// Count signature operations. Bare multisig is charged the maximum
    /// number of keys since key counts are not inspected.
    pub fn sigop_count(&self) -> usize {
        let mut count = 0;
        for ins in self.instructions() {
            match ins {
                Ok(Instruction::Op(OP_CHECKSIG | OP_CHECKSIGVERIFY)) => count += 1,
                Ok(Instruction::Op(OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY)) => {
                    count += MAX_PUBKEYS_PER_MULTISIG
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        count
    }

    /// First push of the script, used to read the height from a coinbase.
    pub fn first_push(&self) -> Option<Vec<u8>> {
        match self.instructions().next()? {
            Ok(Instruction::Push(data)) => Some(data.to_vec()),
            Ok(Instruction::Op(op)) if op == OP_0 => Some(Vec::new()),
            Ok(Instruction::Op(op)) if (OP_1..=OP_16).contains(&op) => {
                Some(encode_num((op - OP_1 + 1) as i64))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

/// Iterator returned by [`Script::instructions`].
pub struct Instructions<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let op = *self.data.get(self.pos)?;
        self.pos += 1;

        let len = match op {
            // OP_0 pushes an empty vector but is reported as an opcode
            OP_0 => return Some(Ok(Instruction::Op(OP_0))),
            1..=OP_PUSHBYTES_75 => op as usize,
            OP_PUSHDATA1 => match self.data.get(self.pos) {
                Some(&n) => {
                    self.pos += 1;
                    n as usize
                }
                None => return Some(self.fail()),
            },
            OP_PUSHDATA2 => match self.data.get(self.pos..self.pos + 2) {
                Some(n) => {
                    self.pos += 2;
                    u16::from_le_bytes([n[0], n[1]]) as usize
                }
                None => return Some(self.fail()),
            },
            _ => return Some(Ok(Instruction::Op(op))),
        };

        match self.data.get(self.pos..self.pos + len) {
            Some(slice) => {
                self.pos += len;
                Some(Ok(Instruction::Push(slice)))
            }
            None => Some(self.fail()),
        }
    }
}

impl<'a> Instructions<'a> {
    /// Byte offset of the next instruction.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn fail(&mut self) -> Result<Instruction<'a>, ScriptParseError> {
        self.pos = self.data.len();
        Err(ScriptParseError::TruncatedPush)
    }
}

/// Minimal little-endian sign-magnitude number encoding.
pub fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().is_some_and(|b| b & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        if let Some(last) = out.last_mut() {
            *last |= 0x80;
        }
    }
    out
}

/// Decode a number pushed with [`encode_num`]. Returns `None` when longer
/// than `max_len` bytes.
pub fn decode_num(bytes: &[u8], max_len: usize) -> Option<i64> {
    if bytes.len() > max_len || bytes.len() > 8 {
        return None;
    }
    if bytes.is_empty() {
        return Some(0);
    }
    let mut result: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        result |= (*b as i64) << (8 * i);
    }
    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        Some(-(result & mask))
    } else {
        Some(result)
    }
}

/// Whether a push uses the shortest possible encoding.
pub fn is_minimal_push(opcode_len: usize, data: &[u8]) -> bool {
    match data.len() {
        0 => opcode_len == 1,
        1 if (1..=16).contains(&data[0]) || data[0] == 0x81 => false,
        n if n <= OP_PUSHBYTES_75 as usize => opcode_len == 1 + n,
        n if n <= u8::MAX as usize => opcode_len == 2 + n,
        _ => true,
    }
}
