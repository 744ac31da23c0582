use std::fmt::Write as _;

use alloy_primitives::U256;
use revm::interpreter::{
    opcode::{PUSH1, PUSH32},
    OpCode,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Number of operand bytes following each opcode.
///
/// Only `PUSH1..=PUSH32` carry inline operands, of `opcode - PUSH1 + 1` bytes.
pub const OPERAND_LENGTHS: [u8; 256] = operand_lengths();

const fn operand_lengths() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut opcode = PUSH1;
    while opcode <= PUSH32 {
        table[opcode as usize] = opcode - PUSH1 + 1;
        opcode += 1;
    }
    table
}

/// Returns the number of operand bytes of `opcode`.
#[inline]
pub const fn operand_length(opcode: u8) -> usize {
    OPERAND_LENGTHS[opcode as usize] as usize
}

/// A single disassembled instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    /// Byte offset of the opcode.
    pub pc: usize,
    pub opcode: u8,
    pub operand_length: usize,
    /// Position of the instruction in the instruction list.
    pub instruction_index: usize,
}

impl Instruction {
    /// Size of the instruction in bytes, opcode included.
    #[inline]
    pub const fn size(&self) -> usize {
        1 + self.operand_length
    }

    /// The pc right after this instruction.
    #[inline]
    pub const fn next_pc(&self) -> usize {
        self.pc + self.size()
    }

    /// The operand bytes of this instruction within `code`.
    pub fn operand<'a>(&self, code: &'a [u8]) -> &'a [u8] {
        &code[self.pc + 1..self.next_pc()]
    }

    /// Mnemonic of the opcode, e.g. `PUSH1`.
    pub fn mnemonic(&self) -> String {
        mnemonic(self.opcode)
    }

    /// Renders the instruction together with its operand, e.g. `PUSH2 0x0104`.
    pub fn display(&self, code: &[u8]) -> String {
        let mut s = self.mnemonic();
        if self.operand_length > 0 {
            let _ = write!(s, " 0x{}", hex::encode(self.operand(code)));
        }
        s
    }
}

/// Mnemonic of a raw opcode, or `UNKNOWN(0x..)` for unassigned bytes.
pub fn mnemonic(opcode: u8) -> String {
    OpCode::new(opcode)
        .map_or_else(|| format!("UNKNOWN(0x{opcode:02x})"), |op| op.as_str().to_string())
}

/// Disassembles `code` into its ordered instruction list.
///
/// Push operands are skipped as data. Fails if a push operand extends past the end of `code`.
pub fn disassemble(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::with_capacity(code.len());

    let mut pc = 0;
    while pc < code.len() {
        let opcode = code[pc];
        let operand_length = operand_length(opcode);

        let available = code.len() - pc - 1;
        if operand_length > available {
            return Err(DecodeError::TruncatedBytecode {
                pc,
                opcode,
                needed: operand_length,
                available,
            });
        }

        let insn =
            Instruction { pc, opcode, operand_length, instruction_index: instructions.len() };
        pc = insn.next_pc();
        instructions.push(insn);
    }

    Ok(instructions)
}

/// Returns the value pushed by the PUSH instruction at `pc`.
#[inline]
pub fn get_push_value(code: &[u8], pc: usize) -> Result<U256, DecodeError> {
    let opcode = *code.get(pc).ok_or(DecodeError::InvalidBytecode(format!(
        "pc {pc} is out of bounds ({} bytes)",
        code.len()
    )))?;
    let push_size = operand_length(opcode);

    let push_start = pc + 1;
    let push_end = push_start + push_size;
    if push_end > code.len() {
        return Err(DecodeError::TruncatedBytecode {
            pc,
            opcode,
            needed: push_size,
            available: code.len() - push_start,
        });
    }

    U256::try_from_be_slice(&code[push_start..push_end]).ok_or_else(|| {
        DecodeError::InvalidBytecode(format!("invalid bytes: {:?}", &code[push_start..push_end]))
    })
}

/// Keys solc writes into the CBOR metadata map.
const METADATA_KEYS: [&[u8]; 5] = [b"ipfs", b"bzzr0", b"bzzr1", b"solc", b"experimental"];

/// Splits off the CBOR metadata blob the Solidity compiler appends to runtime code.
///
/// The last two bytes hold the big-endian length of the blob. The tail is only split off when
/// that length fits in the code and the blob is exactly one CBOR map of solc metadata keys, so
/// code compiled without metadata is never cut.
pub fn split_metadata(code: &[u8]) -> (&[u8], &[u8]) {
    if code.len() < 2 {
        return (code, &[]);
    }

    let len = u16::from_be_bytes([code[code.len() - 2], code[code.len() - 1]]) as usize;
    let tail = len + 2;
    if len == 0 || tail > code.len() {
        return (code, &[]);
    }

    let split = code.len() - tail;
    if !is_solc_metadata(&code[split..code.len() - 2]) {
        return (code, &[]);
    }

    code.split_at(split)
}

/// Whether `blob` is a single CBOR map with text keys from [`METADATA_KEYS`] and byte string,
/// text string or boolean values, consuming every byte.
fn is_solc_metadata(blob: &[u8]) -> bool {
    let Some((&header, mut rest)) = blob.split_first() else {
        return false;
    };
    // Map with 1..=23 entries.
    if !(0xa1..=0xb7).contains(&header) {
        return false;
    }

    for _ in 0..header - 0xa0 {
        let Some((key, after_key)) = cbor_string(rest, 3) else {
            return false;
        };
        if !METADATA_KEYS.contains(&key) {
            return false;
        }

        rest = match after_key.first() {
            // false / true
            Some(0xf4 | 0xf5) => &after_key[1..],
            Some(&byte) if byte >> 5 == 2 || byte >> 5 == 3 => {
                match cbor_string(after_key, byte >> 5) {
                    Some((_, after_value)) => after_value,
                    None => return false,
                }
            }
            _ => return false,
        };
    }

    rest.is_empty()
}

/// Reads a definite-length CBOR byte (`major = 2`) or text (`major = 3`) string off the front
/// of `data`, returning its payload and the remaining bytes.
fn cbor_string(data: &[u8], major: u8) -> Option<(&[u8], &[u8])> {
    let (&head, rest) = data.split_first()?;
    if head >> 5 != major {
        return None;
    }

    let (len, rest) = match head & 0x1f {
        n @ 0..=23 => (n as usize, rest),
        24 => (*rest.first()? as usize, &rest[1..]),
        25 => (u16::from_be_bytes([*rest.first()?, *rest.get(1)?]) as usize, &rest[2..]),
        _ => return None,
    };

    (len <= rest.len()).then(|| rest.split_at(len))
}

/// Maps from program counter to instruction counter.
#[derive(Debug, Clone, Default)]
pub struct PcIcMap {
    pub inner: FxHashMap<usize, usize>,
}

impl PcIcMap {
    /// Creates a new `PcIcMap` for the given instructions.
    pub fn new(instructions: &[Instruction]) -> Self {
        Self { inner: instructions.iter().map(|insn| (insn.pc, insn.instruction_index)).collect() }
    }

    /// Returns the length of the map.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the instruction counter for the given program counter.
    pub fn get(&self, pc: usize) -> Option<usize> {
        self.inner.get(&pc).copied()
    }
}

#[cfg(test)]
mod tests {
    use revm::interpreter::opcode::{ADD, PUSH0, STOP};

    use super::*;

    #[test]
    fn test_operand_table() {
        assert_eq!(operand_length(PUSH0), 0);
        assert_eq!(operand_length(PUSH1), 1);
        assert_eq!(operand_length(PUSH32), 32);
        assert_eq!(operand_length(ADD), 0);
        assert_eq!(OPERAND_LENGTHS.iter().filter(|&&n| n > 0).count(), 32);
    }

    #[test]
    fn test_disassemble_push_operands() {
        // PUSH1 0x01; PUSH1 0x02; ADD
        let code = hex::decode("6001600201").unwrap();
        let insns = disassemble(&code).unwrap();

        assert_eq!(insns.iter().map(|i| i.pc).collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(insns.iter().map(|i| i.instruction_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(insns[2].opcode, ADD);
        assert_eq!(insns[0].display(&code), "PUSH1 0x01");
        assert_eq!(insns[2].mnemonic(), "ADD");
    }

    #[test]
    fn test_push_operand_is_not_an_opcode() {
        // PUSH2 0x6001; STOP. The operand looks like a PUSH1 but must be skipped.
        let code = [0x61, 0x60, 0x01, STOP];
        let insns = disassemble(&code).unwrap();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[1].pc, 3);
        assert_eq!(get_push_value(&code, 0).unwrap(), U256::from(0x6001));
    }

    #[test]
    fn test_truncated_push32() {
        let mut code = vec![0x00, PUSH32];
        code.extend([0xff; 31]);
        let err = disassemble(&code).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedBytecode { pc: 1, opcode: PUSH32, needed: 32, available: 31 }
        );
    }

    #[test]
    fn test_pc_is_cumulative_size() {
        // PUSH32 0x00..01; PUSH1 0x00; ADD; JUMPDEST
        let mut code = vec![PUSH32];
        code.extend([0u8; 31]);
        code.extend([0x01, PUSH1, 0x00, ADD, 0x5b]);
        let insns = disassemble(&code).unwrap();
        let mut expected = 0;
        for insn in &insns {
            assert_eq!(insn.pc, expected);
            expected += insn.size();
        }
        assert_eq!(expected, code.len());

        let map = PcIcMap::new(&insns);
        assert_eq!(map.len(), insns.len());
        assert_eq!(map.get(33), Some(1));
        assert_eq!(map.get(1), None);
    }

    #[test]
    fn test_split_metadata() {
        // code || a2 'ipfs' bytes(34) 'solc' 0x000813 || len
        let mut blob = vec![0xa2, 0x64];
        blob.extend(b"ipfs");
        blob.extend([0x58, 0x22]);
        blob.extend([0xab; 34]);
        blob.push(0x64);
        blob.extend(b"solc");
        blob.extend([0x43, 0x00, 0x08, 0x13]);
        assert_eq!(blob.len(), 51);

        let mut code = vec![0x60, 0x01, 0x00];
        code.extend(&blob);
        code.extend((blob.len() as u16).to_be_bytes());

        let (body, metadata) = split_metadata(&code);
        assert_eq!(body, &[0x60, 0x01, 0x00]);
        assert_eq!(metadata.len(), blob.len() + 2);

        // Not a metadata tail: the encoded length exceeds the code size.
        let code = hex::decode("6001600201").unwrap();
        let (body, metadata) = split_metadata(&code);
        assert_eq!(body.len(), 5);
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_code_without_metadata_is_not_split() {
        // PUSH1 0xa0; PUSH1 0x00; STOP; SUB. The last two bytes read as length 3 and the byte
        // at the split point looks like a CBOR map header.
        let code = hex::decode("60a060000003").unwrap();
        let (body, metadata) = split_metadata(&code);
        assert_eq!(body, code.as_slice());
        assert!(metadata.is_empty());
        assert_eq!(disassemble(body).unwrap().len(), 4);

        // A map header followed by an unknown key.
        let mut code = vec![0x00, 0xa1, 0x63];
        code.extend(b"foo");
        code.extend([0xf5, 0x00, 0x06]);
        assert!(split_metadata(&code).1.is_empty());

        // A known key whose value runs past the claimed length.
        let mut code = vec![0x00, 0xa1, 0x64];
        code.extend(b"solc");
        code.extend([0x43, 0x00, 0x08, 0x00, 0x09]);
        assert!(split_metadata(&code).1.is_empty());
    }

    #[test]
    fn test_experimental_flag_metadata() {
        // STOP || a1 'experimental' true || len
        let mut blob = vec![0xa1, 0x6c];
        blob.extend(b"experimental");
        blob.push(0xf5);

        let mut code = vec![0x00];
        code.extend(&blob);
        code.extend((blob.len() as u16).to_be_bytes());
        assert_eq!(split_metadata(&code).0, &[0x00]);
    }
}
