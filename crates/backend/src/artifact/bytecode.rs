use crate::{
    error::DecodeError,
    utils::{
        decode_hex,
        opcode::{disassemble, split_metadata, Instruction, PcIcMap},
    },
};

/// Runtime bytecode together with its instruction list and pc to instruction-counter mapping.
///
/// The CBOR metadata tail appended by the compiler is kept in [`Self::code`] but excluded from
/// disassembly, since the source map has no entries for it.
#[derive(Debug, Clone)]
pub struct AnalyzedBytecode {
    code: Vec<u8>,
    metadata_len: usize,
    instructions: Vec<Instruction>,
    pc_ic_map: PcIcMap,
}

impl AnalyzedBytecode {
    pub fn new(code: &[u8]) -> Result<Self, DecodeError> {
        let (body, metadata) = split_metadata(code);
        let instructions = disassemble(body)?;
        let pc_ic_map = PcIcMap::new(&instructions);

        trace!(
            len = code.len(),
            metadata = metadata.len(),
            instructions = instructions.len(),
            "analyzed bytecode"
        );
        Ok(Self { code: code.to_vec(), metadata_len: metadata.len(), instructions, pc_ic_map })
    }

    /// Decodes a hex string, with or without `0x` prefix.
    pub fn from_hex(code: &str) -> Result<Self, DecodeError> {
        let code = decode_hex(code).map_err(DecodeError::InvalidBytecode)?;
        Self::new(&code)
    }

    /// The full bytecode, metadata included.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The executable part of the bytecode.
    pub fn body(&self) -> &[u8] {
        &self.code[..self.code.len() - self.metadata_len]
    }

    /// The CBOR metadata tail, possibly empty.
    pub fn metadata(&self) -> &[u8] {
        &self.code[self.code.len() - self.metadata_len..]
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn inst_n(&self) -> usize {
        self.instructions.len()
    }

    pub fn instruction_at_pc(&self, pc: usize) -> Option<&Instruction> {
        self.pc_ic_map.get(pc).map(|ic| &self.instructions[ic])
    }

    pub fn next_insn_pc(&self, pc: usize) -> Option<usize> {
        let ic = self.pc_ic_map.get(pc)?;
        self.instructions.get(ic + 1).map(|insn| insn.pc)
    }

    pub fn prev_insn_pc(&self, pc: usize) -> Option<usize> {
        let ic = self.pc_ic_map.get(pc)?;
        ic.checked_sub(1).map(|ic| self.instructions[ic].pc)
    }

    /// Renders one instruction per line as `pc: MNEMONIC [operand]`.
    pub fn disassembly(&self) -> String {
        self.instructions
            .iter()
            .map(|insn| format!("{:>6}: {}", insn.pc, insn.display(&self.code)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation() {
        let bytecode = AnalyzedBytecode::from_hex("0x6001600201").unwrap();
        assert_eq!(bytecode.inst_n(), 3);
        assert!(bytecode.metadata().is_empty());
        assert_eq!(bytecode.next_insn_pc(0), Some(2));
        assert_eq!(bytecode.next_insn_pc(4), None);
        assert_eq!(bytecode.prev_insn_pc(2), Some(0));
        assert_eq!(bytecode.prev_insn_pc(0), None);
        assert!(bytecode.instruction_at_pc(1).is_none());
        assert_eq!(bytecode.disassembly(), "     0: PUSH1 0x01\n     2: PUSH1 0x02\n     4: ADD");
    }

    #[test]
    fn test_metadata_is_not_disassembled() {
        // STOP || a1 64 'solc' 43 000813 || 0x000a
        let bytecode = AnalyzedBytecode::from_hex("00a164736f6c6343000813000a").unwrap();
        assert_eq!(bytecode.inst_n(), 1);
        assert_eq!(bytecode.body(), &[0x00]);
        assert_eq!(bytecode.metadata().len(), 12);
        assert_eq!(bytecode.len(), 13);
    }

    #[test]
    fn test_code_resembling_metadata_is_disassembled() {
        let bytecode = AnalyzedBytecode::from_hex("0x60a060000003").unwrap();
        assert!(bytecode.metadata().is_empty());
        assert_eq!(bytecode.inst_n(), 4);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(matches!(
            AnalyzedBytecode::from_hex("0x60zz"),
            Err(DecodeError::InvalidBytecode(_))
        ));
    }
}
