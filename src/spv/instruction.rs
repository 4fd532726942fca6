//! Word-level instruction encoding.

use spirv::Op;

/// One instruction under construction. The first word packs the word count
/// into the high 16 bits and the opcode into the low 16.
pub struct Instruction {
    opcode: Op,
    operands: Vec<u32>,
}

impl Instruction {
    pub fn new(opcode: Op) -> Self {
        Self {
            opcode,
            operands: Vec::new(),
        }
    }

    pub fn word(mut self, w: u32) -> Self {
        self.operands.push(w);
        self
    }

    pub fn words(mut self, ws: &[u32]) -> Self {
        self.operands.extend_from_slice(ws);
        self
    }

    /// Append a nul-terminated string, packed little-endian, padded to a
    /// word boundary.
    pub fn string(mut self, s: &str) -> Self {
        let bytes = s.as_bytes();
        let mut word = 0u32;
        let mut shift = 0;
        for &b in bytes {
            word |= (b as u32) << shift;
            shift += 8;
            if shift == 32 {
                self.operands.push(word);
                word = 0;
                shift = 0;
            }
        }
        // The terminating nul always fits: either the current word has
        // room, or a fresh zero word is pushed.
        self.operands.push(word);
        self
    }

    pub fn write(self, out: &mut Vec<u32>) {
        let count = (self.operands.len() + 1) as u32;
        out.push((count << 16) | (self.opcode as u32 & 0xffff));
        out.extend_from_slice(&self.operands);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_packing() {
        let mut out = Vec::new();
        Instruction::new(Op::TypeVoid).word(1).write(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0] >> 16, 2);
        assert_eq!(out[0] & 0xffff, Op::TypeVoid as u32);
        assert_eq!(out[1], 1);
    }

    #[test]
    fn test_string_padding() {
        // "main" is four bytes; the nul needs one extra word.
        let mut out = Vec::new();
        Instruction::new(Op::Name).word(5).string("main").write(&mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[2], u32::from_le_bytes(*b"main"));
        assert_eq!(out[3], 0);

        // "abc" packs with its nul into a single word.
        let mut out = Vec::new();
        Instruction::new(Op::Name).word(1).string("abc").write(&mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], u32::from_le_bytes([b'a', b'b', b'c', 0]));
    }
}
