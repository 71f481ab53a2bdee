use crate::common::opcode::Opcode;
use crate::common::value::Value;
use crate::object::{Heap, Obj};

/// The bytecode, line table, and constant pool belonging to one compiled
/// `Function`. `lines[i]` is the source line the byte at `code[i]` was
/// emitted from, kept parallel to `code` the way the teacher's `Lambda`
/// keeps `offsets` parallel to its code stream.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<i32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk::default()
    }

    /// Appends a raw byte (opcode or operand) at the given source line.
    pub fn write(&mut self, byte: u8, line: i32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: Opcode, line: i32) {
        self.write(op as u8, line);
    }

    /// Adds `value` to the constant pool and returns its index. Constants
    /// are not deduplicated — unlike interned strings/symbols, two `Number`
    /// constants with the same value may legitimately want separate slots if
    /// emitted from different call sites; deduplication is the interner's
    /// job, not the chunk's.
    pub fn add_constant(&mut self, value: Value) -> Option<u8> {
        if self.constants.len() >= u8::MAX as usize + 1 {
            return None;
        }
        self.constants.push(value);
        Some((self.constants.len() - 1) as u8)
    }

    pub fn read_u16(&self, at: usize) -> u16 {
        ((self.code[at] as u16) << 8) | self.code[at + 1] as u16
    }

    pub fn patch_u16(&mut self, at: usize, value: u16) {
        self.code[at] = (value >> 8) as u8;
        self.code[at + 1] = value as u8;
    }

    /// A human-readable disassembly, used by the `RUST_LOG=trace` tracing
    /// path (the compiler logs one of these per function right after
    /// emitting it) and by tests that want to assert on emitted shapes
    /// without re-deriving the opcode table. Needs `heap` to look up a
    /// `Closure` instruction's `upvalue_count`, which lives on the nested
    /// `Function` constant, not in the chunk itself.
    pub fn disassemble(&self, name: &str, heap: &Heap) -> String {
        let mut out = format!("== {} ==\n", name);
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(offset, &mut out, heap);
        }
        out
    }

    fn disassemble_instruction(&self, offset: usize, out: &mut String, heap: &Heap) -> usize {
        let line = self.lines[offset];
        out.push_str(&format!("{:04} {:4} ", offset, line));

        let op = Opcode::from_byte(self.code[offset]);
        match op {
            Opcode::Constant => {
                let idx = self.code[offset + 1];
                out.push_str(&format!("{:?} {} ({:?})\n", op, idx, self.constants.get(idx as usize)));
                offset + 2
            }
            Opcode::Closure => {
                let idx = self.code[offset + 1];
                let upvalue_count = match self.constants.get(idx as usize) {
                    Some(Value::Obj(r)) => match heap.get(*r) {
                        Obj::Function(f) => f.upvalue_count,
                        _ => unreachable!("OP_CLOSURE's constant is always a Function"),
                    },
                    _ => unreachable!("OP_CLOSURE's constant is always a Function"),
                };
                out.push_str(&format!(
                    "{:?} {} ({:?}) [{} upvalue{}]\n",
                    op,
                    idx,
                    self.constants.get(idx as usize),
                    upvalue_count,
                    if upvalue_count == 1 { "" } else { "s" }
                ));
                offset + 2 + 2 * upvalue_count as usize
            }
            Opcode::GetLocal | Opcode::SetLocal | Opcode::GetUpvalue | Opcode::SetUpvalue => {
                let slot = self.code[offset + 1];
                out.push_str(&format!("{:?} {}\n", op, slot));
                offset + 2
            }
            Opcode::GetGlobal | Opcode::SetGlobal => {
                let slot = self.read_u16(offset + 1);
                out.push_str(&format!("{:?} {}\n", op, slot));
                offset + 3
            }
            Opcode::Jump | Opcode::JumpIfFalse => {
                let jump = self.read_u16(offset + 1);
                out.push_str(&format!("{:?} -> {}\n", op, offset + 3 + jump as usize));
                offset + 3
            }
            Opcode::Call | Opcode::TailCall => {
                let argc = self.code[offset + 1];
                out.push_str(&format!("{:?} ({} args)\n", op, argc));
                offset + 2
            }
            Opcode::Continuation
            | Opcode::Null
            | Opcode::True
            | Opcode::False
            | Opcode::Pop
            | Opcode::CloseUpvalue
            | Opcode::Return => {
                out.push_str(&format!("{:?}\n", op));
                offset + 1
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_overflow_is_rejected() {
        let mut chunk = Chunk::new();
        for _ in 0..256 {
            assert!(chunk.add_constant(Value::Number(1.0)).is_some());
        }
        assert!(chunk.add_constant(Value::Number(1.0)).is_none());
    }

    #[test]
    fn patch_roundtrips_u16() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::Jump, 1);
        chunk.write(0xff, 1);
        chunk.write(0xff, 1);
        chunk.patch_u16(1, 513);
        assert_eq!(chunk.read_u16(1), 513);
    }

    /// A `Closure` instruction's inline `(is_local, index)` upvalue pairs
    /// must be skipped in full, or the next call to `disassemble_instruction`
    /// misreads one of those operand bytes as the following opcode.
    #[test]
    fn disassemble_skips_every_inline_upvalue_pair() {
        let mut heap = Heap::new();
        let nested = heap.new_function(0);
        if let Obj::Function(f) = heap.get_mut(nested) {
            f.upvalue_count = 2;
        }

        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Obj(nested)).unwrap();
        chunk.write_op(Opcode::Closure, 1);
        chunk.write(idx, 1);
        // two (is_local, index) pairs
        chunk.write(1, 1);
        chunk.write(0, 1);
        chunk.write(0, 1);
        chunk.write(5, 1);
        chunk.write_op(Opcode::Return, 1);

        let out = chunk.disassemble("test", &heap);
        assert_eq!(out.matches("Return").count(), 1, "the Return opcode must not be swallowed as an upvalue pair byte");
    }
}
