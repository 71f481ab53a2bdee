/// A single VM instruction. Encoded as one byte in a `Chunk`'s code stream,
/// followed by however many operand bytes the instruction takes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Push `constants[u8]`.
    Constant = 0,
    /// Push `Null`.
    Null = 1,
    /// Push `Bool(true)`.
    True = 2,
    /// Push `Bool(false)`.
    False = 3,
    /// Drop the top of the stack.
    Pop = 4,
    /// Push `frame.slots[u8]`.
    GetLocal = 5,
    /// Overwrite `frame.slots[u8]` with the top of the stack, leaving it in place.
    SetLocal = 6,
    /// Push `globals[u16]`.
    GetGlobal = 7,
    /// Overwrite `globals[u16]` with the top of the stack, leaving it in place.
    SetGlobal = 8,
    /// Push the value behind `closure.upvalues[u8]`.
    GetUpvalue = 9,
    /// Overwrite the value behind `closure.upvalues[u8]`, leaving it in place.
    SetUpvalue = 10,
    /// Unconditional relative jump, `ip += u16`.
    Jump = 11,
    /// `ip += u16` iff the value peeked at the top of the stack is `Bool(false)`.
    JumpIfFalse = 12,
    /// Call the callee `u8` slots below the top of the stack with `u8` arguments.
    Call = 13,
    /// Like `Call`, but reuses the current frame instead of pushing a new one.
    TailCall = 14,
    /// Build a closure over `constants[u8]` (a `Function`), then read
    /// `upvalue_count` `(is_local: u8, index: u8)` pairs inline.
    Closure = 15,
    /// Snapshot the VM and push a `Continuation`.
    Continuation = 16,
    /// Close the open upvalue (if any) pointing at the top stack slot, then pop it.
    CloseUpvalue = 17,
    /// Pop the result, close upvalues above the frame base, and return to the caller.
    Return = 18,
}

impl Opcode {
    /// Converts a raw byte back into an `Opcode`. Only ever called on bytes
    /// this compiler itself emitted as an opcode position, never on operand
    /// bytes, so the match is exhaustive over what can legally appear.
    pub fn from_byte(byte: u8) -> Opcode {
        match byte {
            0 => Opcode::Constant,
            1 => Opcode::Null,
            2 => Opcode::True,
            3 => Opcode::False,
            4 => Opcode::Pop,
            5 => Opcode::GetLocal,
            6 => Opcode::SetLocal,
            7 => Opcode::GetGlobal,
            8 => Opcode::SetGlobal,
            9 => Opcode::GetUpvalue,
            10 => Opcode::SetUpvalue,
            11 => Opcode::Jump,
            12 => Opcode::JumpIfFalse,
            13 => Opcode::Call,
            14 => Opcode::TailCall,
            15 => Opcode::Closure,
            16 => Opcode::Continuation,
            17 => Opcode::CloseUpvalue,
            18 => Opcode::Return,
            other => unreachable!("not a valid opcode byte: {}", other),
        }
    }
}
