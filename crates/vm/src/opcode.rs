//! The bytecode instruction set for the Pyro virtual machine.
//!
//! Opcodes are single bytes; operands follow inline in the instruction
//! stream. Two-byte operands are big-endian. `MakeClosure` is the only
//! variable-length instruction: its constant index is followed by one
//! `(is_local, index)` byte pair per upvalue.

/// A bytecode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    // Assertions and output.
    Assert,
    Echo,

    // Binary operators, named after their source tokens.
    BinaryAmp,
    BinaryBangEqual,
    BinaryBar,
    BinaryCaret,
    BinaryEqualEqual,
    BinaryGreater,
    BinaryGreaterEqual,
    BinaryGreaterGreater,
    BinaryIn,
    BinaryLess,
    BinaryLessEqual,
    BinaryLessLess,
    BinaryMinus,
    BinaryPercent,
    BinaryPlus,
    BinarySlash,
    BinarySlashSlash,
    BinaryStar,
    BinaryStarStar,

    // Unary operators.
    UnaryBang,
    UnaryMinus,
    UnaryPlus,
    UnaryTilde,

    // Calls and returns.
    Call,
    Return,
    Try,

    // Closures and upvalues.
    MakeClosure,
    CloseUpvalue,
    GetUpvalue,
    SetUpvalue,

    // Variable access.
    DefineGlobal,
    DefineGlobals,
    GetGlobal,
    SetGlobal,
    GetLocal,
    SetLocal,

    // Classes, fields and methods.
    MakeClass,
    DefineField,
    DefineMethod,
    Inherit,
    GetField,
    SetField,
    GetMethod,
    GetSuperMethod,
    InvokeMethod,
    InvokeSuperMethod,

    // Modules.
    ImportModule,
    ImportMembers,
    GetMember,

    // Constant loading.
    LoadConstant,
    LoadFalse,
    LoadI64_0,
    LoadI64_1,
    LoadI64_2,
    LoadI64_3,
    LoadI64_4,
    LoadI64_5,
    LoadI64_6,
    LoadI64_7,
    LoadI64_8,
    LoadI64_9,
    LoadNull,
    LoadTrue,

    // Control flow.
    Jump,
    JumpBack,
    JumpIfErr,
    JumpIfFalse,
    JumpIfNotErr,
    JumpIfNotNull,
    JumpIfTrue,
    PopJumpIfFalse,

    // Stack shuffling.
    Pop,
    PopEchoInRepl,
    Dup,
    Dup2,

    // Containers and indexing.
    MakeMap,
    MakeVec,
    GetIndex,
    SetIndex,
    Unpack,

    // Iteration.
    GetIteratorObject,
    GetIteratorNextValue,
}

/// The number of defined opcodes.
pub const OP_COUNT: usize = Op::GetIteratorNextValue as usize + 1;

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if (byte as usize) < OP_COUNT {
            // The enum is a dense #[repr(u8)] range starting at zero.
            Ok(unsafe { std::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for byte in 0..OP_COUNT as u8 {
            let op = Op::try_from(byte).expect("valid opcode byte");
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn test_invalid_byte_is_rejected() {
        assert!(Op::try_from(0xFF).is_err());
        assert!(Op::try_from(OP_COUNT as u8).is_err());
    }
}
