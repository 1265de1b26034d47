//! Opcode dispatch for the Pyro virtual machine.
//!
//! A fixed 256-entry jump table maps opcode bytes to handler functions;
//! each submodule implements one opcode family and registers its handlers.
//! Handlers read their own operands from the current frame's instruction
//! stream.

pub mod arithmetic;
pub mod calls;
pub mod classes;
pub mod collections;
pub mod constants;
pub mod control;
pub mod iteration;
pub mod modules;
pub mod variables;

use once_cell::sync::Lazy;

use crate::error::{Panic, VmResult};
use crate::opcode::Op;
use crate::vm::Vm;

/// A handler for a VM instruction.
pub type OpHandler = fn(&mut Vm) -> VmResult<()>;

/// The jump table: one slot for each possible opcode byte.
pub struct JumpTable {
    handlers: [Option<OpHandler>; 256],
}

impl JumpTable {
    /// Creates a jump table with all the default handlers registered.
    pub fn new() -> Self {
        let mut table = Self {
            handlers: [None; 256],
        };

        arithmetic::register_handlers(&mut table);
        calls::register_handlers(&mut table);
        classes::register_handlers(&mut table);
        collections::register_handlers(&mut table);
        constants::register_handlers(&mut table);
        control::register_handlers(&mut table);
        iteration::register_handlers(&mut table);
        modules::register_handlers(&mut table);
        variables::register_handlers(&mut table);

        table
    }

    /// Registers a handler for an opcode.
    pub fn register(&mut self, op: Op, handler: OpHandler) {
        self.handlers[op as usize] = Some(handler);
    }

    /// Returns the handler for an opcode byte.
    pub fn get(&self, byte: u8) -> Option<OpHandler> {
        self.handlers[byte as usize]
    }
}

impl Default for JumpTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The default jump table.
static DEFAULT: Lazy<JumpTable> = Lazy::new(JumpTable::new);

/// Executes one instruction.
///
/// An unknown opcode byte is a hard panic: it means the compiler or the
/// dispatcher is broken, and user code must not be able to catch it.
pub(crate) fn dispatch(vm: &mut Vm, byte: u8) -> VmResult<()> {
    match DEFAULT.get(byte) {
        Some(handler) => handler(vm),
        None => Err(Panic::error("Invalid opcode.").hard().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OP_COUNT;

    #[test]
    fn test_every_opcode_has_a_handler() {
        let table = JumpTable::new();
        for byte in 0..OP_COUNT as u8 {
            assert!(
                table.get(byte).is_some(),
                "opcode {:?} has no handler",
                Op::try_from(byte),
            );
        }
    }

    #[test]
    fn test_invalid_opcodes_have_no_handler() {
        let table = JumpTable::new();
        assert!(table.get(0xFE).is_none());
    }
}
