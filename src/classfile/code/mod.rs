//! Method bytecode as an editable instruction list.
//!
//! [`Code`] is the tree form of a `Code` attribute: instructions with symbolic
//! [`Label`] branch targets, line number markers and try/catch blocks that refer
//! to labels instead of byte offsets. Instructions can be inserted, removed and
//! moved between methods without fixing up offsets by hand; [`Code::encode`]
//! lays the list out again and resolves every label.
//!
//! The same decoded form is what the interpreter executes.
//!
//! # Example
//!
//! ```rust
//! use shadowbox::classfile::{code::{opcodes, Code, Insn}, CodeAttribute};
//! use shadowbox::classfile::ConstantPool;
//!
//! let attribute = CodeAttribute {
//!     max_stack: 1,
//!     max_locals: 1,
//!     code: vec![opcodes::ILOAD_0, opcodes::IRETURN],
//!     exception_table: vec![],
//!     attributes: vec![],
//! };
//! let code = Code::decode(&attribute)?;
//! assert_eq!(code.insns[0], Insn::Var { opcode: opcodes::ILOAD, index: 0 });
//! let encoded = code.encode(&ConstantPool::new())?;
//! assert_eq!(encoded.code, attribute.code);
//! # Ok::<(), shadowbox::Error>(())
//! ```

mod assembler;
mod decoder;
pub mod opcodes;

pub use assembler::{load_opcode, CodeAssembler};

use crate::classfile::attributes::Attribute;

/// A symbolic branch target.
///
/// Labels produced by decoding are numbered after the byte offset they mark;
/// labels created with [`Code::new_label`] are numbered past the end of the
/// original code so they never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// One decoded instruction or pseudo-instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Marks a branch target position.
    Label(Label),
    /// Marks the start of a source line.
    Line(u16),
    /// An instruction without operands.
    Op(u8),
    /// `bipush` / `sipush`.
    IntPush {
        /// `BIPUSH` or `SIPUSH`
        opcode: u8,
        /// The pushed value
        value: i16,
    },
    /// `ldc` / `ldc_w` of a one-slot constant.
    Ldc(u16),
    /// `ldc2_w` of a long or double.
    Ldc2(u16),
    /// Local variable load/store (normalized from the `_n` and `wide` forms) or `ret`.
    Var {
        /// One of `ILOAD..ALOAD`, `ISTORE..ASTORE`, `RET`
        opcode: u8,
        /// Local slot
        index: u16,
    },
    /// `iinc`.
    Iinc {
        /// Local slot
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// A conditional or unconditional branch (`goto_w`/`jsr_w` normalized).
    Jump {
        /// Branch opcode
        opcode: u8,
        /// Target
        target: Label,
    },
    /// `tableswitch`.
    TableSwitch {
        /// Default target
        default: Label,
        /// Lowest key
        low: i32,
        /// Targets for `low..=low + targets.len() - 1`
        targets: Vec<Label>,
    },
    /// `lookupswitch`.
    LookupSwitch {
        /// Default target
        default: Label,
        /// Sorted `(key, target)` pairs
        pairs: Vec<(i32, Label)>,
    },
    /// `getstatic`, `putstatic`, `getfield`, `putfield`.
    Field {
        /// Field opcode
        opcode: u8,
        /// `Fieldref` index
        index: u16,
    },
    /// `invokevirtual`, `invokespecial`, `invokestatic`, `invokeinterface`.
    Invoke {
        /// Invoke opcode
        opcode: u8,
        /// `Methodref` / `InterfaceMethodref` index
        index: u16,
    },
    /// `invokedynamic`.
    InvokeDynamic(u16),
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    Type {
        /// Type opcode
        opcode: u8,
        /// `Class` index
        index: u16,
    },
    /// `newarray` with a primitive element code.
    NewArray(u8),
    /// `multianewarray`.
    MultiANewArray {
        /// `Class` index of the array type
        index: u16,
        /// Number of dimensions to allocate
        dimensions: u8,
    },
}

impl Insn {
    /// Returns `true` for pseudo-instructions that occupy no bytes.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Insn::Label(_) | Insn::Line(_))
    }
}

/// A try/catch block expressed with labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatch {
    /// First covered instruction.
    pub start: Label,
    /// End of the covered range (exclusive).
    pub end: Label,
    /// Handler entry point.
    pub handler: Label,
    /// `Class` index of the caught type, 0 for catch-all.
    pub catch_type: u16,
}

/// Decoded method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    /// Maximum operand stack depth.
    pub max_stack: u16,
    /// Number of local variable slots.
    pub max_locals: u16,
    /// Instructions and pseudo-instructions in layout order.
    pub insns: Vec<Insn>,
    /// Exception handlers in priority order.
    pub try_catch: Vec<TryCatch>,
    /// Nested attributes other than line numbers. Offset-based tables are dropped when decoding.
    pub attributes: Vec<Attribute>,
    next_label: u32,
}

impl Code {
    /// Creates an empty body.
    #[must_use]
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Code {
            max_stack,
            max_locals,
            insns: Vec::new(),
            try_catch: Vec::new(),
            attributes: Vec::new(),
            next_label: 0x1_0000,
        }
    }

    /// Allocates a fresh label that is not yet placed.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Number of real (non pseudo) instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.insns.iter().filter(|insn| !insn.is_pseudo()).count()
    }
}
