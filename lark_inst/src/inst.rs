//! Instruction definitions for the lark ARM64 backend.

use smallvec::SmallVec;

use crate::reg::RegNum;
use crate::value::{SlotRef, VReg};

/// Origin tracks where an instruction came from (for debug info / tracing).
/// Instructions spliced by the register assigner inherit the origin of the
/// instruction they were spliced before.
#[derive(Debug, Clone)]
pub struct Origin {
    /// Source node id(s) this was derived from.
    pub sources: Vec<u32>,
}

impl Origin {
    /// Create a synthetic origin (no source).
    pub fn synthetic() -> Self {
        Self { sources: vec![] }
    }

    /// Create an origin from a single source node.
    pub fn from_source(id: u32) -> Self {
        Self { sources: vec![id] }
    }
}

/// A register operand: either a virtual register awaiting assignment or a
/// real register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Virt(VReg),
    Real(RegNum),
}

/// An instruction in a lark stream.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Op,
    pub origin: Origin,
}

/// Instruction opcodes.
///
/// The first group is what the register assigner splices: spill-slot loads
/// and stores, register moves, and the xor triple used for a temp-free GPR
/// exchange. `Label`/`Proc` delimit basic blocks and terminate backward
/// scans. `Compute` stands for every other instruction in the stream: the
/// assigner only cares about which registers it references.
#[derive(Debug, Clone)]
pub enum Op {
    /// Procedure entry marker.
    Proc,
    /// Basic-block label. `cold_entry` marks the entry label of an
    /// out-of-line cold instruction stream.
    Label { id: u32, cold_entry: bool },
    /// 64-bit integer load from a spill slot.
    LdrImmX { dst: RegNum, slot: SlotRef },
    /// 64-bit float load from a spill slot.
    VldrImmD { dst: RegNum, slot: SlotRef },
    /// 64-bit integer store to a spill slot.
    StrImmX { slot: SlotRef, src: RegNum },
    /// 64-bit float store to a spill slot.
    VstrImmD { slot: SlotRef, src: RegNum },
    /// Logical OR. `orr dst, xzr, src` is the canonical register move.
    OrrX { dst: RegNum, src1: RegNum, src2: RegNum },
    /// Exclusive OR, emitted in triples for the GPR register exchange.
    EorX { dst: RegNum, src1: RegNum, src2: RegNum },
    /// Scalar double move between vector registers.
    FmovD { dst: RegNum, src: RegNum },
    /// Any other computational instruction, opaque to assignment except for
    /// its register operands.
    Compute {
        name: &'static str,
        defs: SmallVec<[Reg; 2]>,
        uses: SmallVec<[Reg; 4]>,
    },
}

impl Instruction {
    pub fn new(op: Op, origin: Origin) -> Self {
        Self { op, origin }
    }

    /// True for basic-block labels.
    pub fn is_label(&self) -> bool {
        matches!(self.op, Op::Label { .. })
    }

    /// True for the entry label of an out-of-line cold stream.
    pub fn starts_cold_stream(&self) -> bool {
        matches!(self.op, Op::Label { cold_entry: true, .. })
    }

    /// True for instructions that terminate a backward scan (`label`, `proc`).
    pub fn is_block_boundary(&self) -> bool {
        matches!(self.op, Op::Label { .. } | Op::Proc)
    }

    /// Whether this instruction reads or defines the given virtual register.
    pub fn refs_virtual(&self, v: VReg) -> bool {
        match &self.op {
            Op::Compute { defs, uses, .. } => {
                defs.contains(&Reg::Virt(v)) || uses.contains(&Reg::Virt(v))
            }
            _ => false,
        }
    }

    /// Rewrite every operand naming the virtual register `v` to the real
    /// register `r`. Used by the driver after assignment.
    pub fn rewrite_virtual(&mut self, v: VReg, r: RegNum) {
        if let Op::Compute { defs, uses, .. } = &mut self.op {
            for op in defs.iter_mut().chain(uses.iter_mut()) {
                if *op == Reg::Virt(v) {
                    *op = Reg::Real(r);
                }
            }
        }
    }
}
