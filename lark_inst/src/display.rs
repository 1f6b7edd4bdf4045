//! Assembler-style text rendering for instructions and streams.
//!
//! Output format:
//! ```text
//! proc
//! ldrimmx x3, [s0]
//! orrx x5, xzr, x3
//! mul vreg2 <- vreg0, vreg1
//! label L1
//! ```

use std::fmt;

use crate::inst::{Instruction, Op, Reg};
use crate::stream::Stream;

fn fmt_reg(r: &Reg) -> String {
    match r {
        Reg::Virt(v) => v.to_string(),
        Reg::Real(n) => n.name().to_string(),
    }
}

fn fmt_regs(regs: &[Reg]) -> String {
    regs.iter().map(fmt_reg).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Proc => write!(f, "proc"),
            Op::Label { id, cold_entry } => {
                if *cold_entry {
                    write!(f, "label L{id} (cold entry)")
                } else {
                    write!(f, "label L{id}")
                }
            }
            Op::LdrImmX { dst, slot } => write!(f, "ldrimmx {dst}, [{slot}]"),
            Op::VldrImmD { dst, slot } => write!(f, "vldrimmd {dst}, [{slot}]"),
            Op::StrImmX { slot, src } => write!(f, "strimmx {src}, [{slot}]"),
            Op::VstrImmD { slot, src } => write!(f, "vstrimmd {src}, [{slot}]"),
            Op::OrrX { dst, src1, src2 } => write!(f, "orrx {dst}, {src1}, {src2}"),
            Op::EorX { dst, src1, src2 } => write!(f, "eorx {dst}, {src1}, {src2}"),
            Op::FmovD { dst, src } => write!(f, "fmovd {dst}, {src}"),
            Op::Compute { name, defs, uses } => {
                write!(f, "{name}")?;
                if !defs.is_empty() {
                    write!(f, " {}", fmt_regs(defs))?;
                }
                if !uses.is_empty() {
                    if defs.is_empty() {
                        write!(f, " {}", fmt_regs(uses))?;
                    } else {
                        write!(f, " <- {}", fmt_regs(uses))?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.op.fmt(f)
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in self.iter() {
            writeln!(f, "{}", self.inst(r))?;
        }
        Ok(())
    }
}

impl Stream {
    /// Render each instruction as one line of text, in forward order.
    /// Test assertions on spliced code go through this.
    pub fn render(&self) -> Vec<String> {
        self.iter().map(|r| self.inst(r).to_string()).collect()
    }
}
