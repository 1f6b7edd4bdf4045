//! lark_regalloc: local register assignment for the lark ARM64 backend.
//!
//! Maps virtual registers onto the physical register file in a single
//! greedy reverse walk over a linearized instruction stream, splicing
//! spill/reload/copy instructions as pressure demands. Supports nested
//! out-of-line (hot/cold) instruction streams with a three-level spill-slot
//! protection protocol, snapshot/restore of the whole file at out-of-line
//! boundaries, and register-dependency synthesis for live and spilled
//! virtuals.
//!
//! The surrounding driver owns the walk: for each register operand of each
//! instruction (visited back-to-front) it calls
//! [`Machine::assign_one_register`] or [`Machine::coerce_register_assignment`]
//! and rewrites the operand with the returned real register.

pub mod context;
pub mod deps;
pub mod machine;
pub mod spill;
pub mod vreg;

pub use context::{AssignCtx, AssignFlags, Phase};
pub use deps::{DepLocation, PostCondition, RegisterDependencyConditions};
pub use machine::{Machine, RegFlags, RegState};
pub use spill::{SpillArena, SpillSlot};
pub use vreg::{VirtRegs, VirtualRegister};
