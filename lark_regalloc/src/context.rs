//! Per-function assignment context.
//!
//! Bundles the mutable collaborators of one reverse assignment pass: the
//! instruction stream, the virtual-register arena, the spill arena, the two
//! bookkeeping lists, and the phase the walk is currently in. The machine is
//! the sole mutator while an entry point runs; the driver reads between
//! calls. Passed explicitly everywhere; there are no process-wide singletons.

use bitflags::bitflags;

use lark_inst::stream::Stream;
use lark_inst::value::VReg;

use crate::spill::SpillArena;
use crate::vreg::VirtRegs;

/// Which instruction stream the reverse walk is currently assigning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The method's primary stream.
    MainLine,
    /// The hot (frequently taken) side of an out-of-line region.
    OolHot,
    /// The cold out-of-line stream itself.
    OolCold,
}

bitflags! {
    /// What the most recent assignment operation did, for the driver and
    /// for trace output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AssignFlags: u8 {
        const NORMAL_ASSIGNMENT = 1 << 0;
        const REGISTER_RELOADED = 1 << 1;
        const REGISTER_SPILLED = 1 << 2;
        const INDIRECT_COERCION = 1 << 3;
    }
}

/// The assignment context for one method compilation.
pub struct AssignCtx {
    pub stream: Stream,
    pub vregs: VirtRegs,
    pub spills: SpillArena,
    /// Virtuals spilled before entry to the out-of-line cold path; the
    /// driver builds entry post-conditions from this.
    pub spilled_register_list: Vec<VReg>,
    /// Virtuals that became live for the first time inside the cold path.
    pub first_time_live_ool_register_list: Vec<VReg>,
    pub phase: Phase,
    /// Collapses the three-level slot-protection protocol into immediate
    /// release.
    pub disable_ool: bool,
    flags: AssignFlags,
}

impl AssignCtx {
    pub fn new(stream: Stream, vregs: VirtRegs) -> Self {
        Self {
            stream,
            vregs,
            spills: SpillArena::new(),
            spilled_register_list: Vec::new(),
            first_time_live_ool_register_list: Vec::new(),
            phase: Phase::MainLine,
            disable_ool: false,
            flags: AssignFlags::empty(),
        }
    }

    pub fn is_out_of_line_cold_path(&self) -> bool {
        self.phase == Phase::OolCold
    }

    pub fn is_out_of_line_hot_path(&self) -> bool {
        self.phase == Phase::OolHot
    }

    /// Whether the out-of-line slot-protection protocol is active.
    pub fn ool_enabled(&self) -> bool {
        !self.disable_ool
    }

    pub fn clear_assignment_flags(&mut self) {
        self.flags = AssignFlags::empty();
    }

    pub fn set_assignment_flag(&mut self, flag: AssignFlags) {
        self.flags |= flag;
    }

    pub fn reset_assignment_flag(&mut self, flag: AssignFlags) {
        self.flags &= !flag;
    }

    pub fn assignment_flags(&self) -> AssignFlags {
        self.flags
    }

    /// Drop one occurrence of `v` from the spilled-register list.
    pub fn remove_from_spilled_list(&mut self, v: VReg) {
        if let Some(pos) = self.spilled_register_list.iter().position(|&r| r == v) {
            self.spilled_register_list.remove(pos);
        }
    }
}
