//! Virtual-register arena.

use lark_inst::reg::{Kind, RegNum};
use lark_inst::value::{SlotRef, VReg};

/// A virtual register: an abstract operand with use counts but no hardware
/// identity until the assigner binds one.
#[derive(Debug, Clone)]
pub struct VirtualRegister {
    pub kind: Kind,
    /// Real register currently holding this virtual, if any.
    pub assigned: Option<RegNum>,
    /// Uses over the whole method.
    pub total_use_count: u32,
    /// Uses not yet seen by the reverse walk.
    pub future_use_count: u32,
    /// Uses inside out-of-line instruction streams.
    pub out_of_line_use_count: u32,
    /// Spill slot holding this virtual's value while unmapped.
    pub backing_storage: Option<SlotRef>,
    /// Value is a pointer into the middle of an array.
    pub contains_internal_pointer: bool,
    /// Value is a collected (GC-visible) reference.
    pub contains_collected_reference: bool,
    /// Base array of an internal pointer.
    pub pinning_array_pointer: Option<VReg>,
}

impl VirtualRegister {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            assigned: None,
            total_use_count: 0,
            future_use_count: 0,
            out_of_line_use_count: 0,
            backing_storage: None,
            contains_internal_pointer: false,
            contains_collected_reference: false,
            pinning_array_pointer: None,
        }
    }
}

/// Arena of virtual registers, keyed by `VReg`.
pub struct VirtRegs {
    regs: Vec<VirtualRegister>,
}

impl VirtRegs {
    pub fn new() -> Self {
        Self { regs: Vec::new() }
    }

    /// Create a virtual register of the given kind with zero use counts.
    pub fn new_virtual(&mut self, kind: Kind) -> VReg {
        let r = VReg(self.regs.len() as u32);
        self.regs.push(VirtualRegister::new(kind));
        r
    }

    /// Create a virtual register with `uses` total (and future) uses.
    pub fn new_virtual_with_uses(&mut self, kind: Kind, uses: u32) -> VReg {
        let r = self.new_virtual(kind);
        self.regs[r.index()].total_use_count = uses;
        self.regs[r.index()].future_use_count = uses;
        r
    }

    pub fn get(&self, r: VReg) -> &VirtualRegister {
        &self.regs[r.index()]
    }

    pub fn get_mut(&mut self, r: VReg) -> &mut VirtualRegister {
        &mut self.regs[r.index()]
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Iterate all virtual registers with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (VReg, &VirtualRegister)> {
        self.regs
            .iter()
            .enumerate()
            .map(|(i, vr)| (VReg(i as u32), vr))
    }
}

impl Default for VirtRegs {
    fn default() -> Self {
        Self::new()
    }
}
