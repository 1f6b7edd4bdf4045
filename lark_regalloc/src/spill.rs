//! Spill arena: stack-slot allocation for spilled virtual registers.
//!
//! Slots are recycled through a free-spill list. While the list is locked
//! (across out-of-line boundaries), freed slots are not handed out again and
//! virtuals keep their backing pointers, so a protected slot can be re-found
//! and reused by the same virtual on the other path.

use log::trace;

use lark_inst::value::{SlotRef, VReg};

/// Spill-slot protection depth. 1 = defined in main line, 2 = out-of-line
/// hot path, 3 = out-of-line cold path, 0 = released (or hot-path release
/// deferred to the cold pass).
pub type SpillDepth = u8;

/// A stack slot backing a spilled virtual register.
#[derive(Debug, Clone)]
pub struct SpillSlot {
    pub size: u32,
    pub align: u32,
    /// Slot may hold a collected reference and must be known to GC maps.
    pub collected: bool,
    /// For internal-pointer slots, the pinning array base.
    pub pinning_array: Option<VReg>,
    max_spill_depth: SpillDepth,
    freed: bool,
}

impl SpillSlot {
    pub fn max_spill_depth(&self) -> SpillDepth {
        self.max_spill_depth
    }

    pub fn is_freed(&self) -> bool {
        self.freed
    }
}

/// Allocates and recycles spill slots for one method compilation.
pub struct SpillArena {
    slots: Vec<SpillSlot>,
    free_list: Vec<SlotRef>,
    free_list_locked: bool,
}

impl SpillArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            free_list_locked: false,
        }
    }

    /// Allocate a slot of `size` bytes. Reuses a freed slot of the same
    /// shape when the free-spill list is unlocked; `hint` requests one
    /// specific freed slot. Depth always restarts at 0.
    pub fn allocate(&mut self, size: u32, collected: bool, hint: Option<SlotRef>) -> SlotRef {
        if !self.free_list_locked {
            if let Some(h) = hint {
                if let Some(pos) = self.free_list.iter().position(|&s| s == h) {
                    if self.slots[h.index()].size == size {
                        self.free_list.swap_remove(pos);
                        return self.reuse(h, collected);
                    }
                }
            }
            if let Some(pos) = self
                .free_list
                .iter()
                .position(|&s| self.slots[s.index()].size == size)
            {
                let r = self.free_list.swap_remove(pos);
                return self.reuse(r, collected);
            }
        }
        let r = SlotRef(self.slots.len() as u32);
        self.slots.push(SpillSlot {
            size,
            align: size,
            collected,
            pinning_array: None,
            max_spill_depth: 0,
            freed: false,
        });
        trace!("spill arena: new slot {r} ({size} bytes, collected={collected})");
        r
    }

    /// Allocate a slot for an internal pointer, remembering its pinning
    /// array base so GC can treat the slot specially.
    pub fn allocate_internal_pointer(&mut self, pinning_array: VReg) -> SlotRef {
        let r = self.allocate(8, true, None);
        self.slots[r.index()].pinning_array = Some(pinning_array);
        r
    }

    fn reuse(&mut self, r: SlotRef, collected: bool) -> SlotRef {
        let slot = &mut self.slots[r.index()];
        slot.freed = false;
        slot.collected = collected;
        slot.pinning_array = None;
        slot.max_spill_depth = 0;
        trace!("spill arena: reusing slot {r}");
        r
    }

    /// Return a slot to the free-spill list.
    pub fn free(&mut self, r: SlotRef, size: u32, _align: u32) {
        let slot = &mut self.slots[r.index()];
        assert!(!slot.freed, "spill slot {r} freed twice");
        debug_assert_eq!(slot.size, size, "spill slot {r} freed with wrong size");
        slot.freed = true;
        self.free_list.push(r);
        trace!("spill arena: freed slot {r}");
    }

    /// While locked, freed slots are not recycled and backing pointers stay
    /// attached to their virtuals.
    pub fn is_free_spill_list_locked(&self) -> bool {
        self.free_list_locked
    }

    pub fn lock_free_spill_list(&mut self) {
        self.free_list_locked = true;
    }

    pub fn unlock_free_spill_list(&mut self) {
        self.free_list_locked = false;
    }

    pub fn get(&self, r: SlotRef) -> &SpillSlot {
        &self.slots[r.index()]
    }

    pub fn max_spill_depth(&self, r: SlotRef) -> SpillDepth {
        self.slots[r.index()].max_spill_depth
    }

    pub fn set_max_spill_depth(&mut self, r: SlotRef, depth: SpillDepth) {
        debug_assert!(depth <= 3, "spill depth out of range: {depth}");
        self.slots[r.index()].max_spill_depth = depth;
    }

    /// Number of slots ever allocated.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots currently on the free-spill list.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

impl Default for SpillArena {
    fn default() -> Self {
        Self::new()
    }
}
