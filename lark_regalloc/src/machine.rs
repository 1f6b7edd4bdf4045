//! The machine: the physical register file and the assignment engines.
//!
//! All entry points are driven by a reverse walk over the instruction
//! stream. By the time any instruction is visited, every later (in forward
//! order) use of a virtual has already been processed, which is what makes
//! the greedy distance-to-next-use eviction sound. Spill/reload/copy code is
//! spliced immediately before the cursor, so it lands earlier in forward
//! program order than the instruction being processed.

use bitflags::bitflags;
use log::trace;
use smallvec::SmallVec;

use lark_inst::inst::Op;
use lark_inst::reg::{Kind, NUM_REGS, RegNum};
use lark_inst::stream::Stream;
use lark_inst::value::{InstRef, VReg};

use crate::context::{AssignCtx, AssignFlags};
use crate::deps::{DepLocation, RegisterDependencyConditions};

/// Size in bytes of a reference address on ARM64.
const ADDRESS_SIZE: u32 = 8;
/// Size in bytes of a spilled double-precision value.
const FPR_SPILL_SIZE: u32 = 8;

/// Assignment state of a real register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegState {
    /// Available for assignment.
    Free,
    /// Free in effect, but still carrying a stale back-pointer from a
    /// previous assignment; normalized to `Free` before reuse.
    Unlatched,
    /// Mapped to exactly one virtual register.
    Assigned,
    /// Temporarily pinned by the current instruction's coercion; excluded
    /// from eviction candidacy.
    Blocked,
    /// Permanently unavailable (ABI-reserved).
    Locked,
}

bitflags! {
    /// Opaque per-register flag bits, preserved across snapshot/restore.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegFlags: u8 {
        /// The register was handed out at least once in this method;
        /// drives callee-save handling in the surrounding code generator.
        const ASSIGNED_IN_METHOD = 1 << 0;
    }
}

/// One entry of the register file.
#[derive(Debug, Clone)]
struct RealRegister {
    state: RegState,
    /// Tiebreaker for the free-register scan; lower is better.
    weight: u32,
    flags: RegFlags,
    /// Virtual register currently mapped here.
    assigned: Option<VReg>,
}

/// The register file plus the snapshot buffers for out-of-line regions.
pub struct Machine {
    file: Vec<RealRegister>,
    snap_state: [RegState; NUM_REGS],
    snap_assigned: [Option<VReg>; NUM_REGS],
    snap_flags: [RegFlags; NUM_REGS],
}

impl Machine {
    /// A file with every allocatable register `Free` at weight 0 and the
    /// reserved identities (`lr`, `sp`, `xzr`) `Locked`.
    pub fn new() -> Self {
        let file = RegNum::all()
            .map(|r| {
                let state = match r {
                    RegNum::Lr | RegNum::Sp | RegNum::Xzr => RegState::Locked,
                    _ => RegState::Free,
                };
                RealRegister {
                    state,
                    weight: 0,
                    flags: RegFlags::empty(),
                    assigned: None,
                }
            })
            .collect();
        Self {
            file,
            snap_state: [RegState::Free; NUM_REGS],
            snap_assigned: [None; NUM_REGS],
            snap_flags: [RegFlags::empty(); NUM_REGS],
        }
    }

    pub fn state(&self, r: RegNum) -> RegState {
        self.file[r.index()].state
    }

    pub fn assigned_virtual(&self, r: RegNum) -> Option<VReg> {
        self.file[r.index()].assigned
    }

    pub fn flags(&self, r: RegNum) -> RegFlags {
        self.file[r.index()].flags
    }

    pub fn weight(&self, r: RegNum) -> u32 {
        self.file[r.index()].weight
    }

    /// Bias the free-register scan; hosts use this to steer assignment away
    /// from registers that are expensive to use (e.g. callee-saved).
    pub fn set_weight(&mut self, r: RegNum, weight: u32) {
        self.file[r.index()].weight = weight;
    }

    /// Scan the kind's window for the free register with the smallest
    /// weight. `Unlatched` entries participate when `consider_unlatched` is
    /// set and are normalized to `Free` (stale back-pointer cleared) before
    /// being returned. Ties go to the lowest index.
    pub fn find_best_free_register(
        &mut self,
        kind: Kind,
        consider_unlatched: bool,
    ) -> Option<RegNum> {
        let mut best_weight = u32::MAX;
        let mut free_reg = None;
        for r in kind.regs() {
            let entry = &self.file[r.index()];
            let eligible = entry.state == RegState::Free
                || (consider_unlatched && entry.state == RegState::Unlatched);
            if eligible && entry.weight < best_weight {
                free_reg = Some(r);
                best_weight = entry.weight;
            }
        }
        if let Some(r) = free_reg {
            let entry = &mut self.file[r.index()];
            if entry.state == RegState::Unlatched {
                entry.assigned = None;
                entry.state = RegState::Free;
            }
        }
        free_reg
    }

    /// Evict an assigned register of `virtual_register`'s kind (GPR when
    /// absent) and return it, splicing a reload of the victim's value before
    /// `cursor`. When `forced` is given it is the victim's register and no
    /// selection happens. The victim's slot is routed through the
    /// out-of-line protection protocol.
    pub fn free_best_register(
        &mut self,
        ctx: &mut AssignCtx,
        cursor: InstRef,
        virtual_register: Option<VReg>,
        forced: Option<RegNum>,
    ) -> RegNum {
        let rk = virtual_register.map_or(Kind::Gpr, |v| ctx.vregs.get(v).kind);

        let (victim, best) = match forced {
            Some(f) => {
                let victim = self.file[f.index()]
                    .assigned
                    .expect("forced eviction target has no assigned virtual");
                (victim, f)
            }
            None => {
                let mut candidates: SmallVec<[VReg; 32]> = SmallVec::new();
                for r in rk.regs() {
                    let entry = &self.file[r.index()];
                    if entry.state == RegState::Assigned {
                        candidates.push(
                            entry.assigned.expect("assigned register with no virtual"),
                        );
                    }
                }
                assert!(!candidates.is_empty(), "all registers are blocked");

                // Walk backwards from the cursor. The first candidate a
                // visited instruction references is the one whose next use
                // in forward order is closest; dropping referenced
                // candidates leaves the ones furthest from reuse. A
                // swapped-in candidate is not re-examined at the same
                // instruction.
                let mut walk = Some(cursor);
                while candidates.len() > 1 {
                    let Some(at) = walk else { break };
                    if ctx.stream.inst(at).is_block_boundary() {
                        break;
                    }
                    let mut i = 0;
                    while i < candidates.len() {
                        if ctx.stream.inst(at).refs_virtual(candidates[i]) {
                            candidates.swap_remove(i);
                        }
                        i += 1;
                    }
                    walk = ctx.stream.prev(at);
                }

                let victim = candidates[0];
                let best = ctx
                    .vregs
                    .get(victim)
                    .assigned
                    .expect("eviction candidate lost its register");
                (victim, best)
            }
        };

        let contains_internal_pointer = ctx.vregs.get(victim).contains_internal_pointer;
        let contains_collected = ctx.vregs.get(victim).contains_collected_reference;
        let inside_ool = ctx.is_out_of_line_cold_path() || ctx.is_out_of_line_hot_path();
        let mut location = ctx.vregs.get(victim).backing_storage;

        match rk {
            Kind::Gpr => {
                if ctx.ool_enabled() && inside_ool && location.is_some() {
                    trace!(
                        "OOL: reuse backing store {} for {victim} inside OOL",
                        location.unwrap()
                    );
                } else if !contains_internal_pointer {
                    let slot = ctx.spills.allocate(ADDRESS_SIZE, contains_collected, None);
                    trace!("spilling {victim} to {slot}");
                    location = Some(slot);
                } else {
                    let pin = ctx
                        .vregs
                        .get(victim)
                        .pinning_array_pointer
                        .expect("internal pointer without a pinning array");
                    let slot = ctx.spills.allocate_internal_pointer(pin);
                    trace!("spilling internal pointer {victim} to {slot}");
                    location = Some(slot);
                }
            }
            Kind::Fpr => {
                if ctx.ool_enabled() && inside_ool && location.is_some() {
                    trace!(
                        "OOL: reuse backing store {} for {victim} inside OOL",
                        location.unwrap()
                    );
                } else {
                    let slot = ctx.spills.allocate(FPR_SPILL_SIZE, false, None);
                    trace!("spilling FPR {victim} to {slot}");
                    location = Some(slot);
                }
            }
        }
        let location = location.expect("victim has no spill slot after acquisition");
        ctx.vregs.get_mut(victim).backing_storage = Some(location);

        if ctx.ool_enabled() {
            if !ctx.is_out_of_line_cold_path() {
                // Entry post-conditions of the cold path are generated from
                // this list; a slot defined outside the cold path must stay
                // protected if the cold path reverse-spills it.
                ctx.spilled_register_list.push(victim);
                if !ctx.is_out_of_line_hot_path() {
                    ctx.spills.set_max_spill_depth(location, 1);
                } else if ctx.spills.max_spill_depth(location) != 1 {
                    // A main-line mark is sticky.
                    ctx.spills.set_max_spill_depth(location, 2);
                }
                trace!(
                    "OOL: adding {victim} to the spilled register list, max spill depth = {}",
                    ctx.spills.max_spill_depth(location)
                );
            } else {
                // The cold path's own spills need no protection: the entry
                // post-conditions do not expect this register spilled.
                let depth = ctx.spills.max_spill_depth(location);
                if depth != 1 && depth != 2 {
                    ctx.spills.set_max_spill_depth(location, 3);
                    trace!(
                        "OOL: in cold path, spilling {victim} without adding to the spilled register list"
                    );
                }
            }
        }

        let reload = match rk {
            Kind::Gpr => Op::LdrImmX {
                dst: best,
                slot: location,
            },
            Kind::Fpr => Op::VldrImmD {
                dst: best,
                slot: location,
            },
        };
        ctx.stream.splice_before(cursor, reload);
        trace!("freed {} from {victim}", best.name());

        self.file[best.index()].assigned = None;
        self.file[best.index()].state = RegState::Free;
        ctx.vregs.get_mut(victim).assigned = None;
        best
    }

    /// Re-materialize a virtual that was spilled later in the walk (earlier
    /// in forward order it will be spilled by the reload already spliced):
    /// splice the forward-time store before `cursor` and release or protect
    /// the slot according to the region that owns it.
    pub fn reverse_spill_state(
        &mut self,
        ctx: &mut AssignCtx,
        cursor: InstRef,
        spilled: VReg,
        target: Option<RegNum>,
    ) -> RegNum {
        let rk = ctx.vregs.get(spilled).kind;

        let target = match target {
            Some(t) => t,
            None => {
                let t = match self.find_best_free_register(rk, false) {
                    Some(t) => t,
                    None => self.free_best_register(ctx, cursor, Some(spilled), None),
                };
                self.file[t.index()].state = RegState::Assigned;
                t
            }
        };

        if ctx.is_out_of_line_cold_path() && ctx.vregs.get(spilled).backing_storage.is_none() {
            // A fresh assignment in the hot path leaves future != total with
            // no spill on this path; there is nothing to re-materialize.
            trace!("OOL: not generating reverse spill for {spilled}");
            return target;
        }

        let location = ctx
            .vregs
            .get(spilled)
            .backing_storage
            .expect("reverse spill without backing storage");
        trace!("re-assigning spilled {spilled} to {}", target.name());

        let data_size = match rk {
            Kind::Gpr => ADDRESS_SIZE,
            Kind::Fpr => FPR_SPILL_SIZE,
        };

        if !ctx.ool_enabled() {
            ctx.spills.free(location, data_size, 0);
        } else if ctx.is_out_of_line_cold_path() {
            // At the cold-stream entry label the main line expects the
            // virtual in a register again; the protected slot can be
            // released so future out-of-line regions are not pinned to it.
            let ool_entry_reverse_spill = ctx.stream.inst(cursor).starts_cold_stream();

            // Free only when the slot belongs to this path (depth 3), the
            // hot path already deferred its release (depth 0, the last
            // chance to free), or we are at the entry label.
            let depth = ctx.spills.max_spill_depth(location);
            if depth == 3 || depth == 0 || ool_entry_reverse_spill {
                if depth != 0 {
                    ctx.spills.set_max_spill_depth(location, 0);
                } else {
                    trace!(
                        "OOL: reverse spill of {spilled} on both paths, freeing slot {location}"
                    );
                }
                ctx.spills.free(location, data_size, 0);
                if !ctx.spills.is_free_spill_list_locked() {
                    ctx.vregs.get_mut(spilled).backing_storage = None;
                }
            } else {
                trace!(
                    "OOL: reverse spill of {spilled} in less dominant path ({depth} / 3), protecting slot {location}"
                );
            }
        } else if ctx.is_out_of_line_hot_path() {
            trace!("OOL: removing {spilled} from the spilled register list");
            ctx.remove_from_spilled_list(spilled);
            // Only the depth is cleared here; the slot stays allocated and
            // out of future GC points, and the cold pass (which sees depth
            // 0) performs the release.
            ctx.spills.set_max_spill_depth(location, 0);
            trace!(
                "OOL: reverse spill of {spilled} in less dominant path, protecting slot {location}"
            );
        } else {
            trace!("OOL: removing {spilled} from the spilled register list");
            ctx.remove_from_spilled_list(spilled);
            ctx.spills.set_max_spill_depth(location, 0);
            ctx.spills.free(location, data_size, 0);
            if !ctx.spills.is_free_spill_list_locked() {
                ctx.vregs.get_mut(spilled).backing_storage = None;
            }
        }

        let store = match rk {
            Kind::Gpr => Op::StrImmX {
                slot: location,
                src: target,
            },
            Kind::Fpr => Op::VstrImmD {
                slot: location,
                src: target,
            },
        };
        ctx.stream.splice_before(cursor, store);
        target
    }

    /// Ensure `virtual_register` has some real register at `cursor` and
    /// return it, reloading from a spill or evicting as needed. Decrements
    /// the future use count and unlatches the register when no uses remain.
    pub fn assign_one_register(
        &mut self,
        ctx: &mut AssignCtx,
        cursor: InstRef,
        virtual_register: VReg,
    ) -> RegNum {
        let rk = ctx.vregs.get(virtual_register).kind;

        let assigned = match ctx.vregs.get(virtual_register).assigned {
            None => {
                ctx.clear_assignment_flags();
                ctx.set_assignment_flag(AssignFlags::NORMAL_ASSIGNMENT);

                let vr = ctx.vregs.get(virtual_register);
                let reg = if vr.total_use_count != vr.future_use_count {
                    // Used later in the walk: the value lives in a spill
                    // slot at this point of the stream.
                    ctx.set_assignment_flag(AssignFlags::REGISTER_RELOADED);
                    self.reverse_spill_state(ctx, cursor, virtual_register, None)
                } else {
                    let reg = match self.find_best_free_register(rk, true) {
                        Some(r) => r,
                        None => {
                            ctx.set_assignment_flag(AssignFlags::REGISTER_SPILLED);
                            self.free_best_register(ctx, cursor, Some(virtual_register), None)
                        }
                    };
                    if ctx.ool_enabled() && ctx.is_out_of_line_cold_path() {
                        ctx.first_time_live_ool_register_list.push(virtual_register);
                    }
                    reg
                };

                self.bind(ctx, virtual_register, reg);
                trace!("assigned {} to {virtual_register}", reg.name());
                reg
            }
            Some(reg) => {
                assert!(
                    self.file[reg.index()].assigned.is_some(),
                    "real register {} has no assigned virtual on re-entry",
                    reg.name()
                );
                reg
            }
        };

        self.dec_future_use_count_and_unlatch(ctx, cursor, virtual_register);
        assigned
    }

    /// Force `virtual_register` into the named real register, copying or
    /// exchanging with the current occupant as needed. The target is always
    /// left `Assigned` to the virtual. A coercion to the register the
    /// virtual already occupies emits nothing.
    ///
    /// Use-count bookkeeping for coerced operands stays with the driver,
    /// which calls [`Machine::dec_future_use_count_and_unlatch`] itself.
    pub fn coerce_register_assignment(
        &mut self,
        ctx: &mut AssignCtx,
        cursor: InstRef,
        virtual_register: VReg,
        target: RegNum,
    ) {
        let rk = ctx.vregs.get(virtual_register).kind;
        let current = ctx.vregs.get(virtual_register).assigned;

        if current == Some(target) {
            return;
        }
        match current {
            Some(c) => trace!(
                "coercing {virtual_register} from {} to {}",
                c.name(),
                target.name()
            ),
            None => trace!("coercing {virtual_register} to {}", target.name()),
        }

        match self.file[target.index()].state {
            RegState::Free | RegState::Unlatched => match current {
                None => {
                    let vr = ctx.vregs.get(virtual_register);
                    if vr.total_use_count != vr.future_use_count {
                        ctx.set_assignment_flag(AssignFlags::REGISTER_RELOADED);
                        self.reverse_spill_state(ctx, cursor, virtual_register, Some(target));
                    } else if ctx.ool_enabled() && ctx.is_out_of_line_cold_path() {
                        ctx.first_time_live_ool_register_list.push(virtual_register);
                    }
                }
                Some(c) => {
                    // Later code sees the virtual in its old register.
                    register_copy(&mut ctx.stream, cursor, rk, c, target);
                    self.file[c.index()].state = RegState::Free;
                    self.file[c.index()].assigned = None;
                }
            },
            RegState::Blocked => {
                let target_virtual = self.file[target.index()]
                    .assigned
                    .expect("blocked coercion target has no assigned virtual");
                let need_temp = rk == Kind::Fpr; // no xor exchange outside the GPR bank

                let mut spare = None;
                if current.is_none() || need_temp {
                    spare = self.find_best_free_register(rk, false);
                    ctx.set_assignment_flag(AssignFlags::INDIRECT_COERCION);
                    if spare.is_none() {
                        ctx.set_assignment_flag(AssignFlags::REGISTER_SPILLED);
                        self.block_virtual(ctx, virtual_register);
                        spare = Some(self.free_best_register(
                            ctx,
                            cursor,
                            Some(target_virtual),
                            None,
                        ));
                        self.unblock_virtual(ctx, virtual_register);
                    }
                }

                match current {
                    Some(c) => {
                        register_exchange(&mut ctx.stream, cursor, rk, target, c, spare);
                        self.file[c.index()].state = RegState::Blocked;
                        self.file[c.index()].assigned = Some(target_virtual);
                        ctx.vregs.get_mut(target_virtual).assigned = Some(c);
                        // For FPR the spare stays free.
                    }
                    None => {
                        let s = spare.expect("no spare register for blocked coercion");
                        register_copy(&mut ctx.stream, cursor, rk, target, s);
                        self.file[s.index()].state = RegState::Blocked;
                        self.file[s.index()].assigned = Some(target_virtual);
                        ctx.vregs.get_mut(target_virtual).assigned = Some(s);

                        let vr = ctx.vregs.get(virtual_register);
                        if vr.total_use_count != vr.future_use_count {
                            ctx.set_assignment_flag(AssignFlags::REGISTER_RELOADED);
                            self.reverse_spill_state(ctx, cursor, virtual_register, Some(target));
                        } else if ctx.ool_enabled() && ctx.is_out_of_line_cold_path() {
                            ctx.first_time_live_ool_register_list.push(virtual_register);
                        }
                    }
                }
            }
            RegState::Assigned => {
                let target_virtual = self.file[target.index()]
                    .assigned
                    .expect("occupied coercion target has no assigned virtual");
                let need_temp = rk == Kind::Fpr;

                let mut spare = None;
                if current.is_none() || need_temp {
                    spare = self.find_best_free_register(rk, false);
                }
                ctx.set_assignment_flag(AssignFlags::INDIRECT_COERCION);

                match current {
                    Some(c) => {
                        if !need_temp || spare.is_some() {
                            register_exchange(&mut ctx.stream, cursor, rk, target, c, spare);
                            self.file[c.index()].state = RegState::Assigned;
                            self.file[c.index()].assigned = Some(target_virtual);
                            ctx.vregs.get_mut(target_virtual).assigned = Some(c);
                            // The spare, if any, is still free.
                        } else {
                            // No spare for the three-move exchange: evict
                            // the occupant into its slot, then plain-copy.
                            self.free_best_register(
                                ctx,
                                cursor,
                                Some(target_virtual),
                                Some(target),
                            );
                            ctx.set_assignment_flag(AssignFlags::REGISTER_SPILLED);
                            register_copy(&mut ctx.stream, cursor, rk, c, target);
                            self.file[c.index()].state = RegState::Free;
                            self.file[c.index()].assigned = None;
                        }
                    }
                    None => {
                        match spare {
                            None => {
                                ctx.set_assignment_flag(AssignFlags::REGISTER_SPILLED);
                                self.free_best_register(
                                    ctx,
                                    cursor,
                                    Some(target_virtual),
                                    Some(target),
                                );
                            }
                            Some(s) => {
                                register_copy(&mut ctx.stream, cursor, rk, target, s);
                                self.file[s.index()].state = RegState::Assigned;
                                self.file[s.index()].assigned = Some(target_virtual);
                                ctx.vregs.get_mut(target_virtual).assigned = Some(s);
                            }
                        }

                        let vr = ctx.vregs.get(virtual_register);
                        if vr.total_use_count != vr.future_use_count {
                            ctx.set_assignment_flag(AssignFlags::REGISTER_RELOADED);
                            self.reverse_spill_state(ctx, cursor, virtual_register, Some(target));
                        } else if ctx.ool_enabled() && ctx.is_out_of_line_cold_path() {
                            ctx.first_time_live_ool_register_list.push(virtual_register);
                        }
                    }
                }
                ctx.reset_assignment_flag(AssignFlags::INDIRECT_COERCION);
            }
            RegState::Locked => {
                panic!(
                    "coercing {virtual_register} to locked register {}",
                    target.name()
                );
            }
        }

        self.bind(ctx, virtual_register, target);
        trace!("assigned {} to {virtual_register}", target.name());
    }

    /// Decrement the future use count (fatal on underflow) and, in the cold
    /// path, the out-of-line use count. Unlatch the real register when no
    /// uses remain, or when walking the hot path and every remaining use is
    /// out-of-line (the walk revives the register at the out-of-line branch
    /// and finishes the count there).
    pub fn dec_future_use_count_and_unlatch(
        &mut self,
        ctx: &mut AssignCtx,
        _cursor: InstRef,
        virtual_register: VReg,
    ) {
        let in_cold = ctx.is_out_of_line_cold_path();
        let in_hot = ctx.is_out_of_line_hot_path();
        let vr = ctx.vregs.get_mut(virtual_register);

        assert!(
            vr.future_use_count > 0,
            "future use count of {virtual_register} would go negative"
        );
        vr.future_use_count -= 1;
        if in_cold {
            vr.out_of_line_use_count = vr
                .out_of_line_use_count
                .checked_sub(1)
                .unwrap_or_else(|| {
                    panic!("out-of-line use count of {virtual_register} would go negative")
                });
        }
        assert!(
            vr.future_use_count >= vr.out_of_line_use_count,
            "future use count ({}) of {virtual_register} fell below its out-of-line use count ({})",
            vr.future_use_count,
            vr.out_of_line_use_count
        );

        if vr.future_use_count == 0
            || (in_hot && vr.future_use_count == vr.out_of_line_use_count)
        {
            if vr.future_use_count != 0 {
                trace!("OOL: {virtual_register}'s remaining uses are out of line, unlatching");
            }
            let reg = vr
                .assigned
                .expect("unlatching a virtual with no assigned register");
            vr.assigned = None;
            self.file[reg.index()].assigned = None;
            self.file[reg.index()].state = RegState::Unlatched;
        }
    }

    /// Copy state, back-pointer and flags of every register into the
    /// snapshot buffers.
    pub fn take_register_state_snapshot(&mut self) {
        for i in 0..NUM_REGS {
            self.snap_state[i] = self.file[i].state;
            self.snap_assigned[i] = self.file[i].assigned;
            self.snap_flags[i] = self.file[i].flags;
        }
    }

    /// Restore the file from the snapshot buffers, re-linking virtuals on
    /// both sides of every binding. Registers whose virtual died (future
    /// use count 0) after the snapshot are pruned to `Free`: they cannot be
    /// used in the outlined path.
    pub fn restore_register_state_from_snapshot(&mut self, ctx: &mut AssignCtx) {
        for i in 0..NUM_REGS {
            let reg = RegNum::from_index(i);
            self.file[i].flags = self.snap_flags[i];
            self.file[i].state = self.snap_state[i];

            if self.file[i].state == RegState::Free {
                if let Some(old) = self.file[i].assigned {
                    ctx.vregs.get_mut(old).assigned = None;
                }
            } else if self.file[i].state == RegState::Assigned {
                if let Some(old) = self.file[i].assigned {
                    // If the old virtual no longer points back here, a prior
                    // iteration of this loop has already re-linked it to its
                    // snapshot register; clearing it would break that
                    // binding.
                    if Some(old) != self.snap_assigned[i]
                        && ctx.vregs.get(old).assigned == Some(reg)
                    {
                        ctx.vregs.get_mut(old).assigned = None;
                    }
                }
            }

            self.file[i].assigned = self.snap_assigned[i];
            if self.file[i].state == RegState::Assigned {
                let v = self.file[i]
                    .assigned
                    .expect("snapshot has an assigned register with no virtual");
                ctx.vregs.get_mut(v).assigned = Some(reg);

                if ctx.vregs.get(v).future_use_count == 0 {
                    self.file[i].state = RegState::Free;
                    ctx.vregs.get_mut(v).assigned = None;
                    self.file[i].assigned = None;
                }
            }
        }
    }

    /// Build the post-conditions an out-of-line entry expects: one
    /// `(virtual, register)` per live assignment and one spilled marker per
    /// entry of the spilled-register list. Bumps each referenced virtual's
    /// future use count; the caller's bookkeeping covers the total and
    /// out-of-line counts.
    pub fn create_dep_cond_for_live_regs(
        &mut self,
        ctx: &mut AssignCtx,
    ) -> Option<RegisterDependencyConditions> {
        let mut count = 0;
        for r in RegNum::all() {
            let entry = &self.file[r.index()];
            assert!(
                matches!(
                    entry.state,
                    RegState::Assigned | RegState::Free | RegState::Locked
                ),
                "cannot build dependencies around {} in state {:?}",
                r.name(),
                entry.state
            );
            if entry.state == RegState::Assigned {
                count += 1;
            }
        }
        count += ctx.spilled_register_list.len();
        if count == 0 {
            return None;
        }

        let mut deps = RegisterDependencyConditions::new();
        for r in RegNum::all() {
            if self.file[r.index()].state == RegState::Assigned {
                let v = self.file[r.index()]
                    .assigned
                    .expect("assigned register with no virtual");
                assert!(
                    !ctx.spilled_register_list.contains(&v),
                    "{v} is both assigned and on the spilled list"
                );
                deps.add_post_condition(v, DepLocation::Real(r));
                ctx.vregs.get_mut(v).future_use_count += 1;
            }
        }
        for &v in &ctx.spilled_register_list {
            deps.add_post_condition(v, DepLocation::Spilled);
            ctx.vregs.get_mut(v).future_use_count += 1;
        }
        Some(deps)
    }

    /// Pin the virtual's current register (if any) so a spare search cannot
    /// evict it.
    pub fn block_virtual(&mut self, ctx: &AssignCtx, v: VReg) {
        if let Some(reg) = ctx.vregs.get(v).assigned {
            self.file[reg.index()].state = RegState::Blocked;
        }
    }

    /// Undo [`Machine::block_virtual`].
    pub fn unblock_virtual(&mut self, ctx: &AssignCtx, v: VReg) {
        if let Some(reg) = ctx.vregs.get(v).assigned {
            self.file[reg.index()].state = RegState::Assigned;
        }
    }

    fn bind(&mut self, ctx: &mut AssignCtx, v: VReg, reg: RegNum) {
        let entry = &mut self.file[reg.index()];
        entry.state = RegState::Assigned;
        entry.assigned = Some(v);
        entry.flags |= RegFlags::ASSIGNED_IN_METHOD;
        ctx.vregs.get_mut(v).assigned = Some(reg);
    }

    /// Check the file's structural invariants: bindings are mutual, no two
    /// registers share a virtual, reserved identities stay locked.
    pub fn validate(&self, ctx: &AssignCtx) {
        let mut seen: SmallVec<[VReg; 32]> = SmallVec::new();
        for r in RegNum::all() {
            let entry = &self.file[r.index()];
            match entry.state {
                RegState::Assigned => {
                    let v = entry
                        .assigned
                        .unwrap_or_else(|| panic!("{} assigned with no virtual", r.name()));
                    assert_eq!(
                        ctx.vregs.get(v).assigned,
                        Some(r),
                        "{v} does not point back at {}",
                        r.name()
                    );
                    assert!(
                        !seen.contains(&v),
                        "{v} is assigned to two real registers"
                    );
                    seen.push(v);
                }
                RegState::Locked => {
                    assert!(
                        matches!(r, RegNum::Lr | RegNum::Sp | RegNum::Xzr),
                        "{} is locked but not ABI-reserved",
                        r.name()
                    );
                }
                RegState::Free | RegState::Unlatched | RegState::Blocked => {}
            }
        }
        for r in [RegNum::Lr, RegNum::Sp, RegNum::Xzr] {
            assert_eq!(
                self.file[r.index()].state,
                RegState::Locked,
                "{} lost its locked state",
                r.name()
            );
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

/// Splice a register copy before `cursor`: `orr dst, xzr, src` for GPR,
/// `fmov dst, src` for FPR.
pub fn register_copy(stream: &mut Stream, cursor: InstRef, rk: Kind, dst: RegNum, src: RegNum) {
    let op = match rk {
        Kind::Gpr => Op::OrrX {
            dst,
            src1: RegNum::Xzr,
            src2: src,
        },
        Kind::Fpr => Op::FmovD { dst, src },
    };
    stream.splice_before(cursor, op);
}

/// Splice a register exchange before `cursor`: three XORs for GPR (no
/// temporary), three moves through `middle` for FPR.
pub fn register_exchange(
    stream: &mut Stream,
    cursor: InstRef,
    rk: Kind,
    target: RegNum,
    source: RegNum,
    middle: Option<RegNum>,
) {
    match rk {
        Kind::Gpr => {
            // middle is not used for GPR.
            stream.splice_before(
                cursor,
                Op::EorX {
                    dst: target,
                    src1: target,
                    src2: source,
                },
            );
            stream.splice_before(
                cursor,
                Op::EorX {
                    dst: source,
                    src1: target,
                    src2: source,
                },
            );
            stream.splice_before(
                cursor,
                Op::EorX {
                    dst: target,
                    src1: target,
                    src2: source,
                },
            );
        }
        Kind::Fpr => {
            let middle = middle.expect("FPR exchange requires a spare register");
            register_copy(stream, cursor, rk, middle, source);
            register_copy(stream, cursor, rk, source, target);
            register_copy(stream, cursor, rk, target, middle);
        }
    }
}
