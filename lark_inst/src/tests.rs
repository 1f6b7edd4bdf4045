//! Unit tests for the instruction model and stream.

use smallvec::smallvec;

use crate::inst::{Instruction, Op, Origin, Reg};
use crate::reg::{Kind, RegNum};
use crate::stream::Stream;
use crate::value::{SlotRef, VReg};

fn v(n: u32) -> VReg {
    VReg(n)
}

fn compute(name: &'static str, defs: &[Reg], uses: &[Reg]) -> Op {
    Op::Compute {
        name,
        defs: defs.iter().copied().collect(),
        uses: uses.iter().copied().collect(),
    }
}

// --- Register namespace ---

#[test]
fn regnum_index_round_trip() {
    for r in RegNum::all() {
        assert_eq!(RegNum::from_index(r.index()), r);
    }
}

#[test]
fn regnum_kinds_and_windows() {
    assert_eq!(RegNum::X0.kind(), Kind::Gpr);
    assert_eq!(RegNum::Lr.kind(), Kind::Gpr);
    assert_eq!(RegNum::V0.kind(), Kind::Fpr);
    assert_eq!(RegNum::V31.kind(), Kind::Fpr);

    let (first, last) = Kind::Gpr.range();
    assert_eq!((first, last), (RegNum::X0, RegNum::Lr));
    let (first, last) = Kind::Fpr.range();
    assert_eq!((first, last), (RegNum::V0, RegNum::V31));

    // The windows are contiguous and every register inside matches the kind.
    for r in Kind::Gpr.regs() {
        assert_eq!(r.kind(), Kind::Gpr);
    }
    for r in Kind::Fpr.regs() {
        assert_eq!(r.kind(), Kind::Fpr);
    }

    // sp and xzr are outside both windows.
    assert!(!Kind::Gpr.regs().any(|r| r == RegNum::Sp || r == RegNum::Xzr));
    assert!(!Kind::Fpr.regs().any(|r| r == RegNum::Sp || r == RegNum::Xzr));
}

#[test]
fn regnum_names() {
    assert_eq!(RegNum::X0.name(), "x0");
    assert_eq!(RegNum::X29.name(), "x29");
    assert_eq!(RegNum::Lr.name(), "lr");
    assert_eq!(RegNum::Xzr.name(), "xzr");
    assert_eq!(RegNum::V31.name(), "v31");
}

// --- Instruction queries ---

#[test]
fn refs_virtual_matches_uses_and_defs() {
    let i = Instruction::new(
        compute("mul", &[Reg::Virt(v(2))], &[Reg::Virt(v(0)), Reg::Virt(v(1))]),
        Origin::synthetic(),
    );
    assert!(i.refs_virtual(v(0)));
    assert!(i.refs_virtual(v(1)));
    assert!(i.refs_virtual(v(2)));
    assert!(!i.refs_virtual(v(3)));

    // Spliced ops carry only real registers and never match.
    let load = Instruction::new(
        Op::LdrImmX {
            dst: RegNum::X3,
            slot: SlotRef(0),
        },
        Origin::synthetic(),
    );
    assert!(!load.refs_virtual(v(0)));
}

#[test]
fn rewrite_virtual_replaces_all_occurrences() {
    // Same virtual as source and target.
    let mut i = Instruction::new(
        compute("add", &[Reg::Virt(v(0))], &[Reg::Virt(v(0)), Reg::Virt(v(1))]),
        Origin::synthetic(),
    );
    i.rewrite_virtual(v(0), RegNum::X7);
    match &i.op {
        Op::Compute { defs, uses, .. } => {
            assert_eq!(defs.as_slice(), &[Reg::Real(RegNum::X7)]);
            assert_eq!(uses.as_slice(), &[Reg::Real(RegNum::X7), Reg::Virt(v(1))]);
        }
        _ => unreachable!(),
    }
}

#[test]
fn boundary_predicates() {
    let label = Instruction::new(
        Op::Label {
            id: 1,
            cold_entry: false,
        },
        Origin::synthetic(),
    );
    let cold = Instruction::new(
        Op::Label {
            id: 2,
            cold_entry: true,
        },
        Origin::synthetic(),
    );
    let proc = Instruction::new(Op::Proc, Origin::synthetic());

    assert!(label.is_label() && label.is_block_boundary());
    assert!(!label.starts_cold_stream());
    assert!(cold.starts_cold_stream());
    assert!(proc.is_block_boundary() && !proc.is_label());
}

// --- Stream ---

#[test]
fn stream_push_and_reverse_navigation() {
    let mut s = Stream::new();
    let a = s.push_op(Op::Proc);
    let b = s.push_op(compute("use", &[], &[Reg::Virt(v(0))]));
    let c = s.push_op(compute("ret", &[], &[]));

    assert_eq!(s.head(), Some(a));
    assert_eq!(s.tail(), Some(c));
    assert_eq!(s.prev(c), Some(b));
    assert_eq!(s.prev(b), Some(a));
    assert_eq!(s.prev(a), None);
    assert_eq!(s.next(a), Some(b));
}

#[test]
fn splice_before_lands_immediately_before_cursor() {
    let mut s = Stream::new();
    s.push_op(Op::Proc);
    let cursor = s.push_op(compute("use", &[], &[Reg::Virt(v(0))]));

    s.splice_before(
        cursor,
        Op::LdrImmX {
            dst: RegNum::X3,
            slot: SlotRef(0),
        },
    );
    assert_eq!(
        s.render(),
        vec!["proc", "ldrimmx x3, [s0]", "use vreg0"]
    );

    // A second splice before the same cursor lands after the first: emission
    // order is forward order.
    s.splice_before(
        cursor,
        Op::OrrX {
            dst: RegNum::X1,
            src1: RegNum::Xzr,
            src2: RegNum::X2,
        },
    );
    assert_eq!(
        s.render(),
        vec!["proc", "ldrimmx x3, [s0]", "orrx x1, xzr, x2", "use vreg0"]
    );
}

#[test]
fn splice_before_head_updates_head() {
    let mut s = Stream::new();
    let first = s.push_op(compute("ret", &[], &[]));
    let new = s.splice_before(
        first,
        Op::Label {
            id: 0,
            cold_entry: false,
        },
    );
    assert_eq!(s.head(), Some(new));
    assert_eq!(s.prev(first), Some(new));
    assert_eq!(s.prev(new), None);
}

#[test]
fn spliced_instruction_inherits_cursor_origin() {
    let mut s = Stream::new();
    let cursor = s.push_back(Instruction::new(
        compute("use", &[], &[Reg::Virt(v(0))]),
        Origin::from_source(42),
    ));
    let spliced = s.splice_before(
        cursor,
        Op::StrImmX {
            slot: SlotRef(1),
            src: RegNum::X9,
        },
    );
    assert_eq!(s.inst(spliced).origin.sources, vec![42]);
}

#[test]
fn display_smoke() {
    let mut s = Stream::new();
    s.push_op(Op::EorX {
        dst: RegNum::X1,
        src1: RegNum::X1,
        src2: RegNum::X2,
    });
    s.push_op(Op::FmovD {
        dst: RegNum::V1,
        src: RegNum::V2,
    });
    s.push_op(Op::VstrImmD {
        slot: SlotRef(3),
        src: RegNum::V1,
    });
    assert_eq!(
        s.render(),
        vec!["eorx x1, x1, x2", "fmovd v1, v2", "vstrimmd v1, [s3]"]
    );
}

#[test]
fn any_refs_virtual_scans_whole_stream() {
    let mut s = Stream::new();
    s.push_op(Op::Proc);
    s.push_op(compute("def", &[Reg::Virt(v(5))], &[]));
    assert!(s.any_refs_virtual(v(5)));
    assert!(!s.any_refs_virtual(v(6)));
}

#[test]
fn operand_lists_stay_inline_at_typical_arities() {
    let defs: smallvec::SmallVec<[Reg; 2]> = smallvec![Reg::Virt(v(0))];
    let uses: smallvec::SmallVec<[Reg; 4]> =
        smallvec![Reg::Virt(v(1)), Reg::Virt(v(2)), Reg::Real(RegNum::X0)];
    assert!(!defs.spilled());
    assert!(!uses.spilled());
}
