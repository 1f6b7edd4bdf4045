//! Arena-backed doubly linked instruction stream.
//!
//! The register assigner walks streams in reverse via `prev` and splices
//! spill/reload/copy instructions immediately before its cursor, so spliced
//! code lands earlier in forward program order than the instruction being
//! processed. Nodes live in a flat arena and links are indices; an `InstRef`
//! stays valid for the life of the stream.

use crate::inst::{Instruction, Op, Origin};
use crate::value::{InstRef, VReg};

struct Node {
    inst: Instruction,
    prev: Option<InstRef>,
    next: Option<InstRef>,
}

/// A linearized instruction sequence with reverse navigation and splicing.
pub struct Stream {
    nodes: Vec<Node>,
    head: Option<InstRef>,
    tail: Option<InstRef>,
}

impl Stream {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Number of instructions in the stream.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First instruction in forward order.
    pub fn head(&self) -> Option<InstRef> {
        self.head
    }

    /// Last instruction in forward order; the starting cursor of a reverse
    /// assignment walk.
    pub fn tail(&self) -> Option<InstRef> {
        self.tail
    }

    pub fn inst(&self, r: InstRef) -> &Instruction {
        &self.nodes[r.index()].inst
    }

    pub fn inst_mut(&mut self, r: InstRef) -> &mut Instruction {
        &mut self.nodes[r.index()].inst
    }

    /// Instruction immediately before `r` in forward order.
    pub fn prev(&self, r: InstRef) -> Option<InstRef> {
        self.nodes[r.index()].prev
    }

    /// Instruction immediately after `r` in forward order.
    pub fn next(&self, r: InstRef) -> Option<InstRef> {
        self.nodes[r.index()].next
    }

    /// Append an instruction at the end of the stream.
    pub fn push_back(&mut self, inst: Instruction) -> InstRef {
        let r = InstRef(self.nodes.len() as u32);
        self.nodes.push(Node {
            inst,
            prev: self.tail,
            next: None,
        });
        if let Some(t) = self.tail {
            self.nodes[t.index()].next = Some(r);
        } else {
            self.head = Some(r);
        }
        self.tail = Some(r);
        r
    }

    /// Append an instruction with a synthetic origin.
    pub fn push_op(&mut self, op: Op) -> InstRef {
        self.push_back(Instruction::new(op, Origin::synthetic()))
    }

    /// Splice a new instruction immediately before `at`.
    pub fn insert_before(&mut self, at: InstRef, inst: Instruction) -> InstRef {
        let r = InstRef(self.nodes.len() as u32);
        let prev = self.nodes[at.index()].prev;
        self.nodes.push(Node {
            inst,
            prev,
            next: Some(at),
        });
        self.nodes[at.index()].prev = Some(r);
        match prev {
            Some(p) => self.nodes[p.index()].next = Some(r),
            None => self.head = Some(r),
        }
        r
    }

    /// Splice before `at`, inheriting `at`'s origin. This is the factory
    /// surface the register assigner emits through.
    pub fn splice_before(&mut self, at: InstRef, op: Op) -> InstRef {
        let origin = self.inst(at).origin.clone();
        self.insert_before(at, Instruction::new(op, origin))
    }

    /// Iterate instruction refs in forward order.
    pub fn iter(&self) -> impl Iterator<Item = InstRef> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let r = cur?;
            cur = self.nodes[r.index()].next;
            Some(r)
        })
    }

    /// Whether any instruction in the stream references the virtual `v`.
    pub fn any_refs_virtual(&self, v: VReg) -> bool {
        self.iter().any(|r| self.inst(r).refs_virtual(v))
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}
