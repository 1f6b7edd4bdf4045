//! Register-dependency conditions.
//!
//! At an out-of-line boundary the driver records, for every live virtual,
//! where the main line expects it to be: in a named real register, or
//! spilled to its backing slot.

use smallvec::SmallVec;

use lark_inst::reg::RegNum;
use lark_inst::value::VReg;

/// Where a dependency expects its virtual register to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepLocation {
    /// In this real register.
    Real(RegNum),
    /// Spilled to its backing storage.
    Spilled,
}

/// One post-condition: `vreg` must be at `loc` when the region is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostCondition {
    pub vreg: VReg,
    pub loc: DepLocation,
}

/// A set of register-dependency post-conditions.
#[derive(Debug, Clone, Default)]
pub struct RegisterDependencyConditions {
    post: SmallVec<[PostCondition; 8]>,
}

impl RegisterDependencyConditions {
    pub fn new() -> Self {
        Self {
            post: SmallVec::new(),
        }
    }

    pub fn add_post_condition(&mut self, vreg: VReg, loc: DepLocation) {
        self.post.push(PostCondition { vreg, loc });
    }

    pub fn post_conditions(&self) -> &[PostCondition] {
        &self.post
    }

    pub fn len(&self) -> usize {
        self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.post.is_empty()
    }

    /// Post-condition for a given virtual, if present.
    pub fn find(&self, vreg: VReg) -> Option<&PostCondition> {
        self.post.iter().find(|p| p.vreg == vreg)
    }
}
