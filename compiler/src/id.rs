// id.rs - Stable identifiers for model and physical entities
//
// Model operators, physical operators, PEs and host pools are all keyed by
// dense integer indices that survive replication. Every cross-reference in
// the model is one of these ids, resolved through an owning map.

use std::fmt;

/// Index of an operator in the logical model (primitive, composite or injected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperIdx(pub u64);

/// Index of an operator in the physical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysIdx(pub u64);

/// Index of a processing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeIdx(pub u64);

/// Index of a host pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolIdx(pub u64);

/// Arena slot of a consistent-cut region. Distinct from the region's own
/// `index`, which replicas share with their channel-0 original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CcRegionId(pub usize);

macro_rules! display_id {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_id!(OperIdx, PhysIdx, PeIdx, PoolIdx, CcRegionId);

/// Allocator for indices created during the transformation.
///
/// Operator indices continue after the highest index loaded from the input;
/// physical indices for replicas continue after the highest primitive index.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_oper: u64,
    next_phys: u64,
}

impl IdAllocator {
    pub fn new(next_oper: u64, next_phys: u64) -> Self {
        Self {
            next_oper,
            next_phys,
        }
    }

    pub fn alloc_oper(&mut self) -> OperIdx {
        let id = OperIdx(self.next_oper);
        self.next_oper += 1;
        id
    }

    pub fn alloc_phys(&mut self) -> PhysIdx {
        let id = PhysIdx(self.next_phys);
        self.next_phys += 1;
        id
    }

    pub fn peek_oper(&self) -> OperIdx {
        OperIdx(self.next_oper)
    }
}
