// pass.rs - Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the transformer's nine passes, their dependency edges and the
// artifacts they produce. The pipeline runner uses this to compute the
// minimal pass subset for each --emit target.
//
// Preconditions: none (static tables).
// Postconditions: `required_passes` returns passes in execution order.
// Failure modes: none.
// Side effects: none.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Load,
    ParallelTransform,
    CcRegions,
    BuildPhysical,
    AssignPes,
    Threading,
    AllocatePorts,
    StaticConnections,
    Emit,
}

/// Artifacts held by the transformation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    LogicalModel,  // LogicalModel, as loaded
    Replicated,    // LogicalModel, after parallel expansion
    CcMembership,  // CcRegions inside LogicalModel
    PhysicalModel, // PhysicalModel with resolved connections
    Placement,     // owning PEs and PE replicas
    ThreadFlags,   // injected threaded ports, single-threaded flags
    PePorts,       // PE input/output ports
    StaticConns,   // static PE-to-PE connections
    Physical,      // padl::PhysicalApplication
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for logs.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Load => PassDescriptor {
            name: "load",
            inputs: &[],
            outputs: &[ArtifactId::LogicalModel],
            invariants: "inventory indexed, composite tree built, regions registered",
        },
        PassId::ParallelTransform => PassDescriptor {
            name: "parallel_transform",
            inputs: &[PassId::Load],
            outputs: &[ArtifactId::Replicated],
            invariants: "every region has width channels, splitters and mergers",
        },
        PassId::CcRegions => PassDescriptor {
            name: "cc_regions",
            inputs: &[PassId::ParallelTransform],
            outputs: &[ArtifactId::CcMembership],
            invariants: "each operator belongs to at most one merged region",
        },
        PassId::BuildPhysical => PassDescriptor {
            name: "build_physical",
            inputs: &[PassId::CcRegions],
            outputs: &[ArtifactId::PhysicalModel],
            invariants: "one physical operator per primitive, connections resolved",
        },
        PassId::AssignPes => PassDescriptor {
            name: "assign_pes",
            inputs: &[PassId::BuildPhysical],
            outputs: &[ArtifactId::Placement],
            invariants: "every operator has exactly one owning PE",
        },
        PassId::Threading => PassDescriptor {
            name: "threading",
            inputs: &[PassId::AssignPes],
            outputs: &[ArtifactId::ThreadFlags],
            invariants: "colocated splitters feed threaded ports",
        },
        PassId::AllocatePorts => PassDescriptor {
            name: "allocate_ports",
            inputs: &[PassId::Threading],
            outputs: &[ArtifactId::PePorts],
            invariants: "every inter-PE edge has a PE port at each end",
        },
        PassId::StaticConnections => PassDescriptor {
            name: "static_connections",
            inputs: &[PassId::AllocatePorts],
            outputs: &[ArtifactId::StaticConns],
            invariants: "every inter-PE edge has a static connection",
        },
        PassId::Emit => PassDescriptor {
            name: "emit",
            inputs: &[PassId::StaticConnections],
            outputs: &[ArtifactId::Physical],
            invariants: "output mirrors input header and pass-through fields",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

pub const ALL_PASSES: [PassId; 9] = [
    PassId::Load,
    PassId::ParallelTransform,
    PassId::CcRegions,
    PassId::BuildPhysical,
    PassId::AssignPes,
    PassId::Threading,
    PassId::AllocatePorts,
    PassId::StaticConnections,
    PassId::Emit,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
