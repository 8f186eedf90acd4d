// model.rs - Model entity graph
//
// The logical model is an arena of operators keyed by `OperIdx`. Composites
// hold the ids of their children, every operator holds the id of its owning
// composite, and every connection names its far end by (operator, port,
// kind). Connections are stored at both ends and resolved lazily.
//
// Preconditions: operators are inserted by `load` and by the replicator only.
// Postconditions: every lookup of an absent id is an `Internal` error.
// Failure modes: dangling ids, out-of-range ports and calls on a variant that
//                cannot honour them → `TransformError::Internal`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::adl::{self, Annotation, ThreadedPort};
use crate::consistent::{CcInfo, CcRegions};
use crate::diag::{Result, TransformError};
use crate::hostpool::Hostpools;
use crate::id::{IdAllocator, OperIdx, PeIdx, PhysIdx};
use crate::parallel::ParallelRegions;
use crate::streams::StreamRegistry;

// ── Connections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortKind {
    Input,
    Output,
}

impl From<adl::PortKindRecord> for PortKind {
    fn from(kind: adl::PortKindRecord) -> Self {
        match kind {
            adl::PortKindRecord::Input => PortKind::Input,
            adl::PortKindRecord::Output => PortKind::Output,
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Input => write!(f, "input"),
            PortKind::Output => write!(f, "output"),
        }
    }
}

/// One end of an edge, as seen from the port that stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelConnection {
    pub oper: OperIdx,
    pub port: u64,
    pub kind: PortKind,
}

impl ModelConnection {
    pub fn new(oper: OperIdx, port: u64, kind: PortKind) -> Self {
        ModelConnection { oper, port, kind }
    }
}

impl From<adl::Connection> for ModelConnection {
    fn from(c: adl::Connection) -> Self {
        ModelConnection::new(OperIdx(c.oper_index), c.port_index, c.port_kind.into())
    }
}

impl fmt::Display for ModelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.oper, self.port, self.kind)
    }
}

/// Old-index → new-index map built while a subtree is copied.
pub type ReplicaMap = BTreeMap<OperIdx, OperIdx>;

// ── Ports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CompositePort {
    pub index: u64,
    pub incoming: Vec<ModelConnection>,
    pub outgoing: Vec<ModelConnection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub threaded_port: Option<ThreadedPort>,
    pub is_control: bool,
    pub connections: Vec<ModelConnection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    /// Stream name as declared, `<composite>.<stream>`.
    pub logical_stream_name: String,
    pub viewable: bool,
    pub single_threaded_on_output: bool,
    pub connections: Vec<ModelConnection>,
}

/// Port of an Import or Export pseudo-operator.
#[derive(Debug, Clone, PartialEq)]
pub struct PlainPort {
    pub index: u64,
    pub connections: Vec<ModelConnection>,
}

// ── Operators ───────────────────────────────────────────────────────────────

/// Payload shared by ordinary primitives and the Import/Export pseudo-operators.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveCore {
    pub kind: String,
    pub toolkit_index: u64,
    pub annotations: Vec<Annotation>,
    pub cc: CcInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeBody {
    pub composite_oper_index: u64,
    pub annotations: Vec<Annotation>,
    pub inputs: Vec<CompositePort>,
    pub outputs: Vec<CompositePort>,
    pub composites: Vec<OperIdx>,
    pub primitives: Vec<OperIdx>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveBody {
    pub core: PrimitiveCore,
    /// Index into the physical operator numbering; replicas get fresh ones.
    pub physical_index: PhysIdx,
    /// Index of the inventory operator this primitive (or its original) came from.
    pub logical_index: u64,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitterBody {
    pub cc: CcInfo,
    /// Input port of the region root this splitter feeds.
    pub injecting_iport: u64,
    pub region: u64,
    pub input: Vec<ModelConnection>,
    /// One connection list per channel.
    pub outputs: Vec<Vec<ModelConnection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergerBody {
    pub cc: CcInfo,
    pub region: u64,
    /// One connection list per channel.
    pub inputs: Vec<Vec<ModelConnection>>,
    pub output: Vec<ModelConnection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportBody {
    pub core: PrimitiveCore,
    /// Registry key of the imported stream, if a PE port declares one.
    pub stream: Option<String>,
    pub outputs: Vec<PlainPort>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportBody {
    pub core: PrimitiveCore,
    /// Registry key of the exported stream.
    pub stream: String,
    pub inputs: Vec<PlainPort>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorBody {
    Composite(CompositeBody),
    Primitive(PrimitiveBody),
    Splitter(SplitterBody),
    Merger(MergerBody),
    Import(ImportBody),
    Export(ExportBody),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelOperator {
    pub index: OperIdx,
    /// Root name: the text after the last `.` of the description name.
    pub name: String,
    pub description: String,
    pub channel: u64,
    pub is_replica: bool,
    pub owner: Option<OperIdx>,
    /// Set when this operator is itself the root of a parallel region.
    pub parallel_region: Option<u64>,
    pub body: OperatorBody,
}

impl ModelOperator {
    pub fn kind_name(&self) -> &str {
        match &self.body {
            OperatorBody::Composite(_) => "Composite",
            OperatorBody::Primitive(p) => &p.core.kind,
            OperatorBody::Splitter(_) => "Splitter",
            OperatorBody::Merger(_) => "Merger",
            OperatorBody::Import(i) => &i.core.kind,
            OperatorBody::Export(e) => &e.core.kind,
        }
    }

    pub fn is_region_root(&self) -> bool {
        self.parallel_region.is_some()
    }

    pub fn cc(&self) -> Option<&CcInfo> {
        match &self.body {
            OperatorBody::Composite(_) => None,
            OperatorBody::Primitive(p) => Some(&p.core.cc),
            OperatorBody::Splitter(s) => Some(&s.cc),
            OperatorBody::Merger(m) => Some(&m.cc),
            OperatorBody::Import(i) => Some(&i.core.cc),
            OperatorBody::Export(e) => Some(&e.core.cc),
        }
    }

    pub fn cc_mut(&mut self) -> Option<&mut CcInfo> {
        match &mut self.body {
            OperatorBody::Composite(_) => None,
            OperatorBody::Primitive(p) => Some(&mut p.core.cc),
            OperatorBody::Splitter(s) => Some(&mut s.cc),
            OperatorBody::Merger(m) => Some(&mut m.cc),
            OperatorBody::Import(i) => Some(&mut i.core.cc),
            OperatorBody::Export(e) => Some(&mut e.core.cc),
        }
    }

    pub fn as_composite(&self) -> Result<&CompositeBody> {
        match &self.body {
            OperatorBody::Composite(c) => Ok(c),
            _ => Err(TransformError::internal(format!(
                "operator {} is not a composite",
                self.index
            ))),
        }
    }

    pub fn as_composite_mut(&mut self) -> Result<&mut CompositeBody> {
        let index = self.index;
        match &mut self.body {
            OperatorBody::Composite(c) => Ok(c),
            _ => Err(TransformError::internal(format!(
                "operator {} is not a composite",
                index
            ))),
        }
    }

    pub fn as_primitive(&self) -> Result<&PrimitiveBody> {
        match &self.body {
            OperatorBody::Primitive(p) => Ok(p),
            _ => Err(TransformError::internal(format!(
                "operator {} is not a primitive operator",
                self.index
            ))),
        }
    }

    /// Append `conn` to input port `port`.
    pub fn add_input_port_connection(&mut self, port: u64, conn: ModelConnection) -> Result<()> {
        match &mut self.body {
            OperatorBody::Primitive(p) => nth_mut(&mut p.inputs, port)?.connections.push(conn),
            OperatorBody::Splitter(s) => {
                if port != 0 {
                    return Err(unexpected());
                }
                s.input.push(conn);
            }
            OperatorBody::Merger(m) => nth_mut(&mut m.inputs, port)?.push(conn),
            _ => return Err(unexpected()),
        }
        Ok(())
    }

    /// Append `conn` to output port `port`.
    pub fn add_output_port_connection(&mut self, port: u64, conn: ModelConnection) -> Result<()> {
        match &mut self.body {
            OperatorBody::Primitive(p) => nth_mut(&mut p.outputs, port)?.connections.push(conn),
            OperatorBody::Splitter(s) => nth_mut(&mut s.outputs, port)?.push(conn),
            OperatorBody::Merger(m) => {
                if port != 0 {
                    return Err(invalid_port());
                }
                m.output.push(conn);
            }
            OperatorBody::Composite(c) => {
                // A merger feeding a composite output port directly has no
                // defined channel routing.
                nth_mut(&mut c.outputs, port)?;
                return Err(unexpected());
            }
            _ => return Err(unexpected()),
        }
        Ok(())
    }

    /// On port (`port`, `kind`) of this operator, repoint the connection that
    /// names `old` so that it names `new` instead.
    pub fn fix_reverse_connection(
        &mut self,
        port: u64,
        kind: PortKind,
        old: (OperIdx, u64),
        new: ModelConnection,
    ) -> Result<()> {
        match &mut self.body {
            OperatorBody::Primitive(p) => match kind {
                PortKind::Input => fix_connection(&mut nth_mut(&mut p.inputs, port)?.connections, old, new),
                PortKind::Output => {
                    fix_connection(&mut nth_mut(&mut p.outputs, port)?.connections, old, new)
                }
            },
            OperatorBody::Splitter(s) => match kind {
                PortKind::Input if port != 0 => Err(invalid_port()),
                PortKind::Input => fix_connection(&mut s.input, old, new),
                PortKind::Output => Err(unexpected()),
            },
            OperatorBody::Merger(m) => match kind {
                PortKind::Output if port != 0 => Err(invalid_port()),
                PortKind::Output => fix_connection(&mut m.output, old, new),
                PortKind::Input => fix_connection(nth_mut(&mut m.inputs, port)?, old, new),
            },
            OperatorBody::Composite(c) => {
                let cport = match kind {
                    PortKind::Input => nth_mut(&mut c.inputs, port)?,
                    PortKind::Output => nth_mut(&mut c.outputs, port)?,
                };
                match new.kind {
                    PortKind::Input => fix_connection(&mut cport.outgoing, old, new),
                    PortKind::Output => fix_connection(&mut cport.incoming, old, new),
                }
            }
            _ => Err(unexpected()),
        }
    }
}

pub(crate) fn unexpected() -> TransformError {
    TransformError::internal("unexpected condition")
}

pub(crate) fn invalid_port() -> TransformError {
    TransformError::internal("invalid port index")
}

pub(crate) fn nth<T>(items: &[T], index: u64) -> Result<&T> {
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .ok_or_else(invalid_port)
}

pub(crate) fn nth_mut<T>(items: &mut [T], index: u64) -> Result<&mut T> {
    usize::try_from(index)
        .ok()
        .and_then(move |i| items.get_mut(i))
        .ok_or_else(invalid_port)
}

/// Rewrite the first connection naming `old` so that it names `new`.
pub fn fix_connection(
    list: &mut [ModelConnection],
    old: (OperIdx, u64),
    new: ModelConnection,
) -> Result<()> {
    match list.iter_mut().find(|c| c.oper == old.0 && c.port == old.1) {
        Some(conn) => {
            *conn = new;
            Ok(())
        }
        None => Err(unexpected()),
    }
}

/// Map every connection's operator through `map`.
pub fn remap_connections(list: &mut [ModelConnection], map: &ReplicaMap) -> Result<()> {
    for conn in list.iter_mut() {
        conn.oper = *map.get(&conn.oper).ok_or_else(|| {
            TransformError::internal(format!(
                "failed to find operator index {} in replica map",
                conn.oper
            ))
        })?;
    }
    Ok(())
}

/// The text after the last `.` of a dotted operator name.
pub fn root_operator_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Split `a.b.s` into (`a.b`, `s`); an undotted name has an empty composite part.
pub fn split_stream_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => ("", name),
    }
}

// ── Inventory ───────────────────────────────────────────────────────────────

/// Transport settings a PE port applies to the operator port it wires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortWire {
    pub transport: String,
    pub encoding: String,
    pub single_threaded_on_output: Option<bool>,
}

/// An operator from the original PE layout.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryOperator {
    pub pe: PeIdx,
    pub record: adl::OperInstance,
    pub input_wires: BTreeMap<u64, PortWire>,
    pub output_wires: BTreeMap<u64, PortWire>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub pes: BTreeMap<PeIdx, adl::Pe>,
    pub operators: BTreeMap<u64, InventoryOperator>,
}

impl Inventory {
    pub fn operator(&self, index: u64) -> Result<&InventoryOperator> {
        self.operators.get(&index).ok_or_else(|| {
            TransformError::internal(format!("could not find physical operator {}", index))
        })
    }

    pub fn pe(&self, index: PeIdx) -> Result<&adl::Pe> {
        self.pes
            .get(&index)
            .ok_or_else(|| TransformError::internal(format!("could not find PE {}", index)))
    }
}

// ── Logical model ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct LogicalModel {
    pub operators: BTreeMap<OperIdx, ModelOperator>,
    pub main: OperIdx,
    pub ids: IdAllocator,
    pub inventory: Inventory,
    pub regions: ParallelRegions,
    pub cc: CcRegions,
    pub hostpools: Hostpools,
    pub streams: StreamRegistry,
    /// Ordinary primitives (originals and replicas) by physical index.
    pub primitives: BTreeMap<PhysIdx, OperIdx>,
}

impl LogicalModel {
    pub fn operator(&self, idx: OperIdx) -> Result<&ModelOperator> {
        self.operators.get(&idx).ok_or_else(|| {
            TransformError::internal(format!("could not find model operator {}", idx))
        })
    }

    pub fn operator_mut(&mut self, idx: OperIdx) -> Result<&mut ModelOperator> {
        self.operators.get_mut(&idx).ok_or_else(|| {
            TransformError::internal(format!("could not find model operator {}", idx))
        })
    }

    pub fn composite(&self, idx: OperIdx) -> Result<&CompositeBody> {
        self.operator(idx)?.as_composite()
    }

    pub fn composite_mut(&mut self, idx: OperIdx) -> Result<&mut CompositeBody> {
        self.operator_mut(idx)?.as_composite_mut()
    }

    pub fn insert(&mut self, op: ModelOperator) {
        if let OperatorBody::Primitive(p) = &op.body {
            self.primitives.insert(p.physical_index, op.index);
        }
        self.operators.insert(op.index, op);
    }

    /// Deliver `conn` to the port that `target` names.
    pub fn add_connection(&mut self, target: ModelConnection, conn: ModelConnection) -> Result<()> {
        let op = self.operator_mut(target.oper)?;
        match target.kind {
            PortKind::Input => op.add_input_port_connection(target.port, conn),
            PortKind::Output => op.add_output_port_connection(target.port, conn),
        }
    }

    /// On the port `target` names, repoint the back edge to `old` at `new`.
    pub fn fix_reverse_connection(
        &mut self,
        target: ModelConnection,
        old: (OperIdx, u64),
        new: ModelConnection,
    ) -> Result<()> {
        self.operator_mut(target.oper)?
            .fix_reverse_connection(target.port, target.kind, old, new)
    }

    // ── Naming ──

    /// Logical name, plus `[channel]` when the operator is a region root.
    pub fn name(&self, idx: OperIdx) -> Result<String> {
        let op = self.operator(idx)?;
        Ok(decorated_name(op))
    }

    /// Dotted name of composite `idx` as an owner of other operators. The
    /// main composite contributes nothing.
    pub fn owning_composite_name(&self, idx: OperIdx, logical: bool) -> Result<String> {
        let mut segments = Vec::new();
        let mut cur = self.operator(idx)?;
        while let Some(owner) = cur.owner {
            segments.push(if logical {
                cur.name.clone()
            } else {
                decorated_name(cur)
            });
            cur = self.operator(owner)?;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    pub fn fully_qualified_name(&self, idx: OperIdx) -> Result<String> {
        self.qualified(idx, false)
    }

    pub fn fully_qualified_logical_name(&self, idx: OperIdx) -> Result<String> {
        self.qualified(idx, true)
    }

    fn qualified(&self, idx: OperIdx, logical: bool) -> Result<String> {
        let op = self.operator(idx)?;
        let mut fqn = match op.owner {
            Some(owner) => self.owning_composite_name(owner, logical)?,
            None => String::new(),
        };
        if !fqn.is_empty() {
            fqn.push('.');
        }
        if logical {
            fqn.push_str(&op.name);
        } else {
            fqn.push_str(&decorated_name(op));
        }
        Ok(fqn)
    }

    pub fn is_in_parallel_region(&self, idx: OperIdx) -> Result<bool> {
        Ok(self.containing_root(idx)?.is_some())
    }

    /// Nearest region root at or above `idx`.
    fn containing_root(&self, idx: OperIdx) -> Result<Option<&ModelOperator>> {
        let mut cur = self.operator(idx)?;
        loop {
            if cur.is_region_root() {
                return Ok(Some(cur));
            }
            match cur.owner {
                Some(owner) => cur = self.operator(owner)?,
                None => return Ok(None),
            }
        }
    }

    pub fn containing_parallel_region(&self, idx: OperIdx) -> Result<u64> {
        self.containing_root(idx)?
            .and_then(|root| root.parallel_region)
            .ok_or_else(|| {
                TransformError::internal("containingParallelRegion called on main composite")
            })
    }

    pub fn containing_channel(&self, idx: OperIdx) -> Result<u64> {
        self.containing_root(idx)?.map(|root| root.channel).ok_or_else(|| {
            TransformError::internal("containingParallelChannelIndex called on main composite")
        })
    }

    /// (width, channel) used for intrinsic evaluation; (0, -1) outside any region.
    pub fn channel_scope(&self, idx: OperIdx) -> Result<(i64, i64)> {
        match self.containing_root(idx)? {
            Some(root) => {
                let region = self.regions.region(root.parallel_region.unwrap_or_default())?;
                Ok((region.width as i64, root.channel as i64))
            }
            None => Ok((0, -1)),
        }
    }

    /// Physical stream name of output port `port` on primitive `idx`.
    ///
    /// The composite part of the logical stream name locates the composite
    /// the stream was declared in; each region root passed on the way up
    /// contributes a `[channel]` subscript.
    pub fn stream_name(&self, idx: OperIdx, logical_stream_name: &str) -> Result<String> {
        let (composite_name, stream) = split_stream_name(logical_stream_name);
        let op = self.operator(idx)?;
        let mut subscripts = Vec::new();
        if op.is_region_root() {
            subscripts.push(format!("[{}]", self.containing_channel(idx)?));
        }
        let mut prefix = String::new();
        let mut comp = op.owner;
        while let Some(cidx) = comp {
            if self.owning_composite_name(cidx, true)? == composite_name {
                prefix = self.owning_composite_name(cidx, false)?;
                break;
            }
            let c = self.operator(cidx)?;
            if c.owner.is_none() {
                return Err(TransformError::internal("could not find owning composite"));
            }
            if c.is_region_root() {
                subscripts.push(format!("[{}]", self.containing_channel(cidx)?));
            }
            comp = c.owner;
        }
        let mut name = prefix;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(stream);
        for s in subscripts.iter().rev() {
            name.push_str(s);
        }
        Ok(name)
    }
}

fn decorated_name(op: &ModelOperator) -> String {
    if op.is_region_root() {
        format!("{}[{}]", op.name, op.channel)
    } else {
        op.name.clone()
    }
}
