// physical.rs - Physical operators, splitters and PEs
//
// The physical model is the flattened image of the replicated logical
// model: one physical operator per ordinary primitive (originals and
// replicas), each port holding resolved primitive-to-primitive edges, and
// output ports carrying the splitters that fan out into parallel channels.
// PEs start as copies of the input PEs with no operators and no ports.
//
// Preconditions: the logical model is replicated and CC regions computed.
// Postconditions: every port's connections are resolved; the splitter map
//                 covers every splitter reachable from an output port.
// Failure modes: lookups of absent operators or PEs, pool indices with no
//                pool → `Internal`.
// Side effects: none. The logical model is read, never mutated.

use std::collections::{BTreeMap, BTreeSet};

use crate::adl::{self, ThreadedPort};
use crate::connect::{PhysicalConnection, SplitterMap};
use crate::diag::{Result, TransformError};
use crate::hostpool::Hostpools;
use crate::id::{OperIdx, PeIdx, PhysIdx, PoolIdx};
use crate::model::{unexpected, LogicalModel, ModelConnection, PortKind, PrimitiveBody};
use crate::streams::{PhysicalExportedStream, PhysicalImportedStream};

// ── Splitters ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalChannel {
    pub index: u64,
    pub model_connections: Vec<ModelConnection>,
    pub connections: Vec<PhysicalConnection>,
    pub pe_port: Option<u64>,
}

impl PhysicalChannel {
    pub fn new(index: u64, model_connections: Vec<ModelConnection>) -> Self {
        PhysicalChannel {
            index,
            model_connections,
            connections: Vec::new(),
            pe_port: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalSplitter {
    /// Position among the splitters of the owning output port.
    pub index: u64,
    /// Region-root input port the splitter feeds.
    pub iport: u64,
    pub region: u64,
    pub channels: Vec<PhysicalChannel>,
}

// ── Ports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalInputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub threaded_port: Option<ThreadedPort>,
    pub has_injected_thread: bool,
    pub is_control: bool,
    pub model_connections: Vec<ModelConnection>,
    pub connections: Vec<PhysicalConnection>,
    pub imported_streams: Vec<PhysicalImportedStream>,
    pub pe_port: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalOutputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub stream_name: String,
    pub logical_stream_name: String,
    pub viewable: bool,
    pub single_threaded_on_output: bool,
    pub model_connections: Vec<ModelConnection>,
    pub connections: Vec<PhysicalConnection>,
    pub exported_streams: Vec<PhysicalExportedStream>,
    pub splitters: Vec<PhysicalSplitter>,
    pub pe_port: Option<u64>,
}

// ── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalOperator {
    pub index: PhysIdx,
    /// Fully qualified name, channel subscripts included.
    pub name: String,
    pub model: OperIdx,
    pub logical_index: u64,
    pub is_replica: bool,
    pub original_pe: PeIdx,
    /// Colocation key; operators sharing one end up in the same PE.
    pub placement: String,
    pub owning_pe: Option<PeIdx>,
    pub colocation_constraint: bool,
    /// (containing region, channel) when inside a parallel region.
    pub region: Option<(u64, u64)>,
    pub single_threaded_on_inputs: bool,
    pub single_threaded_on_outputs: bool,
    pub resources: adl::Resources,
    pub record: adl::OperInstance,
    pub inputs: Vec<PhysicalInputPort>,
    pub outputs: Vec<PhysicalOutputPort>,
}

impl PhysicalOperator {
    pub fn owning_pe(&self) -> Result<PeIdx> {
        self.owning_pe
            .ok_or_else(|| TransformError::internal("owningPE NULL"))
    }

    pub fn set_owning_pe(&mut self, pe: PeIdx) -> Result<()> {
        if self.owning_pe.is_some() {
            return Err(unexpected());
        }
        self.owning_pe = Some(pe);
        Ok(())
    }

    pub fn containing_region(&self) -> Option<u64> {
        self.region.map(|(r, _)| r)
    }

    fn input(&self, port: u64) -> Result<&PhysicalInputPort> {
        crate::model::nth(&self.inputs, port)
    }

    fn output(&self, port: u64) -> Result<&PhysicalOutputPort> {
        crate::model::nth(&self.outputs, port)
    }

    /// PE port index of operator port (`port`, `kind`).
    pub fn pe_port(&self, port: u64, kind: PortKind) -> Result<u64> {
        let pe_port = match kind {
            PortKind::Input => self.input(port)?.pe_port,
            PortKind::Output => self.output(port)?.pe_port,
        };
        pe_port.ok_or_else(|| TransformError::internal("pe port NULL"))
    }

    /// PE port index of one channel of a splitter on output port `port`.
    pub fn splitter_pe_port(&self, port: u64, splitter: u64, channel: u64) -> Result<u64> {
        let splitter = crate::model::nth(&self.output(port)?.splitters, splitter)
            .map_err(|_| TransformError::internal("invalid splitter index"))?;
        let channel = crate::model::nth(&splitter.channels, channel)
            .map_err(|_| TransformError::internal("Invalid channel index"))?;
        channel
            .pe_port
            .ok_or_else(|| TransformError::internal("pePort is NULL"))
    }
}

// ── PEs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConnection {
    pub pe: PeIdx,
    pub port: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeInputPort {
    pub index: u64,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub oper: PhysIdx,
    pub oper_port: u64,
    pub imported_streams: Vec<PhysicalImportedStream>,
    pub static_connections: Vec<StaticConnection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeOutputPort {
    pub index: u64,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub single_threaded_on_output: bool,
    pub oper: PhysIdx,
    pub oper_port: u64,
    /// (splitter index, channel) when this port carries one splitter channel.
    pub splitter: Option<(u64, u64)>,
    pub exported_streams: Vec<PhysicalExportedStream>,
    pub static_connections: Vec<StaticConnection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPe {
    pub index: PeIdx,
    pub logical_index: u64,
    pub record: adl::Pe,
    /// (parallel region, channel) once a replica of this PE exists.
    pub region: Option<(u64, u64)>,
    pub operators: Vec<PhysIdx>,
    pub inputs: Vec<PeInputPort>,
    pub outputs: Vec<PeOutputPort>,
    replicas: BTreeMap<u64, PeIdx>,
}

impl PhysicalPe {
    pub(crate) fn from_record(record: &adl::Pe) -> Self {
        PhysicalPe {
            index: PeIdx(record.index),
            logical_index: record.index,
            record: record.clone(),
            region: None,
            operators: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            replicas: BTreeMap::new(),
        }
    }

    fn replica(&self, index: PeIdx) -> Self {
        PhysicalPe {
            index,
            logical_index: self.index.0,
            record: self.record.clone(),
            region: None,
            operators: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            replicas: BTreeMap::new(),
        }
    }
}

// ── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalModel {
    pub operators: BTreeMap<PhysIdx, PhysicalOperator>,
    pub pes: BTreeMap<PeIdx, PhysicalPe>,
    pub hostpools: Hostpools,
    pub splitter_map: SplitterMap,
}

impl PhysicalModel {
    /// Create the physical operators and resolve every port's connections.
    pub fn build(logical: &LogicalModel) -> Result<Self> {
        let mut model = PhysicalModel {
            operators: BTreeMap::new(),
            pes: logical
                .inventory
                .pes
                .values()
                .map(|pe| (PeIdx(pe.index), PhysicalPe::from_record(pe)))
                .collect(),
            hostpools: logical.hostpools.clone(),
            splitter_map: SplitterMap::default(),
        };

        for (&phys, &oper) in &logical.primitives {
            let op = model.create_operator(logical, phys, oper)?;
            model.operators.insert(phys, op);
        }
        model.build_connections(logical)?;

        tracing::debug!(
            operators = model.operators.len(),
            splitters = model.splitter_map.splitter_count(),
            pools = model.hostpools.len(),
            "built physical operators"
        );
        Ok(model)
    }

    pub fn operator(&self, idx: PhysIdx) -> Result<&PhysicalOperator> {
        self.operators.get(&idx).ok_or_else(|| {
            TransformError::internal(format!("could not find physical operator {}", idx))
        })
    }

    pub fn operator_mut(&mut self, idx: PhysIdx) -> Result<&mut PhysicalOperator> {
        self.operators.get_mut(&idx).ok_or_else(|| {
            TransformError::internal(format!("could not find physical operator {}", idx))
        })
    }

    pub fn pe(&self, idx: PeIdx) -> Result<&PhysicalPe> {
        self.pes
            .get(&idx)
            .ok_or_else(|| TransformError::internal(format!("could not find PE {}", idx)))
    }

    pub fn pe_mut(&mut self, idx: PeIdx) -> Result<&mut PhysicalPe> {
        self.pes
            .get_mut(&idx)
            .ok_or_else(|| TransformError::internal(format!("could not find PE {}", idx)))
    }

    /// The replica of PE `pe` for `channel`, created on first use.
    pub fn find_or_create_pe_replica(&mut self, pe: PeIdx, channel: u64) -> Result<PeIdx> {
        if channel == 0 {
            return Err(unexpected());
        }
        let next = PeIdx(self.pes.len() as u64);
        let original = self.pe_mut(pe)?;
        if let Some(&existing) = original.replicas.get(&channel) {
            return Ok(existing);
        }
        original.replicas.insert(channel, next);
        let replica = original.replica(next);
        tracing::trace!(pe = %pe, channel, replica = %next, "created PE replica");
        self.pes.insert(next, replica);
        Ok(next)
    }

    /// True when the two ends of `conn` live in different PEs.
    pub fn is_inter_pe(&self, conn: &PhysicalConnection) -> Result<bool> {
        let from = self.operator(conn.from)?.owning_pe()?;
        let to = self.operator(conn.to)?.owning_pe()?;
        Ok(from != to)
    }

    // ── Construction ──

    fn create_operator(
        &mut self,
        logical: &LogicalModel,
        phys: PhysIdx,
        oper: OperIdx,
    ) -> Result<PhysicalOperator> {
        let mop = logical.operator(oper)?;
        let prim: &PrimitiveBody = mop.as_primitive()?;
        let inv = logical.inventory.operator(prim.logical_index)?;
        let region = if logical.is_in_parallel_region(oper)? {
            Some((
                logical.containing_parallel_region(oper)?,
                logical.containing_channel(oper)?,
            ))
        } else {
            None
        };

        let mut inputs = Vec::with_capacity(prim.inputs.len());
        for port in &prim.inputs {
            let mut imported = Vec::new();
            for conn in &port.connections {
                logical.imported_streams(*conn, &mut imported)?;
            }
            inputs.push(PhysicalInputPort {
                index: port.index,
                name: port.name.clone(),
                is_mutable: port.is_mutable,
                tuple_type_index: port.tuple_type_index,
                transport: port.transport.clone(),
                encoding: port.encoding.clone(),
                threaded_port: port.threaded_port.clone(),
                has_injected_thread: false,
                is_control: port.is_control,
                model_connections: port.connections.clone(),
                connections: Vec::new(),
                imported_streams: imported,
                pe_port: None,
            });
        }

        let mut outputs = Vec::with_capacity(prim.outputs.len());
        for port in &prim.outputs {
            let mut exported = Vec::new();
            let mut splitters = Vec::new();
            for conn in &port.connections {
                logical.exported_streams(*conn, &mut exported)?;
                logical.collect_splitters(
                    *conn,
                    (phys, port.index),
                    &mut splitters,
                    &mut self.splitter_map,
                )?;
            }
            outputs.push(PhysicalOutputPort {
                index: port.index,
                name: port.name.clone(),
                is_mutable: port.is_mutable,
                tuple_type_index: port.tuple_type_index,
                transport: port.transport.clone(),
                encoding: port.encoding.clone(),
                stream_name: logical.stream_name(oper, &port.logical_stream_name)?,
                logical_stream_name: port.logical_stream_name.clone(),
                viewable: port.viewable,
                single_threaded_on_output: port.single_threaded_on_output,
                model_connections: port.connections.clone(),
                connections: Vec::new(),
                exported_streams: exported,
                splitters,
                pe_port: None,
            });
        }

        let mut resources = inv.record.resources.clone();
        if let (Some((region_index, channel)), Some(pool)) = (region, resources.pool_location.as_mut()) {
            let tags = &logical.regions.region(region_index)?.replicate_tags;
            let original = self.hostpools.get(PoolIdx(pool.pool_index))?;
            let intersect: BTreeSet<String> = tags.intersection(&original.tags).cloned().collect();
            if !intersect.is_empty() {
                let replica = self.hostpools.find_or_create_replica(
                    PoolIdx(pool.pool_index),
                    region_index,
                    channel,
                    &intersect,
                )?;
                pool.pool_index = replica.0;
            }
        }

        Ok(PhysicalOperator {
            index: phys,
            name: logical.fully_qualified_name(oper)?,
            model: oper,
            logical_index: prim.logical_index,
            is_replica: mop.is_replica,
            original_pe: inv.pe,
            placement: format!("pe_{}", inv.pe),
            owning_pe: None,
            colocation_constraint: false,
            region,
            single_threaded_on_inputs: inv.record.single_threaded_on_inputs,
            single_threaded_on_outputs: inv.record.single_threaded_on_outputs,
            resources,
            record: inv.record.clone(),
            inputs,
            outputs,
        })
    }

    /// Resolve input ports, then output ports, then splitter channels.
    fn build_connections(&mut self, logical: &LogicalModel) -> Result<()> {
        let map = &self.splitter_map;
        for (&idx, op) in self.operators.iter_mut() {
            for port in &mut op.inputs {
                let mut out = Vec::new();
                for conn in &port.model_connections {
                    logical.physical_connections(*conn, (idx, port.index), PortKind::Input, map, &mut out)?;
                }
                port.connections = out;
            }
            for port in &mut op.outputs {
                let mut out = Vec::new();
                for conn in &port.model_connections {
                    logical.physical_connections(*conn, (idx, port.index), PortKind::Output, map, &mut out)?;
                }
                port.connections = out;
                for splitter in &mut port.splitters {
                    for channel in &mut splitter.channels {
                        let mut out = Vec::new();
                        for conn in &channel.model_connections {
                            logical.physical_connections(
                                *conn,
                                (idx, port.index),
                                PortKind::Output,
                                map,
                                &mut out,
                            )?;
                        }
                        channel.connections = out;
                    }
                }
            }
        }
        Ok(())
    }
}
