// placement.rs - PE assignment, threading fix-ups and PE port allocation
//
// Runs over a built physical model in five steps, each over operators or
// PEs in index order: assign every operator to a PE (replicas to per-channel
// PE replicas unless colocation pins them), inject threaded ports behind
// colocated splitters, clear single-threaded flags on operators that can now
// observe several threads, allocate PE ports for every operator port that
// crosses a PE boundary, and resolve the static PE-to-PE connections.
//
// Preconditions: `PhysicalModel::build` has resolved all port connections.
// Postconditions: every operator has an owning PE; every inter-PE edge has
//                 a PE port at both ends and a static connection.
// Failure modes: an operator assigned twice, a replica on channel 0, a PE
//                port missing at the far end of an edge → `Internal`.
// Side effects: mutates the physical model in place.

use std::collections::BTreeSet;

use crate::adl::ThreadedPort;
use crate::connect::PhysicalConnection;
use crate::diag::{Result, TransformError};
use crate::id::{PeIdx, PhysIdx};
use crate::model::nth;
#[cfg(test)]
use crate::model::PortKind;
use crate::physical::{
    PeInputPort, PeOutputPort, PhysicalInputPort, PhysicalModel, PhysicalOperator,
    PhysicalOutputPort, StaticConnection,
};

/// PE port to create for one operator port or splitter channel.
#[derive(Debug, Clone, Copy)]
enum PortAllocation {
    Input { oper: PhysIdx, port: u64 },
    Output { oper: PhysIdx, port: u64 },
    Channel { oper: PhysIdx, port: u64, splitter: u64, channel: u64 },
}

impl PhysicalModel {
    // ── PE assignment ──

    pub fn assign_pes(&mut self) -> Result<()> {
        let indices: Vec<PhysIdx> = self.operators.keys().copied().collect();
        for idx in indices {
            let op = self.operator(idx)?;
            let (is_replica, region, original_pe) = (op.is_replica, op.region, op.original_pe);
            let pe = if is_replica {
                let (region, channel) = region.ok_or_else(crate::model::unexpected)?;
                let original = self.operator(PhysIdx(op.logical_index))?;
                if original.colocation_constraint {
                    original.owning_pe()?
                } else {
                    let replica = self.find_or_create_pe_replica(original_pe, channel)?;
                    self.pe_mut(replica)?.region = Some((region, channel));
                    self.pe_mut(original_pe)?.region = Some((region, 0));
                    replica
                }
            } else {
                let constrained = region.is_some() && self.is_colocated_with_non_udp(op);
                self.operator_mut(idx)?.colocation_constraint = constrained;
                original_pe
            };
            self.operator_mut(idx)?.set_owning_pe(pe)?;
            self.pe_mut(pe)?.operators.push(idx);
        }
        tracing::debug!(pes = self.pes.len(), "assigned operators to PEs");
        Ok(())
    }

    /// Another original operator outside this one's region shares its placement.
    fn is_colocated_with_non_udp(&self, op: &PhysicalOperator) -> bool {
        self.operators.values().any(|other| {
            other.index != op.index
                && !other.is_replica
                && !(other.region.is_some() && other.containing_region() == op.containing_region())
                && other.placement == op.placement
        })
    }

    // ── Threading ──

    pub fn inject_threaded_ports(&mut self) -> Result<()> {
        let mut injected = Vec::new();
        let mut shared = Vec::new();
        for (&idx, op) in &self.operators {
            for port in &op.inputs {
                if port.threaded_port.is_none() && self.is_fed_by_colocated_splitter(port)? {
                    injected.push((idx, port.index));
                    shared.push((idx, port.index));
                } else if port.threaded_port.is_some() {
                    shared.push((idx, port.index));
                }
            }
        }
        for &(idx, port) in &injected {
            let port = crate::model::nth_mut(&mut self.operator_mut(idx)?.inputs, port)?;
            port.threaded_port = Some(ThreadedPort::default());
            port.has_injected_thread = true;
            tracing::trace!(oper = %idx, port = port.index, "injected threaded port");
        }
        let mut multi = Vec::new();
        for &(idx, port) in &shared {
            let p = nth(&self.operator(idx)?.inputs, port)?;
            if self.intra_pe_count(&p.connections)? > 1 {
                multi.push((idx, port));
            }
        }
        for (idx, port) in multi {
            let port = crate::model::nth_mut(&mut self.operator_mut(idx)?.inputs, port)?;
            if let Some(tp) = port.threaded_port.as_mut() {
                tp.single_threaded_on_input = false;
            }
        }
        Ok(())
    }

    fn is_fed_by_colocated_splitter(&self, port: &PhysicalInputPort) -> Result<bool> {
        for conn in &port.connections {
            if conn.splitter.is_some() && !self.is_inter_pe(conn)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn intra_pe_count(&self, conns: &[PhysicalConnection]) -> Result<u64> {
        let mut n = 0;
        for conn in conns {
            if !self.is_inter_pe(conn)? {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Clear the single-threaded flags of operators that can observe more
    /// than one new upstream thread.
    pub fn fix_single_threaded(&mut self) -> Result<()> {
        let mut cleared = Vec::new();
        for (&idx, op) in &self.operators {
            let mut seen = BTreeSet::from([idx]);
            let mut observable = 0;
            let mut intra_pe = 0;
            for port in &op.inputs {
                observable += self.port_upstream_threads(port, &mut seen)?;
                if port.threaded_port.is_none() {
                    intra_pe += self.intra_pe_count(&port.connections)?;
                }
            }
            if observable > 1 || (observable == 1 && intra_pe > 1) {
                cleared.push(idx);
            }
        }
        for idx in cleared {
            let op = self.operator_mut(idx)?;
            op.single_threaded_on_inputs = false;
            op.single_threaded_on_outputs = false;
            for port in &mut op.outputs {
                port.single_threaded_on_output = false;
            }
            tracing::trace!(oper = %idx, "operator is no longer single threaded");
        }
        Ok(())
    }

    /// Number of new threads an input port can observe upstream.
    pub fn port_upstream_threads(
        &self,
        port: &PhysicalInputPort,
        seen: &mut BTreeSet<PhysIdx>,
    ) -> Result<u64> {
        if port.has_injected_thread {
            return Ok(1);
        }
        if port.threaded_port.is_some() {
            return Ok(0);
        }
        let mut observable = 0;
        for conn in &port.connections {
            observable += if self.is_inter_pe(conn)? {
                u64::from(self.operator(conn.from)?.is_replica)
            } else {
                self.operator_upstream_threads(conn.to, seen)?
            };
        }
        Ok(observable)
    }

    fn operator_upstream_threads(&self, idx: PhysIdx, seen: &mut BTreeSet<PhysIdx>) -> Result<u64> {
        if !seen.insert(idx) {
            return Ok(0);
        }
        let op = self.operator(idx)?;
        if op.inputs.is_empty() {
            return Ok(u64::from(op.is_replica));
        }
        let mut observable = 0;
        for port in &op.inputs {
            observable += self.port_upstream_threads(port, seen)?;
        }
        Ok(observable)
    }

    // ── PE ports ──

    fn has_inter_pe(&self, conns: &[PhysicalConnection]) -> Result<bool> {
        for conn in conns {
            if self.is_inter_pe(conn)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn input_needs_pe_port(&self, port: &PhysicalInputPort) -> Result<bool> {
        Ok(self.has_inter_pe(&port.connections)? || !port.imported_streams.is_empty())
    }

    fn output_needs_pe_port(&self, port: &PhysicalOutputPort) -> Result<bool> {
        Ok(self.has_inter_pe(&port.connections)? || !port.exported_streams.is_empty())
    }

    /// Channels are either all inter-PE or all intra-PE, so channel 0 decides.
    fn splitter_needs_pe_ports(&self, splitter: &crate::physical::PhysicalSplitter) -> Result<bool> {
        match splitter.channels.first().and_then(|c| c.connections.first()) {
            Some(conn) => self.is_inter_pe(conn),
            None => Ok(false),
        }
    }

    pub fn allocate_ports(&mut self) -> Result<()> {
        let mut plan: Vec<(PeIdx, PortAllocation)> = Vec::new();
        for (&pe_idx, pe) in &self.pes {
            for &oper in &pe.operators {
                let op = self.operator(oper)?;
                for port in &op.inputs {
                    if self.input_needs_pe_port(port)? {
                        plan.push((pe_idx, PortAllocation::Input { oper, port: port.index }));
                    }
                }
                for port in &op.outputs {
                    if self.output_needs_pe_port(port)? {
                        plan.push((pe_idx, PortAllocation::Output { oper, port: port.index }));
                    }
                    for splitter in &port.splitters {
                        if !self.splitter_needs_pe_ports(splitter)? {
                            continue;
                        }
                        for channel in &splitter.channels {
                            plan.push((
                                pe_idx,
                                PortAllocation::Channel {
                                    oper,
                                    port: port.index,
                                    splitter: splitter.index,
                                    channel: channel.index,
                                },
                            ));
                        }
                    }
                }
            }
        }
        for (pe, alloc) in plan {
            self.allocate_port(pe, alloc)?;
        }
        Ok(())
    }

    fn allocate_port(&mut self, pe: PeIdx, alloc: PortAllocation) -> Result<()> {
        match alloc {
            PortAllocation::Input { oper, port } => {
                let p = nth(&self.operator(oper)?.inputs, port)?;
                let index = self.pe(pe)?.inputs.len() as u64;
                let pe_port = PeInputPort {
                    index,
                    tuple_type_index: p.tuple_type_index,
                    transport: p.transport.clone(),
                    encoding: p.encoding.clone(),
                    oper,
                    oper_port: port,
                    imported_streams: p.imported_streams.clone(),
                    static_connections: Vec::new(),
                };
                self.pe_mut(pe)?.inputs.push(pe_port);
                crate::model::nth_mut(&mut self.operator_mut(oper)?.inputs, port)?.pe_port = Some(index);
            }
            PortAllocation::Output { oper, port } => {
                let p = nth(&self.operator(oper)?.outputs, port)?;
                let index = self.pe(pe)?.outputs.len() as u64;
                let pe_port = output_pe_port(index, oper, p, None);
                self.pe_mut(pe)?.outputs.push(pe_port);
                crate::model::nth_mut(&mut self.operator_mut(oper)?.outputs, port)?.pe_port = Some(index);
            }
            PortAllocation::Channel {
                oper,
                port,
                splitter,
                channel,
            } => {
                let p = nth(&self.operator(oper)?.outputs, port)?;
                let index = self.pe(pe)?.outputs.len() as u64;
                let pe_port = output_pe_port(index, oper, p, Some((splitter, channel)));
                self.pe_mut(pe)?.outputs.push(pe_port);
                let p = crate::model::nth_mut(&mut self.operator_mut(oper)?.outputs, port)?;
                let s = crate::model::nth_mut(&mut p.splitters, splitter)?;
                crate::model::nth_mut(&mut s.channels, channel)?.pe_port = Some(index);
            }
        }
        Ok(())
    }

    // ── Static connections ──

    /// Owning PE and PE port at the far end of `conn`.
    fn far_end(&self, conn: &PhysicalConnection) -> Result<StaticConnection> {
        let to = self.operator(conn.to)?;
        let port = match conn.splitter {
            Some((splitter, channel)) => to.splitter_pe_port(conn.to_port, splitter, channel)?,
            None => to.pe_port(conn.to_port, conn.kind)?,
        };
        Ok(StaticConnection {
            pe: to.owning_pe()?,
            port,
        })
    }

    fn static_connections(&self, conns: &[PhysicalConnection]) -> Result<Vec<StaticConnection>> {
        let mut out = Vec::new();
        for conn in conns {
            if self.is_inter_pe(conn)? {
                out.push(self.far_end(conn)?);
            }
        }
        Ok(out)
    }

    pub fn build_static_connections(&mut self) -> Result<()> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for (&pe_idx, pe) in &self.pes {
            for (i, port) in pe.inputs.iter().enumerate() {
                let op_port = nth(&self.operator(port.oper)?.inputs, port.oper_port)?;
                inputs.push((pe_idx, i, self.static_connections(&op_port.connections)?));
            }
            for (i, port) in pe.outputs.iter().enumerate() {
                let op_port = nth(&self.operator(port.oper)?.outputs, port.oper_port)?;
                let conns = match port.splitter {
                    Some((splitter, channel)) => {
                        let s = nth(&op_port.splitters, splitter)
                            .map_err(|_| TransformError::internal("invalid splitter index"))?;
                        &nth(&s.channels, channel)
                            .map_err(|_| TransformError::internal("Invalid channel index"))?
                            .connections
                    }
                    None => &op_port.connections,
                };
                outputs.push((pe_idx, i, self.static_connections(conns)?));
            }
        }
        for (pe, i, conns) in inputs {
            self.pe_mut(pe)?.inputs[i].static_connections = conns;
        }
        for (pe, i, conns) in outputs {
            self.pe_mut(pe)?.outputs[i].static_connections = conns;
        }
        Ok(())
    }
}

fn output_pe_port(
    index: u64,
    oper: PhysIdx,
    port: &PhysicalOutputPort,
    splitter: Option<(u64, u64)>,
) -> PeOutputPort {
    PeOutputPort {
        index,
        tuple_type_index: port.tuple_type_index,
        transport: port.transport.clone(),
        encoding: port.encoding.clone(),
        single_threaded_on_output: port.single_threaded_on_output,
        oper,
        oper_port: port.index,
        splitter,
        exported_streams: if splitter.is_some() {
            Vec::new()
        } else {
            port.exported_streams.clone()
        },
        static_connections: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adl;
    use crate::connect::SplitterMap;
    use crate::hostpool::Hostpools;
    use crate::id::OperIdx;
    use crate::physical::PhysicalPe;
    use std::collections::BTreeMap;

    fn input(index: u64, conns: Vec<PhysicalConnection>) -> PhysicalInputPort {
        PhysicalInputPort {
            index,
            name: format!("in{}", index),
            is_mutable: false,
            tuple_type_index: 0,
            transport: "TCP".into(),
            encoding: "LE".into(),
            threaded_port: None,
            has_injected_thread: false,
            is_control: false,
            model_connections: Vec::new(),
            connections: conns,
            imported_streams: Vec::new(),
            pe_port: None,
        }
    }

    fn oper(idx: u64, pe: u64, replica: bool, inputs: Vec<PhysicalInputPort>) -> PhysicalOperator {
        PhysicalOperator {
            index: PhysIdx(idx),
            name: format!("op{}", idx),
            model: OperIdx(idx),
            logical_index: idx,
            is_replica: replica,
            original_pe: PeIdx(pe),
            placement: format!("pe_{}", pe),
            owning_pe: Some(PeIdx(pe)),
            colocation_constraint: false,
            region: None,
            single_threaded_on_inputs: true,
            single_threaded_on_outputs: true,
            resources: adl::Resources::default(),
            record: adl::OperInstance::default(),
            inputs,
            outputs: Vec::new(),
        }
    }

    fn edge(from: u64, to: u64) -> PhysicalConnection {
        PhysicalConnection {
            from: PhysIdx(from),
            from_port: 0,
            to: PhysIdx(to),
            to_port: 0,
            kind: PortKind::Output,
            splitter: None,
        }
    }

    fn model(ops: Vec<PhysicalOperator>) -> PhysicalModel {
        let pes = (0..3)
            .map(|i| {
                let pe = adl::Pe {
                    index: i,
                    ..Default::default()
                };
                (PeIdx(i), PhysicalPe::from_record(&pe))
            })
            .collect();
        PhysicalModel {
            operators: ops.into_iter().map(|o| (o.index, o)).collect::<BTreeMap<_, _>>(),
            pes,
            hostpools: Hostpools::default(),
            splitter_map: SplitterMap::default(),
        }
    }

    #[test]
    fn two_replica_sources_make_a_merge_point_multi_threaded() {
        // op0 and op1 are colocated replica sources; op2 consumes both.
        let sink = oper(2, 0, false, vec![input(0, vec![edge(2, 0), edge(2, 1)])]);
        let mut m = model(vec![oper(0, 0, true, vec![]), oper(1, 0, true, vec![]), sink]);
        let mut seen = BTreeSet::from([PhysIdx(2)]);
        let port = m.operator(PhysIdx(2)).unwrap().inputs[0].clone();
        assert_eq!(m.port_upstream_threads(&port, &mut seen).unwrap(), 2);
        m.fix_single_threaded().unwrap();
        assert!(!m.operator(PhysIdx(2)).unwrap().single_threaded_on_inputs);
    }

    #[test]
    fn inter_pe_edge_counts_only_for_replica_consumers() {
        let original = oper(2, 0, false, vec![input(0, vec![edge(2, 0)])]);
        let replica = oper(3, 0, true, vec![input(0, vec![edge(3, 0)])]);
        let m = model(vec![oper(0, 1, false, vec![]), original, replica]);
        for (idx, expected) in [(2, 0), (3, 1)] {
            let port = m.operator(PhysIdx(idx)).unwrap().inputs[0].clone();
            let mut seen = BTreeSet::from([PhysIdx(idx)]);
            assert_eq!(m.port_upstream_threads(&port, &mut seen).unwrap(), expected);
        }
    }

    #[test]
    fn threaded_port_hides_upstream_threads() {
        let mut port = input(0, vec![edge(2, 0), edge(2, 1)]);
        port.threaded_port = Some(ThreadedPort::default());
        let sink = oper(2, 0, false, vec![port]);
        let mut m = model(vec![oper(0, 0, true, vec![]), oper(1, 0, true, vec![]), sink]);
        m.fix_single_threaded().unwrap();
        assert!(m.operator(PhysIdx(2)).unwrap().single_threaded_on_inputs);
    }

    #[test]
    fn intra_pe_original_sources_stay_single_threaded() {
        let sink = oper(2, 0, false, vec![input(0, vec![edge(2, 0), edge(2, 1)])]);
        let mut m = model(vec![oper(0, 0, false, vec![]), oper(1, 0, false, vec![]), sink]);
        m.fix_single_threaded().unwrap();
        assert!(m.operator(PhysIdx(2)).unwrap().single_threaded_on_inputs);
    }

    #[test]
    fn colocated_splitter_gets_an_injected_thread() {
        let mut conn = edge(1, 0);
        conn.splitter = Some((0, 1));
        let mut m = model(vec![oper(0, 0, false, vec![]), oper(1, 0, true, vec![input(0, vec![conn])])]);
        m.inject_threaded_ports().unwrap();
        let port = &m.operator(PhysIdx(1)).unwrap().inputs[0];
        assert!(port.has_injected_thread);
        assert_eq!(port.threaded_port, Some(ThreadedPort::default()));
    }
}
