// emit.rs - Physical application emission
//
// Walks the placed physical model (PEs in index order, operators in
// assignment order) and produces the `padl` records. The only rewriting done
// here is scoping of `view` annotation names and re-injection of the merged
// consistent-region entry for each operator.
//
// Preconditions: placement has run; every inter-PE edge has PE ports.
// Postconditions: the output mirrors the input header and pass-through fields.
// Failure modes: an operator in more than one CC region, a PE output port with
//                several exported streams, a missing PE port → `Internal`;
//                an unparsable subscription or filter → `Expression`.
// Side effects: none.

use crate::adl::{self, Annotation, AnnotationValue};
use crate::connect::PhysicalConnection;
use crate::consistent::{CcInfo, ENTRY_TAG};
use crate::diag::{Result, TransformError};
use crate::expr;
use crate::model::{unexpected, LogicalModel, ModelOperator};
use crate::padl;
use crate::physical::{
    PeInputPort, PeOutputPort, PhysicalChannel, PhysicalInputPort, PhysicalModel,
    PhysicalOperator, PhysicalOutputPort, PhysicalPe, PhysicalSplitter,
};

pub const VIEW_TAG: &str = "view";

/// Produce the physical application description.
pub fn emit(
    app: &adl::Application,
    logical: &LogicalModel,
    physical: &PhysicalModel,
) -> Result<padl::PhysicalApplication> {
    let toolkits: Option<Vec<adl::ToolkitMapEntry>> = serde_json::from_value(app.toolkits.clone()).ok();
    let pes = physical
        .pes
        .values()
        .map(|pe| Emitter { logical, physical }.pe(pe, toolkits.as_deref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(padl::PhysicalApplication {
        name: app.name.clone(),
        application_scope: app.application_scope.clone(),
        version: app.version.clone(),
        data_directory: app.data_directory.clone(),
        application_directory: app.application_directory.clone(),
        output_directory: app.output_directory.clone(),
        checkpoint_directory: app.checkpoint_directory.clone(),
        adl_path: app.adl_path.clone(),
        build_id: app.build_id.clone(),
        bundle: app.bundle.clone(),
        log_level: app.log_level.clone(),
        libraries: app.libraries.clone(),
        hostpools: physical.hostpools.to_padl()?,
        tuple_types: app.tuple_types.clone(),
        pes,
        oper_definitions: app.oper_definitions.clone(),
        composites: app.composites.clone(),
        toolkits: app.toolkits.clone(),
        custom_metrics: app.custom_metrics.clone(),
        parallel_regions: app.parallel_regions.clone(),
        submission_time_values: app.submission_time_values.clone(),
        submission_time_configuration: app.submission_time_configuration.clone(),
    })
}

struct Emitter<'a> {
    logical: &'a LogicalModel,
    physical: &'a PhysicalModel,
}

impl Emitter<'_> {
    // ── PEs ──

    fn pe(&self, pe: &PhysicalPe, toolkits: Option<&[adl::ToolkitMapEntry]>) -> Result<padl::Pe> {
        let record = &pe.record;
        let mut oper_instances = Vec::with_capacity(pe.operators.len());
        for &idx in &pe.operators {
            oper_instances.push(self.operator(self.physical.operator(idx)?)?);
        }
        let input_ports = pe
            .inputs
            .iter()
            .map(|p| self.pe_input_port(p))
            .collect::<Result<Vec<_>>>()?;
        let output_ports = pe
            .outputs
            .iter()
            .map(|p| self.pe_output_port(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(padl::Pe {
            index: pe.index.0,
            logical_index: pe.logical_index,
            class: record.class.clone(),
            language: record.language.clone(),
            optimized: record.optimized,
            restartable: record.restartable,
            relocatable: record.relocatable,
            log_level: record.log_level.clone(),
            version: record.version.clone(),
            executable: record.executable.clone(),
            env_vars: record.env_vars.clone(),
            capability: record.capability.clone(),
            display: record.display.clone(),
            tracing: record.tracing.clone(),
            oper_instances,
            input_ports,
            output_ports,
            toolkits_map: match toolkits {
                Some(list) => list.to_vec(),
                None => record.toolkits_map.clone(),
            },
        })
    }

    fn pe_input_port(&self, port: &PeInputPort) -> Result<padl::PeInputPort> {
        let imported_streams = if port.imported_streams.is_empty() {
            None
        } else {
            let mut out = padl::ImportedStreams::default();
            let mut index = 0;
            for stream in &port.imported_streams {
                stream.populate(&mut out, &mut index)?;
            }
            Some(out)
        };
        Ok(padl::PeInputPort {
            index: port.index,
            tuple_type_index: port.tuple_type_index,
            encoding: port.encoding.clone(),
            transport: port.transport.clone(),
            imported_streams,
            static_connections: port
                .static_connections
                .iter()
                .map(|sc| padl::InputStaticConnection {
                    pe_index: sc.pe.0,
                    oport_index: sc.port,
                })
                .collect(),
            oper_instance_connection: adl::OperInstanceInputConnection {
                oper_instance_index: port.oper.0,
                iport_index: port.oper_port,
            },
        })
    }

    fn pe_output_port(&self, port: &PeOutputPort) -> Result<padl::PeOutputPort> {
        let exported_stream = match port.exported_streams.as_slice() {
            [] => None,
            [stream] => Some(stream.to_padl()),
            _ => {
                return Err(TransformError::internal(
                    "Too many exported streams on one PE output port",
                ))
            }
        };
        Ok(padl::PeOutputPort {
            index: port.index,
            tuple_type_index: port.tuple_type_index,
            encoding: port.encoding.clone(),
            transport: port.transport.clone(),
            single_threaded_on_output: port.single_threaded_on_output,
            exported_stream,
            static_connections: port
                .static_connections
                .iter()
                .map(|sc| padl::OutputStaticConnection {
                    pe_index: sc.pe.0,
                    iport_index: sc.port,
                })
                .collect(),
            oper_instance_connection: padl::PeOutputOperConnection {
                oper_instance_index: port.oper.0,
                oport_index: port.oper_port,
                splitter_index: port.splitter.map(|(s, _)| s),
                channel_index: port.splitter.map(|(_, c)| c),
            },
        })
    }

    // ── Operators ──

    fn operator(&self, op: &PhysicalOperator) -> Result<padl::OperInstance> {
        let mop = self.logical.operator(op.model)?;
        let prim = mop.as_primitive()?;

        let mut annotations = Vec::with_capacity(prim.core.annotations.len() + 1);
        for annot in &prim.core.annotations {
            if annot.tag == VIEW_TAG {
                annotations.push(self.view_annotation(mop, annot)?);
            } else {
                annotations.push(annot.clone());
            }
        }
        if let Some(entry) = self.cc_annotation(&prim.core.cc)? {
            annotations.push(entry);
        }

        let (max_channels, channel) = self.logical.channel_scope(op.model)?;
        let record = &op.record;
        Ok(padl::OperInstance {
            index: op.index.0,
            name: op.name.clone(),
            logical_index: op.logical_index,
            logical_name: self.logical.fully_qualified_logical_name(op.model)?,
            class: record.class.clone(),
            definition_index: record.definition_index,
            toolkit_index: prim.core.toolkit_index,
            single_threaded_on_inputs: op.single_threaded_on_inputs,
            single_threaded_on_outputs: op.single_threaded_on_outputs,
            restartable: record.restartable,
            relocatable: record.relocatable,
            annotations,
            resources: resources(&op.resources, max_channels, channel),
            profiling: record.profiling.clone(),
            checkpointing: record.checkpointing.clone(),
            runtime_constants: record.runtime_constants.clone(),
            input_ports: op
                .inputs
                .iter()
                .map(|p| self.input_port(p))
                .collect::<Result<Vec<_>>>()?,
            output_ports: op
                .outputs
                .iter()
                .map(|p| self.output_port(op, p))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Scope the `name` value by the owning composite, recording the
    /// channel-independent name as `logicalName` ahead of it.
    fn view_annotation(&self, op: &ModelOperator, annot: &Annotation) -> Result<Annotation> {
        let owner = op.owner.ok_or_else(unexpected)?;
        let mut values = Vec::with_capacity(annot.values.len() + 1);
        for kv in &annot.values {
            if kv.key != "name" {
                values.push(kv.clone());
                continue;
            }
            let logical_name = scoped(&self.logical.owning_composite_name(owner, true)?, &kv.value);
            values.push(AnnotationValue {
                key: "logicalName".into(),
                value_type: kv.value_type.clone(),
                value: logical_name,
            });
            let mut name = scoped(&self.logical.owning_composite_name(owner, false)?, &kv.value);
            if op.is_region_root() {
                name.push_str(&format!("[{}]", self.logical.containing_channel(op.index)?));
            }
            values.push(AnnotationValue {
                key: kv.key.clone(),
                value_type: kv.value_type.clone(),
                value: name,
            });
        }
        Ok(Annotation {
            tag: annot.tag.clone(),
            values,
        })
    }

    fn cc_annotation(&self, info: &CcInfo) -> Result<Option<Annotation>> {
        let id = match info.regions.as_slice() {
            [] => return Ok(None),
            [id] => *id,
            _ => return Err(TransformError::internal("operator is in too many CC regions")),
        };
        let cc = &self.logical.cc;
        let region = cc.region(cc.merged_region(id)?)?;
        let value = |key: &str, value_type: &str, value: String| AnnotationValue {
            key: key.into(),
            value_type: value_type.into(),
            value,
        };
        let mut values = vec![
            value("index", "int32", region.index.to_string()),
            value("logicalIndex", "int32", region.logical_index.to_string()),
            value("drainTimeout", "float64", region.drain_timeout.to_string()),
            value("resetTimeout", "float64", region.reset_timeout.to_string()),
        ];
        if info.is_start {
            values.push(value("isStartOfRegion", "boolean", "true".into()));
        }
        if info.is_end {
            values.push(value("isEndOfRegion", "boolean", "true".into()));
        }
        values.extend(info.key_values.iter().cloned());
        Ok(Some(Annotation {
            tag: ENTRY_TAG.into(),
            values,
        }))
    }

    // ── Ports ──

    fn input_port(&self, port: &PhysicalInputPort) -> Result<padl::OperInputPort> {
        let mut inter = Vec::new();
        let mut intra = Vec::new();
        for conn in &port.connections {
            let mut rec = padl::InputPortConnection {
                oper_instance_index: conn.to.0,
                oport_index: conn.to_port,
                splitter_index: conn.splitter.map(|(s, _)| s),
                channel_index: conn.splitter.map(|(_, c)| c),
                pe_port_index: None,
            };
            if self.physical.is_inter_pe(conn)? {
                rec.pe_port_index = Some(port.pe_port.ok_or_else(unexpected)?);
                inter.push(rec);
            } else {
                intra.push(rec);
            }
        }
        Ok(padl::OperInputPort {
            index: port.index,
            name: port.name.clone(),
            is_mutable: port.is_mutable,
            tuple_type_index: port.tuple_type_index,
            inter_pe_connections: inter,
            intra_pe_connections: intra,
            threaded_port: port.threaded_port.clone(),
            is_control: port.is_control,
        })
    }

    fn output_connections(
        &self,
        conns: &[PhysicalConnection],
        pe_port: Option<u64>,
    ) -> Result<(Vec<padl::OutputPortConnection>, Vec<padl::OutputPortConnection>)> {
        let mut inter = Vec::new();
        let mut intra = Vec::new();
        for conn in conns {
            let mut rec = padl::OutputPortConnection {
                oper_instance_index: conn.to.0,
                iport_index: conn.to_port,
                pe_port_index: None,
            };
            if self.physical.is_inter_pe(conn)? {
                rec.pe_port_index = Some(pe_port.ok_or_else(unexpected)?);
                inter.push(rec);
            } else {
                intra.push(rec);
            }
        }
        Ok((inter, intra))
    }

    fn output_port(
        &self,
        op: &PhysicalOperator,
        port: &PhysicalOutputPort,
    ) -> Result<padl::OperOutputPort> {
        let (inter, intra) = self.output_connections(&port.connections, port.pe_port)?;
        let splitters = port
            .splitters
            .iter()
            .map(|s| self.splitter(op, s))
            .collect::<Result<Vec<_>>>()?;
        Ok(padl::OperOutputPort {
            index: port.index,
            name: port.name.clone(),
            is_mutable: port.is_mutable,
            tuple_type_index: port.tuple_type_index,
            inter_pe_connections: inter,
            intra_pe_connections: intra,
            stream_name: port.stream_name.clone(),
            logical_stream_name: port.logical_stream_name.clone(),
            viewable: port.viewable,
            single_threaded_on_output: port.single_threaded_on_output,
            splitters,
        })
    }

    fn splitter(&self, op: &PhysicalOperator, splitter: &PhysicalSplitter) -> Result<padl::Splitter> {
        let spec = self.logical.regions.region(splitter.region)?.splitter(splitter.iport)?;
        Ok(padl::Splitter {
            index: splitter.index,
            iport_index: splitter.iport,
            kind: spec.kind.clone(),
            region_index: splitter.region,
            attributes: spec.attributes.clone(),
            // A splitter owned by a parallel operator feeds a nested region.
            drop_window_puncts: op.region.is_some().then_some(true),
            parallel_channels: splitter
                .channels
                .iter()
                .map(|c| self.channel(c))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn channel(&self, channel: &PhysicalChannel) -> Result<padl::ParallelChannel> {
        let (inter, intra) = self.output_connections(&channel.connections, channel.pe_port)?;
        Ok(padl::ParallelChannel {
            index: channel.index,
            inter_pe_connections: inter,
            intra_pe_connections: intra,
        })
    }
}

fn scoped(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Placement ids may mention the channel intrinsics.
fn resources(r: &adl::Resources, max_channels: i64, channel: i64) -> adl::Resources {
    adl::Resources {
        isolation: r.isolation,
        host_location: r.host_location.as_ref().map(|h| adl::HostLocation {
            hostname: expr::substitute(&h.hostname, max_channels, channel),
        }),
        pool_location: r.pool_location,
        co_locations: r
            .co_locations
            .iter()
            .map(|id| expr::substitute(id, max_channels, channel))
            .collect(),
        ex_locations: r
            .ex_locations
            .iter()
            .map(|id| expr::substitute(id, max_channels, channel))
            .collect(),
    }
}
