// load.rs - Logical model construction from the application description
//
// Hostpools first, then the PE inventory (operators, the PE ports that wire
// them, and the imported/exported stream declarations on those ports), then
// the main composite tree, primitives before child composites at each level,
// and finally the parallel regions.
//
// Preconditions: primitive indices are dense from 0; composite indices follow.
// Postconditions: every model primitive has an inventory operator; the id
//                 allocator continues after the highest loaded indices.
// Failure modes: a primitive without an inventory operator, a port the
//                inventory does not declare, an Export with no declaration →
//                `Internal`; a bad region width → `Config`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::adl;
use crate::consistent::{CcInfo, CcRegion, CcRegions, REGION_TAG};
use crate::diag::{Result, TransformError};
use crate::hostpool::Hostpools;
use crate::id::{IdAllocator, OperIdx, PeIdx, PhysIdx};
use crate::model::{
    invalid_port, root_operator_name, CompositeBody, CompositePort, ExportBody, ImportBody,
    InputPort, Inventory, InventoryOperator, LogicalModel, ModelConnection, ModelOperator,
    OperatorBody, OutputPort, PlainPort, PortWire, PrimitiveBody, PrimitiveCore,
};
use crate::parallel::ParallelRegions;
use crate::streams::{PortSettings, StreamRegistry};

/// Highest indices seen while loading, for the id allocator.
#[derive(Default)]
struct Watermark {
    oper: Option<u64>,
    primitive: Option<u64>,
}

impl Watermark {
    fn see_oper(&mut self, index: u64) {
        self.oper = Some(self.oper.map_or(index, |m| m.max(index)));
    }

    fn see_primitive(&mut self, index: u64) {
        self.see_oper(index);
        self.primitive = Some(self.primitive.map_or(index, |m| m.max(index)));
    }
}

impl LogicalModel {
    pub fn load(app: &adl::Application) -> Result<Self> {
        let hostpools = Hostpools::load(&app.hostpools)?;
        let (inventory, streams) = load_inventory(&app.pes)?;
        let main = OperIdx(app.composites.composite_oper_instance.index);
        let mut model = LogicalModel {
            operators: BTreeMap::new(),
            main,
            ids: IdAllocator::default(),
            inventory,
            regions: ParallelRegions::default(),
            cc: CcRegions::default(),
            hostpools,
            streams,
            primitives: BTreeMap::new(),
        };

        let mut marks = Watermark::default();
        model.load_composite(&app.composites.composite_oper_instance, None, &mut marks)?;
        model.regions = ParallelRegions::load(&app.parallel_regions)?;
        model.ids = IdAllocator::new(
            marks.oper.map_or(0, |m| m + 1),
            marks.primitive.map_or(0, |m| m + 1),
        );
        tracing::debug!(
            operators = model.operators.len(),
            primitives = model.primitives.len(),
            pes = model.inventory.pes.len(),
            regions = app.parallel_regions.len(),
            "loaded logical model"
        );
        Ok(model)
    }

    fn load_composite(
        &mut self,
        rec: &adl::CompositeOperInstance,
        owner: Option<OperIdx>,
        marks: &mut Watermark,
    ) -> Result<OperIdx> {
        let index = OperIdx(rec.index);
        marks.see_oper(rec.index);

        for annot in rec.annotations.iter().filter(|a| a.tag == REGION_TAG) {
            self.cc.add_region(CcRegion::from_annotation(annot)?, 0);
        }

        self.insert(ModelOperator {
            index,
            name: root_operator_name(&rec.name).to_string(),
            description: rec.description.clone().unwrap_or_default(),
            channel: 0,
            is_replica: false,
            owner,
            parallel_region: None,
            body: OperatorBody::Composite(CompositeBody {
                composite_oper_index: rec.composite_oper_index,
                annotations: rec.annotations.clone(),
                inputs: rec.input_ports.iter().map(composite_port).collect(),
                outputs: rec.output_ports.iter().map(composite_port).collect(),
                composites: Vec::new(),
                primitives: Vec::new(),
            }),
        });

        let mut primitives = Vec::with_capacity(rec.primitive_oper_instances.len());
        for po in &rec.primitive_oper_instances {
            primitives.push(self.load_primitive(po, index, marks)?);
        }
        let mut composites = Vec::with_capacity(rec.composite_oper_instances.len());
        for co in &rec.composite_oper_instances {
            composites.push(self.load_composite(co, Some(index), marks)?);
        }

        let body = self.composite_mut(index)?;
        body.primitives = primitives;
        body.composites = composites;
        Ok(index)
    }

    fn load_primitive(
        &mut self,
        po: &adl::PrimitiveOperInstance,
        owner: OperIdx,
        marks: &mut Watermark,
    ) -> Result<OperIdx> {
        let (cc, annotations) = CcInfo::from_annotations(&po.annotations)?;
        let is_start = cc.is_start;
        let core = PrimitiveCore {
            kind: po.kind.clone(),
            toolkit_index: po.toolkit_index,
            annotations,
            cc,
        };

        let body = match po.kind.as_str() {
            adl::IMPORT_KIND => {
                marks.see_oper(po.index);
                OperatorBody::Import(ImportBody {
                    core,
                    stream: self
                        .streams
                        .find_import(&po.name)
                        .map(|_| po.name.clone()),
                    outputs: po.output_ports.iter().map(plain_port).collect(),
                })
            }
            adl::EXPORT_KIND => {
                marks.see_oper(po.index);
                self.streams.find_export(&po.name)?;
                OperatorBody::Export(ExportBody {
                    core,
                    stream: po.name.clone(),
                    inputs: po.input_ports.iter().map(plain_port).collect(),
                })
            }
            _ => {
                marks.see_primitive(po.index);
                OperatorBody::Primitive(primitive_body(po, core, self.inventory.operator(po.index)?)?)
            }
        };

        let index = OperIdx(po.index);
        self.insert(ModelOperator {
            index,
            name: root_operator_name(&po.name).to_string(),
            description: po.description.clone().unwrap_or_default(),
            channel: 0,
            is_replica: false,
            owner: Some(owner),
            parallel_region: None,
            body,
        });
        if is_start {
            self.cc.start_operators.push(index);
        }
        Ok(index)
    }
}

// ── Inventory ───────────────────────────────────────────────────────────────

fn load_inventory(pes: &[adl::Pe]) -> Result<(Inventory, StreamRegistry)> {
    let mut inventory = Inventory::default();
    let mut streams = StreamRegistry::default();
    for pe in pes {
        let pe_idx = PeIdx(pe.index);
        for op in &pe.oper_instances {
            inventory.operators.insert(
                op.index,
                InventoryOperator {
                    pe: pe_idx,
                    record: op.clone(),
                    input_wires: BTreeMap::new(),
                    output_wires: BTreeMap::new(),
                },
            );
        }
        for port in &pe.input_ports {
            let settings = PortSettings {
                transport: &port.transport,
                encoding: &port.encoding,
                tuple_type_index: port.tuple_type_index,
            };
            let conn = port.oper_instance_connection;
            inventory_operator(&mut inventory, conn.oper_instance_index)?
                .input_wires
                .insert(
                    conn.iport_index,
                    PortWire {
                        transport: port.transport.clone(),
                        encoding: port.encoding.clone(),
                        single_threaded_on_output: None,
                    },
                );
            if let Some(imported) = &port.imported_streams {
                streams.register_imports(imported, settings);
            }
        }
        for port in &pe.output_ports {
            let settings = PortSettings {
                transport: &port.transport,
                encoding: &port.encoding,
                tuple_type_index: port.tuple_type_index,
            };
            let conn = port.oper_instance_connection;
            inventory_operator(&mut inventory, conn.oper_instance_index)?
                .output_wires
                .insert(
                    conn.oport_index,
                    PortWire {
                        transport: port.transport.clone(),
                        encoding: port.encoding.clone(),
                        single_threaded_on_output: Some(port.single_threaded_on_output),
                    },
                );
            if let Some(exported) = &port.exported_stream {
                streams.register_export(exported, settings);
            }
        }
        inventory.pes.insert(pe_idx, pe.clone());
    }
    Ok((inventory, streams))
}

fn inventory_operator(inventory: &mut Inventory, index: u64) -> Result<&mut InventoryOperator> {
    inventory.operators.get_mut(&index).ok_or_else(|| {
        TransformError::internal(format!("could not find physical operator {}", index))
    })
}

// ── Ports ───────────────────────────────────────────────────────────────────

fn connections(list: &[adl::Connection]) -> Vec<ModelConnection> {
    list.iter().copied().map(ModelConnection::from).collect()
}

fn composite_port(port: &adl::CompositePort) -> CompositePort {
    CompositePort {
        index: port.index,
        incoming: connections(&port.incoming_connections),
        outgoing: connections(&port.outgoing_connections),
    }
}

fn plain_port(port: &adl::PrimitivePort) -> PlainPort {
    PlainPort {
        index: port.index,
        connections: connections(&port.connections),
    }
}

fn primitive_body(
    po: &adl::PrimitiveOperInstance,
    core: PrimitiveCore,
    inv: &InventoryOperator,
) -> Result<PrimitiveBody> {
    let mut inputs = Vec::with_capacity(po.input_ports.len());
    for port in &po.input_ports {
        let rec = inv
            .record
            .input_ports
            .iter()
            .find(|p| p.index == port.index)
            .ok_or_else(invalid_port)?;
        let wire = inv.input_wires.get(&port.index).cloned().unwrap_or_default();
        inputs.push(InputPort {
            index: port.index,
            name: rec.name.clone(),
            is_mutable: rec.is_mutable,
            tuple_type_index: rec.tuple_type_index,
            transport: wire.transport,
            encoding: wire.encoding,
            threaded_port: rec.threaded_port.clone(),
            is_control: rec.is_control,
            connections: connections(&port.connections),
        });
    }

    let mut outputs = Vec::with_capacity(po.output_ports.len());
    for port in &po.output_ports {
        let rec = inv
            .record
            .output_ports
            .iter()
            .find(|p| p.index == port.index)
            .ok_or_else(invalid_port)?;
        let wire = inv.output_wires.get(&port.index).cloned().unwrap_or_default();
        outputs.push(OutputPort {
            index: port.index,
            name: rec.name.clone(),
            is_mutable: rec.is_mutable,
            tuple_type_index: rec.tuple_type_index,
            transport: wire.transport,
            encoding: wire.encoding,
            logical_stream_name: rec.stream_name.clone(),
            viewable: rec.viewable,
            single_threaded_on_output: wire
                .single_threaded_on_output
                .unwrap_or(rec.single_threaded_on_output),
            connections: connections(&port.connections),
        });
    }

    Ok(PrimitiveBody {
        core,
        physical_index: PhysIdx(po.index),
        logical_index: po.index,
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adl::{Connection, PortKindRecord};
    use crate::consistent::ENTRY_TAG;

    fn conn(oper: u64, kind: PortKindRecord) -> Connection {
        Connection {
            oper_index: oper,
            port_index: 0,
            port_kind: kind,
        }
    }

    fn inventory_op(index: u64, inputs: u64, outputs: u64) -> adl::OperInstance {
        adl::OperInstance {
            index,
            name: format!("op{}", index),
            input_ports: (0..inputs)
                .map(|i| adl::OperInputPort {
                    index: i,
                    name: format!("in{}", i),
                    ..Default::default()
                })
                .collect(),
            output_ports: (0..outputs)
                .map(|i| adl::OperOutputPort {
                    index: i,
                    name: format!("out{}", i),
                    stream_name: format!("S{}", index),
                    single_threaded_on_output: true,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn app() -> adl::Application {
        let src = adl::PrimitiveOperInstance {
            index: 0,
            name: "main.Src".into(),
            kind: "Beacon".into(),
            output_ports: vec![adl::PrimitivePort {
                index: 0,
                connections: vec![conn(1, PortKindRecord::Input)],
            }],
            ..Default::default()
        };
        let snk = adl::PrimitiveOperInstance {
            index: 1,
            name: "main.Inner.Snk".into(),
            kind: "FileSink".into(),
            annotations: vec![adl::Annotation {
                tag: ENTRY_TAG.into(),
                values: vec![
                    adl::AnnotationValue {
                        key: "index".into(),
                        value_type: "int32".into(),
                        value: "0".into(),
                    },
                    adl::AnnotationValue {
                        key: "isStartOfRegion".into(),
                        value_type: "boolean".into(),
                        value: "true".into(),
                    },
                ],
            }],
            input_ports: vec![adl::PrimitivePort {
                index: 0,
                connections: vec![conn(0, PortKindRecord::Output)],
            }],
            ..Default::default()
        };
        let inner = adl::CompositeOperInstance {
            index: 3,
            name: "main.Inner".into(),
            annotations: vec![adl::Annotation {
                tag: REGION_TAG.into(),
                values: vec![adl::AnnotationValue {
                    key: "index".into(),
                    value_type: "int32".into(),
                    value: "0".into(),
                }],
            }],
            primitive_oper_instances: vec![snk],
            ..Default::default()
        };
        adl::Application {
            name: "app".into(),
            pes: vec![adl::Pe {
                index: 0,
                oper_instances: vec![inventory_op(0, 0, 1), inventory_op(1, 1, 0)],
                output_ports: vec![adl::PeOutputPort {
                    index: 0,
                    transport: "TCP".into(),
                    encoding: "LE".into(),
                    single_threaded_on_output: false,
                    oper_instance_connection: adl::OperInstanceOutputConnection {
                        oper_instance_index: 0,
                        oport_index: 0,
                    },
                    ..Default::default()
                }],
                ..Default::default()
            }],
            composites: adl::Composites {
                composite_oper_instance: adl::CompositeOperInstance {
                    index: 2,
                    name: "main".into(),
                    primitive_oper_instances: vec![src],
                    composite_oper_instances: vec![inner],
                    ..Default::default()
                },
            },
            ..Default::default()
        }
    }

    #[test]
    fn loads_tree_and_inventory() {
        let model = LogicalModel::load(&app()).unwrap();
        assert_eq!(model.main, OperIdx(2));
        assert_eq!(model.composite(OperIdx(2)).unwrap().primitives, vec![OperIdx(0)]);
        assert_eq!(model.composite(OperIdx(2)).unwrap().composites, vec![OperIdx(3)]);
        assert_eq!(model.fully_qualified_name(OperIdx(1)).unwrap(), "Inner.Snk");

        let src = model.operator(OperIdx(0)).unwrap().as_primitive().unwrap();
        assert_eq!(src.outputs[0].transport, "TCP");
        assert_eq!(src.outputs[0].logical_stream_name, "S0");
        // The PE port's flag overrides the inventory's.
        assert!(!src.outputs[0].single_threaded_on_output);
        assert_eq!(model.primitives.get(&PhysIdx(1)), Some(&OperIdx(1)));

        assert_eq!(model.ids.peek_oper(), OperIdx(4));
    }

    #[test]
    fn region_annotations_are_registered() {
        let model = LogicalModel::load(&app()).unwrap();
        assert!(model.cc.find_region(0, 0).is_ok());
        assert_eq!(model.cc.start_operators, vec![OperIdx(1)]);
        let snk = model.operator(OperIdx(1)).unwrap();
        assert!(snk.cc().unwrap().is_start);
        assert!(snk.as_primitive().unwrap().core.annotations.is_empty());
    }

    #[test]
    fn missing_inventory_operator_is_internal() {
        let mut app = app();
        app.pes[0].oper_instances.pop();
        let err = LogicalModel::load(&app).unwrap_err();
        assert!(err.to_string().contains("could not find physical operator 1"));
    }

    #[test]
    fn export_without_declaration_fails() {
        let mut app = app();
        app.composites
            .composite_oper_instance
            .primitive_oper_instances
            .push(adl::PrimitiveOperInstance {
                index: 4,
                name: "main.Exp".into(),
                kind: adl::EXPORT_KIND.into(),
                ..Default::default()
            });
        assert!(LogicalModel::load(&app).unwrap_err().is_internal());
    }
}
