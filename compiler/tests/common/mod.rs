// Shared builder for integration tests.
//
// Assembles `adl::Application` values in code: primitives are numbered
// densely from 0, Import/Export operators follow, and composites come last
// with the main composite first. Connections are recorded between node
// handles and written to both ends when the application is built, so the
// reciprocal edges always agree.

#![allow(dead_code)]

use ltp::adl::{self, Annotation, AnnotationValue, Connection, PortKindRecord};

pub const TRANSPORT: &str = "TCP";
pub const ENCODING: &str = "LE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Prim(usize),
    Pseudo(usize),
    Comp(usize),
}

struct PrimSpec {
    parent: usize,
    name: String,
    kind: String,
    pe: u64,
    inputs: u64,
    outputs: u64,
    annotations: Vec<Annotation>,
    resources: adl::Resources,
    threaded: Vec<u64>,
}

struct PseudoSpec {
    parent: usize,
    name: String,
    kind: &'static str,
}

struct CompSpec {
    parent: Option<usize>,
    name: String,
    inputs: u64,
    outputs: u64,
    annotations: Vec<Annotation>,
}

struct Edge {
    from: Node,
    from_port: u64,
    to: Node,
    to_port: u64,
}

struct RegionSpec {
    root: Node,
    width: i64,
    tags: Vec<String>,
}

pub struct AppBuilder {
    name: String,
    prims: Vec<PrimSpec>,
    pseudos: Vec<PseudoSpec>,
    comps: Vec<CompSpec>,
    edges: Vec<Edge>,
    regions: Vec<RegionSpec>,
    hostpools: Vec<adl::Hostpool>,
    pe_inputs: Vec<(usize, u64, Option<adl::ImportedStreams>)>,
    pe_outputs: Vec<(usize, u64, Option<adl::ExportedStream>)>,
}

impl AppBuilder {
    pub fn new(name: &str) -> Self {
        AppBuilder {
            name: name.to_string(),
            prims: Vec::new(),
            pseudos: Vec::new(),
            comps: vec![CompSpec {
                parent: None,
                name: "main".into(),
                inputs: 0,
                outputs: 0,
                annotations: Vec::new(),
            }],
            edges: Vec::new(),
            regions: Vec::new(),
            hostpools: Vec::new(),
            pe_inputs: Vec::new(),
            pe_outputs: Vec::new(),
        }
    }

    pub fn main(&self) -> Node {
        Node::Comp(0)
    }

    // ── Nodes ──

    pub fn composite(&mut self, parent: Node, name: &str, inputs: u64, outputs: u64) -> Node {
        self.comps.push(CompSpec {
            parent: Some(comp_slot(parent)),
            name: name.into(),
            inputs,
            outputs,
            annotations: Vec::new(),
        });
        Node::Comp(self.comps.len() - 1)
    }

    /// A primitive placed in PE `pe` of the original layout.
    pub fn primitive(&mut self, parent: Node, name: &str, pe: u64, inputs: u64, outputs: u64) -> Node {
        self.prims.push(PrimSpec {
            parent: comp_slot(parent),
            name: name.into(),
            kind: "spl.relational::Functor".into(),
            pe,
            inputs,
            outputs,
            annotations: Vec::new(),
            resources: adl::Resources::default(),
            threaded: Vec::new(),
        });
        Node::Prim(self.prims.len() - 1)
    }

    pub fn import(&mut self, parent: Node, name: &str) -> Node {
        self.pseudos.push(PseudoSpec {
            parent: comp_slot(parent),
            name: name.into(),
            kind: adl::IMPORT_KIND,
        });
        Node::Pseudo(self.pseudos.len() - 1)
    }

    pub fn export(&mut self, parent: Node, name: &str) -> Node {
        self.pseudos.push(PseudoSpec {
            parent: comp_slot(parent),
            name: name.into(),
            kind: adl::EXPORT_KIND,
        });
        Node::Pseudo(self.pseudos.len() - 1)
    }

    // ── Edges and decorations ──

    /// Stream from output `from_port` of `from` into input `to_port` of
    /// `to`. A composite end means its input port when the other end is
    /// nested inside it, its output port otherwise.
    pub fn connect(&mut self, from: Node, from_port: u64, to: Node, to_port: u64) {
        self.edges.push(Edge {
            from,
            from_port,
            to,
            to_port,
        });
    }

    pub fn annotate(&mut self, node: Node, annotation: Annotation) {
        match node {
            Node::Prim(i) => self.prims[i].annotations.push(annotation),
            Node::Comp(i) => self.comps[i].annotations.push(annotation),
            Node::Pseudo(_) => panic!("pseudo operators carry no annotations in these tests"),
        }
    }

    pub fn threaded(&mut self, prim: Node, port: u64) {
        self.prims[prim_slot(prim)].threaded.push(port);
    }

    pub fn resources(&mut self, prim: Node) -> &mut adl::Resources {
        &mut self.prims[prim_slot(prim)].resources
    }

    pub fn parallel(&mut self, root: Node, width: i64) -> u64 {
        self.parallel_with_tags(root, width, &[])
    }

    pub fn parallel_with_tags(&mut self, root: Node, width: i64, tags: &[&str]) -> u64 {
        self.regions.push(RegionSpec {
            root,
            width,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        (self.regions.len() - 1) as u64
    }

    pub fn hostpool(&mut self, name: &str, size: u64, tags: &[&str]) -> u64 {
        let index = self.hostpools.len() as u64;
        self.hostpools.push(adl::Hostpool {
            index,
            name: name.into(),
            size: Some(size),
            membership_mode: "shared".into(),
            hosts: Vec::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        index
    }

    /// Declare the imports feeding input `port` of `consumer` on its PE.
    pub fn subscribe(&mut self, consumer: Node, port: u64, streams: adl::ImportedStreams) {
        self.pe_inputs.push((prim_slot(consumer), port, Some(streams)));
    }

    /// Declare the export fed by output `port` of `producer` on its PE.
    pub fn publish(&mut self, producer: Node, port: u64, stream: adl::ExportedStream) {
        self.pe_outputs.push((prim_slot(producer), port, Some(stream)));
    }

    // ── Names and indices ──

    pub fn index(&self, node: Node) -> u64 {
        match node {
            Node::Prim(i) => i as u64,
            Node::Pseudo(i) => (self.prims.len() + i) as u64,
            Node::Comp(i) => (self.prims.len() + self.pseudos.len() + i) as u64,
        }
    }

    /// Dotted name as it appears in the application description.
    pub fn full_name(&self, node: Node) -> String {
        match node {
            Node::Prim(i) => format!("{}.{}", self.comp_path(self.prims[i].parent), self.prims[i].name),
            Node::Pseudo(i) => {
                format!("{}.{}", self.comp_path(self.pseudos[i].parent), self.pseudos[i].name)
            }
            Node::Comp(i) => self.comp_path(i),
        }
    }

    fn comp_path(&self, slot: usize) -> String {
        let c = &self.comps[slot];
        match c.parent {
            Some(p) => format!("{}.{}", self.comp_path(p), c.name),
            None => c.name.clone(),
        }
    }

    /// Composite path without the main composite, used to scope stream names.
    fn stream_scope(&self, slot: usize) -> String {
        let c = &self.comps[slot];
        match c.parent {
            None => String::new(),
            Some(p) => {
                let outer = self.stream_scope(p);
                if outer.is_empty() {
                    c.name.clone()
                } else {
                    format!("{}.{}", outer, c.name)
                }
            }
        }
    }

    /// Logical stream name of output `port` on primitive `prim`.
    pub fn stream_name(&self, prim: Node, port: u64) -> String {
        let p = &self.prims[prim_slot(prim)];
        let scope = self.stream_scope(p.parent);
        let stream = format!("{}Out{}", p.name, port);
        if scope.is_empty() {
            stream
        } else {
            format!("{}.{}", scope, stream)
        }
    }

    fn is_inside(&self, node: Node, comp: usize) -> bool {
        let mut parent = match node {
            Node::Prim(i) => Some(self.prims[i].parent),
            Node::Pseudo(i) => Some(self.pseudos[i].parent),
            Node::Comp(i) => self.comps[i].parent,
        };
        while let Some(p) = parent {
            if p == comp {
                return true;
            }
            parent = self.comps[p].parent;
        }
        false
    }

    // ── Assembly ──

    pub fn build(&self) -> adl::Application {
        let mut prims: Vec<adl::PrimitiveOperInstance> = self
            .prims
            .iter()
            .enumerate()
            .map(|(i, p)| adl::PrimitiveOperInstance {
                index: i as u64,
                name: self.full_name(Node::Prim(i)),
                kind: p.kind.clone(),
                annotations: p.annotations.clone(),
                input_ports: plain_ports(p.inputs),
                output_ports: plain_ports(p.outputs),
                ..Default::default()
            })
            .collect();
        let mut pseudos: Vec<adl::PrimitiveOperInstance> = self
            .pseudos
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let is_import = p.kind == adl::IMPORT_KIND;
                adl::PrimitiveOperInstance {
                    index: self.index(Node::Pseudo(i)),
                    name: self.full_name(Node::Pseudo(i)),
                    kind: p.kind.to_string(),
                    input_ports: plain_ports(u64::from(!is_import)),
                    output_ports: plain_ports(u64::from(is_import)),
                    ..Default::default()
                }
            })
            .collect();
        let mut comps: Vec<adl::CompositeOperInstance> = self
            .comps
            .iter()
            .enumerate()
            .map(|(i, c)| adl::CompositeOperInstance {
                index: self.index(Node::Comp(i)),
                name: self.full_name(Node::Comp(i)),
                annotations: c.annotations.clone(),
                input_ports: composite_ports(c.inputs),
                output_ports: composite_ports(c.outputs),
                ..Default::default()
            })
            .collect();

        for e in &self.edges {
            // Which side of a composite each end touches.
            let from_is_input_side = matches!(e.from, Node::Comp(c) if self.is_inside(e.to, c));
            let to_is_output_side = matches!(e.to, Node::Comp(c) if self.is_inside(e.from, c));
            let far_to = Connection {
                oper_index: self.index(e.to),
                port_index: e.to_port,
                port_kind: if to_is_output_side {
                    PortKindRecord::Output
                } else {
                    PortKindRecord::Input
                },
            };
            let far_from = Connection {
                oper_index: self.index(e.from),
                port_index: e.from_port,
                port_kind: if from_is_input_side {
                    PortKindRecord::Input
                } else {
                    PortKindRecord::Output
                },
            };
            match e.from {
                Node::Prim(i) => prims[i].output_ports[e.from_port as usize].connections.push(far_to),
                Node::Pseudo(i) => pseudos[i].output_ports[e.from_port as usize].connections.push(far_to),
                Node::Comp(i) if from_is_input_side => {
                    comps[i].input_ports[e.from_port as usize].outgoing_connections.push(far_to)
                }
                Node::Comp(i) => comps[i].output_ports[e.from_port as usize].outgoing_connections.push(far_to),
            }
            match e.to {
                Node::Prim(i) => prims[i].input_ports[e.to_port as usize].connections.push(far_from),
                Node::Pseudo(i) => pseudos[i].input_ports[e.to_port as usize].connections.push(far_from),
                Node::Comp(i) if to_is_output_side => {
                    comps[i].output_ports[e.to_port as usize].incoming_connections.push(far_from)
                }
                Node::Comp(i) => comps[i].input_ports[e.to_port as usize].incoming_connections.push(far_from),
            }
        }

        for (i, p) in prims.drain(..).enumerate() {
            comps[self.prims[i].parent].primitive_oper_instances.push(p);
        }
        for (i, p) in pseudos.drain(..).enumerate() {
            comps[self.pseudos[i].parent].primitive_oper_instances.push(p);
        }
        // Attach composites bottom-up: a parent is always declared before its children.
        for i in (1..self.comps.len()).rev() {
            let parent = self.comps[i].parent.unwrap_or(0);
            let child = comps.remove(i);
            comps[parent].composite_oper_instances.insert(0, child);
        }
        let main = comps.remove(0);

        adl::Application {
            name: self.name.clone(),
            application_scope: "Default".into(),
            version: "1.0.0".into(),
            build_id: "test".into(),
            hostpools: self.hostpools.clone(),
            pes: self.pes(),
            composites: adl::Composites {
                composite_oper_instance: main,
            },
            parallel_regions: self.parallel_regions(),
            ..Default::default()
        }
    }

    fn pes(&self) -> Vec<adl::Pe> {
        let count = self.prims.iter().map(|p| p.pe + 1).max().unwrap_or(0);
        let mut pes: Vec<adl::Pe> = (0..count)
            .map(|index| adl::Pe {
                index,
                class: format!("BeJwrMSl{}", index),
                language: "C++".into(),
                ..Default::default()
            })
            .collect();
        for (i, p) in self.prims.iter().enumerate() {
            pes[p.pe as usize].oper_instances.push(adl::OperInstance {
                index: i as u64,
                name: self.full_name(Node::Prim(i)),
                class: p.name.clone(),
                single_threaded_on_inputs: true,
                single_threaded_on_outputs: true,
                resources: p.resources.clone(),
                input_ports: (0..p.inputs)
                    .map(|k| adl::OperInputPort {
                        index: k,
                        name: format!("In{}", k),
                        threaded_port: p.threaded.contains(&k).then(adl::ThreadedPort::default),
                        ..Default::default()
                    })
                    .collect(),
                output_ports: (0..p.outputs)
                    .map(|k| adl::OperOutputPort {
                        index: k,
                        name: format!("Out{}", k),
                        stream_name: self.stream_name(Node::Prim(i), k),
                        single_threaded_on_output: true,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            });
        }
        for (slot, port, streams) in &self.pe_inputs {
            let pe = &mut pes[self.prims[*slot].pe as usize];
            pe.input_ports.push(adl::PeInputPort {
                index: pe.input_ports.len() as u64,
                transport: TRANSPORT.into(),
                encoding: ENCODING.into(),
                oper_instance_connection: adl::OperInstanceInputConnection {
                    oper_instance_index: *slot as u64,
                    iport_index: *port,
                },
                imported_streams: streams.clone(),
                ..Default::default()
            });
        }
        for (slot, port, stream) in &self.pe_outputs {
            let pe = &mut pes[self.prims[*slot].pe as usize];
            pe.output_ports.push(adl::PeOutputPort {
                index: pe.output_ports.len() as u64,
                transport: TRANSPORT.into(),
                encoding: ENCODING.into(),
                single_threaded_on_output: true,
                oper_instance_connection: adl::OperInstanceOutputConnection {
                    oper_instance_index: *slot as u64,
                    oport_index: *port,
                },
                exported_stream: stream.clone(),
                ..Default::default()
            });
        }
        pes
    }

    fn parallel_regions(&self) -> Vec<adl::ParallelRegion> {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let inputs = match r.root {
                    Node::Prim(p) => self.prims[p].inputs,
                    Node::Comp(c) => self.comps[c].inputs,
                    Node::Pseudo(_) => 0,
                };
                adl::ParallelRegion {
                    index: i as u64,
                    oper_index: self.index(r.root),
                    width: adl::ParallelWidth {
                        constant_width: Some(r.width),
                        submission_time_width: None,
                    },
                    splitters: (0..inputs)
                        .map(|k| adl::SplitterSpec {
                            iport_index: k,
                            kind: "RoundRobin".into(),
                            attributes: Vec::new(),
                        })
                        .collect(),
                    replicate_host_tags: r.tags.clone(),
                }
            })
            .collect()
    }
}

fn comp_slot(node: Node) -> usize {
    match node {
        Node::Comp(i) => i,
        other => panic!("{:?} is not a composite", other),
    }
}

fn prim_slot(node: Node) -> usize {
    match node {
        Node::Prim(i) => i,
        other => panic!("{:?} is not a primitive", other),
    }
}

fn plain_ports(n: u64) -> Vec<adl::PrimitivePort> {
    (0..n)
        .map(|index| adl::PrimitivePort {
            index,
            connections: Vec::new(),
        })
        .collect()
}

fn composite_ports(n: u64) -> Vec<adl::CompositePort> {
    (0..n)
        .map(|index| adl::CompositePort {
            index,
            ..Default::default()
        })
        .collect()
}

// ── Annotations ─────────────────────────────────────────────────────────────

pub fn annotation(tag: &str, values: &[(&str, &str, &str)]) -> Annotation {
    Annotation {
        tag: tag.into(),
        values: values
            .iter()
            .map(|(key, ty, value)| AnnotationValue {
                key: key.to_string(),
                value_type: ty.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

/// Region declaration carried by a composite.
pub fn cc_region(index: u64, operator_driven: bool) -> Annotation {
    let index = index.to_string();
    let trigger = if operator_driven { "operatorDriven" } else { "periodic" };
    annotation(
        ltp::consistent::REGION_TAG,
        &[
            ("index", "int32", &index),
            ("trigger", "enum", trigger),
            ("drainTimeout", "float64", "180.0"),
            ("resetTimeout", "float64", "180.5"),
        ],
    )
}

/// Region entry carried by a primitive.
pub fn cc_entry(index: u64, start: bool, end: bool) -> Annotation {
    let index = index.to_string();
    let mut values = vec![("index", "int32", index.as_str())];
    if start {
        values.push(("isStartOfRegion", "boolean", "true"));
    }
    if end {
        values.push(("isEndOfRegion", "boolean", "true"));
    }
    annotation(ltp::consistent::ENTRY_TAG, &values)
}

// ── Pipeline helpers ────────────────────────────────────────────────────────

pub fn transform(app: &adl::Application) -> ltp::padl::PhysicalApplication {
    ltp::transform(app, ltp::TransformOptions::default())
        .unwrap_or_else(|e| panic!("transform failed: {}", e))
}

/// Run every pass up to and including static connections, keeping the models.
pub fn placed(app: &adl::Application) -> (ltp::model::LogicalModel, ltp::physical::PhysicalModel) {
    let mut state = ltp::pipeline::TransformState::new(app);
    ltp::pipeline::run_pipeline(
        &mut state,
        ltp::pass::PassId::StaticConnections,
        ltp::TransformOptions::default(),
        |_, _| {},
    )
    .unwrap_or_else(|e| panic!("pipeline failed: {}", e));
    let logical = state.logical.take().expect("logical model");
    let physical = state.physical.take().expect("physical model");
    (logical, physical)
}

pub fn pe_of<'a>(out: &'a ltp::padl::PhysicalApplication, oper: u64) -> &'a ltp::padl::Pe {
    out.pes
        .iter()
        .find(|pe| pe.oper_instances.iter().any(|o| o.index == oper))
        .unwrap_or_else(|| panic!("operator {} not placed", oper))
}

pub fn oper<'a>(out: &'a ltp::padl::PhysicalApplication, index: u64) -> &'a ltp::padl::OperInstance {
    pe_of(out, index)
        .oper_instances
        .iter()
        .find(|o| o.index == index)
        .unwrap_or_else(|| panic!("operator {} not found", index))
}
