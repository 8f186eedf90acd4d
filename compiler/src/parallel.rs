// parallel.rs - Parallel regions and the replicator
//
// Every operator registered as a parallel-region root of width W gets a
// splitter in front of each input connection and a merger behind each
// output connection, then W-1 copies of its subtree. A copy is made in two
// phases: the whole subtree is cloned while an old→new index map is built,
// and only then are the clones' connections rewritten through that map.
// Finally each copy asks the boundary splitters/mergers to route its
// channel to it.
//
// Preconditions: the logical model is loaded; region widths are validated.
// Postconditions: W operators per region root, channels 0..W, every edge
//                 reciprocated.
// Failure modes: nested regions meeting at a splitter/merger, Import/Export
//                region roots and dangling edges → `Internal`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use crate::adl;
use crate::diag::{Result, TransformError};
use crate::id::OperIdx;
use crate::model::{
    remap_connections, unexpected, CompositeBody, LogicalModel, MergerBody, ModelConnection,
    ModelOperator, OperatorBody, PortKind, ReplicaMap, SplitterBody,
};
use crate::consistent::CcInfo;

// ── Region records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelRegion {
    pub index: u64,
    pub oper: OperIdx,
    pub width: u64,
    /// Splitter kind and attributes per root input port.
    pub splitters: BTreeMap<u64, adl::SplitterSpec>,
    pub replicate_tags: BTreeSet<String>,
}

impl ParallelRegion {
    pub fn from_record(record: &adl::ParallelRegion) -> Result<Self> {
        let width = record
            .width
            .submission_time_width
            .or(record.width.constant_width)
            .ok_or_else(|| TransformError::internal("failed to get parallel region width"))?;
        if width < 1 {
            return Err(TransformError::invalid_parallel_width(record.index, width));
        }
        Ok(ParallelRegion {
            index: record.index,
            oper: OperIdx(record.oper_index),
            width: width as u64,
            splitters: record
                .splitters
                .iter()
                .map(|s| (s.iport_index, s.clone()))
                .collect(),
            replicate_tags: record.replicate_host_tags.iter().cloned().collect(),
        })
    }

    pub fn splitter(&self, iport: u64) -> Result<&adl::SplitterSpec> {
        self.splitters.get(&iport).ok_or_else(|| {
            TransformError::internal("could not find parallel region splitter")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelRegions {
    by_index: BTreeMap<u64, ParallelRegion>,
    by_oper: BTreeMap<OperIdx, u64>,
}

impl ParallelRegions {
    pub fn load(records: &[adl::ParallelRegion]) -> Result<Self> {
        let mut regions = ParallelRegions::default();
        for record in records {
            let region = ParallelRegion::from_record(record)?;
            regions.by_oper.insert(region.oper, region.index);
            regions.by_index.insert(region.index, region);
        }
        Ok(regions)
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn region(&self, index: u64) -> Result<&ParallelRegion> {
        self.by_index.get(&index).ok_or_else(|| {
            TransformError::internal(format!("could not find parallel region {}", index))
        })
    }

    /// Region rooted at `oper`, if any.
    pub fn for_operator(&self, oper: OperIdx) -> Option<u64> {
        self.by_oper.get(&oper).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParallelRegion> {
        self.by_index.values()
    }
}

// ── Replication ─────────────────────────────────────────────────────────────

impl LogicalModel {
    /// Expand every parallel region, innermost first.
    pub fn perform_transforms(&mut self) -> Result<()> {
        if self.regions.is_empty() {
            return Ok(());
        }
        self.parallel_transform(self.main)
    }

    fn parallel_transform(&mut self, comp: OperIdx) -> Result<()> {
        let composites = self.composite(comp)?.composites.clone();
        for child in composites {
            self.parallel_transform(child)?;
            if let Some(region) = self.regions.for_operator(child) {
                let width = self.enter_region(child, region)?;
                for channel in 1..width {
                    let replica = self.replicate_composite(child, channel, comp)?;
                    self.composite_mut(comp)?.composites.push(replica);
                    self.add_reverse_connections(replica, channel)?;
                }
            }
        }

        let primitives = self.composite(comp)?.primitives.clone();
        for child in primitives {
            if let Some(region) = self.regions.for_operator(child) {
                let width = self.enter_region(child, region)?;
                for channel in 1..width {
                    let replica = self.replicate_primitive(child, channel, comp)?;
                    self.composite_mut(comp)?.primitives.push(replica);
                    self.add_reverse_connections(replica, channel)?;
                }
            }
        }
        Ok(())
    }

    /// Mark `root` as channel 0 of `region` and splice in its boundary
    /// operators. Returns the region width.
    fn enter_region(&mut self, root: OperIdx, region: u64) -> Result<u64> {
        let width = self.regions.region(region)?.width;
        let op = self.operator_mut(root)?;
        op.parallel_region = Some(region);
        op.channel = 0;
        self.create_splitters_and_mergers(root)?;
        Ok(width)
    }

    // ── Splitters and mergers ──

    fn create_splitters_and_mergers(&mut self, root: OperIdx) -> Result<()> {
        let op = self.operator(root)?;
        let region = op.parallel_region.ok_or_else(|| TransformError::internal("parallel region NULL"))?;
        let owner = op.owner.ok_or_else(|| TransformError::internal("owning composite NULL"))?;
        // (port, upstream/downstream edges) per side.
        let (is_composite, inputs, outputs): (bool, Vec<(u64, Vec<ModelConnection>)>, Vec<(u64, Vec<ModelConnection>)>) =
            match &op.body {
                OperatorBody::Composite(c) => (
                    true,
                    c.inputs.iter().map(|p| (p.index, p.incoming.clone())).collect(),
                    c.outputs.iter().map(|p| (p.index, p.outgoing.clone())).collect(),
                ),
                OperatorBody::Primitive(p) => (
                    false,
                    p.inputs.iter().map(|p| (p.index, p.connections.clone())).collect(),
                    p.outputs.iter().map(|p| (p.index, p.connections.clone())).collect(),
                ),
                _ => return Err(unexpected()),
            };

        for (port, conns) in inputs {
            for (k, conn) in conns.into_iter().enumerate() {
                let splitter = self.create_splitter(root, port, conn, owner, region, is_composite)?;
                *self.edge_mut(root, port, PortKind::Input, k)? =
                    ModelConnection::new(splitter, 0, PortKind::Output);
            }
        }
        for (port, conns) in outputs {
            for (k, conn) in conns.into_iter().enumerate() {
                let merger = self.create_merger(root, port, conn, owner, region)?;
                *self.edge_mut(root, port, PortKind::Output, k)? =
                    ModelConnection::new(merger, 0, PortKind::Input);
            }
        }
        Ok(())
    }

    /// The k-th boundary-facing edge of a region root port: a composite's
    /// incoming/outgoing list, or a primitive's connection list.
    fn edge_mut(
        &mut self,
        root: OperIdx,
        port: u64,
        kind: PortKind,
        k: usize,
    ) -> Result<&mut ModelConnection> {
        let list = match (&mut self.operator_mut(root)?.body, kind) {
            (OperatorBody::Composite(c), PortKind::Input) => {
                &mut crate::model::nth_mut(&mut c.inputs, port)?.incoming
            }
            (OperatorBody::Composite(c), PortKind::Output) => {
                &mut crate::model::nth_mut(&mut c.outputs, port)?.outgoing
            }
            (OperatorBody::Primitive(p), PortKind::Input) => {
                &mut crate::model::nth_mut(&mut p.inputs, port)?.connections
            }
            (OperatorBody::Primitive(p), PortKind::Output) => {
                &mut crate::model::nth_mut(&mut p.outputs, port)?.connections
            }
            _ => return Err(unexpected()),
        };
        list.get_mut(k).ok_or_else(unexpected)
    }

    fn create_splitter(
        &mut self,
        root: OperIdx,
        port: u64,
        upstream: ModelConnection,
        owner: OperIdx,
        region: u64,
        composite_root: bool,
    ) -> Result<OperIdx> {
        let width = self.regions.region(region)?.width as usize;
        let index = self.ids.alloc_oper();
        let mut outputs = vec![Vec::new(); width];
        outputs[0].push(ModelConnection::new(root, port, PortKind::Input));
        self.insert(boundary_operator(
            index,
            "splitter",
            owner,
            OperatorBody::Splitter(SplitterBody {
                cc: CcInfo::default(),
                injecting_iport: port,
                region,
                input: vec![upstream],
                outputs,
            }),
        ));
        self.composite_mut(owner)?.primitives.push(index);
        // The upstream edge now ends at the splitter input. A primitive root
        // keeps its own port index on that edge.
        let splitter_port = if composite_root { 0 } else { port };
        self.fix_reverse_connection(
            upstream,
            (root, port),
            ModelConnection::new(index, splitter_port, PortKind::Input),
        )?;
        tracing::trace!(splitter = %index, root = %root, port, width, "created splitter");
        Ok(index)
    }

    fn create_merger(
        &mut self,
        root: OperIdx,
        port: u64,
        downstream: ModelConnection,
        owner: OperIdx,
        region: u64,
    ) -> Result<OperIdx> {
        let width = self.regions.region(region)?.width as usize;
        let index = self.ids.alloc_oper();
        let mut inputs = vec![Vec::new(); width];
        inputs[0].push(ModelConnection::new(root, port, PortKind::Output));
        self.insert(boundary_operator(
            index,
            "merger",
            owner,
            OperatorBody::Merger(MergerBody {
                cc: CcInfo::default(),
                region,
                inputs,
                output: vec![downstream],
            }),
        ));
        self.composite_mut(owner)?.primitives.push(index);
        self.fix_reverse_connection(
            downstream,
            (root, port),
            ModelConnection::new(index, 0, PortKind::Output),
        )?;
        tracing::trace!(merger = %index, root = %root, port, width, "created merger");
        Ok(index)
    }

    /// Route `channel` of every boundary splitter/merger to `replica`.
    fn add_reverse_connections(&mut self, replica: OperIdx, channel: u64) -> Result<()> {
        let op = self.operator_mut(replica)?;
        let mut requests = Vec::new();
        match &mut op.body {
            OperatorBody::Primitive(p) => {
                for port in &mut p.inputs {
                    for conn in &mut port.connections {
                        conn.port = channel;
                        requests.push((*conn, ModelConnection::new(replica, port.index, PortKind::Input)));
                    }
                }
                for port in &mut p.outputs {
                    for conn in &mut port.connections {
                        conn.port = channel;
                        requests.push((*conn, ModelConnection::new(replica, port.index, PortKind::Output)));
                    }
                }
            }
            OperatorBody::Composite(c) => {
                for port in &mut c.inputs {
                    for conn in &mut port.incoming {
                        conn.port = channel;
                        requests.push((*conn, ModelConnection::new(replica, port.index, PortKind::Input)));
                    }
                }
                for port in &mut c.outputs {
                    for conn in &mut port.outgoing {
                        conn.port = channel;
                        requests.push((*conn, ModelConnection::new(replica, port.index, PortKind::Output)));
                    }
                }
            }
            OperatorBody::Import(i) => {
                for port in &i.outputs {
                    for conn in &port.connections {
                        requests.push((*conn, ModelConnection::new(replica, port.index, PortKind::Output)));
                    }
                }
            }
            _ => return Err(unexpected()),
        }
        for (target, conn) in requests {
            self.add_connection(target, conn)?;
        }
        Ok(())
    }

    // ── Subtree copies ──

    /// Copy a primitive-like operator for `channel` under `owner`. Replicated
    /// start operators seed a per-channel consistent region.
    pub(crate) fn replicate_primitive(
        &mut self,
        src: OperIdx,
        channel: u64,
        owner: OperIdx,
    ) -> Result<OperIdx> {
        let original = self.operator(src)?.clone();
        let index = self.ids.alloc_oper();
        let body = match original.body {
            OperatorBody::Primitive(mut p) => {
                p.physical_index = self.ids.alloc_phys();
                p.core.cc = p.core.cc.replica();
                OperatorBody::Primitive(p)
            }
            OperatorBody::Import(mut i) => {
                i.core.cc = i.core.cc.replica();
                OperatorBody::Import(i)
            }
            OperatorBody::Export(mut e) => {
                e.core.cc = e.core.cc.replica();
                OperatorBody::Export(e)
            }
            // Nested parallelism through a region boundary.
            _ => return Err(unexpected()),
        };
        let replica = ModelOperator {
            index,
            name: original.name,
            description: original.description,
            channel,
            is_replica: true,
            owner: Some(owner),
            parallel_region: original.parallel_region,
            body,
        };
        let start = replica.cc().filter(|cc| cc.is_start).map(|cc| cc.index);
        self.insert(replica);
        if let Some(cc_index) = start {
            let region = self.cc.find_or_create_region(cc_index, channel)?;
            self.add_region_entry(region, index)?;
            self.cc.start_operators.push(index);
        }
        tracing::trace!(original = %src, replica = %index, channel, "replicated operator");
        Ok(index)
    }

    /// Copy composite `src` and its whole subtree for `channel` under `owner`.
    pub(crate) fn replicate_composite(
        &mut self,
        src: OperIdx,
        channel: u64,
        owner: OperIdx,
    ) -> Result<OperIdx> {
        let original = self.operator(src)?.clone();
        let body = original.as_composite()?.clone();
        let index = self.ids.alloc_oper();
        self.insert(ModelOperator {
            index,
            name: original.name.clone(),
            description: original.description.clone(),
            channel,
            is_replica: true,
            owner: Some(owner),
            parallel_region: original.parallel_region,
            body: OperatorBody::Composite(CompositeBody {
                composite_oper_index: body.composite_oper_index,
                annotations: body.annotations.clone(),
                inputs: body.inputs.clone(),
                outputs: body.outputs.clone(),
                composites: Vec::new(),
                primitives: Vec::new(),
            }),
        });

        // Phase 1: clone every child, recording old → new.
        let mut map = ReplicaMap::new();
        map.insert(src, index);
        let mut composites = Vec::with_capacity(body.composites.len());
        for &child in &body.composites {
            let copy = self.replicate_composite(child, channel, index)?;
            map.insert(child, copy);
            composites.push(copy);
        }
        let mut primitives = Vec::with_capacity(body.primitives.len());
        for &child in &body.primitives {
            let copy = self.replicate_primitive(child, channel, index)?;
            map.insert(child, copy);
            primitives.push(copy);
        }

        // Phase 2: rewrite edges that stay inside the copy.
        {
            let comp = self.composite_mut(index)?;
            comp.composites = composites.clone();
            comp.primitives = primitives.clone();
            for port in &mut comp.inputs {
                remap_connections(&mut port.outgoing, &map)?;
            }
            for port in &mut comp.outputs {
                remap_connections(&mut port.incoming, &map)?;
            }
        }
        for &child in &composites {
            let comp = self.composite_mut(child)?;
            for port in &mut comp.inputs {
                remap_connections(&mut port.incoming, &map)?;
            }
            for port in &mut comp.outputs {
                remap_connections(&mut port.outgoing, &map)?;
            }
        }
        for &child in &primitives {
            match &mut self.operator_mut(child)?.body {
                OperatorBody::Primitive(p) => {
                    for port in &mut p.inputs {
                        remap_connections(&mut port.connections, &map)?;
                    }
                    for port in &mut p.outputs {
                        remap_connections(&mut port.connections, &map)?;
                    }
                }
                OperatorBody::Import(i) => {
                    for port in &mut i.outputs {
                        remap_connections(&mut port.connections, &map)?;
                    }
                }
                OperatorBody::Export(e) => {
                    for port in &mut e.inputs {
                        remap_connections(&mut port.connections, &map)?;
                    }
                }
                _ => return Err(unexpected()),
            }
        }
        tracing::trace!(original = %src, replica = %index, channel, "replicated composite");
        Ok(index)
    }
}

fn boundary_operator(index: OperIdx, name: &str, owner: OperIdx, body: OperatorBody) -> ModelOperator {
    ModelOperator {
        index,
        name: name.to_string(),
        description: String::new(),
        channel: 0,
        is_replica: false,
        owner: Some(owner),
        parallel_region: None,
        body,
    }
}
