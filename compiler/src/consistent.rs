// consistent.rs - Consistent-cut regions
//
// A composite annotated `consistentRegion` registers a region at channel 0.
// Start operators (and their per-channel replicas) seed a forward
// reachability walk; an operator reached from several regions forces those
// regions to merge. Merged regions become forwarding entries resolved with
// union-find.
//
// Preconditions: the parallel transform has run, so replica start operators
//                are registered.
// Postconditions: every non-oblivious reachable operator records its region;
//                 multi-region operators point at one merged region.
// Failure modes: missing region keys or malformed annotation values →
//                `Internal`; an operator-driven region with several start
//                operators → `Config` (TooManyStartOperators).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::adl::{Annotation, AnnotationValue};
use crate::diag::{Result, TransformError};
use crate::id::{CcRegionId, OperIdx};
use crate::model::{LogicalModel, ModelConnection, OperatorBody, PortKind};

pub const REGION_TAG: &str = "consistentRegion";
pub const ENTRY_TAG: &str = "consistentRegionEntry";
pub const AUTONOMOUS_TAG: &str = "autonomous";

// ── Per-operator info ───────────────────────────────────────────────────────

/// Consistent-region membership of one primitive-like operator.
#[derive(Debug, Clone, PartialEq)]
pub struct CcInfo {
    /// Logical index of the region this operator starts, if it does.
    pub index: u64,
    pub is_start: bool,
    pub is_end: bool,
    /// Not annotated with a region entry, or marked autonomous.
    pub oblivious: bool,
    /// Entry keys other than index/isStartOfRegion/isEndOfRegion, re-emitted verbatim.
    pub key_values: Vec<AnnotationValue>,
    pub regions: Vec<CcRegionId>,
}

impl Default for CcInfo {
    fn default() -> Self {
        CcInfo {
            index: 0,
            is_start: false,
            is_end: false,
            oblivious: true,
            key_values: Vec::new(),
            regions: Vec::new(),
        }
    }
}

impl CcInfo {
    /// Consume the region entry and autonomous annotations, returning the
    /// info and the annotations that pass through.
    pub fn from_annotations(annotations: &[Annotation]) -> Result<(CcInfo, Vec<Annotation>)> {
        let mut info = CcInfo::default();
        let mut kept = Vec::new();
        for annot in annotations {
            match annot.tag.as_str() {
                ENTRY_TAG => info.set_region_entry(annot)?,
                AUTONOMOUS_TAG => info.oblivious = true,
                _ => kept.push(annot.clone()),
            }
        }
        Ok((info, kept))
    }

    fn set_region_entry(&mut self, annot: &Annotation) -> Result<()> {
        self.oblivious = false;
        for kv in &annot.values {
            match kv.key.as_str() {
                "index" => {
                    self.index = kv.value.trim().parse().map_err(|_| {
                        TransformError::internal("could not read region entry index")
                    })?
                }
                "isStartOfRegion" => self.is_start |= kv.value == "true",
                "isEndOfRegion" => self.is_end |= kv.value == "true",
                _ => self.key_values.push(kv.clone()),
            }
        }
        Ok(())
    }

    /// Copy for a channel replica: flags and keys, but no region membership.
    pub fn replica(&self) -> CcInfo {
        CcInfo {
            regions: Vec::new(),
            ..self.clone()
        }
    }

    /// Record membership in `region`; returns how many regions hold this operator.
    fn added_to_region(&mut self, region: CcRegionId) -> usize {
        self.regions.push(region);
        self.regions.len()
    }
}

// ── Regions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CcRegion {
    pub index: u64,
    pub logical_index: u64,
    pub is_operator_driven: bool,
    pub drain_timeout: f64,
    pub reset_timeout: f64,
    pub operators: BTreeSet<OperIdx>,
    pub merged_with: Option<CcRegionId>,
}

impl CcRegion {
    pub fn from_annotation(annot: &Annotation) -> Result<CcRegion> {
        let mut region = CcRegion {
            index: 0,
            logical_index: 0,
            is_operator_driven: false,
            drain_timeout: 0.0,
            reset_timeout: 0.0,
            operators: BTreeSet::new(),
            merged_with: None,
        };
        for kv in &annot.values {
            let value = kv.value.trim();
            match kv.key.as_str() {
                "index" => {
                    region.index = value
                        .parse()
                        .map_err(|_| TransformError::internal("could not read region index"))?;
                    region.logical_index = region.index;
                }
                "trigger" => region.is_operator_driven |= value == "operatorDriven",
                "drainTimeout" => {
                    region.drain_timeout = value
                        .parse()
                        .map_err(|_| TransformError::internal("could not read drain timeout"))?
                }
                "resetTimeout" => {
                    region.reset_timeout = value
                        .parse()
                        .map_err(|_| TransformError::internal("could not read reset timeout"))?
                }
                _ => {}
            }
        }
        Ok(region)
    }

    /// A fresh per-channel copy: same logical index and settings, no members.
    fn channel_copy(&self, index: u64) -> CcRegion {
        CcRegion {
            index,
            logical_index: self.logical_index,
            is_operator_driven: self.is_operator_driven,
            drain_timeout: self.drain_timeout,
            reset_timeout: self.reset_timeout,
            operators: BTreeSet::new(),
            merged_with: None,
        }
    }
}

/// All consistent-cut regions, keyed by (logical index, channel).
#[derive(Debug, Clone, Default)]
pub struct CcRegions {
    pub regions: Vec<CcRegion>,
    by_key: BTreeMap<(u64, u64), CcRegionId>,
    pub start_operators: Vec<OperIdx>,
    pub multi_region_operators: BTreeSet<OperIdx>,
}

impl CcRegions {
    pub fn add_region(&mut self, region: CcRegion, channel: u64) -> CcRegionId {
        let id = CcRegionId(self.regions.len());
        self.by_key.insert((region.logical_index, channel), id);
        self.regions.push(region);
        id
    }

    pub fn region(&self, id: CcRegionId) -> Result<&CcRegion> {
        self.regions
            .get(id.0)
            .ok_or_else(|| TransformError::internal(format!("could not find cc region {}", id)))
    }

    fn region_mut(&mut self, id: CcRegionId) -> Result<&mut CcRegion> {
        self.regions
            .get_mut(id.0)
            .ok_or_else(|| TransformError::internal(format!("could not find cc region {}", id)))
    }

    pub fn find_region(&self, logical_index: u64, channel: u64) -> Result<CcRegionId> {
        self.by_key
            .get(&(logical_index, channel))
            .copied()
            .ok_or_else(|| TransformError::internal("could not find cc index"))
    }

    /// The region for `channel`, cloned from channel 0 on first use.
    pub fn find_or_create_region(&mut self, logical_index: u64, channel: u64) -> Result<CcRegionId> {
        if let Some(&id) = self.by_key.get(&(logical_index, channel)) {
            return Ok(id);
        }
        let base = self.find_region(logical_index, 0)?;
        let copy = self.region(base)?.channel_copy(self.by_key.len() as u64);
        tracing::trace!(logical_index, channel, "created per-channel consistent region");
        Ok(self.add_region(copy, channel))
    }

    /// Canonical region for `id`, following merge links without modifying them.
    pub fn merged_region(&self, id: CcRegionId) -> Result<CcRegionId> {
        let mut cur = id;
        let mut steps = 0;
        while let Some(next) = self.region(cur)?.merged_with {
            cur = next;
            steps += 1;
            if steps > self.regions.len() {
                return Err(TransformError::internal("cycle in merged cc regions"));
            }
        }
        Ok(cur)
    }

    /// Like `merged_region`, compressing the path behind it.
    fn find(&mut self, id: CcRegionId) -> Result<CcRegionId> {
        let root = self.merged_region(id)?;
        let mut cur = id;
        while cur != root {
            let region = self.region_mut(cur)?;
            let next = region.merged_with.unwrap_or(root);
            region.merged_with = Some(root);
            cur = next;
        }
        Ok(root)
    }

    /// Absorb `other` into `into`: members are copied, `other` forwards to `into`.
    fn absorb(&mut self, into: CcRegionId, other: CcRegionId) -> Result<()> {
        let members = self.region(other)?.operators.clone();
        self.region_mut(into)?.operators.extend(members);
        let other_region = self.region_mut(other)?;
        if other_region.merged_with.is_some() {
            return Err(TransformError::internal("_mergedWith should be NULL"));
        }
        other_region.merged_with = Some(into);
        tracing::trace!(%into, %other, "merged consistent regions");
        Ok(())
    }

    /// Union `a` and `b`, returning the canonical region. `memo` remembers
    /// pairs already merged so a repeated pair is answered without touching
    /// the regions again.
    pub fn merge_regions(
        &mut self,
        a: CcRegionId,
        b: CcRegionId,
        memo: &mut HashMap<(CcRegionId, CcRegionId), CcRegionId>,
    ) -> Result<CcRegionId> {
        if a == b {
            return Ok(a);
        }
        if let Some(&merged) = memo.get(&(a, b)) {
            return self.find(merged);
        }
        let ra = self.find(a)?;
        let rb = self.find(b)?;
        if ra == rb {
            return Ok(ra);
        }
        if let Some(&merged) = memo.get(&(ra, rb)) {
            return self.find(merged);
        }
        memo.insert((ra, rb), ra);
        self.absorb(ra, rb)?;
        Ok(ra)
    }
}

// ── Reachability and merging ────────────────────────────────────────────────

impl LogicalModel {
    /// Add `op` to `region` once; an operator now in two regions is recorded
    /// for merging.
    pub fn add_region_entry(&mut self, region: CcRegionId, op: OperIdx) -> Result<()> {
        if !self.cc.region_mut(region)?.operators.insert(op) {
            return Ok(());
        }
        let info = self
            .operator_mut(op)?
            .cc_mut()
            .ok_or_else(|| TransformError::internal("composite added to a cc region"))?;
        if info.added_to_region(region) > 1 {
            self.cc.multi_region_operators.insert(op);
        }
        Ok(())
    }

    fn reach_operator(
        &mut self,
        start: OperIdx,
        region: CcRegionId,
        seen: &mut BTreeSet<OperIdx>,
    ) -> Result<()> {
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let op = self.operator(idx)?;
            let next: Vec<ModelConnection> = match &op.body {
                OperatorBody::Composite(_) => return Err(TransformError::internal("unexpected condition")),
                OperatorBody::Export(_) => {
                    seen.insert(idx);
                    self.add_region_entry(region, idx)?;
                    continue;
                }
                OperatorBody::Primitive(p) => {
                    if !seen.insert(idx) || p.core.cc.oblivious {
                        continue;
                    }
                    let next = if p.core.cc.is_end {
                        Vec::new()
                    } else {
                        p.outputs.iter().flat_map(|o| o.connections.iter().copied()).collect()
                    };
                    self.add_region_entry(region, idx)?;
                    next
                }
                OperatorBody::Splitter(_) | OperatorBody::Merger(_) | OperatorBody::Import(_) => {
                    if !seen.insert(idx) {
                        continue;
                    }
                    let is_end = op.cc().map(|c| c.is_end).unwrap_or(false);
                    let next: Vec<ModelConnection> = if is_end {
                        Vec::new()
                    } else {
                        match &op.body {
                            OperatorBody::Splitter(s) => s.outputs.iter().flatten().copied().collect(),
                            OperatorBody::Merger(m) => m.output.clone(),
                            OperatorBody::Import(i) => {
                                i.outputs.iter().flat_map(|o| o.connections.iter().copied()).collect()
                            }
                            _ => Vec::new(),
                        }
                    };
                    self.add_region_entry(region, idx)?;
                    next
                }
            };
            // Push in reverse so the walk visits connections in declaration order.
            for conn in next.into_iter().rev() {
                self.reach_connection(conn, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Resolve `conn` through composite ports to the operators it reaches.
    fn reach_connection(&self, conn: ModelConnection, stack: &mut Vec<OperIdx>) -> Result<()> {
        let mut pending = vec![conn];
        let mut targets = Vec::new();
        while let Some(c) = pending.pop() {
            let target = self.operator(c.oper)?;
            match &target.body {
                OperatorBody::Composite(comp) => {
                    let port = match c.kind {
                        PortKind::Input => crate::model::nth(&comp.inputs, c.port)?,
                        PortKind::Output => crate::model::nth(&comp.outputs, c.port)?,
                    };
                    pending.extend(port.outgoing.iter().rev().copied());
                }
                _ => {
                    if c.kind == PortKind::Output {
                        return Err(TransformError::internal("unexpected condition"));
                    }
                    targets.push(c.oper);
                }
            }
        }
        stack.extend(targets.into_iter().rev());
        Ok(())
    }

    /// Walk every start operator's reachable set, merge regions that share
    /// operators and validate operator-driven regions.
    pub fn compute_cc_regions(&mut self) -> Result<()> {
        for start in self.cc.start_operators.clone() {
            let op = self.operator(start)?;
            let index = op.cc().map(|c| c.index).unwrap_or_default();
            let channel = if self.is_in_parallel_region(start)? {
                self.containing_channel(start)?
            } else {
                0
            };
            let region = self.cc.find_region(index, channel)?;
            let mut seen = BTreeSet::new();
            self.reach_operator(start, region, &mut seen)?;
        }

        if !self.cc.multi_region_operators.is_empty() {
            let mut memo = HashMap::new();
            for idx in self.cc.multi_region_operators.clone() {
                let regions = self
                    .operator(idx)?
                    .cc()
                    .map(|c| c.regions.clone())
                    .unwrap_or_default();
                if regions.len() < 2 {
                    return Err(TransformError::internal("regionsToMerge is incorrect"));
                }
                let mut merged = self.cc.merge_regions(regions[0], regions[1], &mut memo)?;
                for &r in &regions[2..] {
                    merged = self.cc.merge_regions(merged, r, &mut memo)?;
                }
                if let Some(info) = self.operator_mut(idx)?.cc_mut() {
                    info.regions = vec![merged];
                }
            }
        }

        for region in &self.cc.regions {
            if !region.is_operator_driven {
                continue;
            }
            let mut starts = 0;
            for &op in &region.operators {
                if self.operator(op)?.cc().map(|c| c.is_start).unwrap_or(false) {
                    starts += 1;
                }
            }
            if starts > 1 {
                return Err(TransformError::too_many_start_operators(
                    region.logical_index,
                    starts,
                ));
            }
        }
        Ok(())
    }
}
