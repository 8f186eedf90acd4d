// connect.rs - Physical connection resolution
//
// A model connection names a port on any operator variant. Resolution
// chases it through composite ports, splitters and mergers until it lands
// on ordinary primitives, producing primitive-to-primitive edges. Import and
// Export pseudo-operators produce stream records instead of edges.
//
// Preconditions: the parallel transform has run; every splitter reachable
//                from an input port was registered while output ports were
//                built.
// Postconditions: resolved edges name physical indices only.
// Failure modes: a splitter with no mapping, a merger entered from an
//                impossible direction, an Import without a declaration →
//                `Internal`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::diag::{Result, TransformError};
use crate::id::{OperIdx, PhysIdx};
use crate::model::{nth, unexpected, LogicalModel, ModelConnection, OperatorBody, PortKind};
use crate::physical::{PhysicalChannel, PhysicalSplitter};
use crate::streams::{ChannelScope, PhysicalExportedStream, PhysicalImportedStream};

// ── Edges ───────────────────────────────────────────────────────────────────

/// A resolved edge, stored on the port it starts from. `kind` is the kind of
/// the far port; `splitter` carries (splitter index, channel) when the edge
/// runs through a splitter on the far operator's output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalConnection {
    pub from: PhysIdx,
    pub from_port: u64,
    pub to: PhysIdx,
    pub to_port: u64,
    pub kind: PortKind,
    pub splitter: Option<(u64, u64)>,
}

impl fmt::Display for PhysicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}:{} ({})", self.from, self.from_port, self.to, self.to_port, self.kind)?;
        if let Some((s, c)) = self.splitter {
            write!(f, " splitter={} channel={}", s, c)?;
        }
        Ok(())
    }
}

// ── Splitter map ────────────────────────────────────────────────────────────

/// Output port that owns the physical image of a model splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterMapEntry {
    pub oper: PhysIdx,
    pub port: u64,
    pub splitter: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitterMap {
    entries: BTreeMap<OperIdx, Vec<SplitterMapEntry>>,
}

impl SplitterMap {
    pub fn add(&mut self, splitter_oper: OperIdx, entry: SplitterMapEntry) {
        self.entries.entry(splitter_oper).or_default().push(entry);
    }

    pub fn find(&self, splitter_oper: OperIdx) -> Result<&[SplitterMapEntry]> {
        self.entries
            .get(&splitter_oper)
            .map(Vec::as_slice)
            .ok_or_else(|| TransformError::internal("could not find splitter mapping"))
    }

    /// Number of model splitters with at least one physical image.
    pub fn splitter_count(&self) -> usize {
        self.entries.len()
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

impl LogicalModel {
    /// Resolve `conn`, seen from port (`from`, `from_port`) of kind
    /// `from_kind`, into primitive-to-primitive edges appended to `out`.
    pub fn physical_connections(
        &self,
        conn: ModelConnection,
        from: (PhysIdx, u64),
        from_kind: PortKind,
        splitters: &SplitterMap,
        out: &mut Vec<PhysicalConnection>,
    ) -> Result<()> {
        let (from_oper, from_port) = from;
        let target = self.operator(conn.oper)?;
        match &target.body {
            OperatorBody::Primitive(p) => out.push(PhysicalConnection {
                from: from_oper,
                from_port,
                to: p.physical_index,
                to_port: conn.port,
                kind: conn.kind,
                splitter: None,
            }),
            OperatorBody::Splitter(_) => {
                // The upstream edge into a splitter is folded into the
                // splitter's channels; it resolves to nothing here.
                if from_kind == PortKind::Output && conn.kind == PortKind::Input {
                    return Ok(());
                }
                for entry in splitters.find(conn.oper)? {
                    out.push(PhysicalConnection {
                        from: from_oper,
                        from_port,
                        to: entry.oper,
                        to_port: entry.port,
                        kind: conn.kind,
                        splitter: Some((entry.splitter, conn.port)),
                    });
                }
            }
            OperatorBody::Merger(m) => match (from_kind, conn.kind) {
                (PortKind::Input, PortKind::Output) => {
                    for c in m.inputs.iter().flatten() {
                        self.physical_connections(*c, from, from_kind, splitters, out)?;
                    }
                }
                (PortKind::Output, PortKind::Input) => {
                    for c in &m.output {
                        self.physical_connections(*c, from, from_kind, splitters, out)?;
                    }
                }
                _ => return Err(unexpected()),
            },
            OperatorBody::Composite(c) => {
                let port = match conn.kind {
                    PortKind::Input => nth(&c.inputs, conn.port)?,
                    PortKind::Output => nth(&c.outputs, conn.port)?,
                };
                let next = match from_kind {
                    PortKind::Input => &port.incoming,
                    PortKind::Output => &port.outgoing,
                };
                for c in next {
                    self.physical_connections(*c, from, from_kind, splitters, out)?;
                }
            }
            OperatorBody::Import(_) | OperatorBody::Export(_) => {}
        }
        Ok(())
    }

    /// Walk an output-port connection looking for splitters. Each one found
    /// becomes a physical splitter on the port (`owner`, `port`) and is
    /// recorded in `map` so input ports downstream can resolve through it.
    pub fn collect_splitters(
        &self,
        conn: ModelConnection,
        owner: (PhysIdx, u64),
        splitters: &mut Vec<PhysicalSplitter>,
        map: &mut SplitterMap,
    ) -> Result<()> {
        let target = self.operator(conn.oper)?;
        match &target.body {
            OperatorBody::Splitter(s) => {
                let index = splitters.len() as u64;
                let channels = s
                    .outputs
                    .iter()
                    .enumerate()
                    .map(|(i, list)| PhysicalChannel::new(i as u64, list.clone()))
                    .collect();
                splitters.push(PhysicalSplitter {
                    index,
                    iport: s.injecting_iport,
                    region: s.region,
                    channels,
                });
                map.add(
                    conn.oper,
                    SplitterMapEntry {
                        oper: owner.0,
                        port: owner.1,
                        splitter: index,
                    },
                );
            }
            OperatorBody::Composite(c) => {
                let port = match conn.kind {
                    PortKind::Input => nth(&c.inputs, conn.port)?,
                    PortKind::Output => nth(&c.outputs, conn.port)?,
                };
                for next in &port.outgoing {
                    self.collect_splitters(*next, owner, splitters, map)?;
                }
            }
            OperatorBody::Merger(m) => {
                for next in &m.output {
                    self.collect_splitters(*next, owner, splitters, map)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Imported streams feeding an input-port connection.
    pub fn imported_streams(
        &self,
        conn: ModelConnection,
        out: &mut Vec<PhysicalImportedStream>,
    ) -> Result<()> {
        let target = self.operator(conn.oper)?;
        match &target.body {
            OperatorBody::Import(i) => {
                nth(&i.outputs, conn.port)?;
                let unused = || {
                    TransformError::internal("Trying to get the imported stream from an unused Import")
                };
                let key = i.stream.as_deref().ok_or_else(unused)?;
                let stream = self.streams.find_import(key).ok_or_else(unused)?;
                out.push(PhysicalImportedStream {
                    import_oper_name: self.fully_qualified_name(conn.oper)?,
                    logical_import_oper_name: self.fully_qualified_logical_name(conn.oper)?,
                    stream: stream.clone(),
                    scope: self.stream_scope(conn.oper)?,
                });
            }
            OperatorBody::Composite(c) => {
                let port = match conn.kind {
                    PortKind::Input => nth(&c.inputs, conn.port)?,
                    PortKind::Output => nth(&c.outputs, conn.port)?,
                };
                for next in &port.incoming {
                    self.imported_streams(*next, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Exported streams fed by an output-port connection.
    pub fn exported_streams(
        &self,
        conn: ModelConnection,
        out: &mut Vec<PhysicalExportedStream>,
    ) -> Result<()> {
        let target = self.operator(conn.oper)?;
        match &target.body {
            OperatorBody::Export(e) => {
                nth(&e.inputs, conn.port)?;
                let stream = self.streams.find_export(&e.stream)?;
                out.push(PhysicalExportedStream {
                    export_oper_name: self.fully_qualified_name(conn.oper)?,
                    logical_export_oper_name: self.fully_qualified_logical_name(conn.oper)?,
                    stream: stream.clone(),
                    scope: self.stream_scope(conn.oper)?,
                });
            }
            OperatorBody::Composite(c) => {
                let port = match conn.kind {
                    PortKind::Input => nth(&c.inputs, conn.port)?,
                    PortKind::Output => nth(&c.outputs, conn.port)?,
                };
                for next in &port.outgoing {
                    self.exported_streams(*next, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn stream_scope(&self, idx: OperIdx) -> Result<ChannelScope> {
        let (max_channels, channel) = self.channel_scope(idx)?;
        Ok(if channel < 0 {
            ChannelScope::outside()
        } else {
            ChannelScope::new(max_channels, channel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitter_map_accumulates_per_splitter() {
        let mut map = SplitterMap::default();
        assert!(map.find(OperIdx(9)).is_err());
        let a = SplitterMapEntry {
            oper: PhysIdx(0),
            port: 0,
            splitter: 0,
        };
        let b = SplitterMapEntry {
            oper: PhysIdx(3),
            port: 1,
            splitter: 2,
        };
        map.add(OperIdx(9), a);
        map.add(OperIdx(9), b);
        assert_eq!(map.find(OperIdx(9)).unwrap(), &[a, b]);
        assert_eq!(map.splitter_count(), 1);
    }

    #[test]
    fn connection_display_shows_splitter_tag() {
        let c = PhysicalConnection {
            from: PhysIdx(2),
            from_port: 0,
            to: PhysIdx(0),
            to_port: 0,
            kind: PortKind::Output,
            splitter: Some((0, 1)),
        };
        assert_eq!(c.to_string(), "2:0 -> 0:0 (output) splitter=0 channel=1");
    }
}
