// streams.rs - Imported and exported streams
//
// The registry holds the stream declarations found on PE ports, keyed by
// the Import/Export operator name. Physical streams are the per-replica
// images: they remember the operator's channel so that subscriptions,
// filters, stream names and export properties can be resolved at emission.
//
// Preconditions: registry keys are the Import/Export operators' full names.
// Postconditions: emission resolves every intrinsic against the stored channel.
// Failure modes: missing export declaration → `Internal`; bad filter or
//                subscription expressions → `Expression`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::adl;
use crate::diag::{Result, TransformError};
use crate::expr;
use crate::padl;

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Subscription {
    NameBased {
        application_name: String,
        stream_name: String,
    },
    PropertyBased {
        subscription: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedStream {
    pub subscription: Subscription,
    pub filter: String,
    pub application_scope: String,
    pub transport: String,
    pub encoding: String,
    pub tuple_type_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedStream {
    pub record: adl::ExportedStream,
    pub transport: String,
    pub encoding: String,
    pub tuple_type_index: u64,
}

/// PE-port settings shared by the streams declared on one port.
#[derive(Debug, Clone, Copy)]
pub struct PortSettings<'a> {
    pub transport: &'a str,
    pub encoding: &'a str,
    pub tuple_type_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRegistry {
    imports: BTreeMap<String, ImportedStream>,
    exports: BTreeMap<String, ExportedStream>,
}

impl StreamRegistry {
    /// Register every import declared on a PE input port. The first
    /// declaration for an operator name wins.
    pub fn register_imports(&mut self, streams: &adl::ImportedStreams, port: PortSettings<'_>) {
        let filter = streams.filter.clone().unwrap_or_default();
        let make = |subscription, scope: &Option<String>| ImportedStream {
            subscription,
            filter: filter.clone(),
            application_scope: scope.clone().unwrap_or_default(),
            transport: port.transport.to_string(),
            encoding: port.encoding.to_string(),
            tuple_type_index: port.tuple_type_index,
        };
        for nbi in &streams.name_based_imports {
            self.imports
                .entry(nbi.import_oper_name.clone())
                .or_insert_with(|| {
                    make(
                        Subscription::NameBased {
                            application_name: nbi.application_name.clone(),
                            stream_name: nbi.stream_name.clone(),
                        },
                        &nbi.application_scope,
                    )
                });
        }
        if let Some(pbi) = &streams.property_based_import {
            self.imports
                .entry(pbi.import_oper_name.clone())
                .or_insert_with(|| {
                    make(
                        Subscription::PropertyBased {
                            subscription: pbi.subscription.clone(),
                        },
                        &pbi.application_scope,
                    )
                });
        }
    }

    pub fn register_export(&mut self, stream: &adl::ExportedStream, port: PortSettings<'_>) {
        self.exports
            .entry(stream.export_oper_name.clone())
            .or_insert_with(|| ExportedStream {
                record: stream.clone(),
                transport: port.transport.to_string(),
                encoding: port.encoding.to_string(),
                tuple_type_index: port.tuple_type_index,
            });
    }

    /// An Import operator that feeds nothing may have no declaration.
    pub fn find_import(&self, oper_name: &str) -> Option<&ImportedStream> {
        self.imports.get(oper_name)
    }

    pub fn find_export(&self, oper_name: &str) -> Result<&ExportedStream> {
        self.exports.get(oper_name).ok_or_else(|| {
            TransformError::internal(format!("could not find exported stream {}", oper_name))
        })
    }
}

// ── Physical streams ────────────────────────────────────────────────────────

/// Channel context of the operator a physical stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelScope {
    pub max_channels: i64,
    pub channel: i64,
}

impl ChannelScope {
    pub fn outside() -> Self {
        ChannelScope {
            max_channels: 0,
            channel: -1,
        }
    }

    pub fn new(max_channels: i64, channel: i64) -> Self {
        ChannelScope {
            max_channels,
            channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalImportedStream {
    pub import_oper_name: String,
    pub logical_import_oper_name: String,
    pub stream: ImportedStream,
    pub scope: ChannelScope,
}

impl PhysicalImportedStream {
    /// Append this import to `out`. Name-based imports take the next index
    /// from `index` (so the first is 1); a property-based import is always 0.
    pub fn populate(&self, out: &mut padl::ImportedStreams, index: &mut u64) -> Result<()> {
        let ChannelScope { max_channels, channel } = self.scope;
        let scope = (!self.stream.application_scope.is_empty())
            .then(|| self.stream.application_scope.clone());
        match &self.stream.subscription {
            Subscription::NameBased {
                application_name,
                stream_name,
            } => {
                *index += 1;
                out.name_based_imports.push(padl::NameBasedImport {
                    index: *index,
                    import_oper_name: self.import_oper_name.clone(),
                    logical_import_oper_name: self.logical_import_oper_name.clone(),
                    application_name: application_name.clone(),
                    stream_name: expr::substitute(stream_name, max_channels, channel),
                    logical_stream_name: stream_name.clone(),
                    application_scope: scope,
                });
            }
            Subscription::PropertyBased { subscription } => {
                out.property_based_import = Some(padl::PropertyBasedImport {
                    index: 0,
                    import_oper_name: self.import_oper_name.clone(),
                    logical_import_oper_name: self.logical_import_oper_name.clone(),
                    subscription: expr::evaluate(subscription, max_channels, channel)?,
                    logical_subscription: subscription.clone(),
                    application_scope: scope,
                });
            }
        }
        let filter = expr::evaluate(&self.stream.filter, max_channels, channel)?;
        if !filter.is_empty() {
            out.logical_filter = Some(self.stream.filter.clone());
            out.filter = Some(filter);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalExportedStream {
    pub export_oper_name: String,
    pub logical_export_oper_name: String,
    pub stream: ExportedStream,
    pub scope: ChannelScope,
}

impl PhysicalExportedStream {
    pub fn to_padl(&self) -> padl::ExportedStream {
        let ChannelScope { max_channels, channel } = self.scope;
        let record = &self.stream.record;
        padl::ExportedStream {
            export_oper_name: self.export_oper_name.clone(),
            logical_export_oper_name: self.logical_export_oper_name.clone(),
            name: record
                .name
                .as_ref()
                .map(|n| expr::substitute(n, max_channels, channel)),
            logical_name: record.name.clone(),
            allow_filter: record.allow_filter,
            properties: record
                .properties
                .iter()
                .map(|p| padl::StreamProperty {
                    name: p.name.clone(),
                    property_type: p.property_type.clone(),
                    values: p
                        .values
                        .iter()
                        .map(|v| expr::substitute(v, max_channels, channel))
                        .collect(),
                    logical_values: p.values.clone(),
                })
                .collect(),
        }
    }
}
