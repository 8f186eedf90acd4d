// padl.rs - Physical application description records (transformer output)
//
// Operators are flattened to physical instances grouped into PEs, every port
// lists its resolved inter-PE and intra-PE connections, and PE-boundary
// ports carry the static connections and imported/exported stream records.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use serde::Serialize;
use serde_json::Value;

use crate::adl::{
    Annotation, Composites, OperInstanceInputConnection, ParallelRegion, Resources, ThreadedPort,
    ToolkitMapEntry,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalApplication {
    pub name: String,
    pub application_scope: String,
    pub version: String,
    pub data_directory: String,
    pub application_directory: String,
    pub output_directory: String,
    pub checkpoint_directory: String,
    pub adl_path: String,
    pub build_id: String,
    pub bundle: String,
    pub log_level: String,
    pub libraries: Value,
    pub hostpools: Vec<Hostpool>,
    pub tuple_types: Value,
    pub pes: Vec<Pe>,
    pub oper_definitions: Value,
    pub composites: Composites,
    pub toolkits: Value,
    pub custom_metrics: Value,
    pub parallel_regions: Vec<ParallelRegion>,
    pub submission_time_values: Value,
    pub submission_time_configuration: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hostpool {
    pub index: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub membership_mode: String,
    pub hosts: Vec<String>,
    pub tags: Vec<String>,
}

// ── PEs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pe {
    pub index: u64,
    pub logical_index: u64,
    pub class: String,
    pub language: String,
    pub optimized: bool,
    pub restartable: bool,
    pub relocatable: bool,
    pub log_level: String,
    pub version: String,
    pub executable: Value,
    pub env_vars: Value,
    pub capability: Value,
    pub display: Value,
    pub tracing: Value,
    pub oper_instances: Vec<OperInstance>,
    pub input_ports: Vec<PeInputPort>,
    pub output_ports: Vec<PeOutputPort>,
    pub toolkits_map: Vec<ToolkitMapEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeInputPort {
    pub index: u64,
    pub tuple_type_index: u64,
    pub encoding: String,
    pub transport: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_streams: Option<ImportedStreams>,
    pub static_connections: Vec<InputStaticConnection>,
    pub oper_instance_connection: OperInstanceInputConnection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStaticConnection {
    pub pe_index: u64,
    pub oport_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeOutputPort {
    pub index: u64,
    pub tuple_type_index: u64,
    pub encoding: String,
    pub transport: String,
    pub single_threaded_on_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_stream: Option<ExportedStream>,
    pub static_connections: Vec<OutputStaticConnection>,
    pub oper_instance_connection: PeOutputOperConnection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStaticConnection {
    pub pe_index: u64,
    pub iport_index: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeOutputOperConnection {
    pub oper_instance_index: u64,
    pub oport_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splitter_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_index: Option<u64>,
}

// ── Imported / exported streams ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedStreams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_filter: Option<String>,
    pub name_based_imports: Vec<NameBasedImport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_based_import: Option<PropertyBasedImport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameBasedImport {
    pub index: u64,
    pub import_oper_name: String,
    pub logical_import_oper_name: String,
    pub application_name: String,
    pub stream_name: String,
    pub logical_stream_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyBasedImport {
    pub index: u64,
    pub import_oper_name: String,
    pub logical_import_oper_name: String,
    pub subscription: String,
    pub logical_subscription: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStream {
    pub export_oper_name: String,
    pub logical_export_oper_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_filter: Option<bool>,
    pub properties: Vec<StreamProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub values: Vec<String>,
    pub logical_values: Vec<String>,
}

// ── Operators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperInstance {
    pub index: u64,
    pub name: String,
    pub logical_index: u64,
    pub logical_name: String,
    pub class: String,
    pub definition_index: u64,
    pub toolkit_index: u64,
    pub single_threaded_on_inputs: bool,
    pub single_threaded_on_outputs: bool,
    pub restartable: bool,
    pub relocatable: bool,
    pub annotations: Vec<Annotation>,
    pub resources: Resources,
    pub profiling: Value,
    pub checkpointing: Value,
    pub runtime_constants: Value,
    pub input_ports: Vec<OperInputPort>,
    pub output_ports: Vec<OperOutputPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperInputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub inter_pe_connections: Vec<InputPortConnection>,
    pub intra_pe_connections: Vec<InputPortConnection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threaded_port: Option<ThreadedPort>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_control: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPortConnection {
    pub oper_instance_index: u64,
    pub oport_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splitter_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_port_index: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperOutputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub inter_pe_connections: Vec<OutputPortConnection>,
    pub intra_pe_connections: Vec<OutputPortConnection>,
    pub stream_name: String,
    pub logical_stream_name: String,
    pub viewable: bool,
    pub single_threaded_on_output: bool,
    pub splitters: Vec<Splitter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPortConnection {
    pub oper_instance_index: u64,
    pub iport_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_port_index: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Splitter {
    pub index: u64,
    pub iport_index: u64,
    pub kind: String,
    pub region_index: u64,
    pub attributes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_window_puncts: Option<bool>,
    pub parallel_channels: Vec<ParallelChannel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelChannel {
    pub index: u64,
    pub inter_pe_connections: Vec<OutputPortConnection>,
    pub intra_pe_connections: Vec<OutputPortConnection>,
}
