// adl.rs - Logical application description records (transformer input)
//
// A serde image of the application description: hostpools, PEs with their
// original operator inventory, the main composite tree and the parallel
// regions. Sections the transformer does not interpret are carried as raw
// JSON values and copied to the output unchanged.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: deserialization errors surface from serde_json.
// Side effects: none.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const IMPORT_KIND: &str = "spl.adapter::Import";
pub const EXPORT_KIND: &str = "spl.adapter::Export";

// ── Application ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
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
    pub tuple_types: Value,
    pub hostpools: Vec<Hostpool>,
    pub pes: Vec<Pe>,
    pub composites: Composites,
    pub parallel_regions: Vec<ParallelRegion>,
    pub oper_definitions: Value,
    pub toolkits: Value,
    pub custom_metrics: Value,
    pub submission_time_values: Value,
    pub submission_time_configuration: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Composites {
    /// The main composite. There is only ever one.
    pub composite_oper_instance: CompositeOperInstance,
}

// ── Annotations ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotation {
    pub tag: String,
    pub values: Vec<AnnotationValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationValue {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: String,
}

impl Annotation {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.key == key)
            .map(|v| v.value.as_str())
    }
}

// ── Operator instance tree ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositeOperInstance {
    pub index: u64,
    pub name: String,
    pub description: Option<String>,
    pub composite_oper_index: u64,
    pub annotations: Vec<Annotation>,
    pub input_ports: Vec<CompositePort>,
    pub output_ports: Vec<CompositePort>,
    pub primitive_oper_instances: Vec<PrimitiveOperInstance>,
    pub composite_oper_instances: Vec<CompositeOperInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositePort {
    pub index: u64,
    pub incoming_connections: Vec<Connection>,
    pub outgoing_connections: Vec<Connection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimitiveOperInstance {
    pub index: u64,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub toolkit_index: u64,
    pub annotations: Vec<Annotation>,
    pub input_ports: Vec<PrimitivePort>,
    pub output_ports: Vec<PrimitivePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimitivePort {
    pub index: u64,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKindRecord {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub oper_index: u64,
    pub port_index: u64,
    pub port_kind: PortKindRecord,
}

// ── PEs and the original operator inventory ──────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pe {
    pub index: u64,
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
    pub toolkits_map: Vec<ToolkitMapEntry>,
    pub oper_instances: Vec<OperInstance>,
    pub input_ports: Vec<PeInputPort>,
    pub output_ports: Vec<PeOutputPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolkitMapEntry {
    pub index: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperInstance {
    pub index: u64,
    pub name: String,
    pub class: String,
    pub definition_index: u64,
    pub single_threaded_on_inputs: bool,
    pub single_threaded_on_outputs: bool,
    pub restartable: bool,
    pub relocatable: bool,
    pub resources: Resources,
    pub profiling: Value,
    pub checkpointing: Value,
    pub runtime_constants: Value,
    pub input_ports: Vec<OperInputPort>,
    pub output_ports: Vec<OperOutputPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperInputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub threaded_port: Option<ThreadedPort>,
    pub is_control: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperOutputPort {
    pub index: u64,
    pub name: String,
    pub is_mutable: bool,
    pub tuple_type_index: u64,
    pub stream_name: String,
    pub viewable: bool,
    pub single_threaded_on_output: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadedPort {
    pub congestion_policy: String,
    pub queue_size: u64,
    pub single_threaded_on_input: bool,
}

impl Default for ThreadedPort {
    fn default() -> Self {
        ThreadedPort {
            congestion_policy: "wait".to_string(),
            queue_size: 0,
            single_threaded_on_input: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resources {
    pub isolation: bool,
    pub host_location: Option<HostLocation>,
    pub pool_location: Option<PoolLocation>,
    pub co_locations: Vec<String>,
    pub ex_locations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostLocation {
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolLocation {
    pub pool_index: u64,
    pub inpool_index: Option<u64>,
}

// ── PE ports and imported/exported streams ───────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeInputPort {
    pub index: u64,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub oper_instance_connection: OperInstanceInputConnection,
    pub imported_streams: Option<ImportedStreams>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperInstanceInputConnection {
    pub oper_instance_index: u64,
    pub iport_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeOutputPort {
    pub index: u64,
    pub tuple_type_index: u64,
    pub transport: String,
    pub encoding: String,
    pub single_threaded_on_output: bool,
    pub oper_instance_connection: OperInstanceOutputConnection,
    pub exported_stream: Option<ExportedStream>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperInstanceOutputConnection {
    pub oper_instance_index: u64,
    pub oport_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportedStreams {
    pub filter: Option<String>,
    pub name_based_imports: Vec<NameBasedImport>,
    pub property_based_import: Option<PropertyBasedImport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NameBasedImport {
    pub import_oper_name: String,
    pub application_name: String,
    pub stream_name: String,
    pub application_scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyBasedImport {
    pub import_oper_name: String,
    pub subscription: String,
    pub application_scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportedStream {
    pub export_oper_name: String,
    pub name: Option<String>,
    pub allow_filter: Option<bool>,
    pub properties: Vec<StreamProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub values: Vec<String>,
}

// ── Hostpools ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Hostpool {
    pub index: u64,
    pub name: String,
    pub size: Option<u64>,
    pub membership_mode: String,
    pub hosts: Vec<String>,
    pub tags: Vec<String>,
}

// ── Parallel regions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelRegion {
    pub index: u64,
    pub oper_index: u64,
    pub width: ParallelWidth,
    pub splitters: Vec<SplitterSpec>,
    pub replicate_host_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelWidth {
    pub constant_width: Option<i64>,
    pub submission_time_width: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitterSpec {
    pub iport_index: u64,
    pub kind: String,
    pub attributes: Vec<String>,
}
