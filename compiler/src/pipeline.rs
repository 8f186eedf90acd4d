// pipeline.rs - Transformation state and pass orchestration
//
// Holds every pass artifact in one state struct and runs the minimal set of
// passes for a terminal PassId. `transform` is the library entry point: it
// runs every pass and converts a panic inside a pass into a `Conversion`
// error so callers only ever see `TransformError`.
//
// Preconditions: the application record has been deserialized.
// Postconditions: artifacts for all passes in `required_passes(terminal)` are
//                 populated, or the first pass error is returned.
// Failure modes: any pass error, unchanged; a panic → `Conversion`.
// Side effects: `tracing` events per pass; optional model dumps at `info!`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use serde::Serialize;

use crate::adl::Application;
use crate::diag::{Result, TransformError};
use crate::dump;
use crate::emit;
use crate::model::LogicalModel;
use crate::padl::PhysicalApplication;
use crate::pass::{descriptor, required_passes, PassId};
use crate::physical::PhysicalModel;

pub const DUMP_LOGICAL_ENV: &str = "STREAMS_DUMP_LOGICAL_MODEL";
pub const DUMP_PHYSICAL_ENV: &str = "STREAMS_DUMP_PHYSICAL_MODEL";

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub dump_logical: bool,
    pub dump_physical: bool,
}

impl TransformOptions {
    /// A toggle is on when its variable is set to a non-empty value.
    pub fn from_env() -> Self {
        let on = |name: &str| std::env::var_os(name).is_some_and(|v| !v.is_empty());
        TransformOptions {
            dump_logical: on(DUMP_LOGICAL_ENV),
            dump_physical: on(DUMP_PHYSICAL_ENV),
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `input_hash`: SHA-256 of the raw input JSON text.
/// `output_hash`: SHA-256 of the produced output JSON text.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub input_hash: [u8; 32],
    pub output_hash: [u8; 32],
    pub transformer_version: &'static str,
}

impl Provenance {
    pub fn input_hash_hex(&self) -> String {
        bytes_to_hex(&self.input_hash)
    }

    pub fn output_hash_hex(&self) -> String {
        bytes_to_hex(&self.output_hash)
    }

    /// Pretty-printed JSON record with hex-encoded hashes.
    pub fn to_json(&self) -> Result<String> {
        let record = ProvenanceRecord {
            input_hash: self.input_hash_hex(),
            output_hash: self.output_hash_hex(),
            transformer_version: self.transformer_version,
        };
        let mut json = serde_json::to_string_pretty(&record)
            .map_err(|e| TransformError::internal(format!("serializing build info: {}", e)))?;
        json.push('\n');
        Ok(json)
    }
}

#[derive(Serialize)]
struct ProvenanceRecord<'a> {
    input_hash: String,
    output_hash: String,
    transformer_version: &'a str,
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn compute_provenance(input_json: &str, output_json: &str) -> Provenance {
    Provenance {
        input_hash: sha256(input_json),
        output_hash: sha256(output_json),
        transformer_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Holds all transformation artifacts.
pub struct TransformState<'a> {
    pub app: &'a Application,
    pub logical: Option<LogicalModel>,
    pub physical: Option<PhysicalModel>,
    pub output: Option<PhysicalApplication>,
}

impl<'a> TransformState<'a> {
    pub fn new(app: &'a Application) -> Self {
        TransformState {
            app,
            logical: None,
            physical: None,
            output: None,
        }
    }

    pub fn logical(&self) -> Result<&LogicalModel> {
        self.logical
            .as_ref()
            .ok_or_else(|| TransformError::internal("logical model not built"))
    }

    fn logical_mut(&mut self) -> Result<&mut LogicalModel> {
        self.logical
            .as_mut()
            .ok_or_else(|| TransformError::internal("logical model not built"))
    }

    pub fn physical(&self) -> Result<&PhysicalModel> {
        self.physical
            .as_ref()
            .ok_or_else(|| TransformError::internal("physical model not built"))
    }

    fn physical_mut(&mut self) -> Result<&mut PhysicalModel> {
        self.physical
            .as_mut()
            .ok_or_else(|| TransformError::internal("physical model not built"))
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// `on_pass_complete` is called after each pass with its elapsed time.
pub fn run_pipeline(
    state: &mut TransformState<'_>,
    terminal: PassId,
    options: TransformOptions,
    mut on_pass_complete: impl FnMut(PassId, std::time::Duration),
) -> Result<()> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        run_pass(state, pass_id)?;
        let elapsed = t.elapsed();
        tracing::debug!(
            pass = descriptor(pass_id).name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "pass complete"
        );
        on_pass_complete(pass_id, elapsed);

        match pass_id {
            PassId::CcRegions if options.dump_logical => {
                tracing::info!(target: "ltp::dump", "{}", dump::logical_model(state.logical()?)?);
            }
            PassId::StaticConnections if options.dump_physical => {
                tracing::info!(target: "ltp::dump", "{}", dump::physical_model(state.physical()?)?);
            }
            _ => {}
        }
    }
    Ok(())
}

fn run_pass(state: &mut TransformState<'_>, pass_id: PassId) -> Result<()> {
    match pass_id {
        PassId::Load => state.logical = Some(LogicalModel::load(state.app)?),
        PassId::ParallelTransform => state.logical_mut()?.perform_transforms()?,
        PassId::CcRegions => state.logical_mut()?.compute_cc_regions()?,
        PassId::BuildPhysical => state.physical = Some(PhysicalModel::build(state.logical()?)?),
        PassId::AssignPes => state.physical_mut()?.assign_pes()?,
        PassId::Threading => {
            let physical = state.physical_mut()?;
            physical.inject_threaded_ports()?;
            physical.fix_single_threaded()?;
        }
        PassId::AllocatePorts => state.physical_mut()?.allocate_ports()?,
        PassId::StaticConnections => state.physical_mut()?.build_static_connections()?,
        PassId::Emit => {
            let output = emit::emit(state.app, state.logical()?, state.physical()?)?;
            state.output = Some(output);
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

/// Transform a logical application into its physical description.
pub fn transform(app: &Application, options: TransformOptions) -> Result<PhysicalApplication> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut state = TransformState::new(app);
        run_pipeline(&mut state, PassId::Emit, options, |_, _| {})?;
        state
            .output
            .ok_or_else(|| TransformError::internal("physical application not emitted"))
    }));
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(conversion_error(payload.as_ref())),
    }
}

fn conversion_error(payload: &(dyn std::any::Any + Send)) -> TransformError {
    let what = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    let message = match what {
        Some(what) => format!(
            "Failed to convert logical to physical model with exception {}",
            what
        ),
        None => "Failed to convert logical to physical model with unknown error.".to_string(),
    };
    tracing::error!("{}", message);
    TransformError::Conversion { message }
}
