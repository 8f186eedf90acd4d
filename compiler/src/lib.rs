// ltp - Logical-to-physical transformer
//
// Library root. `pipeline::transform` loads the logical model, replicates
// parallel regions, computes consistent regions, builds and places the
// physical model, then emits the physical application description.

pub mod adl;
pub mod connect;
pub mod consistent;
pub mod diag;
pub mod dump;
pub mod emit;
pub mod expr;
pub mod expr_lexer;
pub mod hostpool;
pub mod id;
pub mod load;
pub mod model;
pub mod padl;
pub mod parallel;
pub mod pass;
pub mod physical;
pub mod pipeline;
pub mod placement;
pub mod streams;

pub use diag::TransformError;
pub use pipeline::{transform, TransformOptions};
