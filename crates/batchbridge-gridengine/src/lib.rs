//! Grid Engine support for batchbridge.
//!
//! Jobs are submitted with qsub, listed with `qstat -xml` and looked up in
//! accounting with `qacct -j` once they leave the listing.

pub mod dialect;
pub mod qacct;
pub mod qstat;
pub mod script;

pub use dialect::GridEngine;
pub use script::{PARALLEL_ENVIRONMENT, PARALLEL_SLOTS};
