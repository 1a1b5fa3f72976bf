//! Torque/PBS support for batchbridge.
//!
//! Torque keeps finished jobs in `qstat -x` for a while with state `C`, so
//! the listing doubles as the terminal record and there is no separate
//! accounting query.

pub mod dialect;
pub mod qstat;
pub mod script;

pub use dialect::Torque;
pub use script::RESOURCES;
