//! Slurm support for batchbridge.
//!
//! Jobs are submitted with sbatch and tracked through squeue, sacct (or
//! `scontrol show job` when accounting is off) and sinfo.

pub mod dialect;
pub mod sacct;
pub mod script;
pub mod sinfo;
pub mod squeue;
pub mod types;

pub use dialect::Slurm;
pub use types::SlurmJobState;
