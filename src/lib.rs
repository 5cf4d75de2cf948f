//! Validation, submission, and execution of cluster batch jobs.
//!
//! A job is described by a descriptor file of `key=value` directives (or the
//! `#SBATCH` header of a batch script). The `batchjob` tool validates
//! descriptors against the cluster's partitions, submits them to Slurm, and,
//! on the compute node, runs the job's payload inside its named environment.

pub mod commands;
pub mod config;
pub mod notify;
pub mod scheduler;

pub use config::Config;
