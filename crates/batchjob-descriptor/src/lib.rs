//! Parsing and validation of cluster job submission descriptors.
//!
//! A descriptor declares the resources a job needs (a wall-clock limit, a
//! partition, accelerators, and memory), who to notify about it, the named
//! environment it runs in, and the single command it runs.
//!
//! Descriptors are parsed into an immutable [`JobRequest`] by
//! [`JobRequest::parse`], which checks every directive against a
//! [`PartitionRegistry`] without contacting the cluster:
//!
//! ```
//! use batchjob_descriptor::JobRequest;
//! use batchjob_descriptor::PartitionRegistry;
//!
//! let request = JobRequest::parse_str(
//!     "name=finetune\ntime_limit=2-00:00:00\npartition=gpu\naccelerator=a100:1\nmemory=128G\n",
//!     &PartitionRegistry::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(request.partition(), "gpu");
//! assert_eq!(request.accelerator().unwrap().count, 1);
//! ```
//!
//! The [`sbatch`] module translates a request into a Slurm submission.

mod directive;
mod error;
mod notify;
mod partition;
mod request;
pub mod sbatch;
mod units;

pub use directive::*;
pub use error::ValidationError;
pub use notify::*;
pub use partition::*;
pub use request::*;
pub use units::*;
