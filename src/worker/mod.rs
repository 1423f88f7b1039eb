//! Recording worker
//!
//! The supervisor resets the shared status on startup, recovers scratch
//! files from a crashed run, then serializes commands arriving on two intake
//! paths (live subscription and legacy queue) into one processing routine.

mod intake;
mod supervisor;

pub use intake::Origin;
pub use supervisor::{CommandOutcome, Supervisor, WorkerConfig};
