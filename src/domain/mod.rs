//! Domain types for sjq
//!
//! Job records, lifecycle states and memory quantities.

pub mod job;
pub mod mem;

pub use job::{DEFAULT_JOB_NAME, JobId, JobRecord, JobRequest, JobState, NewJob};
pub use mem::{MemLimit, format_mem, parse_mem};
