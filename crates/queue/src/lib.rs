pub mod job;
pub mod log;
pub mod queue;
pub mod worker;

pub use job::{JobOperation, JobOptions, JobProgress, JobRecord, JobStatus};
pub use queue::{EnqueueOutcome, EnqueueRequest, JobQueue, QueueStatus};
pub use worker::{JobOutcome, JobRunner, Worker, WorkerConfig};
