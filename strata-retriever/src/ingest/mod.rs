//! Write side of the pipeline: the durable task queue, the single-owner
//! processor lock, content sources, and the processor that drains the queue.

pub mod lock;
pub mod processor;
pub mod source;
pub mod task_queue;

pub use lock::{LockToken, OwnerLiveness, PidLiveness, ProcessorLock};
pub use processor::{DrainStats, IngestProcessor};
pub use source::{ContentSource, FsContentSource};
pub use task_queue::{QueueStats, TaskKind, TaskQueue, TaskRecord, TaskStatus};
