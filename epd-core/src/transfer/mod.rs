//! # transfer: chunked delivery over the command characteristic
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `job`      | `TransferJob`, chunking and the acknowledgement plan |
//! | `progress` | Progress events, reports, cancellation handle        |
//! | `engine`   | `TransferEngine`, the sequential write loop          |

pub mod engine;
pub mod job;
pub mod progress;

pub use engine::{ChunkSink, TransferEngine};
pub use job::{AckSchedule, JobKind, TransferJob};
pub use progress::{
    TransferControl, TransferEvent, TransferOutcome, TransferProgress, TransferReport,
};
