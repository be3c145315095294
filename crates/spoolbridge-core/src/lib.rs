//! spoolbridge-core: host side of a batch bridge to an out-of-process worker
//!
//! Records travel as length-delimited frames inside numbered spool files,
//! and the paths of finished files travel over a pair of named pipes.
//!
//! # Architecture
//!
//! ```text
//! enqueue → Producer → <prefix>_<id> files ─┐
//!              │  path\n                    │
//!              └──────► input FIFO ──► Worker ──► output FIFO ──► Consumer → next
//!                                            ▲                     │
//!                                            └── progress (watch) ─┘
//!
//! process_batch → <prefix>_adhoc-<uuid> → Worker::process_one_batch (polled)
//! ```
//!
//! # Modules
//!
//! - `framer`: Length-delimited record encoding and batch files
//! - `spool`: Spool file naming and cleanup guards
//! - `batch`: Per-batch lifecycle states and outstanding-batch arithmetic
//! - `control`: Line-oriented path announcements and FIFO opening
//! - `progress`: Consumer progress and shutdown signalling
//! - `producer`: Streaming producer with backpressure
//! - `consumer`: Streaming consumer with deferred deletion
//! - `retry`: Bounded polling
//! - `sync_bridge`: Ad-hoc batch request/response
//! - `worker`: Worker contract and background run
//! - `lifecycle`: The `Bridge` tying everything together
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//! - `error`: Error types and remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod batch;
pub mod config;
pub mod consumer;
pub mod control;
pub mod error;
pub mod framer;
#[cfg(unix)]
pub mod lifecycle;
pub mod logging;
pub mod producer;
pub mod progress;
pub mod retry;
pub mod spool;
pub mod sync_bridge;
pub mod worker;

pub use batch::{BatchId, BatchState};
pub use config::BridgeConfig;
pub use consumer::{ConsumerStats, StreamConsumer};
pub use error::{Error, Result};
pub use framer::Record;
#[cfg(unix)]
pub use lifecycle::{Bridge, BridgeStats};
pub use producer::{ProducerStats, StreamProducer};
pub use sync_bridge::BatchProcessor;
pub use worker::{WORKER_STATUS_UNSET, Worker, WorkerPaths};
