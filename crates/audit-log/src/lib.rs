//! Audit records for kubeguard.
//!
//! Every admission verdict, runtime alert, dropped event and rule reload is
//! described by an [`AuditEntry`] and handed to an [`AuditRecorder`]. The
//! production recorder is [`AuditSink`], which serialises entries as
//! [JSON Lines](https://jsonlines.org/) through a background writer task.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditRecorder, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/kubeguard/audit.jsonl").await?;
//!
//! sink.record(AuditEntry::new(
//!     AuditEventType::ProcessStarted,
//!     AuditSource::new("kubeguard"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ));
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod recorder;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, AuditSource, PolicyDecisionRecord};
pub use recorder::{AuditRecorder, MemoryRecorder};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
