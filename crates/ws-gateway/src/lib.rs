//! WebSocket ingest for kubeguard.
//!
//! Clients open a WebSocket and exchange JSON text frames tagged by `type`:
//!
//! ```text
//! -> {"type":"admission","id":"1","request":{...}}
//! <- {"type":"verdict","id":"1","verdict":{...}}
//! -> {"type":"event","event":{...}}           (no reply)
//! <- {"type":"error","id":"2","reason":"..."} (malformed frame; id if readable)
//! ```
//!
//! Admission decisions run on the blocking pool under a timeout; an
//! overrun or a failed evaluation task is answered with a fail-safe deny,
//! and so is an admission frame that does not decode but still carries a
//! readable `id`. Only the verdict actually sent is recorded. Events are
//! handed to the [`RequestHandler`] in arrival order.

pub mod error;
pub mod listener;
pub mod protocol;

pub use error::GatewayError;
pub use listener::{Gateway, GatewayConfig};
pub use protocol::{ClientFrame, ConnectionContext, FrameHeader, RequestHandler, ServerFrame};
