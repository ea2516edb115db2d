use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use audit_log::{AuditEntry, AuditEventType, AuditRecorder, AuditSource, PolicyDecisionRecord};
use futures_util::{SinkExt, StreamExt};
use policy_engine::{AdmissionRequest, Verdict};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::GatewayError;
use crate::protocol::{ClientFrame, ConnectionContext, FrameHeader, RequestHandler, ServerFrame};

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Configuration for the WebSocket gateway.
pub struct GatewayConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// Upper bound on one admission evaluation. Exceeding it yields a
    /// fail-safe deny.
    pub admission_timeout: Duration,
    pub handler: Arc<dyn RequestHandler>,
    pub audit: Arc<dyn AuditRecorder>,
}

/// The WebSocket ingest server.
///
/// Each connection reads JSON text frames: admission requests are decided
/// concurrently and answered on the same socket, runtime events are handed
/// to the handler in the order they arrive.
pub struct Gateway {
    config: Arc<GatewayConfig>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: self.config.listen_addr,
                source,
            })
    }

    /// Bind `listen_addr` and serve until an accept error.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "ws-gateway listening");
        }

        loop {
            let (stream, remote_addr) = listener.accept().await.map_err(GatewayError::Accept)?;
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, config).await {
                    tracing::error!(%remote_addr, %err, "connection handler error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<GatewayConfig>,
) -> Result<(), GatewayError> {
    let ctx = ConnectionContext {
        connection_id: uuid::Uuid::new_v4(),
        remote_addr,
    };

    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(GatewayError::Handshake)?;

    tracing::info!(connection_id = %ctx.connection_id, %remote_addr, "client connected");
    config.audit.record(AuditEntry::new(
        AuditEventType::ConnectionOpened,
        make_source(&ctx),
        serde_json::json!({ "remote_addr": remote_addr.to_string() }),
    ));

    let (mut writer, mut reader) = ws.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    let connection_id = ctx.connection_id;
    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(%connection_id, %err, "dropping unencodable frame");
                    continue;
                }
            };
            if writer.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    });

    while let Some(msg_result) = reader.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(connection_id = %ctx.connection_id, %err, "read error, closing connection");
                break;
            }
        };

        match msg {
            Message::Text(text) => match ClientFrame::parse(&text) {
                Ok(ClientFrame::Admission { id, request }) => {
                    let config = Arc::clone(&config);
                    let tx = tx.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let verdict = decide(&config, &ctx, request).await;
                        let _ = tx.send(ServerFrame::Verdict { id, verdict }).await;
                    });
                }
                Ok(ClientFrame::Event { event }) => {
                    if let Err(err) = config.handler.ingest(event).await {
                        tracing::warn!(connection_id = %ctx.connection_id, %err, "event not queued");
                    }
                }
                Err(err) => {
                    let reply = reject(&config, &ctx, &text, &err);
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
            },
            Message::Binary(_) => {
                let _ = tx.send(ServerFrame::error(None, "binary frames are not supported")).await;
            }
            Message::Close(_) => break,
            // Ping/pong are answered by tungstenite itself.
            _ => {}
        }
    }

    drop(tx);
    if let Err(err) = write_task.await {
        tracing::debug!(connection_id = %ctx.connection_id, %err, "writer task ended");
    }

    tracing::info!(connection_id = %ctx.connection_id, %remote_addr, "connection closed");
    config.audit.record(AuditEntry::new(
        AuditEventType::ConnectionClosed,
        make_source(&ctx),
        serde_json::json!({ "remote_addr": remote_addr.to_string() }),
    ));

    Ok(())
}

/// Run the handler's admission decision on the blocking pool under the
/// configured timeout. Anything but a verdict from the handler is a
/// fail-safe deny. Exactly one verdict is recorded: the one returned.
async fn decide(config: &GatewayConfig, ctx: &ConnectionContext, request: AdmissionRequest) -> Verdict {
    let request = Arc::new(request);
    let task = {
        let handler = Arc::clone(&config.handler);
        let request = Arc::clone(&request);
        tokio::task::spawn_blocking(move || handler.evaluate(&request))
    };

    let verdict = match tokio::time::timeout(config.admission_timeout, task).await {
        Ok(Ok(verdict)) => verdict,
        // An abandoned evaluation keeps running but records nothing.
        outcome => {
            let fault = match outcome {
                Ok(Err(err)) => format!("evaluation task failed: {err}"),
                _ => format!("evaluation exceeded {}ms", config.admission_timeout.as_millis()),
            };
            tracing::warn!(connection_id = %ctx.connection_id, uid = %request.uid, %fault, "admission fail-safe deny");
            Verdict::fail_safe(config.handler.snapshot_version(), fault)
        }
    };

    config.handler.record(&request, &verdict);
    verdict
}

/// Answer a text frame that failed to decode. An admission whose `id` is
/// still readable gets a fail-safe deny under that id so the caller is
/// never left waiting; anything else gets an error frame.
fn reject(config: &GatewayConfig, ctx: &ConnectionContext, text: &str, err: &GatewayError) -> ServerFrame {
    let header = FrameHeader::salvage(text);
    tracing::debug!(connection_id = %ctx.connection_id, %err, id = ?header.id, "rejecting frame");

    let is_admission = header.is_admission();
    let id = match header.id {
        Some(id) if is_admission => id,
        id => return ServerFrame::error(id, err.to_string()),
    };

    let verdict = Verdict::fail_safe(config.handler.snapshot_version(), err.to_string());
    let mut source = make_source(ctx);
    if let Some(uid) = &header.request_uid {
        source = source.with_request_uid(uid);
    }
    config.audit.record(
        AuditEntry::new(
            AuditEventType::AdmissionDenied,
            source,
            serde_json::json!({ "frame_id": id, "fault": verdict.fault }),
        )
        .with_policy_decision(PolicyDecisionRecord {
            outcome: verdict.outcome.as_str().to_string(),
            rule_ids: Vec::new(),
            reason: verdict.reason(),
            snapshot_version: verdict.snapshot_version,
        }),
    );
    ServerFrame::Verdict { id, verdict }
}

fn make_source(ctx: &ConnectionContext) -> AuditSource {
    AuditSource::new("ws-gateway").with_connection(ctx.connection_id, ctx.remote_addr)
}
