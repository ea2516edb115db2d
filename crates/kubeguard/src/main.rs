mod cli;
mod config;
mod handler;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use decision_engine::DecisionEngine;
use policy_engine::RuleStore;
use runtime_detect::EventLanes;
use ws_gateway::{Gateway, GatewayConfig};

use crate::cli::Cli;
use crate::handler::EngineHandler;

/// How long shutdown waits for queued events and audit records to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref rules) = cli.rules {
        cfg.rules_file = rules.clone();
    }
    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    if cli.check {
        return check_rules(&cfg);
    }

    info!(
        config_file = %cli.config.display(),
        rules_file = %cfg.rules_file.display(),
        listen = %cfg.network.listen_addr,
        "kubeguard starting"
    );

    // 4. Start audit logger.
    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path)
        .await
        .context("failed to start audit logger")?;

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStarted,
            AuditSource::new("kubeguard"),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
            }),
        ))
        .await;

    // 5. Build the engine and load the initial rule set.
    let engine = Arc::new(DecisionEngine::new(
        cfg.engine.engine_config(),
        Arc::new(audit.clone()),
    ));
    let snapshot = engine
        .reload_from_path(&cfg.rules_file)
        .with_context(|| format!("failed to load rules file {}", cfg.rules_file.display()))?;

    info!(
        version = snapshot.version(),
        policies = snapshot.policies().len(),
        event_rules = snapshot.event_rules().len(),
        "rules loaded"
    );

    // 6. Start event lanes and the correlation sweeper.
    let (lanes, workers) = EventLanes::start(
        cfg.engine.lanes,
        cfg.engine.lane_capacity,
        Arc::clone(&engine) as Arc<dyn runtime_detect::EventProcessor>,
    );
    info!(lanes = lanes.lane_count(), capacity = cfg.engine.lane_capacity, "event lanes started");

    let sweeper = {
        let engine = Arc::clone(&engine);
        let mut ticker = tokio::time::interval(cfg.engine.sweep_interval());
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                engine.sweep(chrono::Utc::now());
            }
        })
    };

    // 7. Reload rules on SIGHUP.
    #[cfg(unix)]
    let reloader = {
        let engine = Arc::clone(&engine);
        let rules_file = cfg.rules_file.clone();
        let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("failed to register SIGHUP handler")?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!(rules_file = %rules_file.display(), "received SIGHUP, reloading rules");
                reload(&engine, &rules_file);
            }
        })
    };

    // 8. Create WebSocket gateway.
    let listen_addr: std::net::SocketAddr = cfg
        .network
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    let gateway = Gateway::new(GatewayConfig {
        listen_addr,
        admission_timeout: cfg.engine.admission_timeout(),
        handler: Arc::new(EngineHandler::new(Arc::clone(&engine), lanes)),
        audit: Arc::new(audit.clone()),
    });

    info!(listen = %listen_addr, "starting WebSocket gateway");

    // 9. Run until the gateway fails or a shutdown signal arrives.
    let gateway_result = tokio::select! {
        r = gateway.run() => {
            info!("WebSocket gateway exited");
            r.context("gateway failed")
        }
        r = shutdown_signal() => {
            r.map(|signal| info!(signal, "shutdown requested"))
        }
    };

    // 10. Drain and log shutdown.
    info!("kubeguard shutting down");
    sweeper.abort();
    #[cfg(unix)]
    reloader.abort();
    drop(gateway);
    if tokio::time::timeout(DRAIN_TIMEOUT, workers.join()).await.is_err() {
        warn!("event lanes did not drain before shutdown");
    }

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStopped,
            AuditSource::new("kubeguard"),
            serde_json::json!({
                "gateway_result": format!("{:?}", gateway_result),
                "snapshot_version": engine.snapshot().version(),
            }),
        ))
        .await;

    drop(engine);
    drop(audit);
    if tokio::time::timeout(DRAIN_TIMEOUT, audit_handle).await.is_err() {
        warn!("audit log did not flush before shutdown");
    }

    gateway_result
}

/// Validate the rules file without starting anything.
fn check_rules(cfg: &config::Config) -> Result<()> {
    let limits = cfg.engine.engine_config().limits;
    let snapshot = RuleStore::new(limits)
        .load_file(&cfg.rules_file)
        .with_context(|| format!("rules file {} is invalid", cfg.rules_file.display()))?;

    println!(
        "{}: ok ({} policies, {} event rules)",
        cfg.rules_file.display(),
        snapshot.policies().len(),
        snapshot.event_rules().len()
    );
    Ok(())
}

#[cfg(unix)]
fn reload(engine: &DecisionEngine, rules_file: &Path) {
    match engine.reload_from_path(rules_file) {
        Ok(snapshot) => info!(version = snapshot.version(), "rules reloaded"),
        Err(err) => error!(%err, "rules reload rejected; previous rules remain active"),
    }
}

/// Resolve on ctrl-c, or SIGTERM on unix. Returns the signal name.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to register SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.map(|_| "SIGINT").context("failed to listen for ctrl-c"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        Ok("SIGINT")
    }
}
