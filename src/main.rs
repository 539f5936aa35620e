use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use seatlock::clock::SystemClock;
use seatlock::coordinator::{BookingPolicy, Coordinator};
use seatlock::store::{Store, WalStore};
use seatlock::{sweeper, wire};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("SEATLOCK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    seatlock::observability::init(metrics_port);

    let port = std::env::var("SEATLOCK_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("SEATLOCK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("SEATLOCK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("SEATLOCK_PASSWORD").unwrap_or_else(|_| "seatlock".into());
    let max_connections: usize = env_or("SEATLOCK_MAX_CONNECTIONS", 256);
    let compact_threshold: u64 = env_or("SEATLOCK_COMPACT_THRESHOLD", 1000);
    let cutoff_ms: i64 = env_or("SEATLOCK_CUTOFF_MS", 0);
    let sweep_secs: u64 = env_or("SEATLOCK_SWEEP_SECS", 60);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("seatlock.wal");
    let store = Arc::new(WalStore::open(&wal_path)?);
    let coordinator = Arc::new(
        Coordinator::new(store.clone() as Arc<dyn Store>, Arc::new(SystemClock))
            .with_policy(BookingPolicy::new(cutoff_ms)),
    );
    let rebuilt = coordinator.rebuild_ledger().await?;
    if !rebuilt.conflicts.is_empty() {
        tracing::warn!(
            "{} seats are claimed by more than one active reservation; they stay unsellable",
            rebuilt.conflicts.len()
        );
    }

    let background = CancellationToken::new();
    let sweep_every = Duration::from_secs(sweep_secs.max(1));
    let completer = tokio::spawn(sweeper::run_completer(
        coordinator.clone(),
        sweep_every,
        background.clone(),
    ));
    let compactor = tokio::spawn(sweeper::run_compactor(
        store.clone(),
        compact_threshold,
        sweep_every,
        background.clone(),
    ));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("seatlock listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  max_connections: {max_connections}");
    info!("  booking cutoff: {}ms", coordinator.policy().cutoff_ms);
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(seatlock::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(seatlock::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(seatlock::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let coord = coordinator.clone();
                let pw = password.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, coord, pw).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(seatlock::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    background.cancel();
    let _ = tokio::join!(completer, compactor);
    info!("seatlock stopped");
    Ok(())
}
