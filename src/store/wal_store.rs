use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Record;
use crate::observability;

use super::{Journal, StoreError, Tables, Wal};

enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Record, oneshot::Sender<io::Result<()>>);

/// Owns the log. Appends queued together share one fsync; a batch is applied
/// to the tables only after that fsync succeeds, so the tables never show a
/// record the log could lose. Compaction runs here too, between batches, so
/// the snapshot it writes covers exactly what the log held.
///
/// If a failed batch cannot be cut back off the log, the writer is poisoned:
/// it refuses everything from then on and the store must be reopened.
async fn writer_loop(mut wal: Wal, tables: Arc<Tables>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (record, response) = match cmd {
            WalCommand::Append { record, response } => (record, response),
            other => {
                handle_other(&mut wal, &tables, other);
                continue;
            }
        };
        let mut batch: Vec<Pending> = vec![(record, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { record, response } => batch.push((record, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        if let Err(reason) = commit_batch(&mut wal, &tables, batch) {
            if let Some(other) = deferred {
                refuse(other, &reason);
            }
            refuse_all(rx, reason).await;
            return;
        }
        if let Some(other) = deferred {
            handle_other(&mut wal, &tables, other);
        }
    }
}

/// Returns `Err` when the log may still hold frames of a failed batch.
fn commit_batch(wal: &mut Wal, tables: &Tables, batch: Vec<Pending>) -> Result<(), String> {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let start = std::time::Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            for (record, response) in batch {
                tables.apply(&record);
                let _ = response.send(Ok(()));
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("wal write failed for batch of {}: {e}", batch.len());
            let discarded = wal.discard_unsynced();
            for (_, response) in batch {
                let _ = response.send(Err(io::Error::new(e.kind(), e.to_string())));
            }
            discarded.map_err(|d| {
                tracing::error!(
                    "wal: could not discard failed batch ({d}); {} refuses further writes",
                    wal.path().display()
                );
                format!("wal poisoned: {d}")
            })
        }
    }
}

fn write_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    for (record, _) in batch {
        wal.append_buffered(record)?;
    }
    wal.sync()
}

fn handle_other(wal: &mut Wal, tables: &Tables, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let records = tables.snapshot_records();
            let result = wal.rewrite(&records).map(|()| records.len());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

fn refuse(cmd: WalCommand, reason: &str) {
    let err = || io::Error::other(reason.to_string());
    match cmd {
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(err()));
        }
        WalCommand::Compact { response } => {
            let _ = response.send(Err(err()));
        }
        // Dropping the sender reports the writer as gone.
        WalCommand::AppendsSinceCompact { .. } => {}
    }
}

/// Answer everything still queued with `reason`, then stop.
async fn refuse_all(mut rx: mpsc::Receiver<WalCommand>, reason: String) {
    rx.close();
    while let Some(cmd) = rx.recv().await {
        refuse(cmd, &reason);
    }
}

/// Tables made durable by a write-ahead log.
pub struct WalStore {
    tables: Arc<Tables>,
    tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the log at `path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, records) = Wal::open(path)?;
        let tables = Arc::new(Tables::new());
        for record in &records {
            tables.apply(record);
        }
        tracing::info!(
            "{}: replayed {} records ({} screenings, {} reservations)",
            path.display(),
            records.len(),
            tables.screening_count(),
            tables.reservation_count()
        );
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, tables.clone(), rx));
        Ok(Self { tables, tx })
    }

    async fn send<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, StoreError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| StoreError::Io("wal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("wal writer dropped response".into()))
    }

    /// Rewrite the log as the minimal record set. Returns the record count.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let (response, rx) = oneshot::channel();
        Ok(self.send(WalCommand::Compact { response }, rx).await??)
    }

    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::AppendsSinceCompact { response }, rx).await
    }
}

#[async_trait]
impl Journal for WalStore {
    fn tables(&self) -> &Tables {
        &self.tables
    }

    async fn commit(&self, record: Record) -> Result<(), StoreError> {
        let (response, rx) = oneshot::channel();
        Ok(self.send(WalCommand::Append { record, response }, rx).await??)
    }
}
