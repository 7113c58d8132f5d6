//! The synchronization loop: detect → fetch → build → write → checkpoint.
//!
//! One cycle is strictly sequential; no step starts before the previous one
//! finishes and no two cycles overlap. The watermark captured at cycle start
//! is committed only after the bulk write returns, so a crash at any point
//! re-processes the cycle instead of skipping it (writes are idempotent, so
//! re-processing is safe).

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::config::EtlConfig;
use crate::error::SyncError;
use crate::model::FilmworkSet;
use crate::retry::{retry_forever, Backoff};
use crate::sink::{DocumentSink, WriteReport};
use crate::source::ChangeSource;
use crate::state::{State, StateStorage};

pub struct SyncPipeline<C, D, S>
where
    C: ChangeSource,
    D: DocumentSink,
    S: StateStorage,
{
    source: C,
    sink: D,
    state: State<S>,
    backoff: Backoff,
    fetch_delay: Duration,
    log_status_period: Duration,
}

impl<C, D, S> SyncPipeline<C, D, S>
where
    C: ChangeSource,
    D: DocumentSink,
    S: StateStorage,
{
    pub fn new(etl: &EtlConfig, backoff: Backoff, source: C, sink: D, state: State<S>) -> Self {
        Self {
            source,
            sink,
            state,
            backoff,
            fetch_delay: etl.fetch_delay(),
            log_status_period: etl.log_status_period(),
        }
    }

    /// Run cycles forever, sleeping `fetch_delay` between them, until the
    /// shutdown signal flips.
    ///
    /// The signal is only consulted at cycle boundaries, so a shutdown never
    /// lands between a bulk write and its checkpoint commit.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        info!("sync loop started");
        let mut last_status = Instant::now();
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, sync loop stopping");
                return Ok(());
            }

            self.run_cycle().await?;

            if last_status.elapsed() >= self.log_status_period {
                info!("sync loop alive");
                last_status = Instant::now();
            }

            tokio::select! {
                _ = sleep(self.fetch_delay) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One full synchronization cycle.
    ///
    /// `now` is captured before detection so changes landing mid-cycle are
    /// picked up again next cycle rather than silently skipped. The
    /// checkpoint advances to that `now` even on an empty cycle, keeping the
    /// watermark monotonic.
    pub async fn run_cycle(&mut self) -> Result<WriteReport, SyncError> {
        let now = Utc::now();
        let since = self
            .state
            .last_sync()?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let source = &self.source;
        let ids = retry_forever(&self.backoff, "change detection", || {
            source.changed_ids(since)
        })
        .await?;

        if ids.is_empty() {
            debug!(%since, "no changes detected");
            self.state.set_last_sync(now)?;
            return Ok(WriteReport::default());
        }
        info!(changed = ids.len(), %since, "detected changed filmworks");

        // The whole fetch+build runs under one retry: a connection drop
        // mid-stream restarts the fetch from the top with a fresh
        // accumulator, since pages are not individually checkpointed.
        let ids_ref = &ids;
        let films = retry_forever(&self.backoff, "row fetch", || async move {
            let mut set = FilmworkSet::new();
            let mut rows = source.fetch_rows(ids_ref);
            while let Some(row) = rows.next().await {
                set.insert_row(row?);
            }
            Ok(set.into_vec())
        })
        .await?;
        info!(count = films.len(), "prepared filmworks for indexing");

        let sink = &self.sink;
        let films_ref = &films;
        let report = retry_forever(&self.backoff, "bulk upsert", || async move {
            sink.bulk_upsert(films_ref).await
        })
        .await?;

        if report.failed > 0 {
            // TODO: advance the watermark only to the oldest successfully
            // indexed updated_at so rejected documents are re-detected next
            // cycle instead of relying on a later edit to resurface them.
            error!(
                failed = report.failed,
                "documents rejected during bulk upsert; they will only be \
                 retried if detected as changed again"
            );
        }

        self.state.set_last_sync(now)?;
        debug!(watermark = %now, "checkpoint advanced");
        Ok(report)
    }
}
