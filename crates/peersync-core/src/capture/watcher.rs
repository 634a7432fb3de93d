use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::normalize::{EventNormalizer, DEFAULT_SETTLE};
use super::{ChangeCapture, RawChange};

const TICK: Duration = Duration::from_millis(100);

/// A running watcher. Dropping it stops notifications.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Wait for the event task to finish after shutdown was signalled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Watcher task failed: {}", e);
        }
    }
}

/// Watch the capture root recursively and feed notifications into `capture`
/// until `shutdown` flips to `true`.
pub fn spawn_watcher(
    capture: Arc<ChangeCapture>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<WatcherHandle> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher = RecommendedWatcher::new(
        move |result| {
            if events_tx.send(result).is_err() {
                debug!("Watcher event dropped, receiver closed");
            }
        },
        Config::default(),
    )
    .context("Failed to create filesystem watcher")?;
    watcher
        .watch(capture.root(), RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", capture.root().display()))?;
    info!("Watching {}", capture.root().display());

    let mut normalizer = EventNormalizer::seeded(capture.root(), DEFAULT_SETTLE);

    let task = tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + TICK, TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_event = events_rx.recv() => {
                    let Some(result) = maybe_event else { break };
                    match result {
                        Ok(event) => {
                            let changes = normalizer.handle(event, Instant::now().into_std());
                            record_all(&capture, changes).await;
                        }
                        Err(e) => warn!("Filesystem watcher error: {}", e),
                    }
                }
                _ = tick.tick() => {
                    let changes = normalizer.tick(Instant::now().into_std());
                    record_all(&capture, changes).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        record_all(&capture, normalizer.drain()).await;
        debug!("Watcher task stopped");
    });

    Ok(WatcherHandle {
        _watcher: watcher,
        task,
    })
}

async fn record_all(capture: &ChangeCapture, changes: Vec<RawChange>) {
    for change in changes {
        if let Err(e) = capture.record(change).await {
            error!("Failed to record change: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::ChangeJournal;
    use crate::outbox::PendingOutbox;
    use crate::types::ChangeKind;
    use tempfile::tempdir;

    async fn wait_for<F>(mut check: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for _ in 0..50 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test]
    async fn real_notifications_reach_the_outbox() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        let journal = Arc::new(
            ChangeJournal::open(root.join("change_log.jsonl"))
                .await
                .expect("journal"),
        );
        let outbox = Arc::new(PendingOutbox::new());
        let capture = Arc::new(ChangeCapture::new(
            &root,
            "node-a",
            journal.clone(),
            outbox.clone(),
            Duration::from_millis(500),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_watcher(capture, shutdown_rx).expect("watcher");

        tokio::fs::write(root.join("foo.txt"), "hi").await.unwrap();
        assert!(wait_for(|| outbox.touches("foo.txt")).await);

        tokio::fs::remove_file(root.join("foo.txt")).await.unwrap();
        assert!(
            wait_for(|| outbox
                .snapshot()
                .iter()
                .any(|r| r.kind == ChangeKind::Deleted && r.src == "foo.txt"))
            .await
        );

        shutdown_tx.send(true).unwrap();
        handle.join().await;
        assert!(journal.len().await >= 2);
    }
}
