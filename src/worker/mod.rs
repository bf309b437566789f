//! Periodic pass loop — the external timer that drives the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::pipeline::PetitionPipeline;
use crate::pipeline::types::MessageSource;

/// Spawn a background task that runs one pipeline pass per interval.
///
/// The first pass runs immediately. Returns a `JoinHandle` and a shutdown
/// flag; set the flag to stop after the current pass. A pass failure is
/// logged and the loop keeps ticking — the polling process never crashes
/// over one bad pass.
pub fn spawn_pass_loop(
    pipeline: Arc<PetitionPipeline>,
    source: Arc<dyn MessageSource>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Pass loop started — one pass every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Pass loop shutting down");
                return;
            }

            match pipeline.run_pass(source.as_ref()).await {
                Ok(summary) => {
                    if summary.fetched == 0 && summary.retried == 0 {
                        tracing::debug!("Pass found nothing to do");
                    }
                }
                Err(e) => {
                    error!("Pipeline pass failed: {e}");
                }
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::UserProfile;
    use crate::error::ChannelError;
    use crate::pipeline::ExecutionRouter;
    use crate::pipeline::types::{ContactMailer, RawMessage};
    use crate::signer::{SignAttempt, SignRequest, Signer};
    use crate::store::{LibSqlStore, RecordStore};

    struct EmptySource {
        fetches: Mutex<usize>,
    }

    #[async_trait]
    impl crate::pipeline::types::MessageSource for EmptySource {
        async fn fetch_new(&self) -> Result<Vec<RawMessage>, ChannelError> {
            *self.fetches.lock().unwrap() += 1;
            Ok(vec![])
        }
    }

    struct NeverSigner;

    #[async_trait]
    impl Signer for NeverSigner {
        async fn sign(&self, _request: &SignRequest) -> Result<SignAttempt, crate::error::SignerError> {
            Ok(SignAttempt::NoSubmitControl)
        }
    }

    struct NeverMailer;

    #[async_trait]
    impl ContactMailer for NeverMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pass_loop_runs_and_shuts_down() {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let router = ExecutionRouter::new(
            Arc::new(NeverSigner),
            Arc::new(NeverMailer),
            UserProfile::default(),
            false,
            Duration::from_secs(1),
        );
        let pipeline = Arc::new(crate::pipeline::PetitionPipeline::new(store, router, 3));
        let source = Arc::new(EmptySource { fetches: Mutex::new(0) });

        let (handle, shutdown) =
            spawn_pass_loop(pipeline, Arc::clone(&source) as Arc<dyn MessageSource>, Duration::from_millis(10));

        // Let it tick a few times, then stop it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop after shutdown flag")
            .unwrap();

        assert!(*source.fetches.lock().unwrap() >= 1);
    }
}
