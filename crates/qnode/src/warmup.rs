//! Startup warmup gate

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One-shot timer raised at startup
///
/// While warming, corrective actions that depend on a complete view of the
/// cluster are deferred. The flag always ends up `false`, whether the timer
/// elapses or is interrupted by `close`.
pub struct WarmupGate {
    warming: Arc<AtomicBool>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WarmupGate {
    pub fn start(duration: Duration) -> Self {
        if duration.is_zero() {
            return Self {
                warming: Arc::new(AtomicBool::new(false)),
                cancel: Mutex::new(None),
                task: Mutex::new(None),
            };
        }

        let warming = Arc::new(AtomicBool::new(true));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let flag = warming.clone();

        info!(
            "Currently warming up for {:?}, certain actions will only be taken afterwards",
            duration
        );
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    info!("Warming time ended, operating normally");
                }
                _ = cancel_rx => {
                    warn!("Warming time interrupted");
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Self {
            warming,
            cancel: Mutex::new(Some(cancel_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_warming(&self) -> bool {
        self.warming.load(Ordering::SeqCst)
    }

    /// Interrupt the timer and wait for it to finish
    pub async fn close(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Warmup task ended abnormally: {}", e);
            }
        }
        self.warming.store(false, Ordering::SeqCst);
    }
}
