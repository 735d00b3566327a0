//! Background worker that resumes polling when the host returns to the foreground.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use docent_core::PendingFilter;

use crate::scheduler::PollCallbacks;
use crate::tracker::JobTracker;

/// Host lifecycle events forwarded to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The host finished starting (page load, app launch).
    Load,
    /// The host became visible again.
    Visible,
    Hidden,
    /// The host window regained focus.
    Focus,
}

impl LifecycleSignal {
    pub fn triggers_resume(&self) -> bool {
        !matches!(self, LifecycleSignal::Hidden)
    }
}

/// Resumes pending jobs on every foreground signal.
pub struct ResumeWorker {
    tracker: Arc<JobTracker>,
    filter: PendingFilter,
    callbacks: PollCallbacks,
    shutdown: Arc<Notify>,
}

impl ResumeWorker {
    pub fn new(tracker: Arc<JobTracker>, filter: PendingFilter, callbacks: PollCallbacks) -> Self {
        Self {
            tracker,
            filter,
            callbacks,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops the worker once notified; take it before `start`.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Spawn the worker. It runs until shut down or until `signals` closes.
    pub fn start(self, mut signals: mpsc::Receiver<LifecycleSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("resume worker started");

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        tracing::info!("resume worker received shutdown signal");
                        break;
                    }
                    signal = signals.recv() => {
                        let Some(signal) = signal else {
                            tracing::debug!("lifecycle channel closed");
                            break;
                        };
                        if !signal.triggers_resume() {
                            continue;
                        }

                        let started = self
                            .tracker
                            .check_pending_jobs_on_resume(&self.filter, self.callbacks.clone())
                            .await;
                        tracing::debug!(?signal, started, "handled lifecycle signal");
                    }
                }
            }

            tracing::info!("resume worker stopped");
        })
    }
}
