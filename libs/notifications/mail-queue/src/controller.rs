//! Queue controller: the producer-facing API and worker lifecycle.

use crate::config::QueueConfig;
use crate::envelope::{Envelope, TemplateData};
use crate::error::QueueError;
use crate::mailer::Mailer;
use crate::queue::WorkQueue;
use crate::worker::{DispatchStats, DispatchWorker};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the dispatch worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    /// `stop()` was called and the loop has not exited yet
    Stopping,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Flips `exited` to `true` when the worker task ends, including by
/// unwinding or cancellation.
struct ExitSignal(watch::Sender<bool>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

struct RunningWorker {
    shutdown: watch::Sender<bool>,
    exited: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

enum Lifecycle {
    Stopped,
    Running(RunningWorker),
    /// The worker was taken by `stop()`, which is joining it. `exited` stays
    /// here so no new loop starts before the old one is gone.
    Stopping { exited: watch::Receiver<bool> },
}

enum StopTarget {
    Join(RunningWorker),
    AwaitExit(watch::Receiver<bool>),
    Nothing,
}

impl Lifecycle {
    fn state(&self) -> WorkerState {
        match self {
            Lifecycle::Stopped => WorkerState::Stopped,
            Lifecycle::Running(worker) if *worker.exited.borrow() => WorkerState::Stopped,
            Lifecycle::Running(_) => WorkerState::Running,
            Lifecycle::Stopping { exited } if *exited.borrow() => WorkerState::Stopped,
            Lifecycle::Stopping { .. } => WorkerState::Stopping,
        }
    }
}

/// In-process mail queue with a single paced dispatch worker.
///
/// Producers enqueue from any thread; envelopes are dispatched one at a time,
/// in FIFO order, once [`MailQueue::start`] has been called. Failed sends are
/// logged and dropped.
///
/// # Example
///
/// ```no_run
/// use mail_queue::{MailQueue, QueueConfig, RecordingMailer};
///
/// # async fn run() -> Result<(), mail_queue::QueueError> {
/// let queue = MailQueue::new(RecordingMailer::new(), QueueConfig::default());
/// queue.enqueue_regular("a@x.com", vec!["b@x.com".into()], "Hi", "t", "<p>t</p>")?;
///
/// queue.start()?;
/// queue.wait_for_completion().await;
/// queue.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct MailQueue {
    queue: Arc<WorkQueue>,
    mailer: Arc<dyn Mailer>,
    config: QueueConfig,
    stats: Arc<DispatchStats>,
    lifecycle: Mutex<Lifecycle>,
}

impl MailQueue {
    pub fn new<M: Mailer + 'static>(mailer: M, config: QueueConfig) -> Self {
        Self::with_shared_mailer(Arc::new(mailer), config)
    }

    /// Create a queue around a mailer that is also used elsewhere
    pub fn with_shared_mailer(mailer: Arc<dyn Mailer>, config: QueueConfig) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            mailer,
            config,
            stats: Arc::new(DispatchStats::default()),
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Append an envelope to the tail of the queue.
    ///
    /// Returns immediately whether or not the worker is running.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), QueueError> {
        if envelope.recipients().is_empty() {
            warn!(kind = %envelope.kind(), sender = %envelope.sender(), "Rejecting email without recipients");
            return Err(QueueError::NoRecipients);
        }

        debug!(
            kind = %envelope.kind(),
            recipients = ?envelope.recipients(),
            "Email queued"
        );
        self.queue.push(envelope);
        Ok(())
    }

    pub fn enqueue_regular(
        &self,
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        body_html: impl Into<String>,
    ) -> Result<(), QueueError> {
        self.enqueue(Envelope::regular(
            sender, recipients, subject, body_text, body_html,
        ))
    }

    pub fn enqueue_templated(
        &self,
        sender: impl Into<String>,
        recipients: Vec<String>,
        template_name: impl Into<String>,
        template_data: TemplateData,
    ) -> Result<(), QueueError> {
        self.enqueue(Envelope::templated(
            sender,
            recipients,
            template_name,
            template_data,
        ))
    }

    pub fn enqueue_attachment(
        &self,
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        body_html: impl Into<String>,
        image_path: impl Into<PathBuf>,
    ) -> Result<(), QueueError> {
        self.enqueue(Envelope::attachment(
            sender, recipients, subject, body_text, body_html, image_path,
        ))
    }

    /// Spawn the dispatch worker on the current Tokio runtime.
    ///
    /// Does nothing if the worker is already running. A worker that exited
    /// on its own (a panicking mailer) is replaced. Returns
    /// [`QueueError::StopInProgress`] while a `stop()` is still joining the
    /// previous worker.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state() {
            WorkerState::Running => {
                debug!("Dispatch worker already running");
                return Ok(());
            }
            WorkerState::Stopping => {
                warn!("Refusing to start while the previous dispatch worker is stopping");
                return Err(QueueError::StopInProgress);
            }
            WorkerState::Stopped => {
                if matches!(*lifecycle, Lifecycle::Running(_)) {
                    warn!("Dispatch worker exited unexpectedly, restarting");
                }
            }
        }

        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (exited_tx, exited) = watch::channel(false);
        let worker = DispatchWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.mailer),
            self.config.clone(),
            Arc::clone(&self.stats),
        );
        let handle = runtime.spawn(async move {
            let _exited = ExitSignal(exited_tx);
            worker.run(shutdown_rx).await;
        });

        *lifecycle = Lifecycle::Running(RunningWorker {
            shutdown,
            exited,
            handle,
        });
        info!(
            mailer = %self.mailer.name(),
            pending = self.queue.len(),
            "Mail queue started"
        );
        Ok(())
    }

    /// Signal the worker to stop and wait for it to exit.
    ///
    /// A send already in progress finishes first. Envelopes still queued stay
    /// queued and are picked up by the next [`MailQueue::start`]. A second
    /// concurrent `stop()` waits for the same exit.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let target = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(worker) => {
                    *lifecycle = Lifecycle::Stopping {
                        exited: worker.exited.clone(),
                    };
                    StopTarget::Join(worker)
                }
                Lifecycle::Stopping { exited } => {
                    *lifecycle = Lifecycle::Stopping {
                        exited: exited.clone(),
                    };
                    StopTarget::AwaitExit(exited)
                }
                Lifecycle::Stopped => StopTarget::Nothing,
            }
        };

        let worker = match target {
            StopTarget::Join(worker) => worker,
            StopTarget::AwaitExit(mut exited) => {
                debug!("Mail queue already stopping, waiting for worker exit");
                // The sender is dropped only after it sent `true`.
                let _ = exited.wait_for(|done| *done).await;
                return Ok(());
            }
            StopTarget::Nothing => {
                debug!("Mail queue not running");
                return Ok(());
            }
        };

        info!("Stopping mail queue");
        // The receiver is gone if the task already exited; joining reports why.
        let _ = worker.shutdown.send(true);
        let joined = worker.handle.await;

        {
            let mut lifecycle = self.lifecycle.lock();
            if matches!(*lifecycle, Lifecycle::Stopping { .. }) {
                *lifecycle = Lifecycle::Stopped;
            }
        }

        match joined {
            Ok(()) => {
                info!(pending = self.queue.len(), "Mail queue stopped");
                Ok(())
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(error = %message, "Dispatch worker panicked");
                Err(QueueError::WorkerPanicked(message))
            }
            Err(e) => {
                warn!(error = %e, "Dispatch worker was cancelled");
                Ok(())
            }
        }
    }

    /// Wait until every enqueued envelope has been handled.
    ///
    /// Does not stop the worker. Returns immediately when nothing is in
    /// flight; without a running worker it waits until one is started.
    pub async fn wait_for_completion(&self) {
        self.queue.wait_drained().await;
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.lock().state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Envelopes queued and not yet dequeued
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Envelopes queued or being dispatched
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Live drain loops; never more than one
    pub fn active_workers(&self) -> usize {
        self.stats.active_loops()
    }

    /// Sent/failed counters across the queue's lifetime
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
