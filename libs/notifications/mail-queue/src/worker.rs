//! The dispatch worker: a single drain loop over the work queue.
//!
//! Each iteration:
//! 1. exit if a stop was requested
//! 2. dequeue one envelope, waiting at most `dequeue_timeout`
//! 3. dispatch it to the matching [`Mailer`] method
//! 4. log and swallow any failure
//! 5. complete the item (in-flight guard, on every path)
//! 6. sleep `pacing_delay`
//!
//! Stop requests interrupt the idle wait and the pacing sleep, never a send.

use crate::config::QueueConfig;
use crate::envelope::Envelope;
use crate::error::{ErrorCategory, MailerResult};
use crate::mailer::{Mailer, SendReceipt};
use crate::queue::WorkQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Counters shared between the worker and the controller
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: AtomicU64,
    failed: AtomicU64,
    active_loops: AtomicUsize,
}

impl DispatchStats {
    /// Envelopes the mailer accepted
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Envelopes dropped after a mailer error
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Drain loops currently running
    pub fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::SeqCst)
    }
}

/// Decrements `active_loops` when the loop exits, including by unwinding.
struct ActiveLoop<'a>(&'a DispatchStats);

impl<'a> ActiveLoop<'a> {
    fn enter(stats: &'a DispatchStats) -> Self {
        stats.active_loops.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveLoop<'_> {
    fn drop(&mut self) {
        self.0.active_loops.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single consumer of a [`WorkQueue`]
pub struct DispatchWorker {
    queue: Arc<WorkQueue>,
    mailer: Arc<dyn Mailer>,
    config: QueueConfig,
    stats: Arc<DispatchStats>,
}

impl DispatchWorker {
    pub fn new(
        queue: Arc<WorkQueue>,
        mailer: Arc<dyn Mailer>,
        config: QueueConfig,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            queue,
            mailer,
            config,
            stats,
        }
    }

    /// Run the drain loop until `shutdown` turns `true` or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let _active = ActiveLoop::enter(&self.stats);
        let mailer = self.mailer.name();

        info!(
            mailer = %mailer,
            dequeue_timeout_ms = self.config.dequeue_timeout_ms(),
            pacing_ms = self.config.pacing_ms(),
            "Dispatch worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                envelope = self.queue.pop_timeout(self.config.dequeue_timeout) => envelope,
            };

            match next {
                Some(envelope) => self.process(envelope).await,
                None => debug!("Queue empty, re-checking stop flag"),
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.pacing_delay) => {}
            }
        }

        info!(
            mailer = %mailer,
            sent = self.stats.sent(),
            failed = self.stats.failed(),
            remaining = self.queue.len(),
            "Dispatch worker stopped"
        );
    }

    /// Process one envelope. Never fails: errors are logged and the item is
    /// dropped.
    async fn process(&self, envelope: Envelope) {
        let _done = self.queue.in_flight_guard();
        let kind = envelope.kind();

        debug!(kind = %kind, recipients = ?envelope.recipients(), "Dispatching email");

        match self.dispatch(&envelope).await {
            Ok(receipt) => {
                self.stats.sent.fetch_add(1, Ordering::SeqCst);
                info!(
                    kind = %kind,
                    sender = %envelope.sender(),
                    recipients = ?envelope.recipients(),
                    message_id = ?receipt.message_id,
                    "Email sent"
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                let category = e.category();
                match category {
                    ErrorCategory::Transient => warn!(
                        kind = %kind,
                        sender = %envelope.sender(),
                        recipients = ?envelope.recipients(),
                        category = %category,
                        code = ?e.code(),
                        error = %e,
                        "Dropping email after transient failure"
                    ),
                    ErrorCategory::Permanent | ErrorCategory::LocalIo => error!(
                        kind = %kind,
                        sender = %envelope.sender(),
                        recipients = ?envelope.recipients(),
                        category = %category,
                        code = ?e.code(),
                        error = %e,
                        "Dropping email"
                    ),
                }
            }
        }
    }

    async fn dispatch(&self, envelope: &Envelope) -> MailerResult<SendReceipt> {
        match envelope {
            Envelope::Regular {
                sender,
                recipients,
                subject,
                body_text,
                body_html,
            } => {
                self.mailer
                    .send_plain(sender, recipients, subject, body_text, body_html)
                    .await
            }
            Envelope::Templated {
                sender,
                recipients,
                template_name,
                template_data,
            } => {
                self.mailer
                    .send_templated(sender, recipients, template_name, template_data)
                    .await
            }
            Envelope::Attachment {
                sender,
                recipients,
                subject,
                body_text,
                body_html,
                image_path,
            } => {
                self.mailer
                    .send_with_attachment(
                        sender, recipients, subject, body_text, body_html, image_path,
                    )
                    .await
            }
        }
    }
}
