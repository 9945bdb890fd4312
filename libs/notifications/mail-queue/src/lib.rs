//! In-process outbound mail queue
//!
//! Producers enqueue [`Envelope`]s (regular, templated, or with an inline
//! image attachment). A single background worker drains the queue in FIFO
//! order, sends each envelope through a [`Mailer`] and sleeps a fixed pacing
//! delay between iterations. Send failures are logged and dropped; they never
//! stop the worker.
//!
//! ## Architecture
//!
//! ```text
//! producers ──enqueue_*──► WorkQueue ──► DispatchWorker ──► Mailer
//!                             │                                ├─ SesMailer
//!                             └─ in-flight counter             ├─ SmtpMailer
//!                                 (wait_for_completion)        └─ RecordingMailer
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use mail_queue::{MailQueue, QueueConfig, SesMailer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mailer = SesMailer::from_env().await?;
//! let queue = MailQueue::new(mailer, QueueConfig::default());
//!
//! queue.enqueue_regular("a@x.com", vec!["b@x.com".into()], "Hi", "t", "<p>t</p>")?;
//! queue.start()?;
//! queue.wait_for_completion().await;
//! queue.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod mailer;
pub mod mime;
pub mod queue;
pub mod templates;
pub mod worker;

pub use config::QueueConfig;
pub use controller::{MailQueue, WorkerState};
pub use envelope::{Envelope, EnvelopeKind, TemplateData};
pub use error::{ErrorCategory, MailerError, MailerResult, QueueError};
pub use identity::{IdentityStatus, SesIdentity};
pub use mailer::{
    Mailer, RecordingMailer, SendReceipt, SentMail, SesConfig, SesMailer, SmtpConfig, SmtpMailer,
};
pub use templates::{LocalTemplates, MailTemplate, RenderedTemplate, SesTemplates};
pub use worker::DispatchStats;
