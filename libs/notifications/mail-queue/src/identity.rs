//! Sender identity management for AWS SES.
//!
//! SES only sends from verified identities. These helpers check, request,
//! wait for and remove email-address identities.

use crate::error::MailerResult;
use crate::mailer::ses::{classify_sdk_error, SesConfig};
use aws_sdk_sesv2::error::ProvideErrorMetadata;
use aws_sdk_sesv2::types::VerificationStatus;
use aws_sdk_sesv2::Client;
use core_config::FromEnv;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Verification state of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    Success,
    Pending,
    Failed,
    TemporaryFailure,
    NotStarted,
    /// SES has no such identity
    NotFound,
}

impl IdentityStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, IdentityStatus::Success)
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentityStatus::Success => "Success",
            IdentityStatus::Pending => "Pending",
            IdentityStatus::Failed => "Failed",
            IdentityStatus::TemporaryFailure => "TemporaryFailure",
            IdentityStatus::NotStarted => "NotStarted",
            IdentityStatus::NotFound => "NotFound",
        };
        f.write_str(s)
    }
}

impl From<&VerificationStatus> for IdentityStatus {
    fn from(status: &VerificationStatus) -> Self {
        match status {
            VerificationStatus::Success => IdentityStatus::Success,
            VerificationStatus::Pending => IdentityStatus::Pending,
            VerificationStatus::Failed => IdentityStatus::Failed,
            VerificationStatus::TemporaryFailure => IdentityStatus::TemporaryFailure,
            _ => IdentityStatus::NotStarted,
        }
    }
}

/// SES identity operations
#[derive(Clone)]
pub struct SesIdentity {
    client: Client,
}

impl SesIdentity {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create from environment variables and the AWS SDK config chain
    pub async fn from_env() -> MailerResult<Self> {
        let config = SesConfig::from_env()?;
        Ok(Self::new(config.client().await))
    }

    /// Current verification status of `email`
    pub async fn identity_status(&self, email: &str) -> MailerResult<IdentityStatus> {
        let result = self
            .client
            .get_email_identity()
            .email_identity(email)
            .send()
            .await;

        match result {
            Ok(output) => {
                let status = output
                    .verification_status()
                    .map(IdentityStatus::from)
                    .unwrap_or(IdentityStatus::NotStarted);
                debug!(email = %email, status = %status, "Fetched SES identity status");
                Ok(status)
            }
            Err(e) if e.code() == Some("NotFoundException") => Ok(IdentityStatus::NotFound),
            Err(e) => Err(classify_sdk_error("get identity", &e)),
        }
    }

    /// Ask SES to send a verification email to `email`
    pub async fn verify_email_identity(&self, email: &str) -> MailerResult<()> {
        let result = self
            .client
            .create_email_identity()
            .email_identity(email)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(email = %email, "Requested SES identity verification");
                Ok(())
            }
            Err(e) if e.code() == Some("AlreadyExistsException") => {
                warn!(email = %email, "SES identity already exists");
                Ok(())
            }
            Err(e) => Err(classify_sdk_error("create identity", &e)),
        }
    }

    /// Poll every `interval` until `email` is verified or `timeout` elapses.
    ///
    /// Returns whether the identity ended up verified.
    pub async fn wait_until_verified(
        &self,
        email: &str,
        interval: Duration,
        timeout: Duration,
    ) -> MailerResult<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            let status = self.identity_status(email).await?;
            if status.is_verified() {
                info!(email = %email, "SES identity verified");
                return Ok(true);
            }
            if matches!(status, IdentityStatus::Failed) || Instant::now() + interval > deadline {
                warn!(email = %email, status = %status, "SES identity not verified");
                return Ok(false);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Remove `email` from SES
    pub async fn delete_identity(&self, email: &str) -> MailerResult<()> {
        self.client
            .delete_email_identity()
            .email_identity(email)
            .send()
            .await
            .map_err(|e| classify_sdk_error("delete identity", &e))?;

        info!(email = %email, "Deleted SES identity");
        Ok(())
    }
}
