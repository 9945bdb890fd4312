//! mail-dispatch
//!
//! Command-line host for the mail queue.
//!
//! ## Architecture
//!
//! ```text
//! CLI args
//!   ↓ (send | templated | attachment)
//! MailQueue::enqueue_* → start → wait_for_completion → stop
//!   ↓
//! Mailer (AWS SES v2 or SMTP)
//! ```
//!
//! SES admin commands (`identity`, `template`) talk to SES directly.
//!
//! ## Environment
//!
//! - `MAIL_PROVIDER`: `ses` (default) or `smtp`
//! - `MAIL_QUEUE_DEQUEUE_TIMEOUT_MS`, `MAIL_QUEUE_PACING_MS`
//! - SES: `AWS_SES_REGION` / `AWS_REGION`, AWS credential chain
//! - SMTP: `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_USE_TLS`

use clap::{Args, Parser, Subcommand, ValueEnum};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr, bail};
use mail_queue::{
    MailQueue, MailTemplate, Mailer, QueueConfig, SesIdentity, SesMailer, SesTemplates,
    SmtpMailer, TemplateData,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_LOG_DIRECTIVES: &str = "info,mail_queue=debug,mail_dispatch=debug";

/// How often `identity verify --wait` polls SES
const VERIFY_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "mail-dispatch")]
#[command(about = "Queue and send emails through AWS SES or SMTP")]
pub struct Cli {
    /// Mail provider
    #[arg(long, value_enum, env = "MAIL_PROVIDER", default_value_t = Provider::Ses, global = true)]
    pub provider: Provider,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ses,
    Smtp,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a subject with text and HTML bodies
    Send {
        #[command(flatten)]
        message: MessageArgs,
    },

    /// Send a templated email
    Templated {
        #[arg(long)]
        from: String,

        /// Recipient address (repeatable)
        #[arg(long = "to", required = true)]
        to: Vec<String>,

        /// Template name
        #[arg(long)]
        template: String,

        /// Template variable as key=value (repeatable)
        #[arg(long = "data", value_parser = parse_key_value)]
        data: Vec<(String, String)>,

        /// JSON template definition, rendered locally by the SMTP provider
        #[arg(long)]
        template_file: Option<PathBuf>,
    },

    /// Send text and HTML bodies with an inline image
    Attachment {
        #[command(flatten)]
        message: MessageArgs,

        /// Image to attach inline (referenced as cid:instai_web_image)
        #[arg(long)]
        image: PathBuf,
    },

    /// Manage SES sender identities
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Manage SES templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Args, Debug)]
pub struct MessageArgs {
    #[arg(long)]
    pub from: String,

    /// Recipient address (repeatable)
    #[arg(long = "to", required = true)]
    pub to: Vec<String>,

    #[arg(long)]
    pub subject: String,

    #[arg(long, default_value = "")]
    pub text: String,

    #[arg(long, default_value = "")]
    pub html: String,
}

#[derive(Subcommand, Debug)]
pub enum IdentityAction {
    /// Show the verification status of an address
    Status { email: String },

    /// Request verification of an address
    Verify {
        email: String,

        /// Wait up to this many seconds for the address to be verified
        #[arg(long)]
        wait: Option<u64>,
    },

    /// Remove an address
    Delete { email: String },
}

#[derive(Subcommand, Debug)]
pub enum TemplateAction {
    /// Create a template
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        text: String,

        #[arg(long)]
        html: String,
    },

    /// Delete a template
    Delete { name: String },
}

/// Parse a `key=value` pair. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;

    if key.trim().is_empty() {
        return Err(format!("empty key in `{s}`"));
    }

    Ok((key.trim().to_string(), value.to_string()))
}

/// Parse arguments, set up tracing and execute the command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment, DEFAULT_LOG_DIRECTIVES);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        provider = ?cli.provider,
        "Starting mail-dispatch"
    );

    execute(cli).await
}

/// Execute a parsed command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Send { message } => {
            let queue = build_queue(cli.provider, None).await?;
            queue.enqueue_regular(
                message.from,
                message.to,
                message.subject,
                message.text,
                message.html,
            )?;
            dispatch(queue).await
        }

        Command::Templated {
            from,
            to,
            template,
            data,
            template_file,
        } => {
            let local_template = template_file.map(load_template).transpose()?;
            let queue = build_queue(cli.provider, local_template).await?;
            let data: TemplateData = data.into_iter().collect();
            queue.enqueue_templated(from, to, template, data)?;
            dispatch(queue).await
        }

        Command::Attachment { message, image } => {
            let queue = build_queue(cli.provider, None).await?;
            queue.enqueue_attachment(
                message.from,
                message.to,
                message.subject,
                message.text,
                message.html,
                image,
            )?;
            dispatch(queue).await
        }

        Command::Identity { action } => {
            require_ses(cli.provider, "identity")?;
            let identity = SesIdentity::from_env()
                .await
                .wrap_err("Failed to configure AWS SES")?;
            run_identity(&identity, action).await
        }

        Command::Template { action } => {
            require_ses(cli.provider, "template")?;
            let templates = SesTemplates::from_env()
                .await
                .wrap_err("Failed to configure AWS SES")?;
            run_template(&templates, action).await
        }
    }
}

async fn build_queue(provider: Provider, template: Option<MailTemplate>) -> Result<MailQueue> {
    let config = QueueConfig::from_env().wrap_err("Failed to load queue configuration")?;

    let mailer: Arc<dyn Mailer> = match provider {
        Provider::Ses => {
            if template.is_some() {
                warn!("--template-file is ignored by SES; templates are stored server-side");
            }
            Arc::new(
                SesMailer::from_env()
                    .await
                    .wrap_err("Failed to configure AWS SES")?,
            )
        }
        Provider::Smtp => {
            let mut mailer = SmtpMailer::from_env().wrap_err("Failed to configure SMTP")?;
            if let Some(template) = template {
                mailer = mailer
                    .with_template(template)
                    .wrap_err("Failed to register template")?;
            }
            Arc::new(mailer)
        }
    };

    info!(
        mailer = %mailer.name(),
        dequeue_timeout_ms = config.dequeue_timeout_ms(),
        pacing_ms = config.pacing_ms(),
        "Mail queue configured"
    );

    Ok(MailQueue::with_shared_mailer(mailer, config))
}

/// Drain everything queued, then shut the worker down.
async fn dispatch(queue: MailQueue) -> Result<()> {
    queue.start()?;
    queue.wait_for_completion().await;
    queue.stop().await?;

    let stats = queue.stats();
    info!(sent = stats.sent(), failed = stats.failed(), "Dispatch complete");

    if stats.failed() > 0 {
        bail!(
            "{} of {} emails failed to send",
            stats.failed(),
            stats.sent() + stats.failed()
        );
    }

    Ok(())
}

fn load_template(path: PathBuf) -> Result<MailTemplate> {
    let raw = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("Failed to read template file {}", path.display()))?;
    serde_json::from_str(&raw)
        .wrap_err_with(|| format!("Invalid template file {}", path.display()))
}

fn require_ses(provider: Provider, command: &str) -> Result<()> {
    if provider != Provider::Ses {
        bail!("`{command}` commands require --provider ses");
    }
    Ok(())
}

async fn run_identity(identity: &SesIdentity, action: IdentityAction) -> Result<()> {
    match action {
        IdentityAction::Status { email } => {
            let status = identity.identity_status(&email).await?;
            println!("{email}: {status}");
        }
        IdentityAction::Verify { email, wait } => {
            identity.verify_email_identity(&email).await?;
            println!("Verification requested for {email}");

            if let Some(secs) = wait {
                let verified = identity
                    .wait_until_verified(&email, VERIFY_POLL_INTERVAL, Duration::from_secs(secs))
                    .await?;
                if !verified {
                    bail!("{email} was not verified within {secs}s");
                }
                println!("{email} verified");
            }
        }
        IdentityAction::Delete { email } => {
            identity.delete_identity(&email).await?;
            println!("Deleted identity {email}");
        }
    }

    Ok(())
}

async fn run_template(templates: &SesTemplates, action: TemplateAction) -> Result<()> {
    match action {
        TemplateAction::Create {
            name,
            subject,
            text,
            html,
        } => {
            let template = MailTemplate::new(name, subject, text, html);
            let placeholders: Vec<String> = template.placeholders().into_iter().collect();
            templates.create_template(&template).await?;
            println!(
                "Template {} ready (placeholders: {})",
                template.name,
                placeholders.join(", ")
            );
        }
        TemplateAction::Delete { name } => {
            templates.delete_template(&name).await?;
            println!("Deleted template {name}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("name=Bob").unwrap(),
            ("name".to_string(), "Bob".to_string())
        );
        assert_eq!(
            parse_key_value("url=https://x.com/?a=b").unwrap(),
            ("url".to_string(), "https://x.com/?a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=Bob").is_err());
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "mail-dispatch",
            "--provider",
            "smtp",
            "send",
            "--from",
            "a@x.com",
            "--to",
            "b@x.com",
            "--to",
            "c@x.com",
            "--subject",
            "Hi",
            "--text",
            "t",
        ])
        .unwrap();

        assert_eq!(cli.provider, Provider::Smtp);
        match cli.command {
            Command::Send { message } => {
                assert_eq!(message.to, ["b@x.com", "c@x.com"]);
                assert_eq!(message.subject, "Hi");
                assert_eq!(message.html, "");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_templated_data() {
        let cli = Cli::try_parse_from([
            "mail-dispatch",
            "templated",
            "--from",
            "a@x.com",
            "--to",
            "b@x.com",
            "--template",
            "welcome",
            "--data",
            "name=Bob",
            "--data",
            "action=read",
        ])
        .unwrap();

        match cli.command {
            Command::Templated { data, template, .. } => {
                assert_eq!(template, "welcome");
                assert_eq!(
                    data,
                    [
                        ("name".to_string(), "Bob".to_string()),
                        ("action".to_string(), "read".to_string())
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_send_requires_recipient() {
        let result = Cli::try_parse_from([
            "mail-dispatch",
            "send",
            "--from",
            "a@x.com",
            "--subject",
            "Hi",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_identity_requires_ses() {
        let cli = Cli {
            provider: Provider::Smtp,
            command: Command::Identity {
                action: IdentityAction::Status {
                    email: "a@x.com".to_string(),
                },
            },
        };

        let err = execute(cli).await.unwrap_err();
        assert!(err.to_string().contains("--provider ses"));
    }

    #[test]
    fn test_load_template_file() {
        let path = std::env::temp_dir().join(format!("mail-dispatch-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"name":"welcome","subject":"Hi {{name}}","text":"Hello {{name}}","html":"<p>Hello {{name}}</p>"}"#,
        )
        .unwrap();

        let template = load_template(path.clone()).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(template.name, "welcome");
        assert!(template.placeholders().contains("name"));
    }
}
