//! Mail templates
//!
//! This module provides:
//! - `MailTemplate`: subject/text/html parts with `{{var}}` placeholders
//! - `LocalTemplates`: Handlebars rendering for mailers without server-side
//!   templates (SMTP)
//! - `SesTemplates`: create/delete templates stored in AWS SES

use crate::envelope::TemplateData;
use crate::error::{MailerError, MailerResult};
use crate::mailer::ses::{classify_sdk_error, SesConfig};
use aws_sdk_sesv2::error::ProvideErrorMetadata;
use aws_sdk_sesv2::types::EmailTemplateContent;
use aws_sdk_sesv2::Client;
use core_config::FromEnv;
use handlebars::Handlebars;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\{?\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}?\}\}")
        .expect("placeholder pattern is valid")
});

/// A template with subject, text and HTML parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailTemplate {
    pub name: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl MailTemplate {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            text: text.into(),
            html: html.into(),
        }
    }

    /// Variable names referenced by any part, sorted and deduplicated.
    ///
    /// Block helpers (`{{#if}}`, `{{/if}}`, `{{else}}`) are not variables.
    pub fn placeholders(&self) -> BTreeSet<String> {
        [&self.subject, &self.text, &self.html]
            .into_iter()
            .flat_map(|part| PLACEHOLDER.captures_iter(part))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .filter(|name| name != "else" && name != "this")
            .collect()
    }

    /// Check that `data` supplies a value for every placeholder.
    pub fn check_data(&self, data: &TemplateData) -> MailerResult<()> {
        let missing: Vec<String> = self
            .placeholders()
            .into_iter()
            .filter(|name| !data.contains_key(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MailerError::Template(format!(
                "template '{}' is missing data for: {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}

/// Rendered template parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Handlebars-backed template registry.
///
/// Each template registers three Handlebars templates:
/// `{name}_subject`, `{name}_text` and `{name}_html`.
pub struct LocalTemplates {
    handlebars: Handlebars<'static>,
    templates: std::collections::HashMap<String, MailTemplate>,
}

impl Default for LocalTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTemplates {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        Self {
            handlebars,
            templates: std::collections::HashMap::new(),
        }
    }

    /// Register (or replace) a template
    pub fn register(&mut self, template: MailTemplate) -> MailerResult<()> {
        for (suffix, source) in [
            ("subject", &template.subject),
            ("text", &template.text),
            ("html", &template.html),
        ] {
            self.handlebars
                .register_template_string(&format!("{}_{}", template.name, suffix), source)
                .map_err(|e| {
                    MailerError::Template(format!(
                        "failed to register {suffix} of '{}': {e}",
                        template.name
                    ))
                })?;
        }

        debug!(template = %template.name, "Registered local template");
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MailTemplate> {
        self.templates.get(name)
    }

    /// Render `name` with `data`.
    ///
    /// Unknown templates and missing variables are template errors.
    pub fn render(&self, name: &str, data: &TemplateData) -> MailerResult<RenderedTemplate> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| MailerError::Template(format!("template '{name}' does not exist")))?;
        template.check_data(data)?;

        let render = |suffix: &str| {
            self.handlebars
                .render(&format!("{name}_{suffix}"), data)
                .map_err(|e| MailerError::Template(e.to_string()))
        };

        Ok(RenderedTemplate {
            subject: render("subject")?,
            text: render("text")?,
            html: render("html")?,
        })
    }
}

/// Manage templates stored in AWS SES
#[derive(Clone)]
pub struct SesTemplates {
    client: Client,
}

impl SesTemplates {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create from environment variables and the AWS SDK config chain
    pub async fn from_env() -> MailerResult<Self> {
        let config = SesConfig::from_env()?;
        Ok(Self::new(config.client().await))
    }

    /// Create a template. An already existing template is not an error.
    pub async fn create_template(&self, template: &MailTemplate) -> MailerResult<()> {
        let content = EmailTemplateContent::builder()
            .subject(&template.subject)
            .text(&template.text)
            .html(&template.html)
            .build();

        let result = self
            .client
            .create_email_template()
            .template_name(&template.name)
            .template_content(content)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(template = %template.name, "Created SES template");
                Ok(())
            }
            Err(e) if e.code() == Some("AlreadyExistsException") => {
                warn!(template = %template.name, "SES template already exists");
                Ok(())
            }
            Err(e) => Err(classify_sdk_error("create template", &e)),
        }
    }

    /// Delete a template by name
    pub async fn delete_template(&self, name: &str) -> MailerResult<()> {
        self.client
            .delete_email_template()
            .template_name(name)
            .send()
            .await
            .map_err(|e| classify_sdk_error("delete template", &e))?;

        info!(template = %name, "Deleted SES template");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_template() -> MailTemplate {
        MailTemplate::new(
            "doc-example-template",
            "Example of an email template.",
            "This is what {{name}} will {{action}} if {{name}} can't display HTML.",
            "<p><i>This</i> is what {{name}} will {{action}} if {{name}} <b>can</b> display HTML.</p>",
        )
    }

    fn data(pairs: &[(&str, &str)]) -> TemplateData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_placeholders() {
        let names: Vec<String> = demo_template().placeholders().into_iter().collect();
        assert_eq!(names, ["action", "name"]);
    }

    #[test]
    fn test_placeholders_skip_helpers() {
        let template = MailTemplate::new(
            "t",
            "Hi {{ user }}",
            "{{#if vip}}VIP{{else}}regular{{/if}}",
            "{{{raw_html}}}",
        );
        let names: Vec<String> = template.placeholders().into_iter().collect();
        assert_eq!(names, ["raw_html", "user"]);
    }

    #[test]
    fn test_check_data() {
        let template = demo_template();
        assert!(template
            .check_data(&data(&[("name", "bob"), ("action", "read")]))
            .is_ok());

        let err = template.check_data(&data(&[("name", "bob")])).unwrap_err();
        assert!(err.to_string().contains("action"));
    }

    #[test]
    fn test_local_render() {
        let mut templates = LocalTemplates::new();
        templates.register(demo_template()).unwrap();

        let rendered = templates
            .render(
                "doc-example-template",
                &data(&[("name", "bob"), ("action", "read")]),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Example of an email template.");
        assert_eq!(
            rendered.text,
            "This is what bob will read if bob can't display HTML."
        );
        assert!(rendered.html.contains("<b>can</b>"));
    }

    #[test]
    fn test_local_render_unknown_template() {
        let templates = LocalTemplates::new();
        let err = templates.render("nope", &TemplateData::new()).unwrap_err();
        assert!(matches!(err, MailerError::Template(_)));
    }
}
