//! Template lookup by (event, channel, locale, scope, mimetype).
//!
//! Two resolvers:
//! - [`InMemoryTemplateStore`]: seeded with English defaults for every event
//! - [`FsTemplateStore`]: `<root>/<event>/<channel>/<locale>.html|.txt`, with
//!   the subject in `<locale>.json`; scope is not part of the path

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use khata_events::{Channel, NotificationEvent};

pub const DEFAULT_LOCALE: &str = "en";
pub const DEFAULT_SCOPE: &str = "default";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mimetype {
    Html,
    Plain,
}

impl Mimetype {
    pub const fn as_str(self) -> &'static str {
        match self {
            Mimetype::Html => "text/html",
            Mimetype::Plain => "text/plain",
        }
    }

    const fn extension(self) -> &'static str {
        match self {
            Mimetype::Html => "html",
            Mimetype::Plain => "txt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateQuery {
    pub event: NotificationEvent,
    pub channel: Channel,
    pub locale: String,
    pub scope: String,
    pub mimetype: Mimetype,
}

impl TemplateQuery {
    /// Default locale and scope.
    pub fn new(event: NotificationEvent, channel: Channel, mimetype: Mimetype) -> Self {
        Self {
            event,
            channel,
            locale: DEFAULT_LOCALE.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            mimetype,
        }
    }
}

impl core::fmt::Display for TemplateQuery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{} ({})",
            self.event,
            self.channel,
            self.scope,
            self.locale,
            self.mimetype.as_str()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: String,
    pub body: String,
    pub mimetype: Mimetype,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template for {0}")]
    NotFound(TemplateQuery),

    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid template metadata {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("template store unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TemplateResolver: Send + Sync {
    async fn find_template(&self, query: &TemplateQuery) -> Result<Template, TemplateError>;
}

#[async_trait]
impl<T> TemplateResolver for Arc<T>
where
    T: TemplateResolver + ?Sized,
{
    async fn find_template(&self, query: &TemplateQuery) -> Result<Template, TemplateError> {
        (**self).find_template(query).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    inner: RwLock<HashMap<TemplateQuery, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// English templates for every notification event: html and plain text
    /// for email, plain text for SMS.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for event in NotificationEvent::ALL {
            let (subject, text) = default_copy(event);
            let html = format!("<p>Hi {{{{ Name }}}},</p>\n<p>{text}</p>\n");
            let plain = format!("Hi {{{{ Name }}}},\n\n{text}\n");
            let email = |mimetype| TemplateQuery::new(event, Channel::Email, mimetype);

            store.insert(email(Mimetype::Html), Template {
                subject: subject.to_string(),
                body: html,
                mimetype: Mimetype::Html,
            });
            store.insert(email(Mimetype::Plain), Template {
                subject: subject.to_string(),
                body: plain,
                mimetype: Mimetype::Plain,
            });
            store.insert(TemplateQuery::new(event, Channel::Sms, Mimetype::Plain), Template {
                subject: subject.to_string(),
                body: text.to_string(),
                mimetype: Mimetype::Plain,
            });
        }
        store
    }

    pub fn insert(&self, query: TemplateQuery, template: Template) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(query, template);
        }
    }

    pub fn remove(&self, query: &TemplateQuery) -> Option<Template> {
        self.inner.write().ok()?.remove(query)
    }
}

fn default_copy(event: NotificationEvent) -> (&'static str, &'static str) {
    match event {
        NotificationEvent::Signup => ("Welcome to Khata", "Welcome to Khata. Your account is ready."),
        NotificationEvent::EmailVerification => (
            "Verify your email",
            "Your email verification code is {{ OTP }}. It expires at {{ ExpiresAt }}.",
        ),
        NotificationEvent::EmailVerified => ("Email verified", "Your email address has been verified."),
        NotificationEvent::PhoneVerification => (
            "Verify your phone",
            "Your phone verification code is {{ OTP }}. It expires at {{ ExpiresAt }}.",
        ),
        NotificationEvent::PhoneVerified => ("Phone verified", "Your phone number has been verified."),
        NotificationEvent::ForgotPassword => (
            "Reset your password",
            "Use code {{ OTP }} to reset your password. It expires at {{ ExpiresAt }}.",
        ),
        NotificationEvent::ResetPassword => ("Password reset", "Your password has been reset."),
        NotificationEvent::ChangePassword => ("Password changed", "Your password has been changed."),
        NotificationEvent::UserInvited => (
            "You're invited to {{ BusinessName }}",
            "You have been invited to join {{ BusinessName }}. Accept before {{ ExpiresAt }}: {{ InvitationURL }}",
        ),
    }
}

#[async_trait]
impl TemplateResolver for InMemoryTemplateStore {
    async fn find_template(&self, query: &TemplateQuery) -> Result<Template, TemplateError> {
        let map = self
            .inner
            .read()
            .map_err(|_| TemplateError::Backend("template store lock poisoned".into()))?;
        map.get(query)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(query.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct TemplateMetadata {
    #[serde(default)]
    subject: String,
}

/// Templates read from a directory tree.
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn directory(&self, query: &TemplateQuery) -> PathBuf {
        self.root
            .join(query.event.as_str())
            .join(query.channel.as_str())
    }
}

async fn read(path: &Path, query: &TemplateQuery) -> Result<String, TemplateError> {
    tokio::fs::read_to_string(path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            TemplateError::NotFound(query.clone())
        } else {
            TemplateError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[async_trait]
impl TemplateResolver for FsTemplateStore {
    async fn find_template(&self, query: &TemplateQuery) -> Result<Template, TemplateError> {
        let dir = self.directory(query);
        let body_path = dir.join(format!("{}.{}", query.locale, query.mimetype.extension()));
        let meta_path = dir.join(format!("{}.json", query.locale));

        let body = read(&body_path, query).await?;
        let meta = read(&meta_path, query).await?;
        let meta: TemplateMetadata =
            serde_json::from_str(&meta).map_err(|source| TemplateError::Metadata {
                path: meta_path.clone(),
                source,
            })?;

        Ok(Template {
            subject: meta.subject,
            body,
            mimetype: query.mimetype,
        })
    }
}
