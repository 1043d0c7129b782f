//! `manage-notification` payload.
//!
//! A notification request names the template (`event`), who receives it on
//! which channel, and the token map used to render the template.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogEvent, EventKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    Signup,
    EmailVerification,
    EmailVerified,
    PhoneVerification,
    PhoneVerified,
    ForgotPassword,
    ResetPassword,
    ChangePassword,
    UserInvited,
}

impl NotificationEvent {
    pub const ALL: [NotificationEvent; 9] = [
        NotificationEvent::Signup,
        NotificationEvent::EmailVerification,
        NotificationEvent::EmailVerified,
        NotificationEvent::PhoneVerification,
        NotificationEvent::PhoneVerified,
        NotificationEvent::ForgotPassword,
        NotificationEvent::ResetPassword,
        NotificationEvent::ChangePassword,
        NotificationEvent::UserInvited,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            NotificationEvent::Signup => "signup",
            NotificationEvent::EmailVerification => "email_verification",
            NotificationEvent::EmailVerified => "email_verified",
            NotificationEvent::PhoneVerification => "phone_verification",
            NotificationEvent::PhoneVerified => "phone_verified",
            NotificationEvent::ForgotPassword => "forgot_password",
            NotificationEvent::ResetPassword => "reset_password",
            NotificationEvent::ChangePassword => "change_password",
            NotificationEvent::UserInvited => "user_invited",
        }
    }
}

impl core::fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// One recipient set, addressed directly.
    P2p,
    Broadcast,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
    Whatsapp,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipients {
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
}

/// Phone numbers in international format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsRecipients {
    pub to: Vec<String>,
}

/// Device tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRecipients {
    pub to: Vec<String>,
}

/// Addressing for one channel: `{"channel": "email", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data", rename_all = "lowercase")]
pub enum ChannelPayload {
    Email(EmailRecipients),
    Sms(SmsRecipients),
    Push(PushRecipients),
    Whatsapp(SmsRecipients),
}

impl ChannelPayload {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelPayload::Email(_) => Channel::Email,
            ChannelPayload::Sms(_) => Channel::Sms,
            ChannelPayload::Push(_) => Channel::Push,
            ChannelPayload::Whatsapp(_) => Channel::Whatsapp,
        }
    }

    fn first_recipient(&self) -> Option<&str> {
        match self {
            ChannelPayload::Email(r) => r.to.first(),
            ChannelPayload::Sms(r) | ChannelPayload::Whatsapp(r) => r.to.first(),
            ChannelPayload::Push(r) => r.to.first(),
        }
        .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub event: NotificationEvent,
    pub kind: DeliveryKind,
    pub payload: Vec<ChannelPayload>,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

impl NotificationRequest {
    /// Start a direct (peer-to-peer) request with no recipients yet.
    pub fn p2p(event: NotificationEvent) -> Self {
        Self {
            event,
            kind: DeliveryKind::P2p,
            payload: Vec::new(),
            tokens: BTreeMap::new(),
        }
    }

    pub fn email(mut self, to: impl Into<String>) -> Self {
        self.payload.push(ChannelPayload::Email(EmailRecipients {
            to: vec![to.into()],
            ..Default::default()
        }));
        self
    }

    pub fn sms(mut self, to: impl Into<String>) -> Self {
        self.payload.push(ChannelPayload::Sms(SmsRecipients {
            to: vec![to.into()],
        }));
        self
    }

    pub fn token(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.insert(key.into(), value.into());
        self
    }
}

impl CatalogEvent for NotificationRequest {
    const KIND: EventKind = EventKind::ManageNotification;

    fn partition_key(&self) -> String {
        self.payload
            .iter()
            .find_map(ChannelPayload::first_recipient)
            .unwrap_or(self.event.as_str())
            .to_string()
    }
}
