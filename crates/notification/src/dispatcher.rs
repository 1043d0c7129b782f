use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use khata_events::{
    Channel, ChannelPayload, EmailRecipients, EventEnvelope, EventHandler, NotificationEvent,
    NotificationRequest, SmsRecipients,
};

use crate::channels::{Mailer, OutgoingEmail, OutgoingSms, SmsSender};
use crate::render::render;
use crate::templates::{Mimetype, TemplateError, TemplateQuery, TemplateResolver};

/// Renders and delivers `manage-notification` requests.
///
/// Channels are processed in payload order; the first failure aborts the
/// request so the consumer redelivers it. Channels that already went out
/// before the failure will go out again.
pub struct NotificationDispatcher {
    templates: Arc<dyn TemplateResolver>,
    mailer: Arc<dyn Mailer>,
    sms: Arc<dyn SmsSender>,
}

impl NotificationDispatcher {
    pub fn new(
        templates: Arc<dyn TemplateResolver>,
        mailer: Arc<dyn Mailer>,
        sms: Arc<dyn SmsSender>,
    ) -> Self {
        Self {
            templates,
            mailer,
            sms,
        }
    }

    #[instrument(skip(self, request), fields(event = %request.event), err)]
    pub async fn dispatch(&self, request: &NotificationRequest) -> anyhow::Result<()> {
        for payload in &request.payload {
            match payload {
                ChannelPayload::Email(recipients) => {
                    self.send_email(request.event, recipients, &request.tokens).await?
                }
                ChannelPayload::Sms(recipients) => {
                    self.send_sms(request.event, recipients, &request.tokens).await?
                }
                other => warn!(channel = %other.channel(), "channel not supported, skipping"),
            }
        }
        Ok(())
    }

    async fn send_email(
        &self,
        event: NotificationEvent,
        recipients: &EmailRecipients,
        tokens: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let html = self
            .templates
            .find_template(&TemplateQuery::new(event, Channel::Email, Mimetype::Html))
            .await
            .context("html email template")?;

        let text = match self
            .templates
            .find_template(&TemplateQuery::new(event, Channel::Email, Mimetype::Plain))
            .await
        {
            Ok(template) => Some(render(&template.body, tokens).context("plain email body")?),
            Err(TemplateError::NotFound(query)) => {
                debug!(%query, "no plain-text alternative");
                None
            }
            Err(err) => return Err(err).context("plain email template"),
        };

        let email = OutgoingEmail {
            to: recipients.to.clone(),
            cc: recipients.cc.clone(),
            bcc: recipients.bcc.clone(),
            subject: render(&html.subject, tokens).context("email subject")?,
            html: render(&html.body, tokens).context("html email body")?,
            text,
        };
        self.mailer.send(email).await.context("send email")?;
        info!(recipients = recipients.to.len(), "email sent");
        Ok(())
    }

    async fn send_sms(
        &self,
        event: NotificationEvent,
        recipients: &SmsRecipients,
        tokens: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let template = self
            .templates
            .find_template(&TemplateQuery::new(event, Channel::Sms, Mimetype::Plain))
            .await
            .context("sms template")?;

        let sms = OutgoingSms {
            to: recipients.to.clone(),
            body: render(&template.body, tokens).context("sms body")?,
        };
        self.sms.send(sms).await.context("send sms")?;
        info!(recipients = recipients.to.len(), "sms sent");
        Ok(())
    }
}

#[async_trait]
impl EventHandler<NotificationRequest> for NotificationDispatcher {
    async fn handle(&self, envelope: EventEnvelope<NotificationRequest>) -> anyhow::Result<()> {
        self.dispatch(envelope.data()).await
    }
}
