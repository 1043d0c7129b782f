use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use khata_core::UserId;
use khata_events::{
    ChannelPayload, EventEnvelope, EventHandler, EventPublisher, InMemoryLog, LogTransport,
    NotificationEvent, NotificationRequest, PushRecipients, UserSnapshot, action,
};
use khata_infra::read_model::ReplicaStore;
use khata_infra::replicas::SharedReplicaStores;
use khata_infra::workers::{Backoff, ConsumerConfig, ConsumerWorker};
use khata_notification::{
    InMemoryTemplateStore, LogMailer, LogSmsSender, Mimetype, NotificationDispatcher,
    TemplateQuery, spawn_workers,
};

struct Fixture {
    templates: Arc<InMemoryTemplateStore>,
    mailer: Arc<LogMailer>,
    sms: Arc<LogSmsSender>,
    dispatcher: Arc<NotificationDispatcher>,
}

fn fixture() -> Fixture {
    let templates = Arc::new(InMemoryTemplateStore::with_defaults());
    let mailer = Arc::new(LogMailer::new());
    let sms = Arc::new(LogSmsSender::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        templates.clone(),
        mailer.clone(),
        sms.clone(),
    ));
    Fixture {
        templates,
        mailer,
        sms,
        dispatcher,
    }
}

fn otp_request(event: NotificationEvent) -> NotificationRequest {
    NotificationRequest::p2p(event)
        .email("ann@x.com")
        .token("Name", "Ann")
        .token("OTP", "482913")
        .token("ExpiresAt", "2025-03-01T09:15:00Z")
}

#[tokio::test]
async fn email_is_rendered_with_html_and_text_parts() {
    let f = fixture();
    let envelope = EventEnvelope::new(action::SEND, otp_request(NotificationEvent::EmailVerification));

    f.dispatcher.handle(envelope).await.unwrap();

    let sent = f.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ann@x.com".to_string()]);
    assert_eq!(sent[0].subject, "Verify your email");
    assert!(sent[0].html.contains("482913"));
    assert!(sent[0].html.starts_with("<p>Hi Ann,</p>"));
    assert!(sent[0].text.as_deref().unwrap().contains("2025-03-01T09:15:00Z"));
    assert!(f.sms.sent().is_empty());
}

#[tokio::test]
async fn sms_and_unsupported_channels() {
    let f = fixture();
    let mut request = otp_request(NotificationEvent::PhoneVerification).sms("+15550100000");
    request.payload.push(ChannelPayload::Push(PushRecipients {
        to: vec!["device-1".into()],
    }));

    f.dispatcher.dispatch(&request).await.unwrap();

    let sms = f.sms.sent();
    assert_eq!(sms.len(), 1);
    assert_eq!(sms[0].to, vec!["+15550100000".to_string()]);
    assert!(sms[0].body.contains("482913"));
    assert_eq!(f.mailer.sent().len(), 1);
}

#[tokio::test]
async fn missing_plain_alternative_is_optional() {
    let f = fixture();
    f.templates.remove(&TemplateQuery::new(
        NotificationEvent::EmailVerified,
        khata_events::Channel::Email,
        Mimetype::Plain,
    ));

    let request = NotificationRequest::p2p(NotificationEvent::EmailVerified)
        .email("ann@x.com")
        .token("Name", "Ann");
    f.dispatcher.dispatch(&request).await.unwrap();

    assert_eq!(f.mailer.sent()[0].text, None);
}

#[tokio::test]
async fn render_and_lookup_failures_are_handler_failures() {
    let f = fixture();

    let no_tokens = NotificationRequest::p2p(NotificationEvent::ForgotPassword).email("ann@x.com");
    assert!(f.dispatcher.dispatch(&no_tokens).await.is_err());

    f.templates.remove(&TemplateQuery::new(
        NotificationEvent::ChangePassword,
        khata_events::Channel::Email,
        Mimetype::Html,
    ));
    let request = NotificationRequest::p2p(NotificationEvent::ChangePassword)
        .email("ann@x.com")
        .token("Name", "Ann");
    assert!(f.dispatcher.dispatch(&request).await.is_err());
    assert!(f.mailer.sent().is_empty());
}

#[tokio::test]
async fn consumer_redelivers_until_the_template_exists() {
    let f = fixture();
    let html = TemplateQuery::new(
        NotificationEvent::ResetPassword,
        khata_events::Channel::Email,
        Mimetype::Html,
    );
    let template = f.templates.remove(&html).unwrap();

    let log = Arc::new(InMemoryLog::new());
    let transport: Arc<dyn LogTransport> = log.clone();
    let handle = ConsumerWorker::spawn::<NotificationRequest, _>(
        "notification-dispatcher",
        transport.clone(),
        f.dispatcher.clone(),
        ConsumerConfig::new("notification")
            .with_idle_wait(Duration::from_millis(5))
            .with_backoff(Backoff::new(Duration::from_millis(5), Duration::from_millis(20))),
    );

    let request = NotificationRequest::p2p(NotificationEvent::ResetPassword)
        .email("ann@x.com")
        .token("Name", "Ann");
    EventPublisher::new(transport)
        .publish(&EventEnvelope::new(action::SEND, request))
        .await
        .unwrap();

    for _ in 0..100 {
        if handle.stats().failed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.stats().failed > 0);
    assert_eq!(log.lag("manage-notification", "notification"), 1);

    f.templates.insert(html, template);
    for _ in 0..500 {
        if !f.mailer.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.mailer.sent().len(), 1);

    handle.shutdown().await;
    assert_eq!(log.lag("manage-notification", "notification"), 0);
}

#[tokio::test]
async fn service_workers_replicate_users_and_dispatch() {
    let f = fixture();
    let log = Arc::new(InMemoryLog::new());
    let transport: Arc<dyn LogTransport> = log.clone();
    let stores = SharedReplicaStores::in_memory();
    let handles = spawn_workers(
        transport.clone(),
        stores.clone(),
        NotificationDispatcher::new(f.templates.clone(), f.mailer.clone(), f.sms.clone()),
        ConsumerConfig::new("notification").with_idle_wait(Duration::from_millis(5)),
    );
    assert_eq!(handles.len(), 4);

    let now = Utc::now();
    let ann = UserSnapshot {
        id: UserId::new(),
        human_id: "user-BBBBBBB".into(),
        name: "Ann".into(),
        email: "ann@x.com".into(),
        phone: "+15550100000".into(),
        avatar: None,
        email_verified: true,
        phone_verified: false,
        created_at: now,
        created_by: UserId::root(),
        updated_at: now,
        updated_by: None,
        deactivated_at: None,
        deactivated_by: None,
        deleted_at: None,
        deleted_by: None,
    };
    let publisher = EventPublisher::new(transport);
    publisher
        .publish(&EventEnvelope::new(action::CREATE, ann.clone()))
        .await
        .unwrap();
    publisher
        .publish(&EventEnvelope::new(
            action::SEND,
            otp_request(NotificationEvent::EmailVerification),
        ))
        .await
        .unwrap();

    let mut replica = None;
    for _ in 0..200 {
        replica = stores.users.find(&ann.id).await.unwrap();
        if replica.is_some() && !f.mailer.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(replica, Some(ann));
    assert_eq!(f.mailer.sent().len(), 1);

    for handle in handles {
        handle.shutdown().await;
    }
    assert_eq!(log.lag("manage-user", "notification"), 0);
}
