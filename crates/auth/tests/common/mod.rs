#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use khata_auth::{
    AccountService, BcryptHasher, ClientInfo, InMemoryAccountStore, LoginInput, RegisterInput,
    TokenIssuer, User, VerificationKind, VerifyInput,
};
use khata_core::ManualClock;
use khata_events::{EventPublisher, InMemoryLog, NotificationEvent, NotificationRequest};

pub struct Harness {
    pub store: InMemoryAccountStore,
    pub log: Arc<InMemoryLog>,
    pub clock: Arc<ManualClock>,
    pub service: AccountService,
}

impl Harness {
    pub fn new() -> Self {
        let store = InMemoryAccountStore::new();
        let log = Arc::new(InMemoryLog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
        let service = AccountService::new(
            Arc::new(store.clone()),
            EventPublisher::new(log.clone()),
            Arc::new(BcryptHasher::new(4)),
            TokenIssuer::new(b"test-secret", "khata", Duration::hours(1)),
            clock.clone(),
        );
        Self { store, log, clock, service }
    }

    /// Latest code of `kind` issued to `user`, read straight from the store.
    pub fn latest_code(&self, user: &User, kind: VerificationKind) -> String {
        self.store
            .verification_requests_of(user.id)
            .into_iter()
            .filter(|r| r.kind == kind)
            .max_by_key(|r| r.generation)
            .map(|r| r.code)
            .expect("no verification request issued")
    }

    pub fn notifications(&self, event: NotificationEvent) -> Vec<NotificationRequest> {
        self.log
            .envelopes::<NotificationRequest>()
            .into_iter()
            .map(|e| e.into_data())
            .filter(|n| n.event == event)
            .collect()
    }

    /// Register and verify both channels.
    pub async fn verified_user(&self, email: &str, password: &str) -> User {
        let user = self.service.register(register_input(email, password)).await.unwrap();
        let email_code = self.latest_code(&user, VerificationKind::Email);
        self.service
            .verify_email(VerifyInput { email: email.into(), code: email_code })
            .await
            .unwrap();
        let phone_code = self.latest_code(&user, VerificationKind::Phone);
        self.service
            .verify_phone(VerifyInput { email: email.into(), code: phone_code })
            .await
            .unwrap()
    }
}

pub fn register_input(email: &str, password: &str) -> RegisterInput {
    RegisterInput {
        name: "Ann Lee".into(),
        email: email.into(),
        country_code: "+1".into(),
        phone: "5550100000".into(),
        password: password.into(),
    }
}

pub fn login_input(email: &str, password: &str) -> LoginInput {
    LoginInput { email: email.into(), password: password.into() }
}

pub fn client() -> ClientInfo {
    ClientInfo { ip: "127.0.0.1".into(), user_agent: "tests".into() }
}
