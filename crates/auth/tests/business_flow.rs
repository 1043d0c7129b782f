mod common;

use common::{Harness, client, login_input};
use khata_auth::{AccountError, CreateBusinessInput, InviteInput, OWNER_ROLE};
use khata_core::{BusinessId, Clock};
use khata_events::{BusinessSnapshot, BusinessUserSnapshot, NotificationEvent};

const PASSWORD: &str = "Passw0rd!";

fn acme() -> CreateBusinessInput {
    CreateBusinessInput {
        name: "Acme".into(),
        description: None,
        logo: Some("https://cdn.x.com/acme.png".into()),
        industry: "Retail".into(),
        primary_currency: "USD".into(),
        currencies: vec!["USD".into()],
    }
}

fn invite() -> InviteInput {
    InviteInput {
        name: "Bob Stone".into(),
        email: "Bob@X.com".into(),
        country_code: "+44".into(),
        phone: "7700900123".into(),
        origin: "https://app.x.com/".into(),
    }
}

#[tokio::test]
async fn create_list_and_select_a_business() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;

    let business = h.service.create_business(owner.id, acme()).await.unwrap();

    let listed = h.service.list_businesses(owner.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Acme");
    assert_eq!(listed[0].id, business.id);

    let memberships = h.store.memberships_of(owner.id);
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].role, OWNER_ROLE);

    let outcome = h.service.select_business(owner.id, business.id, client()).await.unwrap();
    assert!(outcome.business_found);
    assert_eq!(outcome.business_id, Some(business.id));
    let claims = h.service.tokens().verify(&outcome.access_token, h.clock.now()).unwrap();
    assert_eq!(claims.business_id, Some(business.id));

    let err = h
        .service
        .select_business(owner.id, BusinessId::new(), client())
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::BusinessNotFound));
}

#[tokio::test]
async fn business_creation_publishes_business_then_membership() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;
    let business = h.service.create_business(owner.id, acme()).await.unwrap();

    let businesses = h.log.envelopes::<BusinessSnapshot>();
    assert_eq!(businesses.len(), 1);
    assert_eq!(businesses[0].data().id, business.id);
    assert_eq!(businesses[0].data().owner_id, owner.id);

    let members = h.log.envelopes::<BusinessUserSnapshot>();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].data().business_id, business.id);
    assert_eq!(members[0].partition_key(), format!("{}:{}", business.id, owner.id));
}

#[tokio::test]
async fn login_is_scoped_only_with_a_single_business() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;

    let first = h.service.create_business(owner.id, acme()).await.unwrap();
    let outcome = h.service.login(login_input("ann@x.com", PASSWORD), client()).await.unwrap();
    assert!(outcome.business_found);
    assert_eq!(outcome.business_id, Some(first.id));

    let mut second = acme();
    second.name = "Acme Two".into();
    h.service.create_business(owner.id, second).await.unwrap();
    let outcome = h.service.login(login_input("ann@x.com", PASSWORD), client()).await.unwrap();
    assert!(!outcome.business_found);
    assert_eq!(outcome.business_id, None);
}

#[tokio::test]
async fn invalid_business_input_is_rejected() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;

    let mut bad = acme();
    bad.industry = "Piracy".into();
    bad.primary_currency = "usd".into();
    let err = h.service.create_business(owner.id, bad).await.unwrap_err();

    let AccountError::Validation(errors) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert!(errors.has("industry"));
    assert!(errors.has("primary_currency"));
    assert!(h.service.list_businesses(owner.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn invitations_notify_in_the_background() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;
    let business = h.service.create_business(owner.id, acme()).await.unwrap();

    let invitation = h.service.invite_user(owner.id, business.id, invite()).await.unwrap();
    assert_eq!(invitation.email, "bob@x.com");
    assert_eq!(invitation.phone, "+447700900123");
    assert_eq!(invitation.hash.len(), 128);
    assert_eq!(h.store.invitations().len(), 1);

    h.service.side_tasks().drain().await;

    let sent = h.notifications(NotificationEvent::UserInvited);
    assert_eq!(sent.len(), 1);
    let tokens = &sent[0].tokens;
    assert_eq!(
        tokens["InvitationURL"],
        format!("https://app.x.com/invites/{}", invitation.hash)
    );
    assert_eq!(tokens["BusinessName"], "Acme");
    assert_eq!(tokens["BusinessID"], business.id.to_string());
    assert_eq!(sent[0].payload.len(), 2);
}

#[tokio::test]
async fn invitation_survives_a_failed_notification() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;
    let business = h.service.create_business(owner.id, acme()).await.unwrap();

    h.log.set_unavailable(true);
    let invitation = h.service.invite_user(owner.id, business.id, invite()).await;
    h.service.side_tasks().drain().await;
    h.log.set_unavailable(false);

    assert!(invitation.is_ok());
    assert_eq!(h.store.invitations().len(), 1);
    assert!(h.notifications(NotificationEvent::UserInvited).is_empty());
}

#[tokio::test]
async fn only_members_can_invite() {
    let h = Harness::new();
    let owner = h.verified_user("ann@x.com", PASSWORD).await;
    let outsider = h.verified_user("eve@x.com", PASSWORD).await;
    let business = h.service.create_business(owner.id, acme()).await.unwrap();

    let err = h
        .service
        .invite_user(outsider.id, business.id, invite())
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::BusinessNotFound));
    assert!(h.store.invitations().is_empty());
}
