mod common;

use charter_server::credentials::{hash_refresh_token, CredentialError, AUDIT_CREDENTIALS_ROTATED};
use charter_server::db::Role;
use charter_server::profile::{ProfileError, ProfileUpdate};
use common::{count_audit_rows, drop_table, seed_client, setup};

#[tokio::test]
async fn issued_refresh_token_is_stored_hashed() {
    let ctx = setup().await;
    seed_client(&ctx.db, 1, "hash@example.com", "Hash", "Ed").await;

    let pair = ctx
        .state
        .issuer
        .issue(1, "hash@example.com", Role::Client, 0)
        .await
        .unwrap();

    let stored = ctx.db.list_refresh_tokens(1).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_ne!(stored[0].token_hash, pair.refresh_token);
    assert_eq!(stored[0].token_hash, hash_refresh_token(&pair.refresh_token));
    assert!(pair.refresh_expires_at > pair.access_expires_at);

    let claims = ctx.state.issuer.authenticate(&pair.access_token).await.unwrap();
    assert_eq!(claims.user_id(), Some(1));
    assert_eq!(claims.role, Role::Client);

}

#[tokio::test]
async fn rotation_and_refresh_do_not_count_as_logins() {
    let ctx = setup().await;
    seed_client(&ctx.db, 9, "quiet@example.com", "Qu", "Iet").await;
    let issuer = &ctx.state.issuer;

    let first = issuer.issue(9, "quiet@example.com", Role::Client, 0).await.unwrap();
    let refreshed = issuer.refresh(&first.refresh_token).await.unwrap();
    issuer.rotate(9).await.unwrap();
    assert!(issuer.refresh(&refreshed.refresh_token).await.is_err());

    let user = ctx.db.get_user_by_id(9).await.unwrap().unwrap();
    assert!(user.last_login.is_none());
}

#[tokio::test]
async fn rotation_revokes_previous_refresh_token() {
    let ctx = setup().await;
    seed_client(&ctx.db, 2, "rotate@example.com", "Ro", "Tate").await;
    let issuer = &ctx.state.issuer;

    let old = issuer.issue(2, "rotate@example.com", Role::Client, 0).await.unwrap();
    let new = issuer.rotate(2).await.unwrap();

    assert_ne!(old.refresh_token, new.refresh_token);
    assert_eq!(new.token_version, 1);

    let old_row = ctx
        .db
        .get_refresh_token_by_hash(&hash_refresh_token(&old.refresh_token))
        .await
        .unwrap()
        .expect("old row kept for audit");
    assert!(old_row.revoked);
    assert!(old_row.revoked_at.is_some());

    let err = issuer.refresh(&old.refresh_token).await.unwrap_err();
    assert!(matches!(err, CredentialError::InvalidRefreshToken));

    let err = issuer.authenticate(&old.access_token).await.unwrap_err();
    assert!(matches!(err, CredentialError::StaleAccessToken));
    assert!(issuer.authenticate(&new.access_token).await.is_ok());

    assert_eq!(count_audit_rows(&ctx.db, AUDIT_CREDENTIALS_ROTATED).await, 1);
}

#[tokio::test]
async fn rotating_unknown_user_fails() {
    let ctx = setup().await;
    let err = ctx.state.issuer.rotate(404).await.unwrap_err();
    assert!(matches!(err, CredentialError::UserNotFound(404)));
}

#[tokio::test]
async fn refresh_exchanges_token_once() {
    let ctx = setup().await;
    seed_client(&ctx.db, 3, "refresh@example.com", "Re", "Fresh").await;
    let issuer = &ctx.state.issuer;

    let first = issuer.issue(3, "refresh@example.com", Role::Client, 0).await.unwrap();
    let second = issuer.refresh(&first.refresh_token).await.unwrap();
    assert_ne!(first.refresh_token, second.refresh_token);
    assert!(issuer.authenticate(&second.access_token).await.is_ok());

    let err = issuer.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(err, CredentialError::InvalidRefreshToken));

    let active: Vec<_> = ctx
        .db
        .list_refresh_tokens(3)
        .await
        .unwrap()
        .into_iter()
        .filter(|token| !token.revoked)
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn revoked_token_cannot_refresh() {
    let ctx = setup().await;
    seed_client(&ctx.db, 4, "logout@example.com", "Log", "Out").await;
    let issuer = &ctx.state.issuer;

    let pair = issuer.issue(4, "logout@example.com", Role::Client, 0).await.unwrap();
    assert!(issuer.revoke(&pair.refresh_token).await.unwrap());
    assert!(!issuer.revoke(&pair.refresh_token).await.unwrap());
    assert!(!issuer.revoke("unknown-token").await.unwrap());

    let err = issuer.refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, CredentialError::InvalidRefreshToken));
}

#[tokio::test]
async fn garbage_access_token_is_rejected() {
    let ctx = setup().await;
    let err = ctx.state.issuer.authenticate("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, CredentialError::InvalidAccessToken(_)));
}

#[tokio::test]
async fn email_change_rotates_credentials() {
    let ctx = setup().await;
    seed_client(&ctx.db, 5, "before@example.com", "Be", "Fore").await;
    let old = ctx
        .state
        .issuer
        .issue(5, "before@example.com", Role::Client, 0)
        .await
        .unwrap();

    let outcome = ctx
        .state
        .profiles
        .update(
            5,
            ProfileUpdate {
                email: Some("after@example.com".to_string()),
                company: Some("Harbour Co".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.user.email.as_deref(), Some("after@example.com"));
    assert_eq!(outcome.user.company.as_deref(), Some("Harbour Co"));
    assert_eq!(outcome.user.token_version, 1);

    let new = outcome.credentials.expect("email change rotates credentials");
    let claims = ctx.state.issuer.authenticate(&new.access_token).await.unwrap();
    assert_eq!(claims.email, "after@example.com");
    assert!(ctx.state.issuer.refresh(&old.refresh_token).await.is_err());
}

#[tokio::test]
async fn non_email_change_keeps_credentials() {
    let ctx = setup().await;
    seed_client(&ctx.db, 6, "same@example.com", "Sa", "Me").await;
    let pair = ctx
        .state
        .issuer
        .issue(6, "same@example.com", Role::Client, 0)
        .await
        .unwrap();

    let outcome = ctx
        .state
        .profiles
        .update(
            6,
            ProfileUpdate {
                email: Some("SAME@example.com".to_string()),
                phone: Some("+44 1234".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(outcome.credentials.is_none());
    assert_eq!(outcome.user.email.as_deref(), Some("SAME@example.com"));
    assert_eq!(outcome.user.phone.as_deref(), Some("+44 1234"));

    let stored = ctx.db.get_user_by_id(6).await.unwrap().unwrap();
    assert_eq!(stored.email.as_deref(), Some("SAME@example.com"));
    assert_eq!(stored.token_version, 0);
    assert!(ctx.state.issuer.authenticate(&pair.access_token).await.is_ok());
}

#[tokio::test]
async fn email_taken_by_another_client_is_rejected() {
    let ctx = setup().await;
    seed_client(&ctx.db, 7, "first@example.com", "Fi", "Rst").await;
    seed_client(&ctx.db, 8, "second@example.com", "Se", "Cond").await;

    let err = ctx
        .state
        .profiles
        .update(
            8,
            ProfileUpdate {
                email: Some("first@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProfileError::EmailTaken(_)));

    let user = ctx.db.get_user_by_id(8).await.unwrap().unwrap();
    assert_eq!(user.email.as_deref(), Some("second@example.com"));
}

#[tokio::test]
async fn failed_rotation_rolls_back_email_change() {
    let ctx = setup().await;
    seed_client(&ctx.db, 9, "stay@example.com", "St", "Ay").await;
    drop_table(&ctx.db, "refresh_tokens").await;

    let err = ctx
        .state
        .profiles
        .update(
            9,
            ProfileUpdate {
                email: Some("moved@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProfileError::Credentials(CredentialError::Storage(_))));

    let user = ctx.db.get_user_by_id(9).await.unwrap().unwrap();
    assert_eq!(user.email.as_deref(), Some("stay@example.com"));
    assert_eq!(user.token_version, 0);
}
