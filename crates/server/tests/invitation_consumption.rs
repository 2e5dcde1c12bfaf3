mod common;

use charter_server::invitation::{ConsumptionError, InvitationConsumer, AUDIT_INVITATION_USED};
use common::{count_audit_rows, drop_table, seed_invitation, setup, InvitationSeed};

#[tokio::test]
async fn second_consume_reports_already_consumed() {
    let ctx = setup().await;
    seed_invitation(&ctx.db, InvitationSeed::open("once-only", 4, "once@example.com")).await;
    let consumer = InvitationConsumer::new(ctx.db.clone());

    let first = consumer.consume("once-only").await.unwrap();
    assert!(first.consumed);
    assert!(!first.already_consumed);
    assert_eq!(first.affected_rows, 1);
    assert!(first.audited);

    let stored = ctx.db.get_invitation_by_token("once-only").await.unwrap().unwrap();
    let consumed_at = stored.consumed_at().expect("consumed_at set");

    let second = consumer.consume("once-only").await.unwrap();
    assert!(second.consumed);
    assert!(second.already_consumed);
    assert_eq!(second.affected_rows, 0);
    assert!(!second.audited);
    assert_eq!(second.consumed_at, Some(consumed_at));

    let stored = ctx.db.get_invitation_by_token("once-only").await.unwrap().unwrap();
    assert_eq!(stored.consumed_at(), Some(consumed_at));
    assert_eq!(count_audit_rows(&ctx.db, AUDIT_INVITATION_USED).await, 1);
}

#[tokio::test]
async fn consume_writes_every_legacy_column() {
    let ctx = setup().await;
    seed_invitation(&ctx.db, InvitationSeed::open("legacy-cols", 4, "cols@example.com")).await;

    InvitationConsumer::new(ctx.db.clone())
        .consume("legacy-cols")
        .await
        .unwrap();

    let (is_used, used, used_at): (bool, bool, Option<String>) =
        sqlx::query_as("SELECT is_used, used, used_at FROM invitations WHERE token = ?")
            .bind("legacy-cols")
            .fetch_one(ctx.db.pool())
            .await
            .unwrap();
    assert!(is_used);
    assert!(used);
    assert!(used_at.is_some());
}

#[tokio::test]
async fn token_flagged_by_legacy_column_is_already_consumed() {
    let ctx = setup().await;
    seed_invitation(
        &ctx.db,
        InvitationSeed {
            used: true,
            ..InvitationSeed::open("old-flag", 8, "old@example.com")
        },
    )
    .await;

    let receipt = InvitationConsumer::new(ctx.db.clone())
        .consume("old-flag")
        .await
        .unwrap();
    assert!(receipt.already_consumed);
    assert_eq!(receipt.consumed_at, None);
    assert_eq!(count_audit_rows(&ctx.db, AUDIT_INVITATION_USED).await, 0);
}

#[tokio::test]
async fn concurrent_consumers_produce_one_fresh_receipt() {
    let ctx = setup().await;
    seed_invitation(&ctx.db, InvitationSeed::open("race", 6, "race@example.com")).await;

    let a = InvitationConsumer::new(ctx.db.clone());
    let b = InvitationConsumer::new(ctx.db.clone());
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.consume("race").await }),
        tokio::spawn(async move { b.consume("race").await }),
    );
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();

    let fresh = [&first, &second]
        .iter()
        .filter(|receipt| !receipt.already_consumed)
        .count();
    assert_eq!(fresh, 1);
    assert!(first.consumed && second.consumed);
    assert_eq!(count_audit_rows(&ctx.db, AUDIT_INVITATION_USED).await, 1);
}

#[tokio::test]
async fn missing_audit_table_does_not_block_consumption() {
    let ctx = setup().await;
    seed_invitation(&ctx.db, InvitationSeed::open("no-audit", 3, "noaudit@example.com")).await;
    drop_table(&ctx.db, "audit_logs").await;

    let receipt = InvitationConsumer::new(ctx.db.clone())
        .consume("no-audit")
        .await
        .unwrap();
    assert!(!receipt.already_consumed);
    assert!(!receipt.audited);

    let stored = ctx.db.get_invitation_by_token("no-audit").await.unwrap().unwrap();
    assert!(stored.is_consumed());
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let ctx = setup().await;
    let consumer = InvitationConsumer::new(ctx.db.clone());

    let err = consumer.consume("never-issued").await.unwrap_err();
    assert!(matches!(err, ConsumptionError::InvalidToken));

    let err = consumer.consume("").await.unwrap_err();
    assert!(matches!(err, ConsumptionError::EmptyToken));
}

#[tokio::test]
async fn storage_failure_surfaces_as_storage_error() {
    let ctx = setup().await;
    drop_table(&ctx.db, "invitations").await;

    let err = InvitationConsumer::new(ctx.db.clone())
        .consume("anything")
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumptionError::Storage(_)));
    assert_eq!(count_audit_rows(&ctx.db, AUDIT_INVITATION_USED).await, 0);
}
