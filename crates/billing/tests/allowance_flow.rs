//! End-to-end allowance flow tests against a real database.
//!
//! All tests here need DATABASE_URL pointing at a migrated Postgres and are
//! ignored by default. Each test works with freshly created organizations so
//! they can share a database without interfering.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use memoledger_billing::{
    period, AllowanceChecker, BillingError, MonthlyReset, WordDeductor,
};

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    memoledger_shared::create_pool(&url, 5)
        .await
        .expect("Failed to create pool")
}

/// Insert an org with an active subscription and a current-month usage record
async fn seed_org(pool: &PgPool, word_allowance: i64, words_used: i64) -> (Uuid, Uuid) {
    let org_id: Uuid = sqlx::query_scalar(
        "INSERT INTO organizations (name) VALUES ('test org') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .expect("insert org");

    let sub_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO subscriptions (org_id, plan_key, word_allowance, status)
        VALUES ($1, 'professional', $2, 'active')
        RETURNING id
        "#,
    )
    .bind(org_id)
    .bind(word_allowance)
    .fetch_one(pool)
    .await
    .expect("insert subscription");

    let month_start = period::current_month_start(OffsetDateTime::now_utc());
    sqlx::query(
        r#"
        INSERT INTO subscription_usage (org_id, subscription_id, month_start, word_allowance, words_used)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(org_id)
    .bind(sub_id)
    .bind(month_start)
    .bind(word_allowance)
    .bind(words_used)
    .execute(pool)
    .await
    .expect("insert usage record");

    (org_id, sub_id)
}

async fn seed_rollover(
    pool: &PgPool,
    org_id: Uuid,
    sub_id: Uuid,
    months_ago: i32,
    amount: i64,
    expires_at: OffsetDateTime,
) -> i64 {
    let grant_month = period::add_months(
        period::current_month_start(OffsetDateTime::now_utc()),
        -months_ago,
    );
    sqlx::query_scalar(
        r#"
        INSERT INTO rollover_ledger
            (org_id, subscription_id, grant_month, amount_granted, amount_remaining, expires_at)
        VALUES ($1, $2, $3, $4, $4, $5)
        RETURNING id
        "#,
    )
    .bind(org_id)
    .bind(sub_id)
    .bind(grant_month)
    .bind(amount)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .expect("insert rollover entry")
}

#[tokio::test]
#[ignore] // Requires database
async fn test_check_then_deduct_succeeds_without_interleaving() {
    let pool = test_pool().await;
    let (org_id, sub_id) = seed_org(&pool, 1_000, 200).await;
    let far_future = OffsetDateTime::now_utc() + Duration::days(300);
    seed_rollover(&pool, org_id, sub_id, 1, 50, far_future).await;

    let checker = AllowanceChecker::new(pool.clone());
    let decision = checker.check_word_allowance(org_id, 800).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.words_available, 850);
    assert_eq!(decision.words_remaining_after, Some(50));

    // Current month covers the whole request; rollover stays untouched
    let deductor = WordDeductor::new(pool.clone());
    let breakdown = deductor
        .deduct_words(org_id, 800, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(breakdown.from_allowance, 800);
    assert_eq!(breakdown.from_rollover, 0);

    let remaining: i64 = sqlx::query_scalar(
        "SELECT amount_remaining FROM rollover_ledger WHERE org_id = $1",
    )
    .bind(org_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(remaining, 50);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_shortfall_rolls_back_everything() {
    let pool = test_pool().await;
    let (org_id, sub_id) = seed_org(&pool, 1_000, 200).await;
    let far_future = OffsetDateTime::now_utc() + Duration::days(300);
    seed_rollover(&pool, org_id, sub_id, 1, 50, far_future).await;

    // 800 base remainder + 50 rollover = 850 < 900
    let deductor = WordDeductor::new(pool.clone());
    let err = deductor
        .deduct_words(org_id, 900, Uuid::new_v4())
        .await
        .unwrap_err();
    match err {
        BillingError::InsufficientAllowance { requested, available } => {
            assert_eq!(requested, 900);
            assert_eq!(available, 850);
        }
        other => panic!("expected InsufficientAllowance, got {other:?}"),
    }

    // No partial deduction committed
    let words_used: i64 =
        sqlx::query_scalar("SELECT words_used FROM subscription_usage WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(words_used, 200);

    let remaining: i64 =
        sqlx::query_scalar("SELECT amount_remaining FROM rollover_ledger WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 50);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_concurrent_deductions_cannot_overspend() {
    let pool = test_pool().await;
    let (org_id, _) = seed_org(&pool, 1_000, 0).await;

    let deductor = WordDeductor::new(pool.clone());
    let (a, b) = tokio::join!(
        deductor.deduct_words(org_id, 700, Uuid::new_v4()),
        deductor.deduct_words(org_id, 700, Uuid::new_v4()),
    );

    // Exactly one of the two racing deductions may win
    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "exactly one deduction should succeed"
    );

    let words_used: i64 =
        sqlx::query_scalar("SELECT words_used FROM subscription_usage WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(words_used, 700);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_duplicate_analysis_deduction_rejected() {
    let pool = test_pool().await;
    let (org_id, _) = seed_org(&pool, 1_000, 0).await;
    let analysis_id = Uuid::new_v4();

    let deductor = WordDeductor::new(pool.clone());
    deductor.deduct_words(org_id, 100, analysis_id).await.unwrap();

    let err = deductor
        .deduct_words(org_id, 100, analysis_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::DuplicateDeduction(id) if id == analysis_id));

    // The rejected second call charged nothing
    let words_used: i64 =
        sqlx::query_scalar("SELECT words_used FROM subscription_usage WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(words_used, 100);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_reset_is_idempotent() {
    let pool = test_pool().await;

    // Org with only last month's record: 1000 allowance, 300 used
    let org_id: Uuid =
        sqlx::query_scalar("INSERT INTO organizations (name) VALUES ('reset org') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
    let sub_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO subscriptions (org_id, plan_key, word_allowance, status)
        VALUES ($1, 'professional', 1000, 'active')
        RETURNING id
        "#,
    )
    .bind(org_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let last_month = period::previous_month(period::current_month_start(OffsetDateTime::now_utc()));
    sqlx::query(
        r#"
        INSERT INTO subscription_usage (org_id, subscription_id, month_start, word_allowance, words_used)
        VALUES ($1, $2, $3, 1000, 300)
        "#,
    )
    .bind(org_id)
    .bind(sub_id)
    .bind(last_month)
    .execute(&pool)
    .await
    .unwrap();

    let reset = MonthlyReset::new(pool.clone());
    let first = reset.reset_monthly_allowance(org_id).await.unwrap();
    assert_eq!(first.unused_words_rolled_over, 700);
    assert_eq!(first.new_month_allowance, 1000);

    let second = reset.reset_monthly_allowance(org_id).await.unwrap();
    assert_eq!(second.unused_words_rolled_over, 0);

    // Still exactly one grant and one new-month record
    let grants: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM rollover_ledger WHERE org_id = $1 AND grant_month = $2",
    )
    .bind(org_id)
    .bind(last_month)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(grants, 1);

    let granted: i64 = sqlx::query_scalar(
        "SELECT amount_granted FROM rollover_ledger WHERE org_id = $1 AND grant_month = $2",
    )
    .bind(org_id)
    .bind(last_month)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(granted, 700);

    let records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscription_usage WHERE org_id = $1 AND month_start = $2",
    )
    .bind(org_id)
    .bind(period::current_month_start(OffsetDateTime::now_utc()))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(records, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_lapsed_subscription_cannot_be_charged() {
    let pool = test_pool().await;
    let (org_id, sub_id) = seed_org(&pool, 1_000, 0).await;
    let deductor = WordDeductor::new(pool.clone());

    // Payment lapses after the caller's check; the deduction must not land
    sqlx::query("UPDATE subscriptions SET status = 'past_due' WHERE id = $1")
        .bind(sub_id)
        .execute(&pool)
        .await
        .unwrap();
    let err = deductor
        .deduct_words(org_id, 100, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::PaymentRequired(id) if id == org_id));

    // Cancelled past the paid-through period is expired, not chargeable
    sqlx::query(
        "UPDATE subscriptions SET status = 'cancelled', current_period_end = $2 WHERE id = $1",
    )
    .bind(sub_id)
    .bind(OffsetDateTime::now_utc() - Duration::days(1))
    .execute(&pool)
    .await
    .unwrap();
    let err = deductor
        .deduct_words(org_id, 100, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::SubscriptionExpired(id) if id == org_id));

    // Neither rejected attempt consumed anything
    let words_used: i64 =
        sqlx::query_scalar("SELECT words_used FROM subscription_usage WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(words_used, 0);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_rollover_drawn_soonest_expiry_first() {
    let pool = test_pool().await;
    // Base allowance exhausted so the whole request hits the ledger
    let (org_id, sub_id) = seed_org(&pool, 1_000, 1_000).await;

    // Insert the later-expiring grant first so it gets the smaller id;
    // expiry order must still win over insertion/id order
    let later = OffsetDateTime::now_utc() + Duration::days(300);
    let sooner = OffsetDateTime::now_utc() + Duration::days(100);
    let later_id = seed_rollover(&pool, org_id, sub_id, 2, 500, later).await;
    let sooner_id = seed_rollover(&pool, org_id, sub_id, 1, 100, sooner).await;
    assert!(later_id < sooner_id);

    let deductor = WordDeductor::new(pool.clone());
    let breakdown = deductor
        .deduct_words(org_id, 150, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(breakdown.from_allowance, 0);
    assert_eq!(breakdown.from_rollover, 150);

    // Soonest-expiring entry fully drained, later entry only covers the rest
    let sooner_left: i64 =
        sqlx::query_scalar("SELECT amount_remaining FROM rollover_ledger WHERE id = $1")
            .bind(sooner_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(sooner_left, 0);

    let later_left: i64 =
        sqlx::query_scalar("SELECT amount_remaining FROM rollover_ledger WHERE id = $1")
            .bind(later_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(later_left, 450);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_expired_rollover_excluded_and_purged() {
    let pool = test_pool().await;
    let (org_id, sub_id) = seed_org(&pool, 1_000, 1_000).await;

    // One expired entry and one live entry
    let past = OffsetDateTime::now_utc() - Duration::days(3);
    let future = OffsetDateTime::now_utc() + Duration::days(300);
    seed_rollover(&pool, org_id, sub_id, 13, 400, past).await;
    seed_rollover(&pool, org_id, sub_id, 1, 100, future).await;

    // Base allowance exhausted; only the live entry counts
    let checker = AllowanceChecker::new(pool.clone());
    let decision = checker.check_word_allowance(org_id, 150).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.words_available, 100);

    // Reset removes the expired row
    let reset = MonthlyReset::new(pool.clone());
    let outcome = reset.reset_monthly_allowance(org_id).await.unwrap();
    assert_eq!(outcome.expired_entries_removed, 1);

    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rollover_ledger WHERE org_id = $1")
        .bind(org_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(left, 1);
}
