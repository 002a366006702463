mod common;

use chrono::{Duration, Utc};
use common::{memory_storage, record, spawn_mock_google, store_in, test_config};
use furriyadh_keeper::TokenRefresher;
use furriyadh_keeper::config::Config;
use furriyadh_keeper::db::{CredentialsStorage, TokenTable};
use furriyadh_keeper::service::{SweepSummary, Sweeper, refresh_actor};

async fn sweeper_for(mock: &common::MockGoogle, storage: &CredentialsStorage) -> Sweeper {
    sweeper_with(test_config(mock), storage).await
}

async fn sweeper_with(cfg: Config, storage: &CredentialsStorage) -> Sweeper {
    let refresher = TokenRefresher::new(&cfg.google, reqwest::Client::new());
    let handle = refresh_actor::spawn(refresher).await.unwrap();
    Sweeper::new(storage.clone(), handle, cfg.sweep)
}

#[tokio::test]
async fn sweep_counts_refreshed_and_revoked_records() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    let soon = now + Duration::minutes(10);
    for (subject, rt) in [("s1", "rt-1"), ("s2", "rt-revoked-2"), ("s3", "rt-3")] {
        store_in(&storage, TokenTable::OauthTokens, record(subject, rt, soon)).await;
    }

    let summary = sweeper_for(&mock, &storage).await.sweep(now).await.unwrap();
    assert_eq!(
        summary,
        SweepSummary {
            refreshed: 2,
            failed: 1,
            total_processed: 3,
            revoked: 1,
            misconfigured: false,
        }
    );

    let s1 = storage.get("s1", "google").await.unwrap().unwrap();
    assert_eq!(s1.record.access_token.as_deref(), Some("1"));
    assert!(s1.record.expires_at > now + Duration::minutes(55));

    let s2 = storage.get("s2", "google").await.unwrap().unwrap();
    assert!(s2.reauth_required);
    assert_eq!(s2.record.access_token.as_deref(), Some("stale-s2"));

    let s3 = storage.get("s3", "google").await.unwrap().unwrap();
    assert_eq!(s3.record.access_token.as_deref(), Some("3"));
}

#[tokio::test]
async fn hung_refresh_is_cut_off_without_stalling_the_batch() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    let soon = now + Duration::minutes(10);
    for (subject, rt) in [("h1", "rt-h1"), ("h2", "rt-hang"), ("h3", "rt-h3")] {
        store_in(&storage, TokenTable::OauthTokens, record(subject, rt, soon)).await;
    }
    let mut cfg = test_config(&mock);
    cfg.sweep.call_timeout_secs = 1;

    let started = std::time::Instant::now();
    let summary = sweeper_with(cfg, &storage).await.sweep(now).await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(
        summary,
        SweepSummary {
            refreshed: 2,
            failed: 1,
            total_processed: 3,
            revoked: 0,
            misconfigured: false,
        }
    );

    let hung = storage.get("h2", "google").await.unwrap().unwrap();
    assert!(hung.is_refreshable());
    assert_eq!(hung.record.access_token.as_deref(), Some("stale-h2"));
    let h3 = storage.get("h3", "google").await.unwrap().unwrap();
    assert_eq!(h3.record.access_token.as_deref(), Some("h3"));
}

#[tokio::test]
async fn revoked_records_are_skipped_by_later_sweeps() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    store_in(
        &storage,
        TokenTable::OauthTokens,
        record("gone", "rt-revoked", now + Duration::minutes(5)),
    )
    .await;

    let sweeper = sweeper_for(&mock, &storage).await;
    assert_eq!(sweeper.sweep(now).await.unwrap().revoked, 1);
    assert_eq!(mock.token_calls(), 1);

    let second = sweeper.sweep(now).await.unwrap();
    assert_eq!(second.total_processed, 0);
    assert_eq!(mock.token_calls(), 1);
}

#[tokio::test]
async fn records_outside_the_window_are_untouched() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    store_in(
        &storage,
        TokenTable::OauthTokens,
        record("fresh", "rt-fresh", now + Duration::hours(2)),
    )
    .await;
    store_in(
        &storage,
        TokenTable::OauthTokens,
        record("edge", "rt-edge", now + Duration::minutes(45)),
    )
    .await;

    let summary = sweeper_for(&mock, &storage).await.sweep(now).await.unwrap();
    assert_eq!(summary.total_processed, 1);
    assert_eq!(summary.refreshed, 1);

    let fresh = storage.get("fresh", "google").await.unwrap().unwrap();
    assert_eq!(fresh.record.access_token.as_deref(), Some("stale-fresh"));
    let edge = storage.get("edge", "google").await.unwrap().unwrap();
    assert_eq!(edge.record.access_token.as_deref(), Some("edge"));
}

#[tokio::test]
async fn sweep_covers_every_table_shape() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    let expired = now - Duration::minutes(30);

    store_in(&storage, TokenTable::OauthTokens, record("canon", "rt-canon", expired)).await;
    let mut legacy = record("legacy", "rt-legacy", expired);
    legacy.email = Some("legacy@example.com".to_string());
    store_in(&storage, TokenTable::UserOauthTokens, legacy).await;
    let mut ads = record("1234567890", "rt-ads", expired);
    ads.email = Some("manager@example.com".to_string());
    store_in(&storage, TokenTable::GoogleAdsCredentials, ads).await;

    let summary = sweeper_for(&mock, &storage).await.sweep(now).await.unwrap();
    assert_eq!(summary.refreshed, 3);
    assert_eq!(summary.failed, 0);

    let legacy = storage
        .find_by_subject("legacy", "google")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(legacy.table, TokenTable::UserOauthTokens);
    assert_eq!(legacy.record.access_token.as_deref(), Some("legacy"));

    let ads = storage
        .find_by_email("MANAGER@example.com", "google")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ads.table, TokenTable::GoogleAdsCredentials);
    assert_eq!(ads.record.access_token.as_deref(), Some("ads"));
    assert!(ads.record.expires_at > now + Duration::minutes(55));
}

#[tokio::test]
async fn rejected_client_flags_the_summary() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    store_in(
        &storage,
        TokenTable::OauthTokens,
        record("bad", "rt-badclient", now),
    )
    .await;

    let summary = sweeper_for(&mock, &storage).await.sweep(now).await.unwrap();
    assert!(summary.misconfigured);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.revoked, 0);

    let bad = storage.get("bad", "google").await.unwrap().unwrap();
    assert!(!bad.reauth_required);
}

#[tokio::test]
async fn transient_failure_leaves_the_record_refreshable() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let now = Utc::now();
    store_in(&storage, TokenTable::OauthTokens, record("flaky", "rt-flaky", now)).await;

    let summary = sweeper_for(&mock, &storage).await.sweep(now).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.revoked, 0);
    assert!(!summary.misconfigured);

    let flaky = storage.get("flaky", "google").await.unwrap().unwrap();
    assert!(flaky.is_refreshable());
}

#[tokio::test]
async fn empty_store_sweeps_cleanly() {
    let mock = spawn_mock_google().await;
    let storage = memory_storage().await;
    let summary = sweeper_for(&mock, &storage)
        .await
        .sweep(Utc::now())
        .await
        .unwrap();
    assert_eq!(summary, SweepSummary::default());
    assert_eq!(mock.token_calls(), 0);
}
