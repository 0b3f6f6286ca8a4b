//! Reconciler integration tests
//!
//! Drives full runs against in-memory clients:
//! - Idempotence and additivity across runs
//! - Matching precedence and ambiguity reporting
//! - Dry-run non-mutation
//! - Degraded sources, per-item write failures and cancellation

mod helpers;

use arrem_common::config::SourceType;
use arrem_sync::error::{ErrorKind, SyncError};
use arrem_sync::matcher::UnmatchedReason;
use arrem_sync::model::{IdKind, MediaKind};
use arrem_sync::reconciler::{Reconciler, ReconcilerOptions};
use arrem_sync::summary::{RunStatus, SyncStatus};
use helpers::{library_item, movie, series, tags, FakeDestination, FakeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn live(batch_size: usize) -> ReconcilerOptions {
    ReconcilerOptions {
        dry_run: false,
        batch_size,
        max_concurrent_writes: 4,
    }
}

fn dry(batch_size: usize) -> ReconcilerOptions {
    ReconcilerOptions {
        dry_run: true,
        ..live(batch_size)
    }
}

fn small_library() -> Vec<arrem_sync::model::DestinationItem> {
    vec![
        library_item("e1", MediaKind::Movie, &["4k"], &[(IdKind::Tmdb, "100")]),
        library_item("e2", MediaKind::Movie, &["hdr", "keep"], &[(IdKind::Tmdb, "200")]),
        library_item("e3", MediaKind::Movie, &[], &[(IdKind::Imdb, "tt0300")]),
    ]
}

fn small_catalog() -> Vec<arrem_sync::model::SourceItem> {
    vec![
        movie(1, "Movie A", &["kids"], &[(IdKind::Tmdb, "100")]),
        movie(2, "Movie B", &["hdr", "classic"], &[(IdKind::Tmdb, "200")]),
        movie(3, "Movie C", &["noir"], &[(IdKind::Tmdb, "300"), (IdKind::Imdb, "tt0300")]),
        movie(4, "Movie D", &["kids"], &[]),
    ]
}

#[tokio::test]
async fn test_single_item_example_is_applied() {
    let destination = Arc::new(FakeDestination::new(vec![library_item(
        "e1",
        MediaKind::Movie,
        &["4k"],
        &[(IdKind::Tmdb, "100")],
    )]));
    let source = FakeSource::new(
        "radarr-1",
        SourceType::Radarr,
        vec![movie(1, "Movie A", &["kids"], &[(IdKind::Tmdb, "100")])],
    );

    let reconciler = Reconciler::new(vec![source.shared()], destination.clone(), live(50));
    let summary = reconciler.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.outcomes[0].status, SyncStatus::Applied);
    assert_eq!(summary.outcomes[0].delta, tags(&["kids"]));
    assert_eq!(summary.outcomes[0].matched_by, Some(IdKind::Tmdb));
    assert_eq!(destination.tags_of("e1"), tags(&["4k", "kids"]));
}

#[tokio::test]
async fn test_second_run_is_all_noop() {
    let destination = Arc::new(FakeDestination::new(small_library()));
    let source = FakeSource::new("radarr-1", SourceType::Radarr, small_catalog()).shared();

    let first = Reconciler::new(vec![source.clone()], destination.clone(), live(50))
        .run()
        .await
        .unwrap();
    assert_eq!(first.totals.applied, 3);

    let second = Reconciler::new(vec![source], destination.clone(), live(50))
        .run()
        .await
        .unwrap();
    assert_eq!(second.totals.applied, 0);
    assert_eq!(second.totals.no_op, 3);
    assert_eq!(destination.write_count(), 3);
}

#[tokio::test]
async fn test_destination_tags_only_grow() {
    let destination = Arc::new(FakeDestination::new(small_library()));
    let before = destination.snapshot();
    let source = FakeSource::new("radarr-1", SourceType::Radarr, small_catalog());

    Reconciler::new(vec![source.shared()], destination.clone(), live(2))
        .run()
        .await
        .unwrap();

    let after = destination.snapshot();
    for (item_id, old_tags) in &before {
        assert!(
            after[item_id].is_superset(old_tags),
            "{item_id} lost tags: {old_tags:?} -> {:?}",
            after[item_id]
        );
    }
    assert_eq!(destination.tags_of("e2"), tags(&["classic", "hdr", "keep"]));
}

#[tokio::test]
async fn test_primary_identifier_takes_precedence() {
    let destination = Arc::new(FakeDestination::new(vec![
        library_item("by-tmdb", MediaKind::Movie, &[], &[(IdKind::Tmdb, "100")]),
        library_item("by-imdb", MediaKind::Movie, &[], &[(IdKind::Imdb, "tt0100")]),
    ]));
    let source = FakeSource::new(
        "radarr-1",
        SourceType::Radarr,
        vec![movie(
            1,
            "Movie A",
            &["kids"],
            &[(IdKind::Tmdb, "100"), (IdKind::Imdb, "tt0100")],
        )],
    );

    let summary = Reconciler::new(vec![source.shared()], destination.clone(), live(50))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcomes[0].destination_id.as_deref(), Some("by-tmdb"));
    assert_eq!(destination.tags_of("by-tmdb"), tags(&["kids"]));
    assert!(destination.tags_of("by-imdb").is_empty());
}

#[tokio::test]
async fn test_shared_identifier_is_reported_ambiguous() {
    let destination = Arc::new(FakeDestination::new(vec![
        library_item("a", MediaKind::Movie, &[], &[(IdKind::Imdb, "tt0100")]),
        library_item("b", MediaKind::Movie, &[], &[(IdKind::Imdb, "tt0100")]),
    ]));
    let source = FakeSource::new(
        "radarr-1",
        SourceType::Radarr,
        vec![movie(1, "Movie A", &["kids"], &[(IdKind::Imdb, "tt0100")])],
    );

    let summary = Reconciler::new(vec![source.shared()], destination.clone(), live(50))
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary.outcomes[0].status,
        SyncStatus::SkippedUnmatched {
            reason: UnmatchedReason::Ambiguous
        }
    );
    assert_eq!(summary.totals.unmatched_ambiguous, 1);
    assert_eq!(destination.write_count(), 0);
    assert_eq!(summary.status, RunStatus::Success);
}

#[tokio::test]
async fn test_dry_run_never_writes_and_matches_live_deltas() {
    let dry_destination = Arc::new(FakeDestination::new(small_library()));
    let live_destination = Arc::new(FakeDestination::new(small_library()));
    let catalog = small_catalog();

    let dry_summary = Reconciler::new(
        vec![FakeSource::new("radarr-1", SourceType::Radarr, catalog.clone()).shared()],
        dry_destination.clone(),
        dry(2),
    )
    .run()
    .await
    .unwrap();
    let live_summary = Reconciler::new(
        vec![FakeSource::new("radarr-1", SourceType::Radarr, catalog).shared()],
        live_destination.clone(),
        live(2),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(dry_destination.write_count(), 0);
    assert_eq!(dry_destination.snapshot(), FakeDestination::new(small_library()).snapshot());
    assert!(dry_summary.dry_run);

    let dry_deltas: Vec<_> = dry_summary.outcomes.iter().map(|o| &o.delta).collect();
    let live_deltas: Vec<_> = live_summary.outcomes.iter().map(|o| &o.delta).collect();
    assert_eq!(dry_deltas, live_deltas);
    assert_eq!(dry_summary.totals, live_summary.totals);
}

#[tokio::test]
async fn test_unreachable_source_degrades_run() {
    let library: Vec<_> = (1..=10)
        .map(|n| {
            library_item(
                &format!("s{n}"),
                MediaKind::Series,
                &[],
                &[(IdKind::Tvdb, n.to_string().as_str())],
            )
        })
        .collect();
    let catalog: Vec<_> = (1..=10)
        .map(|n| series(n, &format!("Show {n}"), &["anime"], &[(IdKind::Tvdb, n.to_string().as_str())]))
        .collect();

    let destination = Arc::new(FakeDestination::new(library));
    let sources = vec![
        FakeSource::failing("radarr-1", SourceType::Radarr, ErrorKind::Connection).shared(),
        FakeSource::new("sonarr-1", SourceType::Sonarr, catalog).shared(),
    ];

    let summary = Reconciler::new(sources, destination.clone(), live(4))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Degraded);
    assert_eq!(summary.instances.len(), 2);
    assert_eq!(summary.instances[0].items, 0);
    assert_eq!(
        summary.instances[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Connection)
    );
    assert_eq!(summary.instances[1].items, 10);
    assert_eq!(summary.totals.applied, 10);
    assert_eq!(destination.write_count(), 10);
}

#[tokio::test]
async fn test_failed_write_does_not_stop_other_items() {
    let library: Vec<_> = (1..=6)
        .map(|n| library_item(&format!("e{n}"), MediaKind::Movie, &[], &[(IdKind::Tmdb, n.to_string().as_str())]))
        .collect();
    let catalog: Vec<_> = (1..=6)
        .map(|n| movie(n, &format!("Movie {n}"), &["kids"], &[(IdKind::Tmdb, n.to_string().as_str())]))
        .collect();

    let destination = Arc::new(FakeDestination::new(library).with_failing_writes(&["e2"]));
    let source = FakeSource::new("radarr-1", SourceType::Radarr, catalog);

    let summary = Reconciler::new(vec![source.shared()], destination.clone(), live(2))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithFailures);
    assert_eq!(summary.totals.failed, 1);
    assert_eq!(summary.totals.applied, 5);
    assert!(matches!(
        summary.outcomes[1].status,
        SyncStatus::Failed {
            kind: ErrorKind::Server,
            ..
        }
    ));
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].destination_id.as_deref(), Some("e2"));
    assert_eq!(summary.failures[0].source_id, 2);
    assert_eq!(destination.tags_of("e6"), tags(&["kids"]));
}

#[tokio::test]
async fn test_destination_failure_aborts_run() {
    let destination = Arc::new(FakeDestination::unavailable(ErrorKind::Auth));
    let source = FakeSource::new("radarr-1", SourceType::Radarr, small_catalog());

    let result = Reconciler::new(vec![source.shared()], destination, live(50))
        .run()
        .await;

    match result {
        Err(SyncError::DestinationUnavailable(e)) => assert_eq!(e.kind(), ErrorKind::Auth),
        other => panic!("expected destination failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_all_sources_failing_aborts_run() {
    let destination = Arc::new(FakeDestination::new(small_library()));
    let sources = vec![
        FakeSource::failing("radarr-1", SourceType::Radarr, ErrorKind::Connection).shared(),
        FakeSource::failing("sonarr-1", SourceType::Sonarr, ErrorKind::Schema).shared(),
    ];

    let result = Reconciler::new(sources, destination, live(50)).run().await;

    match result {
        Err(SyncError::AllSourcesFailed(failures)) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[1].kind, ErrorKind::Schema);
        }
        other => panic!("expected all sources failed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_no_sources_is_an_error() {
    let destination = Arc::new(FakeDestination::new(small_library()));
    let result = Reconciler::new(Vec::new(), destination, live(50)).run().await;
    assert!(matches!(result, Err(SyncError::NoSources)));
}

#[tokio::test]
async fn test_cancellation_stops_between_batches() {
    let library: Vec<_> = (1..=6)
        .map(|n| library_item(&format!("e{n}"), MediaKind::Movie, &[], &[(IdKind::Tmdb, n.to_string().as_str())]))
        .collect();
    let catalog: Vec<_> = (1..=6)
        .map(|n| movie(n, &format!("Movie {n}"), &["kids"], &[(IdKind::Tmdb, n.to_string().as_str())]))
        .collect();

    let cancel = CancellationToken::new();
    let destination = Arc::new(FakeDestination::new(library).cancel_after(1, cancel.clone()));
    let source = FakeSource::new("radarr-1", SourceType::Radarr, catalog);

    let summary = Reconciler::new(vec![source.shared()], destination.clone(), live(2))
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    // The first batch finishes even though the token fired inside it
    assert!(summary.interrupted);
    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.totals.applied, 2);
    assert_eq!(summary.totals.not_attempted, 4);
    assert_eq!(destination.write_count(), 2);
    assert_eq!(summary.outcomes[5].status, SyncStatus::NotAttempted);
}

#[tokio::test]
async fn test_sources_converge_on_tag_union() {
    let destination = Arc::new(FakeDestination::new(vec![library_item(
        "e1",
        MediaKind::Movie,
        &["4k"],
        &[(IdKind::Tmdb, "100")],
    )]));
    let sources = vec![
        FakeSource::new(
            "radarr-hd",
            SourceType::Radarr,
            vec![movie(1, "Movie A", &["kids"], &[(IdKind::Tmdb, "100")])],
        )
        .shared(),
        FakeSource::new(
            "radarr-4k",
            SourceType::Radarr,
            vec![movie(9, "Movie A", &["kids", "remux"], &[(IdKind::Tmdb, "100")])],
        )
        .shared(),
    ];

    let summary = Reconciler::new(sources, destination.clone(), live(50))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcomes[0].instance, "radarr-hd");
    assert_eq!(summary.outcomes[0].delta, tags(&["kids"]));
    assert_eq!(summary.outcomes[1].instance, "radarr-4k");
    assert_eq!(summary.outcomes[1].delta, tags(&["remux"]));
    assert_eq!(destination.tags_of("e1"), tags(&["4k", "kids", "remux"]));
    assert_eq!(destination.write_count(), 1);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| o.status == SyncStatus::Applied));
}

fn two_sources_on_one_item() -> Vec<Arc<dyn arrem_sync::clients::SourceClient>> {
    vec![
        FakeSource::new(
            "radarr-hd",
            SourceType::Radarr,
            vec![movie(1, "Movie A", &["kids"], &[(IdKind::Tmdb, "100")])],
        )
        .shared(),
        FakeSource::new(
            "radarr-4k",
            SourceType::Radarr,
            vec![movie(9, "Movie A", &["remux"], &[(IdKind::Tmdb, "100")])],
        )
        .shared(),
    ]
}

#[tokio::test]
async fn test_uneven_write_latency_loses_no_contributor_tags() {
    // Smaller bodies land last, so overlapping writes to one item would
    // replace a larger set with a smaller one
    let destination = Arc::new(
        FakeDestination::new(vec![library_item(
            "e1",
            MediaKind::Movie,
            &["4k"],
            &[(IdKind::Tmdb, "100")],
        )])
        .with_write_delay(|body| {
            if body.len() <= 2 {
                Duration::from_millis(50)
            } else {
                Duration::from_millis(5)
            }
        }),
    );

    let summary = Reconciler::new(two_sources_on_one_item(), destination.clone(), live(50))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.totals.applied, 2);
    assert_eq!(destination.tags_of("e1"), tags(&["4k", "kids", "remux"]));
    assert_eq!(
        destination.writes(),
        vec![("e1".to_string(), tags(&["4k", "kids", "remux"]))]
    );
}

#[tokio::test]
async fn test_failed_shared_write_fails_every_contributor() {
    let destination = Arc::new(
        FakeDestination::new(vec![library_item(
            "e1",
            MediaKind::Movie,
            &["4k"],
            &[(IdKind::Tmdb, "100")],
        )])
        .with_failing_writes(&["e1"]),
    );

    let summary = Reconciler::new(two_sources_on_one_item(), destination.clone(), live(50))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithFailures);
    assert_eq!(summary.totals.applied, 0);
    assert_eq!(summary.totals.failed, 2);
    for outcome in &summary.outcomes {
        assert!(matches!(
            outcome.status,
            SyncStatus::Failed {
                kind: ErrorKind::Server,
                ..
            }
        ));
    }
    let failed_sources: Vec<i64> = summary.failures.iter().map(|f| f.source_id).collect();
    assert_eq!(failed_sources, vec![1, 9]);
    assert_eq!(destination.tags_of("e1"), tags(&["4k"]));
}

#[tokio::test]
async fn test_outcomes_follow_source_order() {
    let destination = Arc::new(FakeDestination::new(small_library()));
    let source = FakeSource::new("radarr-1", SourceType::Radarr, small_catalog());

    let summary = Reconciler::new(vec![source.shared()], destination, dry(1))
        .run()
        .await
        .unwrap();

    let ids: Vec<i64> = summary.outcomes.iter().map(|o| o.source_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(summary.outcomes[2].matched_by, Some(IdKind::Imdb));
    assert_eq!(
        summary.outcomes[3].status,
        SyncStatus::SkippedUnmatched {
            reason: UnmatchedReason::NoIdentifier
        }
    );
}

#[tokio::test]
async fn test_series_never_match_movies() {
    let destination = Arc::new(FakeDestination::new(vec![library_item(
        "m1",
        MediaKind::Movie,
        &[],
        &[(IdKind::Tmdb, "100")],
    )]));
    let source = FakeSource::new(
        "sonarr-1",
        SourceType::Sonarr,
        vec![series(1, "Show", &["anime"], &[(IdKind::Tmdb, "100")])],
    );

    let summary = Reconciler::new(vec![source.shared()], destination.clone(), live(50))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.totals.unmatched_not_found, 1);
    assert_eq!(destination.write_count(), 0);
}

#[tokio::test]
async fn test_connectivity_report_lists_every_service() {
    let destination = Arc::new(FakeDestination::new(Vec::new()));
    let sources = vec![
        FakeSource::new("radarr-1", SourceType::Radarr, Vec::new()).shared(),
        FakeSource::failing("sonarr-1", SourceType::Sonarr, ErrorKind::Auth).shared(),
    ];

    let report = Reconciler::new(sources, destination, dry(50))
        .check_connectivity()
        .await;

    assert_eq!(report.checks.len(), 3);
    assert_eq!(report.checks[0].service, "emby");
    assert_eq!(report.checks[0].detail, "Fake Emby");
    assert!(report.checks[1].ok);
    assert!(!report.checks[2].ok);
    assert!(!report.all_ok());
}

#[test]
fn test_concurrency_never_exceeds_batch_size() {
    let destination = Arc::new(FakeDestination::new(Vec::new()));
    let reconciler = Reconciler::new(
        Vec::new(),
        destination,
        ReconcilerOptions {
            dry_run: false,
            batch_size: 2,
            max_concurrent_writes: 10,
        },
    );
    assert_eq!(reconciler.options().max_concurrent_writes, 2);
}
