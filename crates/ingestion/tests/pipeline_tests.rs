//! Pipeline behavior against the in-memory store.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use ingestion::{
    DataKind, EventOutcome, IngestContext, IngestFilters, IngestPipeline, IngestSettings,
    IngestionError, RawEvent, RejectReason, SeriesDecision, SeriesHeader, SkipReason, Stage,
};
use storage::Store;
use test_utils::{assert_batch_sizes, fields, MemoryStore};

const SOURCE: &str = "/data/drrc2.xml";

fn context(store: &Arc<MemoryStore>, max_batch_rows: usize) -> Arc<IngestContext> {
    let settings = IngestSettings {
        max_batch_rows,
        ..Default::default()
    };
    IngestContext::new(store.clone() as Arc<dyn Store>, settings).unwrap()
}

fn observation_header() -> SeriesHeader {
    SeriesHeader {
        location_id: "DRRC2".into(),
        station_name: "DOLORES, CO".into(),
        variable_name: "QINE".into(),
        unit: "CMS".into(),
        missing_value: Some(-999.0),
        time_step_hours: Some(1),
        start_date: Some(Utc.with_ymd_and_hms(2017, 8, 8, 12, 0, 0).unwrap()),
        end_date: Some(Utc.with_ymd_and_hms(2017, 8, 9, 12, 0, 0).unwrap()),
        ..Default::default()
    }
}

fn forecast_header() -> SeriesHeader {
    SeriesHeader {
        ensemble_name: "MEFP".into(),
        ensemble_member: "1".into(),
        forecast_date: Some(Utc.with_ymd_and_hms(2017, 8, 8, 12, 0, 0).unwrap()),
        creation_time: Some(Utc.with_ymd_and_hms(2017, 8, 8, 11, 30, 0).unwrap()),
        ..observation_header()
    }
}

fn hourly_event(hour: u32, value: &str) -> RawEvent {
    let date = if hour < 24 { "2017-08-08" } else { "2017-08-09" };
    let time = format!("{:02}:00:00", hour % 24);
    RawEvent::new(date, Some(&time), value)
}

async fn run_series(pipeline: &mut IngestPipeline, header: SeriesHeader, values: &[&str]) {
    pipeline.begin_series().unwrap();
    pipeline.header_complete(header).unwrap();
    for (i, value) in values.iter().enumerate() {
        pipeline.event(hourly_event(13 + i as u32, value)).await.unwrap();
    }
    pipeline.end_series().unwrap();
}

#[tokio::test]
async fn test_observation_batches_split_at_max_rows() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 3);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    run_series(
        &mut pipeline,
        observation_header(),
        &["1", "2", "3", "4", "5", "6", "7"],
    )
    .await;
    let summary = pipeline.await_completion().await.unwrap();

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.rows, 7);

    let mut copies = store.copies_into("wres.observation");
    copies.sort_by_key(|c| std::cmp::Reverse(c.rows.len()));
    assert_batch_sizes!(copies, [3, 3, 1]);

    let stats = pipeline.stats();
    assert_eq!(stats.batches_submitted, 3);
    assert_eq!(stats.rows_submitted, 7);
}

#[tokio::test]
async fn test_observation_rows_carry_resolved_keys() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        Arc::clone(&ctx),
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    run_series(&mut pipeline, observation_header(), &["1.5", "2.5"]).await;
    pipeline.await_completion().await.unwrap();

    let copies = store.copies_into("wres.observation");
    assert_eq!(copies.len(), 1);
    assert!(copies[0].destination.contains("observed_value"));

    let first = fields(&copies[0].rows[0]).iter().map(|f| f.to_string()).collect::<Vec<_>>();
    assert_eq!(first[1], "2017-08-08T13:00:00Z");
    assert_eq!(first[2], "1.5");

    let unit = ctx.caches.units.lookup_id(&"CMS".to_string()).await.unwrap();
    assert_eq!(first[3], unit.to_string());

    // Source output time falls back to the start date without a creation time.
    let source = ctx
        .caches
        .sources
        .lookup_id(&ingestion::cache::SourceKey {
            path: SOURCE.to_string(),
            output_time: observation_header().start_date,
        })
        .await
        .unwrap();
    assert_eq!(first[4], source.to_string());
}

#[tokio::test]
async fn test_forecast_leads_fill_two_partitions() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    let values: Vec<String> = (0..85).map(|i| format!("{}.0", i)).collect();
    let values: Vec<&str> = values.iter().map(String::as_str).collect();
    run_series(&mut pipeline, forecast_header(), &values).await;
    pipeline.await_completion().await.unwrap();

    let lead_0: Vec<String> = store
        .copies_into("partitions.forecastvalue_lead_0(")
        .into_iter()
        .flat_map(|c| c.rows)
        .collect();
    let lead_1: Vec<String> = store
        .copies_into("partitions.forecastvalue_lead_1(")
        .into_iter()
        .flat_map(|c| c.rows)
        .collect();

    assert_eq!(lead_0.len(), 79);
    assert_eq!(lead_1.len(), 6);
    assert_eq!(fields(&lead_0[0])[1], "1");
    assert_eq!(fields(&lead_0[78])[1], "79");
    assert_eq!(fields(&lead_1[0])[1], "80");
    assert_eq!(fields(&lead_1[5])[1], "85");

    assert_eq!(store.locked_calls().len(), 2);
}

#[tokio::test]
async fn test_missing_values_advance_lead_but_are_not_written() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    pipeline.begin_series().unwrap();
    pipeline.header_complete(forecast_header()).unwrap();
    let outcomes = [
        pipeline.event(hourly_event(13, "1.0")).await.unwrap(),
        pipeline.event(hourly_event(14, "-999.0")).await.unwrap(),
        pipeline.event(hourly_event(15, "3.0")).await.unwrap(),
    ];
    pipeline.end_series().unwrap();
    pipeline.await_completion().await.unwrap();

    assert_eq!(outcomes[1], EventOutcome::Skipped(SkipReason::Missing));

    let rows: Vec<String> = store.copies().into_iter().flat_map(|c| c.rows).collect();
    let leads: Vec<&str> = rows.iter().map(|r| fields(r)[1]).collect();
    assert_eq!(leads, vec!["1", "3"]);
    assert!(rows.iter().all(|r| !r.contains("-999")));
}

#[tokio::test]
async fn test_all_missing_series_never_resolves_keys() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        Arc::clone(&ctx),
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    run_series(&mut pipeline, observation_header(), &["-999.0", "-999.0", "-999"]).await;
    let summary = pipeline.await_completion().await.unwrap();

    assert_eq!(summary.batches, 0);
    assert_eq!(store.id_calls(), 0);
    assert_eq!(ctx.caches.total_entries().await, 0);
    assert_eq!(pipeline.stats().events_skipped, 3);
}

#[tokio::test]
async fn test_rejected_series_has_no_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let filters = IngestFilters {
        features: vec!["MBLC2".into()],
        ..Default::default()
    };
    let mut pipeline =
        IngestPipeline::new(Arc::clone(&ctx), SOURCE, DataKind::Forecast, Arc::new(filters));

    pipeline.begin_series().unwrap();
    let decision = pipeline.header_complete(forecast_header()).unwrap();
    assert_eq!(decision, SeriesDecision::Rejected(RejectReason::Feature));

    for hour in 13..20 {
        assert_eq!(
            pipeline.event(hourly_event(hour, "1.0")).await.unwrap(),
            EventOutcome::Ignored
        );
    }
    pipeline.end_series().unwrap();
    pipeline.flush_leftovers();
    pipeline.await_completion().await.unwrap();

    assert_eq!(store.id_calls(), 0);
    assert!(store.locked_calls().is_empty());
    assert!(store.copies().is_empty());
    assert_eq!(ctx.caches.total_entries().await, 0);
    assert_eq!(ctx.scheduler.submitted(), 0);
}

#[tokio::test]
async fn test_filters_reject_by_variable_ensemble_and_dates() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);

    let cases = [
        (
            IngestFilters {
                variables: vec!["SSTG".into()],
                ..Default::default()
            },
            RejectReason::Variable,
        ),
        (
            IngestFilters {
                ensembles: vec![ingestion::EnsembleFilter {
                    name: "MEFP".into(),
                    member: Some("7".into()),
                }],
                ..Default::default()
            },
            RejectReason::Ensemble,
        ),
        (
            IngestFilters {
                earliest: Some(Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()),
                ..Default::default()
            },
            RejectReason::Dates,
        ),
    ];

    for (filters, reason) in cases {
        let mut pipeline =
            IngestPipeline::new(Arc::clone(&ctx), SOURCE, DataKind::Forecast, Arc::new(filters));
        pipeline.begin_series().unwrap();
        assert_eq!(
            pipeline.header_complete(forecast_header()).unwrap(),
            SeriesDecision::Rejected(reason)
        );
    }

    assert_eq!(store.id_calls(), 0);
}

#[tokio::test]
async fn test_malformed_events_are_skipped_and_counted() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    pipeline.begin_series().unwrap();
    pipeline.header_complete(observation_header()).unwrap();
    assert_eq!(
        pipeline
            .event(RawEvent::new("2017-08-08", Some("13:00:00"), "n/a"))
            .await
            .unwrap(),
        EventOutcome::Skipped(SkipReason::UnparseableValue)
    );
    assert_eq!(
        pipeline
            .event(RawEvent::new("2017-13-45", Some("13:00:00"), "1.0"))
            .await
            .unwrap(),
        EventOutcome::Skipped(SkipReason::UnparseableTime)
    );
    assert_eq!(
        pipeline.event(hourly_event(14, "2.0")).await.unwrap(),
        EventOutcome::Buffered
    );
    pipeline.end_series().unwrap();
    pipeline.await_completion().await.unwrap();

    let stats = pipeline.stats();
    assert_eq!(stats.events_skipped, 2);
    assert_eq!(stats.events_buffered, 1);
    assert_eq!(store.copied_rows(), 1);
}

#[tokio::test]
async fn test_failing_task_is_reported_at_the_barrier() {
    let store = Arc::new(MemoryStore::new());
    store.fail_copy_containing("|4.5|");
    store.fail_copy_containing("|6.5|");
    let ctx = context(&store, 1);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    let values: Vec<String> = (0..8).map(|i| format!("{}.5", i)).collect();
    let values: Vec<&str> = values.iter().map(String::as_str).collect();
    run_series(&mut pipeline, observation_header(), &values).await;

    let err = pipeline.await_completion().await.unwrap_err();
    assert_eq!(err.stage(), Stage::Write);
    assert!(err.to_string().contains("|4.5|"), "unexpected error: {err}");

    // The other tasks still completed.
    assert_eq!(store.copied_rows(), 6);
}

#[tokio::test]
async fn test_abort_discards_unsubmitted_rows_only() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 3);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    pipeline.begin_series().unwrap();
    pipeline.header_complete(observation_header()).unwrap();
    for hour in 13..18 {
        pipeline.event(hourly_event(hour, "1.0")).await.unwrap();
    }
    pipeline.abort_series();
    assert_eq!(
        pipeline.event(hourly_event(18, "1.0")).await.unwrap(),
        EventOutcome::Ignored
    );
    pipeline.end_series().unwrap();
    pipeline.flush_leftovers();
    pipeline.await_completion().await.unwrap();

    assert_eq!(store.copied_rows(), 3);
    let stats = pipeline.stats();
    assert_eq!(stats.rows_discarded, 2);
    assert_eq!(stats.series_aborted, 1);
}

#[tokio::test]
async fn test_resolution_failure_aborts_series() {
    let store = Arc::new(MemoryStore::new());
    store.fail_ids_containing("wres.ensemble");
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    pipeline.begin_series().unwrap();
    pipeline.header_complete(forecast_header()).unwrap();
    let err = pipeline.event(hourly_event(13, "1.0")).await.unwrap_err();

    assert_eq!(err.stage(), Stage::Resolve);
    assert_eq!(err.series(), Some("DRRC2/QINE/MEFP:1"));
    assert_eq!(
        pipeline.event(hourly_event(14, "1.0")).await.unwrap(),
        EventOutcome::Ignored
    );
}

#[tokio::test]
async fn test_partition_failure_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.fail_locked();
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    pipeline.begin_series().unwrap();
    pipeline.header_complete(forecast_header()).unwrap();
    let err = pipeline.event(hourly_event(13, "1.0")).await.unwrap_err();

    assert!(matches!(err, IngestionError::Partition { bucket: 0, .. }));
    assert!(err.is_fatal());
    assert_eq!(store.id_calls(), 0);
}

#[tokio::test]
async fn test_forecast_header_requires_forecast_date_and_step() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    pipeline.begin_series().unwrap();
    let err = pipeline
        .header_complete(SeriesHeader {
            forecast_date: None,
            ..forecast_header()
        })
        .unwrap_err();
    assert!(matches!(err, IngestionError::MalformedHeader { .. }));
    pipeline.end_series().unwrap();

    pipeline.begin_series().unwrap();
    let err = pipeline
        .header_complete(SeriesHeader {
            time_step_hours: Some(0),
            ..forecast_header()
        })
        .unwrap_err();
    assert!(matches!(err, IngestionError::MalformedHeader { .. }));
}

#[tokio::test]
async fn test_lead_overflow_aborts_series() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    // 4,000,000 weeks
    pipeline.begin_series().unwrap();
    pipeline
        .header_complete(SeriesHeader {
            time_step_hours: Some(672_000_000),
            ..forecast_header()
        })
        .unwrap();

    for hour in 13..16 {
        assert_eq!(
            pipeline.event(hourly_event(hour, "1.0")).await.unwrap(),
            EventOutcome::Buffered
        );
    }

    let err = pipeline.event(hourly_event(16, "1.0")).await.unwrap_err();
    assert!(matches!(err, IngestionError::MalformedHeader { .. }));
    assert_eq!(err.stage(), Stage::Parse);
    assert_eq!(err.series(), Some("DRRC2/QINE/MEFP:1"));

    assert_eq!(
        pipeline.event(hourly_event(17, "1.0")).await.unwrap(),
        EventOutcome::Ignored
    );
    pipeline.end_series().unwrap();

    let summary = pipeline.await_completion().await.unwrap();
    assert_eq!(summary.rows, 0);
    assert_eq!(pipeline.stats().series_aborted, 1);
    assert_eq!(pipeline.stats().rows_discarded, 3);
    assert_eq!(store.copied_rows(), 0);
}

#[tokio::test]
async fn test_events_out_of_order_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        ctx,
        SOURCE,
        DataKind::Observation,
        Arc::new(IngestFilters::default()),
    );

    assert!(matches!(
        pipeline.event(hourly_event(13, "1.0")).await,
        Err(IngestionError::InvalidState { .. })
    ));
    assert!(pipeline.end_series().is_err());

    pipeline.begin_series().unwrap();
    assert!(pipeline.begin_series().is_err());
    assert!(matches!(
        pipeline.event(hourly_event(13, "1.0")).await,
        Err(IngestionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_keys_are_resolved_once_per_series() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, 200);
    let mut pipeline = IngestPipeline::new(
        Arc::clone(&ctx),
        SOURCE,
        DataKind::Forecast,
        Arc::new(IngestFilters::default()),
    );

    let values: Vec<String> = (0..30).map(|i| i.to_string()).collect();
    let values: Vec<&str> = values.iter().map(String::as_str).collect();
    run_series(&mut pipeline, forecast_header(), &values).await;
    run_series(
        &mut pipeline,
        SeriesHeader {
            ensemble_member: "2".into(),
            ..forecast_header()
        },
        &values,
    )
    .await;
    pipeline.await_completion().await.unwrap();

    // unit, variable, feature, position, forecast: once overall
    // ensemble, forecast ensemble: once per member
    assert_eq!(store.id_calls_containing("wres.measurementunit"), 1);
    assert_eq!(store.id_calls_containing("wres.variable ("), 1);
    assert_eq!(store.id_calls_containing("wres.feature"), 1);
    assert_eq!(store.id_calls_containing("wres.variableposition"), 1);
    assert_eq!(store.id_calls_containing("wres.forecast ("), 1);
    assert_eq!(store.id_calls_containing("wres.ensemble"), 2);
    assert_eq!(store.id_calls_containing("wres.forecastensemble"), 2);
    assert_eq!(store.copied_rows(), 60);
}
