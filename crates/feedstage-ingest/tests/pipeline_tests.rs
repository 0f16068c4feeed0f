//! Integration tests for the import pipeline
//!
//! These tests use `#[sqlx::test]`, which creates a temporary database per test
//! and applies the workspace migrations. They need a running PostgreSQL:
//!
//! ```bash
//! export DATABASE_URL=postgresql://postgres@localhost:5432/feedstage
//! cargo test -p feedstage-ingest --test pipeline_tests -- --ignored
//! ```

use feedstage_ingest::insert::process_inserts;
use feedstage_ingest::lock::TypeLock;
use feedstage_ingest::staging::{stage, Dialect};
use feedstage_ingest::{
    ImportError, ImportOptions, IngestionError, Pipeline, RecordType, RunReport, SourceMetadata,
};
use sqlx::PgPool;

// ============================================================================
// Test Helpers
// ============================================================================

const AREA_HEADER: &str = "CreatedBy,UpdatedBy,CreatedDate,UpdatedDate,LicenseeId,\
ExternalIdentifier,Name,AreaId,IsQuarantine,IsDeleted\n";

const STRAIN_HEADER: &str =
    "CreatedBy,UpdatedBy,CreatedDate,UpdatedDate,LicenseeId,StrainId,AssociateId,StrainType,Name,IsDeleted\n";

fn area_row(external_id: &str, name: &str, is_deleted: &str) -> String {
    format!("alice,,2021-01-05,,42,{external_id},{name},7,false,{is_deleted}\n")
}

fn area_feed(rows: &[String]) -> String {
    let mut feed = AREA_HEADER.to_string();
    for row in rows {
        feed.push_str(row);
    }
    feed
}

async fn run_area(pipeline: &Pipeline, feed: &str) -> RunReport {
    pipeline
        .run(RecordType::Area, feed.as_bytes(), &ImportOptions::for_file("areas.csv"))
        .await
        .expect("Import should succeed")
}

async fn count(pool: &PgPool, sql: &str) -> i64 {
    sqlx::query_scalar(sql)
        .fetch_one(pool)
        .await
        .expect("Count query failed")
}

async fn pending_rows(pool: &PgPool, source_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM area_csv WHERE source_id = $1 AND processed_at = 0")
        .bind(source_id)
        .fetch_one(pool)
        .await
        .expect("Pending query failed")
}

// ============================================================================
// Insert Phase
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_two_row_area_feed(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let long_name = "N".repeat(76);
    let feed = area_feed(&[
        area_row("A-1", "North", "false"),
        area_row("A-2", &long_name, "false"),
    ]);

    let report = run_area(&pipeline, &feed).await;

    assert_eq!(report.rows_staged, 2);
    assert_eq!(report.inserts.rows_inserted, 1);
    assert_eq!(report.inserts.rows_failed, 1);
    assert_eq!(pending_rows(&pool, report.source_id).await, 0);

    let keys: Vec<String> = sqlx::query_scalar("SELECT externalidentifier FROM areas")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(keys, vec!["A-1".to_string()]);

    let errors: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT e.record_id, e.errors->0->>'field', e.errors->0->>'kind'
         FROM csv_errors e WHERE e.source_id = $1",
    )
    .bind(report.source_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, "Name");
    assert_eq!(errors[0].2, "string_too_long");

    let failed_key: String = sqlx::query_scalar("SELECT externalidentifier FROM area_csv WHERE id = $1")
        .bind(errors[0].0)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(failed_key, "A-2");

    let staged_errors: Option<serde_json::Value> = sqlx::query_scalar(
        "SELECT errors FROM area_csv WHERE source_id = $1 AND externalidentifier = 'A-2'",
    )
    .bind(report.source_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(staged_errors.is_some());

    let processed: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT processed_at FROM sources WHERE id = $1")
            .bind(report.source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(processed.is_some());

    let source_errors: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM source_errors WHERE source_id = $1")
            .bind(report.source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(source_errors, 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_inserter_rerun_on_processed_source_writes_nothing(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let feed = area_feed(&[area_row("A-1", "North", ""), area_row("A-2", "", "")]);

    let report = run_area(&pipeline, &feed).await;
    assert_eq!(report.inserts.rows_failed, 1);

    let areas_before = count(&pool, "SELECT COUNT(*) FROM areas").await;
    let errors_before = count(&pool, "SELECT COUNT(*) FROM csv_errors").await;

    let again = process_inserts(&pool, RecordType::Area.descriptor(), report.source_id, 1000)
        .await
        .unwrap();

    assert_eq!(again.rows_read, 0);
    assert_eq!(again.batches_committed, 0);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM areas").await, areas_before);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM csv_errors").await, errors_before);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_reimporting_feed_updates_in_place(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let feed = area_feed(&[area_row("A-1", "North", ""), area_row("A-2", "South", "")]);

    let first = run_area(&pipeline, &feed).await;
    let second = run_area(&pipeline, &feed).await;

    assert_ne!(first.source_id, second.source_id);
    assert_eq!(second.inserts.rows_inserted, 2);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM areas").await, 2);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM csv_errors").await, 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_later_row_wins_within_feed(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let feed = area_feed(&[area_row("A-1", "First", ""), area_row("A-1", "Second", "")]);

    let report = run_area(&pipeline, &feed).await;
    assert_eq!(report.inserts.rows_inserted, 2);

    let name: String = sqlx::query_scalar("SELECT name FROM areas WHERE externalidentifier = 'A-1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "Second");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_batching_boundary(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone()).with_batch_size(1000);
    let rows: Vec<String> = (0..2500).map(|i| area_row(&format!("A-{i}"), "Bulk", "")).collect();

    let report = run_area(&pipeline, &area_feed(&rows)).await;

    assert_eq!(report.rows_staged, 2500);
    assert_eq!(report.inserts.batches_committed, 3);
    assert_eq!(report.inserts.rows_inserted, 2500);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM areas").await, 2500);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_strain_enum_validation(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let feed = format!(
        "{STRAIN_HEADER}bob,,2020-02-02,,9,100,5,indica,Kush,\nbob,,2020-02-02,,9,101,5,Ruderalis,Wild,\n"
    );

    let report = pipeline
        .run(RecordType::Strain, feed.as_bytes(), &ImportOptions::for_file("strains.csv"))
        .await
        .unwrap();

    assert_eq!(report.inserts.rows_inserted, 1);
    assert_eq!(report.inserts.rows_failed, 1);

    let strain_type: String = sqlx::query_scalar("SELECT straintype FROM strains WHERE strainid = 100")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(strain_type, "Indica");
}

// ============================================================================
// Delete Phase
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_deletion_hit_and_miss(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    run_area(&pipeline, &area_feed(&[area_row("A-1", "North", ""), area_row("A-2", "South", "")])).await;

    let report = run_area(
        &pipeline,
        &area_feed(&[area_row("A-1", "North", " TRUE "), area_row("Z-9", "Ghost", "true")]),
    )
    .await;

    assert_eq!(report.inserts.rows_read, 0);
    assert_eq!(report.deletes.rows_deleted, 1);
    assert_eq!(report.deletes.rows_missing, 1);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM areas WHERE externalidentifier = 'A-1'").await,
        0
    );
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM areas").await, 1);
    assert_eq!(pending_rows(&pool, report.source_id).await, 0);

    let message: String =
        sqlx::query_scalar("SELECT errors->>'message' FROM csv_errors WHERE source_id = $1")
            .bind(report.source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(message, "ExternalIdentifier does not exist");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_padded_deletion_flag_is_a_deletion(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    run_area(&pipeline, &area_feed(&[area_row("A-1", "North", "")])).await;

    let report = run_area(
        &pipeline,
        &area_feed(&[area_row("A-1", "North", "true\t"), area_row("B-1", "East", "true\u{a0}")]),
    )
    .await;

    // The tab is padding; the non-breaking space makes the flag invalid
    assert_eq!(report.deletes.rows_read, 1);
    assert_eq!(report.deletes.rows_deleted, 1);
    assert_eq!(report.inserts.rows_read, 1);
    assert_eq!(report.inserts.rows_inserted, 0);
    assert_eq!(report.inserts.rows_failed, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM areas").await, 0);

    let field: String =
        sqlx::query_scalar("SELECT errors->0->>'field' FROM csv_errors WHERE source_id = $1")
            .bind(report.source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(field, "IsDeleted");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_every_row_is_accounted_for(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone()).with_batch_size(2);
    run_area(&pipeline, &area_feed(&[area_row("A-1", "North", "")])).await;

    let report = run_area(
        &pipeline,
        &area_feed(&[
            area_row("A-2", "South", ""),
            area_row("A-3", "", "false"),
            area_row("A-1", "North", "true"),
            area_row("A-404", "Gone", "true"),
            area_row("A-5", "East", "maybe"),
        ]),
    )
    .await;

    let accounted = report.inserts.rows_inserted
        + report.inserts.rows_failed
        + report.deletes.rows_deleted
        + report.deletes.rows_missing;
    assert_eq!(accounted, report.rows_staged);
    assert_eq!(report.inserts.rows_failed, 2);
    assert_eq!(pending_rows(&pool, report.source_id).await, 0);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM area_csv WHERE processed_at IS NULL OR processed_at = 0").await,
        0
    );
}

// ============================================================================
// Ingestion
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_unknown_column_stages_nothing(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let feed = "CreatedBy,Bogus\nalice,1\n";

    let err = pipeline
        .run(RecordType::Area, feed.as_bytes(), &ImportOptions::for_file("bad.csv"))
        .await
        .unwrap_err();

    let source_id = match err {
        ImportError::Ingestion {
            source_id,
            source: IngestionError::UnknownColumn { column, .. },
        } => {
            assert_eq!(column, "bogus");
            source_id
        },
        other => panic!("unexpected error: {other}"),
    };

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM area_csv").await, 0);
    let errors: serde_json::Value =
        sqlx::query_scalar("SELECT errors FROM source_errors WHERE source_id = $1")
            .bind(source_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(errors["message"].as_str().unwrap().contains("bogus"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_malformed_row_rolls_back_copy(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    // Too many fields on the second data row
    let feed = format!("{}{}", area_feed(&[area_row("A-1", "North", "")]), "a,b,c,d,e,f,g,h,i,j,k,l\n");

    let err = pipeline
        .run(RecordType::Area, feed.as_bytes(), &ImportOptions::for_file("broken.csv"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ImportError::Ingestion { source: IngestionError::Copy(_), .. }
    ));
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM area_csv").await, 0);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM source_errors").await, 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_empty_stream_is_missing_header(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());

    let err = pipeline
        .run(RecordType::Area, &b""[..], &ImportOptions::for_file("empty.csv"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ImportError::Ingestion { source: IngestionError::MissingHeader, .. }
    ));
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM sources").await, 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_custom_dialect(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());
    let feed = "CreatedBy;CreatedDate;LicenseeId;ExternalIdentifier;Name;AreaId;IsQuarantine\n\
                alice;01/31/2022;42;A-1;'North; upper';7;yes\n";
    let options = ImportOptions {
        delimiter: b';',
        quote: b'\'',
        metadata: SourceMetadata {
            filename: "semi.csv".to_string(),
            submitted_by: "ops".to_string(),
            number_of_records: 1,
            ..Default::default()
        },
    };

    let report = pipeline.run(RecordType::Area, feed.as_bytes(), &options).await.unwrap();
    assert_eq!(report.inserts.rows_inserted, 1);

    let (name, quarantined): (String, bool) =
        sqlx::query_as("SELECT name, isquarantine FROM areas WHERE externalidentifier = 'A-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "North; upper");
    assert!(quarantined);

    let submitted_by: String = sqlx::query_scalar("SELECT submitted_by FROM sources WHERE id = $1")
        .bind(report.source_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(submitted_by, "ops");
}

// ============================================================================
// Resume & Locking
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_resume_processes_pending_rows(pool: PgPool) {
    // Stage without reconciling, as if the process died right after COPY
    let feed = area_feed(&[area_row("A-1", "North", ""), area_row("A-2", "South", "true")]);
    let staged = stage(
        &pool,
        RecordType::Area,
        feed.as_bytes(),
        Dialect::default(),
        &SourceMetadata::for_file("crashed.csv"),
    )
    .await
    .unwrap();
    assert_eq!(pending_rows(&pool, staged.source_id).await, 2);

    let report = Pipeline::new(pool.clone()).resume(staged.source_id).await.unwrap();

    assert_eq!(report.source_id, staged.source_id);
    assert_eq!(report.inserts.rows_inserted, 1);
    assert_eq!(report.deletes.rows_missing, 1);
    assert_eq!(pending_rows(&pool, staged.source_id).await, 0);

    // Nothing left to do on a second resume
    let again = Pipeline::new(pool.clone()).resume(staged.source_id).await.unwrap();
    assert_eq!(again.inserts.rows_read + again.deletes.rows_read, 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_resume_refuses_unknown_and_failed_sources(pool: PgPool) {
    let pipeline = Pipeline::new(pool.clone());

    assert!(matches!(
        pipeline.resume(9_999).await,
        Err(ImportError::SourceNotFound(9_999))
    ));

    let err = pipeline
        .run(RecordType::Area, &b""[..], &ImportOptions::for_file("empty.csv"))
        .await
        .unwrap_err();
    let ImportError::Ingestion { source_id, .. } = err else {
        panic!("expected ingestion error");
    };

    assert!(matches!(
        pipeline.resume(source_id).await,
        Err(ImportError::SourceFailed(id)) if id == source_id
    ));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_type_lock_excludes_concurrent_runs(pool: PgPool) {
    let held = TypeLock::acquire(&pool, RecordType::Area).await.unwrap();

    assert!(TypeLock::try_acquire(&pool, RecordType::Area).await.unwrap().is_none());

    let other = TypeLock::try_acquire(&pool, RecordType::Strain).await.unwrap();
    assert!(other.is_some());

    held.release().await.unwrap();
    assert!(TypeLock::try_acquire(&pool, RecordType::Area).await.unwrap().is_some());
}
