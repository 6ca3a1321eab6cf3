use hearing_crawler::portal::memory::{MemoryPortal, MemoryRow};
use hearing_crawler::*;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir, jurisdictions: std::ops::Range<u32>, letters: &str, mode: CrawlMode) -> CrawlConfig {
    CrawlConfig {
        data_dir: dir.path().to_path_buf(),
        mode,
        jurisdictions,
        workers: 2,
        letters: letters.chars().collect(),
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        ..CrawlConfig::default()
    }
}

fn row(case: &str, defendant: &str) -> MemoryRow {
    MemoryRow::new(case, defendant).with_detail("Race", "W").with_detail("Sex", "M")
}

/// Every parsed line of every log in `dir`.
fn log_lines(dir: &Path) -> Vec<LogLine> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        for line in std::fs::read_to_string(&path).unwrap().lines() {
            out.push(serde_json::from_str(line).unwrap());
        }
    }
    out
}

fn hearings(dir: &Path) -> Vec<HearingRecord> {
    log_lines(dir)
        .into_iter()
        .filter_map(|l| match l {
            LogLine::Hearing(h) => Some(h),
            _ => None,
        })
        .collect()
}

fn sentinels(dir: &Path) -> Vec<Shard> {
    log_lines(dir)
        .into_iter()
        .filter_map(|l| match l {
            LogLine::Sentinel(s) => Some(s.shard()),
            _ => None,
        })
        .collect()
}

fn prior_hearing(jurisdiction: u32, index: u64, case: &str, defendant: &str) -> String {
    format!(
        r#"{{"kind":"hearing","index":{index},"jurisdiction":{jurisdiction},"jurisdiction_name":"Botetourt","case_number":"{case}","defendant":"{defendant}","charge":"LARCENY","hearing_date":"01/04/2021","status":"Active","details":{{"Race":"W","Sex":"M"}}}}"#
    )
}

const PRIOR_HEADER: &str =
    r#"{"kind":"header","columns":["case_number","defendant","charge","hearing_date","status","Race","Sex"]}"#;

fn botetourt() -> Vec<MemoryRow> {
    vec![
        row("A1", "ABEL, TOM"),
        row("B1", "BAKER, JOHN"),
        row("B2", "BELL, ANN"),
        row("B3", "BISHOP, RAY"),
        row("B4", "BLAKE, SUE"),
        row("B5", "BROWN, LEE"),
        row("C1", "CARR, JIM"),
    ]
}

#[tokio::test]
async fn test_resume_emits_only_remaining_rows() {
    let dir = TempDir::new().unwrap();
    let mut prior = std::fs::File::create(dir.path().join("hearings.jsonl")).unwrap();
    writeln!(prior, "{PRIOR_HEADER}").unwrap();
    writeln!(prior, "{}", prior_hearing(10, 0, "B1", "BAKER, JOHN")).unwrap();
    writeln!(prior, "{}", prior_hearing(10, 1, "B2", "BELL, ANN")).unwrap();
    drop(prior);

    let portal = MemoryPortal::new(2).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    let summary = run_crawl(&config(&dir, 10..11, "B", CrawlMode::Cleanup), Arc::new(portal))
        .await
        .unwrap();
    assert_eq!(summary.metrics.records_written, 3);
    assert_eq!(summary.metrics.pages_skipped, 1);
    assert!(summary.failures().is_empty());

    let records = hearings(dir.path());
    let cases: Vec<_> = records.iter().map(|h| h.case_number.as_str()).collect();
    assert_eq!(cases, ["B1", "B2", "B3", "B4", "B5"]);
    let indices: Vec<_> = records.iter().map(|h| h.index).collect();
    assert_eq!(indices, [0, 1, 2, 3, 4]);

    let header_count = log_lines(dir.path())
        .iter()
        .filter(|l| matches!(l, LogLine::Header { .. }))
        .count();
    assert_eq!(header_count, 1);

    let store = CheckpointStore::load(dir.path()).unwrap();
    let shard = Shard::new(JurisdictionId(10), 'B');
    assert_eq!(store.done_count(shard), 5);
    assert!(store.is_shard_complete(shard));
}

#[tokio::test]
async fn test_skip_mode_leaves_partial_shard_alone() {
    let dir = TempDir::new().unwrap();
    let mut prior = std::fs::File::create(dir.path().join("hearings.jsonl")).unwrap();
    writeln!(prior, "{PRIOR_HEADER}").unwrap();
    writeln!(prior, "{}", prior_hearing(10, 0, "B1", "BAKER, JOHN")).unwrap();
    drop(prior);

    let portal = MemoryPortal::new(2).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    let summary = run_crawl(&config(&dir, 10..11, "ABC", CrawlMode::Skip), Arc::new(portal))
        .await
        .unwrap();

    let done: HashSet<char> = sentinels(dir.path()).iter().map(|s| s.letter).collect();
    assert_eq!(done, HashSet::from(['A', 'C']));
    assert_eq!(summary.metrics.records_written, 2);
}

#[tokio::test]
async fn test_sentinel_round_trip_and_cleanup_schedules_nothing() {
    let dir = TempDir::new().unwrap();
    let portal = MemoryPortal::new(3).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    let config = config(&dir, 10..11, "ABC", CrawlMode::Cleanup);

    run_crawl(&config, Arc::new(portal.clone())).await.unwrap();

    let mut counts: HashMap<Shard, usize> = HashMap::new();
    for shard in sentinels(dir.path()) {
        *counts.entry(shard).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&n| n == 1));

    let engine = build_engine(&config, Arc::new(portal)).unwrap();
    assert!(engine.planned().is_empty());
}

#[tokio::test]
async fn test_letter_boundary_on_shared_page() {
    let dir = TempDir::new().unwrap();
    // One page holds the last B rows and the first C rows.
    let portal = MemoryPortal::new(10).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    run_crawl(&config(&dir, 10..11, "B", CrawlMode::Skip), Arc::new(portal))
        .await
        .unwrap();

    let records = hearings(dir.path());
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|h| h.defendant.starts_with('B')));
    assert_eq!(records.last().unwrap().case_number, "B5");
}

#[tokio::test]
async fn test_schema_mismatch_writes_nothing_and_stops_worker() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("schema.jsonl"), format!("{PRIOR_HEADER}\n")).unwrap();

    let portal = MemoryPortal::new(5)
        .with_jurisdiction(
            JurisdictionId(1),
            "Accomack",
            vec![
                row("1", "AMES"),
                row("2", "ASH").with_detail("Alias", "ASHE"),
                row("3", "BAIN"),
            ],
        )
        .with_jurisdiction(JurisdictionId(2), "Albemarle", vec![row("4", "AVERY"), row("5", "BOONE")]);

    let summary = run_crawl(&config(&dir, 1..3, "AB", CrawlMode::Skip), Arc::new(portal))
        .await
        .unwrap();

    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].shard, Shard::new(JurisdictionId(1), 'A'));
    assert!(failures[0].error.contains("Alias"));
    assert_eq!(summary.aborted_workers(), 1);

    // Nothing from jurisdiction 1: the failing shard wrote no rows, and its worker stopped before 'B'.
    assert!(hearings(dir.path()).iter().all(|h| h.jurisdiction == JurisdictionId(2)));
    let done: HashSet<Shard> = sentinels(dir.path()).into_iter().collect();
    assert_eq!(
        done,
        HashSet::from([Shard::new(JurisdictionId(2), 'A'), Shard::new(JurisdictionId(2), 'B')])
    );
}

#[tokio::test]
async fn test_listing_only_run_skips_detail_views() {
    let dir = TempDir::new().unwrap();
    let portal = MemoryPortal::new(4).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    let mut config = config(&dir, 10..11, "AB", CrawlMode::Skip);
    config.fetch_details = false;

    run_crawl(&config, Arc::new(portal.clone())).await.unwrap();

    assert_eq!(portal.detail_reads(), 0);
    assert!(portal.page_reads() >= 2);
    let records = hearings(dir.path());
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|h| h.details.is_empty()));
}

#[tokio::test]
async fn test_empty_shard_gets_sentinel_only() {
    let dir = TempDir::new().unwrap();
    let portal = MemoryPortal::new(3).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    run_crawl(&config(&dir, 10..11, "Q", CrawlMode::Skip), Arc::new(portal))
        .await
        .unwrap();

    assert!(hearings(dir.path()).is_empty());
    assert_eq!(sentinels(dir.path()), vec![Shard::new(JurisdictionId(10), 'Q')]);
}

#[tokio::test]
async fn test_pool_covers_range_exactly_once() {
    let dir = TempDir::new().unwrap();
    let mut portal = MemoryPortal::new(2);
    for j in 20..27 {
        portal = portal.with_jurisdiction(
            JurisdictionId(j),
            format!("Court {j}"),
            vec![row(&format!("{j}-1"), "ALLEN"), row(&format!("{j}-2"), "BROOKS")],
        );
    }
    let mut config = config(&dir, 20..27, "AB", CrawlMode::Skip);
    config.workers = 3;

    let summary = run_crawl(&config, Arc::new(portal.clone())).await.unwrap();
    assert_eq!(summary.report.workers.len(), 3);

    let assigned: Vec<JurisdictionId> = summary
        .report
        .workers
        .iter()
        .flat_map(|w| w.jurisdictions.iter().copied())
        .collect();
    assert_eq!(assigned, (20..27).map(JurisdictionId).collect::<Vec<_>>());

    let shards = sentinels(dir.path());
    let unique: HashSet<Shard> = shards.iter().copied().collect();
    assert_eq!(shards.len(), 14);
    assert_eq!(unique.len(), 14);
    assert_eq!(hearings(dir.path()).len(), 14);
    assert_eq!(portal.sessions_opened(), portal.sessions_closed());
}

#[tokio::test]
async fn test_transient_failures_do_not_duplicate_rows() {
    let dir = TempDir::new().unwrap();
    let portal = MemoryPortal::new(2).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    portal.fail_page_reads([2]);
    portal.fail_detail_reads([4]);

    let summary = run_crawl(&config(&dir, 10..11, "B", CrawlMode::Skip), Arc::new(portal.clone()))
        .await
        .unwrap();
    assert!(summary.failures().is_empty());
    assert_eq!(summary.metrics.retries, 2);

    let cases: Vec<_> = hearings(dir.path()).into_iter().map(|h| h.case_number).collect();
    assert_eq!(cases, ["B1", "B2", "B3", "B4", "B5"]);
    assert_eq!(portal.sessions_opened(), 3);
    assert_eq!(portal.sessions_closed(), 3);
}

#[tokio::test]
async fn test_conflicting_headers_refuse_to_start() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.jsonl"), format!("{PRIOR_HEADER}\n")).unwrap();
    std::fs::write(
        dir.path().join("b.jsonl"),
        r#"{"kind":"header","columns":["case_number","defendant","charge","hearing_date","status","Race"]}"#.to_string() + "\n",
    )
    .unwrap();

    let portal = MemoryPortal::new(2).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    let err = run_crawl(&config(&dir, 10..11, "B", CrawlMode::Skip), Arc::new(portal))
        .await
        .unwrap_err();
    match err {
        orchestration::EngineError::Checkpoint(CheckpointError::SchemaConflict { missing, .. }) => {
            assert_eq!(missing, vec!["Sex".to_string()]);
        }
        other => panic!("expected schema conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_custom_output_name_resumes_and_bad_name_refused() {
    let dir = TempDir::new().unwrap();
    let portal = MemoryPortal::new(2).with_jurisdiction(JurisdictionId(10), "Botetourt", botetourt());
    let config = CrawlConfig {
        output_file: "run2.jsonl".to_string(),
        ..config(&dir, 10..11, "AB", CrawlMode::Cleanup)
    };

    run_crawl(&config, Arc::new(portal.clone())).await.unwrap();
    assert!(dir.path().join("run2.jsonl").exists());
    let engine = build_engine(&config, Arc::new(portal.clone())).unwrap();
    assert!(engine.planned().is_empty());

    let renamed = CrawlConfig {
        output_file: "hearings.log".to_string(),
        ..config
    };
    let err = run_crawl(&renamed, Arc::new(portal)).await.unwrap_err();
    assert!(matches!(
        err,
        orchestration::EngineError::Config(hearing_crawler::config::ConfigError::InvalidOutputName(_))
    ));
    assert!(!dir.path().join("hearings.log").exists());
}
