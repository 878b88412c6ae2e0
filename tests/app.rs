use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use jgi_bulk_fetcher::app::{App, ProgressEvent, ProgressSink, RunOptions, RunSummary};
use jgi_bulk_fetcher::domain::{FileRecord, FileStatus, Query, RestoreTicket};
use jgi_bulk_fetcher::error::FetchError;
use jgi_bulk_fetcher::filter::NameFilter;
use jgi_bulk_fetcher::manifest::ManifestWriter;
use jgi_bulk_fetcher::portal::{PortalClient, SearchResults};
use jgi_bulk_fetcher::restore::{Clock, WaitPolicy};

struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}

struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
    }
}

#[derive(Default)]
struct MockPortal {
    auth_reject: bool,
    records: HashMap<String, Vec<FileRecord>>,
    poll_scripts: Mutex<HashMap<String, VecDeque<FileStatus>>>,
    transient_download_failures: Mutex<HashMap<String, usize>>,
    downloaded: Mutex<Vec<String>>,
    restore_requests: Mutex<Vec<String>>,
}

impl MockPortal {
    fn with_records(label: &str, records: Vec<FileRecord>) -> Self {
        Self {
            records: HashMap::from([(label.to_string(), records)]),
            ..Self::default()
        }
    }

    fn restore_requests(&self) -> Vec<String> {
        self.restore_requests.lock().unwrap().clone()
    }

    fn script_polls(&self, file_id: &str, statuses: Vec<FileStatus>) {
        self.poll_scripts
            .lock()
            .unwrap()
            .insert(file_id.to_string(), statuses.into());
    }
}

impl PortalClient for MockPortal {
    fn resolve(&self, query: &Query) -> Result<SearchResults, FetchError> {
        if self.auth_reject {
            return Err(FetchError::Auth {
                status: 401,
                message: "token rejected".to_string(),
            });
        }
        match self.records.get(query.label.as_str()) {
            Some(records) => Ok(SearchResults {
                records: records.clone(),
                raw: serde_json::json!({ "organisms": [] }),
            }),
            None => Err(FetchError::Query {
                status: 404,
                message: "no results".to_string(),
            }),
        }
    }

    fn request_restore(&self, record: &FileRecord) -> Result<RestoreTicket, FetchError> {
        self.restore_requests
            .lock()
            .unwrap()
            .push(record.file_id.clone());
        Ok(RestoreTicket {
            dataset_id: record.dataset_id.clone(),
            file_id: record.file_id.clone(),
            status_url: format!("https://portal/status/{}", record.file_id),
            requested_at: chrono::Utc::now(),
        })
    }

    fn poll_status(&self, ticket: &RestoreTicket) -> Result<FileStatus, FetchError> {
        Ok(self
            .poll_scripts
            .lock()
            .unwrap()
            .get_mut(&ticket.file_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(FileStatus::Restoring))
    }

    fn download(&self, record: &FileRecord, destination: &Path) -> Result<u64, FetchError> {
        assert!(
            record.selected && record.file_status.is_downloadable(),
            "download attempted against a record that is not selected and LIVE/RESTORED"
        );
        let mut failures = self.transient_download_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&record.file_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(FetchError::TransientNetwork("connection reset".to_string()));
        }
        drop(failures);

        let bytes = zip_bytes(&record.file_name);
        std::fs::write(destination, &bytes).unwrap();
        self.downloaded.lock().unwrap().push(record.file_id.clone());
        Ok(bytes.len() as u64)
    }
}

fn zip_bytes(file_name: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(file_name, zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"sequence data").unwrap();
    writer.finish().unwrap().into_inner()
}

fn record(
    dataset_id: &str,
    file_id: &str,
    file_name: &str,
    status: FileStatus,
    version: Option<u32>,
) -> FileRecord {
    FileRecord {
        dataset_id: dataset_id.to_string(),
        file_id: file_id.to_string(),
        file_name: file_name.to_string(),
        file_status: status,
        phytozome_version: version,
        selected: false,
    }
}

fn query(label: &str) -> Query {
    Query {
        label: label.parse().unwrap(),
        search_url: format!("https://portal/search?q={label}"),
    }
}

struct Harness {
    temp: tempfile::TempDir,
    outdir: Utf8PathBuf,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let outdir = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
        std::fs::create_dir_all(outdir.as_std_path()).unwrap();
        Self { temp, outdir }
    }

    fn options(&self, latest_only: bool, keep_zip: bool) -> RunOptions {
        RunOptions {
            outdir: self.outdir.clone(),
            latest_only,
            keep_zip,
            wait: WaitPolicy::new(Duration::from_secs(600), Duration::from_secs(21600)),
        }
    }

    fn manifest(&self) -> ManifestWriter {
        ManifestWriter::create(&self.temp.path().join("manifest.tsv")).unwrap()
    }

    fn manifest_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.temp.path().join("manifest.tsv"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn run(
        &self,
        portal: MockPortal,
        filter: NameFilter,
        options: RunOptions,
        queries: &[Query],
    ) -> (Result<RunSummary, FetchError>, Vec<String>) {
        let app = App::new(portal, ManualClock::new(), filter, options);
        let mut manifest = self.manifest();
        let result = app.run(queries, &mut manifest, &SilentSink);
        drop(manifest);
        (result, self.manifest_lines())
    }
}

fn filter(includes: &[&str]) -> NameFilter {
    let includes: Vec<String> = includes.iter().map(|s| s.to_string()).collect();
    NameFilter::new(&includes, &[]).unwrap()
}

#[test]
fn latest_only_keeps_newest_version_of_included_names() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![
            record("ds1", "f1", "A.gff3.gz", FileStatus::Live, Some(11)),
            record("ds1", "f2", "A.fa.gz", FileStatus::Live, Some(11)),
            record("ds1", "f3", "A.gff3.gz", FileStatus::Live, Some(9)),
        ],
    );
    let options = harness.options(true, false);
    let app = App::new(&portal, ManualClock::new(), filter(&["*.gff3.gz"]), options);
    let mut manifest = harness.manifest();
    let summary = app
        .run(&[query("Athaliana")], &mut manifest, &SilentSink)
        .unwrap();

    assert_eq!(summary.files_seen, 3);
    assert_eq!(summary.files_selected, 1);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped_filtered, 2);
    assert_eq!(*portal.downloaded.lock().unwrap(), vec!["f1".to_string()]);

    let lines = harness.manifest_lines();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("ds1\tf1\tA.gff3.gz\tLIVE\t11\ttrue"));
    assert!(lines[2].ends_with("false"));
    assert!(lines[3].ends_with("false"));
    assert!(
        harness
            .outdir
            .join("Athaliana")
            .join("A.gff3.gz")
            .as_std_path()
            .exists()
    );
}

#[test]
fn purged_file_is_restored_then_downloaded() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![record("ds1", "f1", "A.gff3.gz", FileStatus::Purged, Some(13))],
    );
    portal.script_polls("f1", vec![FileStatus::Restoring, FileStatus::Restored]);
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana")],
    );

    let summary = result.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped_restore_timeout, 0);
    assert!(lines[1].contains("\tRESTORED\t"));
    assert!(lines[1].ends_with("\ttrue"));
}

#[test]
fn already_restoring_file_waits_without_breaking() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![record("ds1", "f1", "A.gff3.gz", FileStatus::Restoring, None)],
    );
    portal.script_polls("f1", vec![FileStatus::Restored]);
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana")],
    );

    assert_eq!(result.unwrap().downloaded, 1);
    assert!(lines[1].contains("\tRESTORED\t"));
}

#[test]
fn restore_timeout_skips_file_but_run_continues() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![
            record("ds1", "f1", "A.gff3.gz", FileStatus::Purged, None),
            record("ds1", "f2", "B.gff3.gz", FileStatus::Live, None),
        ],
    );
    // f1 has no poll script: every poll reports RESTORING until the deadline
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana")],
    );

    let summary = result.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped_restore_timeout, 1);
    assert!(summary.any_query_succeeded());
    assert!(lines[1].contains("\tRESTORE_TIMEOUT\t"));
    assert!(lines[1].ends_with("\tfalse"));
    assert!(lines[2].ends_with("\ttrue"));
}

#[test]
fn auth_rejection_aborts_the_whole_run() {
    let harness = Harness::new();
    let portal = MockPortal {
        auth_reject: true,
        ..MockPortal::default()
    };
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana"), query("Sbicolor")],
    );

    assert_matches!(result.unwrap_err(), FetchError::Auth { status: 401, .. });
    assert_eq!(lines.len(), 1, "manifest holds only the header");
}

#[test]
fn failed_query_is_skipped_and_others_proceed() {
    let harness = Harness::new();
    let mut portal = MockPortal::with_records(
        "Sbicolor",
        vec![record("ds2", "f1", "S.gff3.gz", FileStatus::Live, None)],
    );
    portal.records.insert(
        "Empty".to_string(),
        Vec::new(),
    );
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Missing"), query("Empty"), query("Sbicolor")],
    );

    let summary = result.unwrap();
    assert_eq!(summary.queries_processed, 2);
    assert_eq!(summary.queries_failed, 1);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("ds2\tf1"));
}

#[test]
fn transient_download_failures_are_retried() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![record("ds1", "f1", "A.gff3.gz", FileStatus::Live, None)],
    );
    portal
        .transient_download_failures
        .lock()
        .unwrap()
        .insert("f1".to_string(), 2);
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana")],
    );

    let summary = result.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped_error, 0);
    assert!(lines[1].ends_with("\ttrue"));
}

#[test]
fn exhausted_download_retries_demote_the_record() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![
            record("ds1", "f1", "A.gff3.gz", FileStatus::Live, None),
            record("ds1", "f2", "B.gff3.gz", FileStatus::Live, None),
        ],
    );
    portal
        .transient_download_failures
        .lock()
        .unwrap()
        .insert("f1".to_string(), usize::MAX);
    let (result, lines) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana")],
    );

    let summary = result.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped_error, 1);
    assert!(lines[1].contains("\tDOWNLOAD_FAILED\t"));
    assert!(lines[1].ends_with("\tfalse"));
    assert!(lines[2].ends_with("\ttrue"));
}

#[test]
fn keep_zip_retains_the_archive_next_to_extracted_files() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![record("ds1", "f1", "A.gff3.gz", FileStatus::Live, None)],
    );
    let (result, _) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, true),
        &[query("Athaliana")],
    );
    result.unwrap();

    let qdir = harness.outdir.join("Athaliana");
    assert!(qdir.join("A.gff3.gz").as_std_path().exists());
    assert!(qdir.join("A.gff3.gz.zip").as_std_path().exists());
}

#[test]
fn archive_is_deleted_by_default_after_extraction() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![record("ds1", "f1", "A.gff3.gz", FileStatus::Live, None)],
    );
    let (result, _) = harness.run(
        portal,
        filter(&[]),
        harness.options(false, false),
        &[query("Athaliana")],
    );
    result.unwrap();

    let qdir = harness.outdir.join("Athaliana");
    assert!(qdir.join("A.gff3.gz").as_std_path().exists());
    assert!(!qdir.join("A.gff3.gz.zip").as_std_path().exists());
}

#[test]
fn manifest_rows_match_distinct_observed_pairs_across_queries() {
    let harness = Harness::new();
    let mut portal = MockPortal::with_records(
        "Athaliana",
        vec![
            record("ds1", "f1", "A.gff3.gz", FileStatus::Live, None),
            record("ds1", "f2", "A.fa.gz", FileStatus::Live, None),
        ],
    );
    portal.records.insert(
        "Sbicolor".to_string(),
        vec![record("ds2", "f1", "S.gff3.gz", FileStatus::Live, None)],
    );
    let (result, lines) = harness.run(
        portal,
        filter(&["*.gff3.gz"]),
        harness.options(false, false),
        &[query("Athaliana"), query("Sbicolor")],
    );

    let summary = result.unwrap();
    assert_eq!(summary.files_seen, 3);
    assert_eq!(lines.len(), 4, "header plus one row per (dataset_id, file_id)");
}

#[test]
fn restore_requests_are_only_issued_for_selected_purged_files() {
    let harness = Harness::new();
    let portal = MockPortal::with_records(
        "Athaliana",
        vec![
            record("ds1", "f1", "A.gff3.gz", FileStatus::Purged, None),
            record("ds1", "f2", "A.fa.gz", FileStatus::Purged, None),
            record("ds1", "f3", "B.gff3.gz", FileStatus::Live, None),
        ],
    );
    portal.script_polls("f1", vec![FileStatus::Restored]);
    let app = App::new(
        &portal,
        ManualClock::new(),
        filter(&["*.gff3.gz"]),
        harness.options(false, false),
    );
    let mut manifest = harness.manifest();
    let summary = app
        .run(&[query("Athaliana")], &mut manifest, &SilentSink)
        .unwrap();

    assert_eq!(summary.downloaded, 2);
    assert_eq!(portal.restore_requests(), vec!["f1".to_string()]);
}
