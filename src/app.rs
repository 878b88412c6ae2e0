use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::warn;

use crate::domain::{FileRecord, FileStatus, Query};
use crate::error::FetchError;
use crate::filter::NameFilter;
use crate::fs_util;
use crate::manifest::ManifestWriter;
use crate::portal::PortalClient;
use crate::restore::{Clock, RestoreOutcome, WaitPolicy, wait_for_restore};
use crate::version::apply_latest_only;

const DOWNLOAD_RETRIES: usize = 3;
const DOWNLOAD_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub outdir: Utf8PathBuf,
    pub latest_only: bool,
    pub keep_zip: bool,
    pub wait: WaitPolicy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub queries_processed: usize,
    pub queries_failed: usize,
    pub files_seen: usize,
    pub files_selected: usize,
    pub downloaded: usize,
    pub skipped_filtered: usize,
    pub skipped_restore_timeout: usize,
    pub skipped_error: usize,
}

impl RunSummary {
    pub fn any_query_succeeded(&self) -> bool {
        self.queries_processed > 0
    }

    fn absorb(&mut self, stats: QueryStats) {
        self.queries_processed += 1;
        self.files_seen += stats.files_seen;
        self.files_selected += stats.files_selected;
        self.downloaded += stats.downloaded;
        self.skipped_filtered += stats.skipped_filtered;
        self.skipped_restore_timeout += stats.skipped_restore_timeout;
        self.skipped_error += stats.skipped_error;
    }
}

#[derive(Debug, Default)]
struct QueryStats {
    files_seen: usize,
    files_selected: usize,
    downloaded: usize,
    skipped_filtered: usize,
    skipped_restore_timeout: usize,
    skipped_error: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<P: PortalClient, C: Clock> {
    portal: P,
    clock: C,
    filter: NameFilter,
    options: RunOptions,
}

impl<P: PortalClient, C: Clock> App<P, C> {
    pub fn new(portal: P, clock: C, filter: NameFilter, options: RunOptions) -> Self {
        Self {
            portal,
            clock,
            filter,
            options,
        }
    }

    pub fn run(
        &self,
        queries: &[Query],
        manifest: &mut ManifestWriter,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, FetchError> {
        let mut summary = RunSummary::default();
        for query in queries {
            match self.run_query(query, manifest, sink) {
                Ok(stats) => summary.absorb(stats),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(label = %query.label, error = %err, "query failed, continuing");
                    sink.event(ProgressEvent {
                        message: format!("phase=Resolve; query {} failed: {err}", query.label),
                        elapsed: None,
                    });
                    summary.queries_failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn run_query(
        &self,
        query: &Query,
        manifest: &mut ManifestWriter,
        sink: &dyn ProgressSink,
    ) -> Result<QueryStats, FetchError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; query {}", query.label),
            elapsed: None,
        });

        let qdir = self.options.outdir.join(query.label.as_str());
        fs::create_dir_all(qdir.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;

        let start = self.clock.now();
        let results = self.portal.resolve(query)?;
        sink.event(ProgressEvent {
            message: format!(
                "portal.response latency_ms={}",
                self.clock.now().duration_since(start).as_millis()
            ),
            elapsed: None,
        });

        if let Ok(pretty) = serde_json::to_vec_pretty(&results.raw)
            && let Err(err) = fs::write(qdir.join("search.json").as_std_path(), pretty)
        {
            warn!(label = %query.label, error = %err, "could not persist search.json");
        }

        let mut records = results.records;
        let mut stats = QueryStats {
            files_seen: records.len(),
            ..QueryStats::default()
        };

        for record in records.iter_mut() {
            record.selected = self.filter.keeps(&record.file_name);
        }
        if self.options.latest_only
            && let Some(version) = apply_latest_only(&mut records)
        {
            sink.event(ProgressEvent {
                message: format!("phase=Select; keeping PhytozomeV{version}"),
                elapsed: None,
            });
        }

        stats.files_selected = records.iter().filter(|r| r.selected).count();
        stats.skipped_filtered = stats.files_seen - stats.files_selected;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Select; {} of {} file(s) selected",
                stats.files_selected, stats.files_seen
            ),
            elapsed: None,
        });

        for record in records.iter_mut() {
            if !record.selected || !record.file_status.needs_restore() {
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Restore; waiting on {}", record.file_name),
                elapsed: None,
            });
            match wait_for_restore(&self.portal, &self.clock, self.options.wait, record)? {
                RestoreOutcome::Restored => record.file_status = FileStatus::Restored,
                RestoreOutcome::TimedOut => {
                    warn!(file = %record.file_name, "restore timed out, skipping file");
                    record.file_status = FileStatus::RestoreTimeout;
                    record.selected = false;
                    stats.skipped_restore_timeout += 1;
                }
                RestoreOutcome::Failed(err) => {
                    warn!(file = %record.file_name, error = %err, "restore failed, skipping file");
                    record.file_status = FileStatus::RestoreFailed;
                    record.selected = false;
                    stats.skipped_error += 1;
                }
            }
        }

        for record in records.iter_mut() {
            if !record.selected {
                continue;
            }
            if !record.file_status.is_downloadable() {
                warn!(
                    file = %record.file_name,
                    status = %record.file_status,
                    "file is not in a downloadable state, skipping"
                );
                record.selected = false;
                stats.skipped_error += 1;
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Download; {}", record.file_name),
                elapsed: None,
            });
            match self.retrieve_file(record, &qdir, sink) {
                Ok(()) => stats.downloaded += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(file = %record.file_name, error = %err, "retrieval failed, skipping file");
                    record.file_status = match err {
                        FetchError::Extraction { .. } => FileStatus::ExtractFailed,
                        _ => FileStatus::DownloadFailed,
                    };
                    record.selected = false;
                    stats.skipped_error += 1;
                }
            }
        }

        for record in &records {
            manifest.record(record)?;
        }
        sink.event(ProgressEvent {
            message: format!("phase=Manifest; {} row(s) recorded", records.len()),
            elapsed: None,
        });

        Ok(stats)
    }

    fn retrieve_file(
        &self,
        record: &FileRecord,
        qdir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<(), FetchError> {
        let temp_dir = tempfile::Builder::new()
            .prefix(".jgi-fetch")
            .tempdir_in(qdir.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let artifact = temp_dir.path().join("artifact");

        let bytes = self.download_with_retry(record, &artifact)?;
        sink.event(ProgressEvent {
            message: format!("phase=Download; {} ({bytes} bytes)", record.file_name),
            elapsed: None,
        });

        if fs_util::is_zip_archive(&artifact)? {
            sink.event(ProgressEvent {
                message: format!("phase=Unpack; {}", record.file_name),
                elapsed: None,
            });
            fs_util::unpack_archive(&artifact, qdir.as_std_path())?;
            if self.options.keep_zip {
                let kept = qdir.join(format!("{}.zip", record.file_name));
                fs::rename(&artifact, kept.as_std_path())
                    .map_err(|err| FetchError::Filesystem(err.to_string()))?;
            }
        } else {
            let dest = qdir.join(&record.file_name);
            fs::rename(&artifact, dest.as_std_path())
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    fn download_with_retry(
        &self,
        record: &FileRecord,
        destination: &std::path::Path,
    ) -> Result<u64, FetchError> {
        let mut attempt = 0usize;
        let mut integrity_retried = false;
        loop {
            match self.portal.download(record, destination) {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::TransientNetwork(message)) if attempt < DOWNLOAD_RETRIES => {
                    warn!(file = %record.file_name, %message, "download failed, retrying");
                    attempt += 1;
                    self.clock.sleep(Duration::from_millis(
                        DOWNLOAD_BACKOFF_MS * attempt as u64,
                    ));
                }
                Err(err @ FetchError::Integrity { .. }) if !integrity_retried => {
                    warn!(file = %record.file_name, error = %err, "truncated download, retrying once");
                    integrity_retried = true;
                    self.clock.sleep(Duration::from_millis(DOWNLOAD_BACKOFF_MS));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
