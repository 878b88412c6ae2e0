use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use crate::domain::FileRecord;
use crate::error::FetchError;

pub const MANIFEST_COLUMNS: [&str; 6] = [
    "dataset_id",
    "file_id",
    "file_name",
    "file_status",
    "phytozome_version",
    "selected",
];

pub struct ManifestWriter {
    writer: csv::Writer<File>,
    seen: HashSet<(String, String)>,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self, FetchError> {
        let file = File::create(path).map_err(|err| FetchError::Manifest(err.to_string()))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(file);
        writer
            .write_record(MANIFEST_COLUMNS)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|err| FetchError::Manifest(err.to_string()))?;
        Ok(Self {
            writer,
            seen: HashSet::new(),
        })
    }

    pub fn record(&mut self, record: &FileRecord) -> Result<bool, FetchError> {
        if !self.seen.insert(record.key()) {
            return Ok(false);
        }
        let version = record
            .phytozome_version
            .map(|v| v.to_string())
            .unwrap_or_default();
        self.writer
            .write_record([
                record.dataset_id.as_str(),
                record.file_id.as_str(),
                scrub(&record.file_name).as_str(),
                record.file_status.to_string().as_str(),
                version.as_str(),
                if record.selected { "true" } else { "false" },
            ])
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .map_err(|err| FetchError::Manifest(err.to_string()))?;
        Ok(true)
    }

    pub fn rows_written(&self) -> usize {
        self.seen.len()
    }
}

fn scrub(name: &str) -> String {
    name.replace(['\t', '\n', '\r'], " ")
}
