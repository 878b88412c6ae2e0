use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::domain::{FileRecord, FileStatus, Query, RestoreTicket};
use crate::error::FetchError;
use crate::version::detect_version;

pub const RESTORE_URL: &str = "https://files.jgi.doe.gov/request_archived_files/";
pub const DOWNLOAD_URL: &str = "https://files-download.jgi.doe.gov/download_files/";

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub records: Vec<FileRecord>,
    pub raw: Value,
}

pub trait PortalClient: Send + Sync {
    fn resolve(&self, query: &Query) -> Result<SearchResults, FetchError>;
    fn request_restore(&self, record: &FileRecord) -> Result<RestoreTicket, FetchError>;
    fn poll_status(&self, ticket: &RestoreTicket) -> Result<FileStatus, FetchError>;
    fn download(&self, record: &FileRecord, destination: &Path) -> Result<u64, FetchError>;
}

impl<P: PortalClient + ?Sized> PortalClient for &P {
    fn resolve(&self, query: &Query) -> Result<SearchResults, FetchError> {
        (**self).resolve(query)
    }

    fn request_restore(&self, record: &FileRecord) -> Result<RestoreTicket, FetchError> {
        (**self).request_restore(record)
    }

    fn poll_status(&self, ticket: &RestoreTicket) -> Result<FileStatus, FetchError> {
        (**self).poll_status(ticket)
    }

    fn download(&self, record: &FileRecord, destination: &Path) -> Result<u64, FetchError> {
        (**self).download(record, destination)
    }
}

#[derive(Clone)]
pub struct JgiHttpClient {
    client: Client,
    restore_url: String,
    download_url: String,
}

impl JgiHttpClient {
    pub fn new(token: &str) -> Result<Self, FetchError> {
        Self::with_endpoints(token, RESTORE_URL, DOWNLOAD_URL)
    }

    pub fn with_endpoints(
        token: &str,
        restore_url: &str,
        download_url: &str,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("jgi-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::Filesystem(err.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(token.trim()).map_err(|_| FetchError::MissingToken)?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| FetchError::TransientNetwork(err.to_string()))?;

        Ok(Self {
            client,
            restore_url: restore_url.to_string(),
            download_url: download_url.to_string(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, FetchError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::TransientNetwork(err.to_string()));
                }
            }
        }
    }

    fn read_error_body(response: reqwest::blocking::Response) -> (u16, String) {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "portal request failed".to_string());
        (status, message)
    }
}

impl PortalClient for JgiHttpClient {
    fn resolve(&self, query: &Query) -> Result<SearchResults, FetchError> {
        let url = query.search_url.clone();
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if !response.status().is_success() {
            let (status, message) = Self::read_error_body(response);
            return Err(classify_status(status, message));
        }
        let raw: Value = response
            .json()
            .map_err(|err| FetchError::TransientNetwork(err.to_string()))?;
        let records = parse_search_response(&raw);
        Ok(SearchResults { records, raw })
    }

    fn request_restore(&self, record: &FileRecord) -> Result<RestoreTicket, FetchError> {
        let mut ids = serde_json::Map::new();
        ids.insert(
            record.dataset_id.clone(),
            json!({ "file_ids": [record.file_id.as_str()] }),
        );
        let payload = json!({
            "ids": ids,
            "send_mail": false,
            "api_version": "2",
        });
        let response =
            self.send_with_retries(|| self.client.post(&self.restore_url).json(&payload))?;
        if !response.status().is_success() {
            let (status, message) = Self::read_error_body(response);
            return Err(match classify_status(status, message) {
                auth @ FetchError::Auth { .. } => auth,
                other => FetchError::RestoreFailed(other.to_string()),
            });
        }
        let body: Value = response
            .json()
            .map_err(|err| FetchError::RestoreFailed(err.to_string()))?;
        let status_url = restore_status_url(&body).ok_or_else(|| {
            FetchError::RestoreFailed("restore response missing status URL".to_string())
        })?;
        Ok(RestoreTicket {
            dataset_id: record.dataset_id.clone(),
            file_id: record.file_id.clone(),
            status_url: status_url.to_string(),
            requested_at: chrono::Utc::now(),
        })
    }

    fn poll_status(&self, ticket: &RestoreTicket) -> Result<FileStatus, FetchError> {
        let response = self.send_with_retries(|| self.client.get(&ticket.status_url))?;
        if !response.status().is_success() {
            let (status, message) = Self::read_error_body(response);
            return Err(match classify_status(status, message) {
                auth @ FetchError::Auth { .. } => auth,
                other => FetchError::TransientNetwork(other.to_string()),
            });
        }
        let body: Value = response
            .json()
            .map_err(|err| FetchError::TransientNetwork(err.to_string()))?;
        parse_restore_status(&body)
    }

    fn download(&self, record: &FileRecord, destination: &Path) -> Result<u64, FetchError> {
        let mut ids = serde_json::Map::new();
        ids.insert(
            record.dataset_id.clone(),
            json!([record.file_id.as_str()]),
        );
        let payload = json!({
            "ids": ids,
            "api_version": "2",
        });
        let mut response =
            self.send_with_retries(|| self.client.post(&self.download_url).json(&payload))?;
        if !response.status().is_success() {
            let (status, message) = Self::read_error_body(response);
            return Err(classify_status(status, message));
        }
        let expected = response.content_length();
        let mut file = File::create(destination)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, &mut file)
            .map_err(|err| FetchError::TransientNetwork(err.to_string()))?;
        if let Some(expected) = expected
            && expected != written
        {
            return Err(FetchError::Integrity { expected, written });
        }
        Ok(written)
    }
}

pub fn parse_search_response(raw: &Value) -> Vec<FileRecord> {
    let mut records = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let organisms = raw
        .get("organisms")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for organism in organisms {
        let Some(dataset_id) = organism.get("id").and_then(value_as_id) else {
            continue;
        };
        let files = organism
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for file in files {
            let Some(file_id) = file.get("_id").and_then(value_as_id) else {
                continue;
            };
            let Some(file_name) = file.get("file_name").and_then(Value::as_str) else {
                continue;
            };
            if file_name.is_empty() || !seen.insert((dataset_id.clone(), file_id.clone())) {
                continue;
            }
            let status = file
                .get("file_status")
                .and_then(Value::as_str)
                .map(FileStatus::parse_portal)
                .unwrap_or(FileStatus::Other("UNKNOWN".to_string()));
            records.push(FileRecord {
                dataset_id: dataset_id.clone(),
                file_id,
                file_name: file_name.to_string(),
                file_status: status,
                phytozome_version: detect_version(file_name, file),
                selected: false,
            });
        }
    }
    records
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn restore_status_url(body: &Value) -> Option<&str> {
    body.get("request_status_url")
        .and_then(Value::as_str)
        .or_else(|| body.get("requestStatusUrl").and_then(Value::as_str))
}

fn parse_restore_status(body: &Value) -> Result<FileStatus, FetchError> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_uppercase();
    match status.as_str() {
        "READY" => Ok(FileStatus::Restored),
        "EXPIRED" => Err(FetchError::RestoreFailed(
            "restore request expired".to_string(),
        )),
        _ => Ok(FileStatus::Restoring),
    }
}

pub fn classify_status(status: u16, message: String) -> FetchError {
    match status {
        401 | 403 => FetchError::Auth { status, message },
        400..=499 => FetchError::Query { status, message },
        _ => FetchError::TransientNetwork(format!("status {status}: {message}")),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
