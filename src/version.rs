use regex::Regex;
use serde_json::Value;

use crate::domain::FileRecord;

const MAX_HAYSTACK_STRINGS: usize = 2000;
const MAX_HAYSTACK_LEN: usize = 200_000;

pub fn extract_phytozome_version(text: &str) -> Option<u32> {
    let patterns = [
        Regex::new(r"(?i)phytozomev\s*([0-9]{1,2})").unwrap(),
        Regex::new(r"(?i)phytozome\s*[_/-]*\s*v\s*([0-9]{1,2})").unwrap(),
        Regex::new(r"(?i)phytozome\s*([0-9]{1,2})").unwrap(),
    ];
    for pattern in &patterns {
        if let Some(captures) = pattern.captures(text) {
            return captures.get(1).and_then(|m| m.as_str().parse().ok());
        }
    }
    None
}

pub fn detect_version(file_name: &str, file_object: &Value) -> Option<u32> {
    let mut strings = Vec::new();
    if !file_name.is_empty() {
        strings.push(file_name.to_string());
    }
    collect_strings(file_object, &mut strings);

    let phytozome_strings: Vec<&str> = strings
        .iter()
        .map(String::as_str)
        .filter(|s| s.to_lowercase().contains("phytozome"))
        .collect();

    let haystack = if phytozome_strings.is_empty() {
        strings.join(" ")
    } else {
        phytozome_strings.join(" ")
    };
    let mut cut = MAX_HAYSTACK_LEN.min(haystack.len());
    while !haystack.is_char_boundary(cut) {
        cut -= 1;
    }

    extract_phytozome_version(&haystack[..cut])
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    if out.len() >= MAX_HAYSTACK_STRINGS {
        return;
    }
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Object(map) => {
            for (key, nested) in map {
                if out.len() >= MAX_HAYSTACK_STRINGS {
                    break;
                }
                out.push(key.clone());
                collect_strings(nested, out);
            }
        }
        Value::Array(items) => {
            for nested in items {
                if out.len() >= MAX_HAYSTACK_STRINGS {
                    break;
                }
                collect_strings(nested, out);
            }
        }
        _ => {}
    }
}

pub fn apply_latest_only(records: &mut [FileRecord]) -> Option<u32> {
    let max_version = records
        .iter()
        .filter(|record| record.selected)
        .filter_map(|record| record.phytozome_version)
        .max()?;

    for record in records.iter_mut() {
        if !record.selected {
            continue;
        }
        if record.phytozome_version != Some(max_version) {
            record.selected = false;
        }
    }
    Some(max_version)
}
