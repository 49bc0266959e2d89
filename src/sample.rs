//! Sample Reader
//!
//! Turns the first few kilobytes of a landing file into a header and a
//! handful of example rows. Only a bounded prefix is ever fetched, so the
//! size of the source object does not matter.

use crate::config::LifecycleConfig;
use crate::error::AppError;
use serde::Serialize;
use url::Url;

const UTF8_BOM: &str = "\u{feff}";

/// Header plus example rows taken from a source prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub path: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub bytes_read: usize,
    /// The prefix hit the byte bound, so the object is larger than what was read
    pub truncated: bool,
}

pub struct SampleReader {
    bucket: String,
    landing_prefix: String,
    max_bytes: usize,
    max_rows: usize,
}

impl SampleReader {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            landing_prefix: config.landing_prefix.clone(),
            max_bytes: config.sample_max_bytes,
            max_rows: config.sample_max_rows,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Map a caller-supplied reference to a bucket-relative object path.
    ///
    /// Accepts a bare file name (`sales.csv`), a path already under the
    /// landing folder (`landing/sales.csv`) or a `gs://<bucket>/...` URL for
    /// the configured bucket.
    pub fn resolve(&self, reference: &str) -> Result<String, AppError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AppError::Validation("file name must not be empty".to_string()));
        }

        let path = if reference.starts_with("gs://") {
            let url = Url::parse(reference)
                .map_err(|e| AppError::Validation(format!("invalid object URL '{}': {}", reference, e)))?;
            if url.host_str() != Some(self.bucket.as_str()) {
                return Err(AppError::SourceUnavailable {
                    path: reference.to_string(),
                    cause: format!("object is outside bucket '{}'", self.bucket),
                });
            }
            url.path().trim_start_matches('/').to_string()
        } else if reference.starts_with(&self.landing_prefix) {
            reference.to_string()
        } else {
            format!("{}{}", self.landing_prefix, reference.trim_start_matches('/'))
        };

        if path.is_empty() || path.ends_with('/') || path.split('/').any(|segment| segment == "..") {
            return Err(AppError::Validation(format!(
                "'{}' does not name a single object",
                reference
            )));
        }
        Ok(path)
    }

    /// Decode a fetched prefix into a header and at most `max_rows` rows.
    pub fn parse(&self, path: &str, bytes: &[u8]) -> Result<Sample, AppError> {
        let truncated = bytes.len() >= self.max_bytes;
        let text = decode_prefix(bytes);
        let mut text = text.strip_prefix(UTF8_BOM).unwrap_or(&text).to_string();

        // A cut-off last line would show up as a short, garbled row.
        if truncated {
            if let Some(end) = text.rfind('\n') {
                text.truncate(end + 1);
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let header: Vec<String> = loop {
            match records.next() {
                Some(Ok(record)) => {
                    if record.iter().all(|field| field.is_empty()) {
                        continue;
                    }
                    break record.iter().map(str::to_string).collect();
                }
                Some(Err(e)) => {
                    return Err(AppError::SourceUnavailable {
                        path: path.to_string(),
                        cause: format!("unreadable header: {}", e),
                    })
                }
                None => return Err(AppError::EmptySource(path.to_string())),
            }
        };

        let rows = records
            .filter_map(Result::ok)
            .filter(|record| !record.iter().all(|field| field.is_empty()))
            .take(self.max_rows)
            .map(|record| record.iter().map(str::to_string).collect())
            .collect();

        Ok(Sample {
            path: path.to_string(),
            header,
            rows,
            bytes_read: bytes.len(),
            truncated,
        })
    }
}

/// Lossless up to the last complete UTF-8 sequence; a multi-byte character
/// split by the byte bound is dropped, anything else invalid is replaced.
fn decode_prefix(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reader(max_bytes: usize, max_rows: usize) -> SampleReader {
        SampleReader::new(&LifecycleConfig {
            sample_max_bytes: max_bytes,
            sample_max_rows: max_rows,
            ..LifecycleConfig::default()
        })
    }

    #[test]
    fn test_resolve_references() {
        let r = reader(2048, 5);
        assert_eq!(r.resolve("sales.csv").unwrap(), "landing/sales.csv");
        assert_eq!(r.resolve("landing/sales.csv").unwrap(), "landing/sales.csv");
        assert_eq!(
            r.resolve("gs://data-architect/landing/2026/sales.csv").unwrap(),
            "landing/2026/sales.csv"
        );
        assert!(matches!(
            r.resolve("gs://someone-else/landing/sales.csv"),
            Err(AppError::SourceUnavailable { .. })
        ));
        assert!(matches!(r.resolve("../secrets.csv"), Err(AppError::Validation(_))));
        assert!(matches!(r.resolve("  "), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parse_header_and_rows() {
        let r = reader(2048, 2);
        let sample = r
            .parse(
                "landing/sales.csv",
                b"\xef\xbb\xbfTxn Date,Customer ID,Amount\n2026-01-01,C1,10\n2026-01-02,C2,20\n2026-01-03,C3,30\n",
            )
            .unwrap();
        assert_eq!(sample.header, vec!["Txn Date", "Customer ID", "Amount"]);
        assert_eq!(sample.rows.len(), 2);
        assert!(!sample.truncated);
    }

    #[test]
    fn test_truncated_prefix_drops_partial_line() {
        let content = b"a,b\n1,2\n3,4";
        let r = reader(content.len(), 5);
        let sample = r.parse("landing/x.csv", content).unwrap();
        assert!(sample.truncated);
        assert_eq!(sample.rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn test_split_multibyte_character() {
        // "é" is two bytes; keep only the first
        let bytes = [b'c', b'a', b'f', 0xc3];
        assert_eq!(decode_prefix(&bytes), "caf");
    }

    #[test]
    fn test_empty_source() {
        let r = reader(2048, 5);
        assert!(matches!(r.parse("landing/empty.csv", b""), Err(AppError::EmptySource(_))));
        assert!(matches!(
            r.parse("landing/blank.csv", b"\n\n  \n"),
            Err(AppError::EmptySource(_))
        ));
    }
}
