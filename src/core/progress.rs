//! Decoding of worker progress lines.
//!
//! Workers report progress by printing a JSON object per line:
//! `{"type":"progress","current":5,"total":10,"message":"..."}`.
//! Everything else on stdout is diagnostic text.

use serde::Deserialize;

use crate::domain::ProgressEvent;

#[derive(Debug, Deserialize)]
struct ProgressRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    current: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    message: String,
}

/// Try to decode a progress record from one line of worker output.
///
/// Returns `None` for blank lines, non-JSON lines, JSON that does not decode,
/// and records whose `type` is not `progress`.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    let record: ProgressRecord = serde_json::from_str(line).ok()?;
    if record.kind != "progress" {
        return None;
    }

    Some(ProgressEvent {
        current: record.current,
        total: record.total,
        message: record.message,
    })
}

/// `floor(100 * current / total)`, capped at 100; 0 when `total` is 0
pub fn percentage(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as u128 * 100) / total as u128;
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_progress_record() {
        let event =
            parse_progress_line(r#"  {"type":"progress","current":5,"total":10,"message":"halfway"}  "#)
                .unwrap();
        assert_eq!(event.current, 5);
        assert_eq!(event.total, 10);
        assert_eq!(event.message, "halfway");
    }

    #[test]
    fn test_missing_fields_default() {
        let event = parse_progress_line(r#"{"type":"progress"}"#).unwrap();
        assert_eq!(event.current, 0);
        assert_eq!(event.total, 0);
        assert!(event.message.is_empty());
    }

    #[test]
    fn test_non_progress_lines_are_ignored() {
        assert!(parse_progress_line("").is_none());
        assert!(parse_progress_line("Fetching https://example.com").is_none());
        assert!(parse_progress_line(r#"{"type":"log","message":"hi"}"#).is_none());
        assert!(parse_progress_line(r#"{"type":"progress","current":"#).is_none());
        assert!(parse_progress_line(r#"{"type":"progress","current":-1,"total":3}"#).is_none());
        assert!(parse_progress_line(r#"[{"type":"progress"}]"#).is_none());
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(7, 0), 0);
        assert_eq!(percentage(5, 10), 50);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 66);
        assert_eq!(percentage(10, 10), 100);
        assert_eq!(percentage(15, 10), 100);
        assert_eq!(percentage(u64::MAX, 1), 100);
    }
}
