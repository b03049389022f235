//! Request parser: turns free-form multi-line input into tracking requests.
//!
//! Grammar, per line (after trimming, blank lines skipped):
//! - `CODE (note text)`: code is the text before the first `(`, note is the
//!   rest with every `)` removed
//! - `CODE note text`: code is the first whitespace token, note is the rest
//!   joined by single spaces

use parcel_common::types::TrackingRequest;

/// Parse raw input into requests, preserving line order.
///
/// Duplicates are kept; lines that yield an empty code are dropped.
pub fn parse(raw_text: &str) -> Vec<TrackingRequest> {
    raw_text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<TrackingRequest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (code, note) = match line.split_once('(') {
        Some((code, rest)) => (code.trim().to_string(), rest.replace(')', "").trim().to_string()),
        None => {
            let mut tokens = line.split_whitespace();
            let code = tokens.next().unwrap_or_default().to_string();
            (code, tokens.collect::<Vec<_>>().join(" "))
        }
    };

    if code.is_empty() {
        tracing::debug!(line, "Skipping input line without a tracking code");
        return None;
    }

    Some(TrackingRequest { code, note })
}
