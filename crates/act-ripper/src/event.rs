//! Event identifiers and input URL validation.

use crate::error::RipError;
use regex::Regex;
use std::sync::OnceLock;

/// Page prefixes accepted when no configuration overrides them.
pub const DEFAULT_ACCEPTED_PREFIXES: &[&str] = &["https://act.hoyoverse.com/"];

fn event_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/event/([^/?#]+)/").expect("valid regex"))
}

/// Reject URLs outside the accepted prefixes.
pub fn validate_url(url: &str, accepted_prefixes: &[String]) -> Result<(), RipError> {
    if accepted_prefixes.iter().any(|p| url.starts_with(p.as_str())) {
        Ok(())
    } else {
        Err(RipError::InvalidUrl(url.to_string()))
    }
}

/// Short event label from a `/event/<label>/` path segment.
///
/// Only the first hyphen-delimited token is kept:
/// `/event/e20240530-version-1a2b/` yields `e20240530`.
pub fn event_label(url: &str) -> Option<String> {
    let caps = event_segment_re().captures(url)?;
    let segment = caps.get(1)?.as_str();
    segment
        .split('-')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Event id used to name the archive; falls back to the current time in
/// milliseconds when the URL carries no event segment.
pub fn event_id(url: &str) -> String {
    event_label(url).unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string())
}
