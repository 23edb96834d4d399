//! HTTP client construction, SSE line parsing, and status mapping.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::StrandError;

/// Build a client with the given connect timeout.
///
/// Request timeouts are applied per call since streaming responses may
/// outlive any fixed budget.
pub fn build_client(connect_timeout: Duration) -> Result<reqwest::Client, StrandError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(10)
        .build()?)
}

/// JSON headers, plus a Bearer token when `api_key` is non-empty.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let api_key = api_key.trim();
    if !api_key.is_empty() {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// One line of a server-sent event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    /// Comments, event names, ids, and blank lines.
    Other,
}

pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Other;
    };
    let data = data.trim();
    if data == "[DONE]" {
        SseLine::Done
    } else {
        SseLine::Data(data)
    }
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> StrandError {
    match status {
        401 | 403 => StrandError::Authentication(body.to_string()),
        429 => StrandError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => StrandError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data:{}"), SseLine::Data("{}"));
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line("event: ping"), SseLine::Other);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Other);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(status_to_error(401, "x"), StrandError::Authentication(_)));
        assert!(matches!(
            status_to_error(429, r#"{"error":{"retry_after":1.5}}"#),
            StrandError::RateLimited {
                retry_after_ms: Some(1500)
            }
        ));
        assert!(matches!(
            status_to_error(500, "boom"),
            StrandError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn empty_key_omits_authorization() {
        assert!(bearer_headers("").get(AUTHORIZATION).is_none());
        assert_eq!(
            bearer_headers("sk-1").get(AUTHORIZATION).unwrap(),
            "Bearer sk-1"
        );
    }
}
