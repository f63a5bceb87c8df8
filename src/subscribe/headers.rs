//! Request headers for subscription downloads
//!
//! Some subscription hosts serve different content (or nothing) to clients
//! that do not look like a browser, so every request starts from a desktop
//! Edge header set. Entries from the subscription's `headers` list are applied
//! on top and replace baseline values with the same name.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, USER_AGENT,
};

use crate::utils::error::FetchError;

/// Desktop Edge on Windows
pub const BASELINE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36 Edg/117.0.2045.31";

const BASELINE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

const BASELINE_ACCEPT_LANGUAGE: &str =
    "zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6,zh-TW;q=0.5";

/// Browser-like headers sent with every download
///
/// # Examples
///
/// ```
/// use subkeeper::subscribe::headers::baseline_headers;
///
/// let headers = baseline_headers();
/// assert_eq!(headers.get("pragma").unwrap(), "no-cache");
/// ```
pub fn baseline_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(USER_AGENT, HeaderValue::from_static(BASELINE_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BASELINE_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(BASELINE_ACCEPT_LANGUAGE),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    headers
}

/// Split a `key=value` entry; a missing `=` yields an empty value
pub fn parse_header_entry(entry: &str) -> Result<(HeaderName, HeaderValue), FetchError> {
    let (key, value) = entry.split_once('=').unwrap_or((entry, ""));

    let name = HeaderName::from_bytes(key.trim().as_bytes())
        .map_err(|e| FetchError::InvalidRequest(format!("header name '{key}': {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| FetchError::InvalidRequest(format!("header value for '{key}': {e}")))?;

    Ok((name, value))
}

/// Baseline headers overridden by the caller's entries
pub fn build_request_headers<S: AsRef<str>>(entries: &[S]) -> Result<HeaderMap, FetchError> {
    let mut headers = baseline_headers();
    for entry in entries {
        let (name, value) = parse_header_entry(entry.as_ref())?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_headers() {
        let headers = baseline_headers();

        assert!(headers
            .get(USER_AGENT)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Edg/117"));
        assert!(headers.contains_key(ACCEPT));
        assert!(headers
            .get(ACCEPT_LANGUAGE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("zh-CN"));
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get(PRAGMA).unwrap(), "no-cache");
    }

    #[test]
    fn test_entry_without_value() {
        let (name, value) = parse_header_entry("X-Flag").unwrap();
        assert_eq!(name.as_str(), "x-flag");
        assert!(value.is_empty());
    }

    #[test]
    fn test_entry_value_keeps_equals() {
        let (name, value) = parse_header_entry("Authorization=Bearer a=b").unwrap();
        assert_eq!(name, reqwest::header::AUTHORIZATION);
        assert_eq!(value, "Bearer a=b");
    }

    #[test]
    fn test_caller_overrides_baseline() {
        let headers = build_request_headers(&["User-Agent=clash-verge/1.0", "X-Token=abc"]).unwrap();

        assert_eq!(headers.get(USER_AGENT).unwrap(), "clash-verge/1.0");
        assert_eq!(headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(headers.get("x-token").unwrap(), "abc");
        assert_eq!(headers.get(PRAGMA).unwrap(), "no-cache");
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(matches!(
            parse_header_entry("bad name=1"),
            Err(FetchError::InvalidRequest(_))
        ));
    }
}
