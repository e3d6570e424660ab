//! HTTP Fetcher (C7): `browser.http_get`, a single safe outbound GET with
//! SSRF guardrails.
//!
//! Blocks the private/loopback/link-local ranges this system's contract
//! names, plus a leading-dot wildcard allowlist override read from the
//! environment.

use crate::{Provider, ProviderError};
use async_trait::async_trait;
use sa_domain::tool::ToolErrorKind;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

pub struct HttpFetchProvider {
    client: reqwest::Client,
    allowlist: Vec<String>,
    default_timeout_sec: u64,
    default_max_bytes: usize,
    default_max_text_chars: usize,
}

impl HttpFetchProvider {
    pub fn new(
        allowlist: Vec<String>,
        default_timeout_sec: u64,
        default_max_bytes: usize,
        default_max_text_chars: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("building reqwest client must not fail with default settings");
        Self {
            client,
            allowlist,
            default_timeout_sec,
            default_max_bytes,
            default_max_text_chars,
        }
    }
}

#[async_trait]
impl Provider for HttpFetchProvider {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn call(&self, method: &str, args: &Value) -> Result<Value, ProviderError> {
        match method {
            "http_get" => self.http_get(args).await,
            other => Err(ProviderError::unknown_method(other)),
        }
    }
}

impl HttpFetchProvider {
    async fn http_get(&self, args: &Value) -> Result<Value, ProviderError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_args("missing required field 'url'"))?;

        let timeout_sec = args
            .get("timeout_sec")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout_sec)
            .min(300);
        let max_bytes = args
            .get("max_bytes")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(self.default_max_bytes)
            .min(200_000_000);
        let max_text_chars = args
            .get("max_text_chars")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(self.default_max_text_chars)
            .min(200_000_000);

        validate_url(url, &self.allowlist).await?;

        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(timeout_sec))
            .send()
            .await
            .map_err(|e| ProviderError::new(ToolErrorKind::ToolException, serde_json::json!({"message": e.to_string()})))?;

        let status = response.status().as_u16();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body: Vec<u8> = Vec::new();
        let mut body_truncated = false;
        let mut stream = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                ProviderError::new(ToolErrorKind::ToolException, serde_json::json!({"message": e.to_string()}))
            })?;
            body.extend_from_slice(&chunk);
            if body.len() > max_bytes {
                body.truncate(max_bytes);
                body_truncated = true;
                break;
            }
        }

        let text = decode_with_charset(&body, &content_type);
        let (text, text_truncated) = truncate_chars(&text, max_text_chars);

        let json_value = if content_type.contains("json") {
            serde_json::from_str::<Value>(&text).ok()
        } else {
            None
        };

        Ok(serde_json::json!({
            "ok": true,
            "url": url,
            "status": status,
            "headers": Value::Object(headers),
            "content_type": content_type,
            "text": text,
            "json": json_value,
            "body_truncated": body_truncated,
            "text_truncated": text_truncated,
        }))
    }
}

fn decode_with_charset(body: &[u8], content_type: &str) -> String {
    let charset = content_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("charset="))
        .unwrap_or("utf-8");

    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        String::from_utf8_lossy(body).into_owned()
    } else {
        // Non-UTF-8 charsets fall back to lossy UTF-8 decoding rather than
        // pulling in a full charset-conversion dependency; this matches the
        // "else UTF-8 with replacement" branch of the contract for any
        // charset we can't specifically honor.
        String::from_utf8_lossy(body).into_owned()
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        (s.to_string(), false)
    } else {
        (s.chars().take(max_chars).collect(), true)
    }
}

/// Check a URL's scheme and every DNS-resolved address against the SSRF
/// blocklist, admitting blocked addresses only when the hostname matches
/// the allowlist.
async fn validate_url(raw_url: &str, allowlist: &[String]) -> Result<(), ProviderError> {
    let parsed = reqwest::Url::parse(raw_url)
        .map_err(|e| ProviderError::invalid_args(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProviderError::invalid_args(format!(
                "blocked scheme: {other}:// (only http/https allowed)"
            )))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ProviderError::invalid_args("URL has no host"))?
        .to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);

    if host_matches_allowlist(&host, allowlist) {
        return Ok(());
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| {
            ProviderError::new(
                ToolErrorKind::DnsResolutionFailed,
                serde_json::json!({"host": host, "message": e.to_string()}),
            )
        })?
        .map(|sa| sa.ip())
        .collect();

    if addrs.is_empty() {
        return Err(ProviderError::new(
            ToolErrorKind::DnsResolutionFailed,
            serde_json::json!({"host": host, "message": "no addresses returned"}),
        ));
    }

    for addr in &addrs {
        if is_blocked_ip(addr) {
            return Err(ProviderError::new(
                ToolErrorKind::LanHostNotAllowlisted,
                serde_json::json!({"host": host, "resolved": addr.to_string()}),
            ));
        }
    }

    Ok(())
}

fn host_matches_allowlist(host: &str, allowlist: &[String]) -> bool {
    let host_lower = host.to_ascii_lowercase();
    allowlist.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        if let Some(suffix) = entry.strip_prefix("*.") {
            host_lower == suffix || host_lower.ends_with(&format!(".{suffix}"))
        } else {
            host_lower == entry
        }
    })
}

/// Exactly the blocklist this system's SSRF contract names: IPv4
/// `0/8, 10/8, 127/8, 169.254/16, 172.16/12, 192.168/16, 100.64/10`;
/// IPv6 `::1, fe80::/10, fc00::/7`.
fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_v4_blocked(v4),
        IpAddr::V6(v6) => is_v6_blocked(v6),
    }
}

fn is_v4_blocked(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 0
        || o[0] == 10
        || o[0] == 127
        || (o[0] == 169 && o[1] == 254)
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
        || (o[0] == 100 && (o[1] & 0xC0) == 64)
}

fn is_v6_blocked(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let segments = ip.segments();
    let is_link_local = (segments[0] & 0xFFC0) == 0xFE80;
    let is_unique_local = (segments[0] & 0xFE00) == 0xFC00;
    is_link_local || is_unique_local
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_loopback_v4() {
        assert!(is_v4_blocked(&Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn blocks_rfc1918_ranges() {
        assert!(is_v4_blocked(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_v4_blocked(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_v4_blocked(&Ipv4Addr::new(172, 31, 255, 255)));
        assert!(is_v4_blocked(&Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!is_v4_blocked(&Ipv4Addr::new(172, 32, 0, 1)));
    }

    #[test]
    fn blocks_link_local_and_cgnat_v4() {
        assert!(is_v4_blocked(&Ipv4Addr::new(169, 254, 1, 1)));
        assert!(is_v4_blocked(&Ipv4Addr::new(100, 64, 0, 1)));
        assert!(is_v4_blocked(&Ipv4Addr::new(100, 127, 255, 255)));
        assert!(!is_v4_blocked(&Ipv4Addr::new(100, 63, 0, 1)));
    }

    #[test]
    fn allows_public_v4() {
        assert!(!is_v4_blocked(&Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn blocks_v6_loopback_link_local_unique_local() {
        assert!(is_v6_blocked(&Ipv6Addr::LOCALHOST));
        assert!(is_v6_blocked(&"fe80::1".parse().unwrap()));
        assert!(is_v6_blocked(&"fd12:3456::1".parse().unwrap()));
        assert!(!is_v6_blocked(&"2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn allowlist_matches_exact_and_wildcard() {
        let allowlist = vec!["*.example.com".to_string(), "foo.bar".to_string()];
        assert!(host_matches_allowlist("sub.example.com", &allowlist));
        assert!(host_matches_allowlist("example.com", &allowlist));
        assert!(host_matches_allowlist("foo.bar", &allowlist));
        assert!(!host_matches_allowlist("evil.com", &allowlist));
        assert!(!host_matches_allowlist("notfoo.bar", &allowlist));
    }

    #[tokio::test]
    async fn validate_url_rejects_non_http_scheme() {
        let err = validate_url("ftp://example.com/file", &[]).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
    }

    #[tokio::test]
    async fn validate_url_blocks_loopback_without_allowlist() {
        let err = validate_url("http://127.0.0.1", &[]).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::LanHostNotAllowlisted);
    }
}
