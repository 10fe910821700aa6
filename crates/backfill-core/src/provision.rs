//! Proxy endpoints and the provisioning call that lists them.
//!
//! The provider answers `GET {api_base}/{key}/getproxy` with
//! `{"status":"yes","list":{"<id>":{"host":..,"port":..,"user":..,"pass":..,"active":"1"},..}}`.
//! Only active records become endpoints; they are ordered by record ID so the
//! balancer cycle is the same from run to run.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::ProvisionError;

/// Upstream HTTP proxy with basic credentials. Immutable for a run.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ProxyEndpoint {
    /// Proxy URL without credentials (credentials are passed to curl separately).
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct ProxyRecord {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    pass: String,
    #[serde(default)]
    active: String,
}

/// The provider sends `[]` instead of `{}` when the account has no proxies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProxyList {
    Records(BTreeMap<String, ProxyRecord>),
    Empty(Vec<serde_json::Value>),
}

impl Default for ProxyList {
    fn default() -> Self {
        ProxyList::Empty(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    list: ProxyList,
}

/// Parse a provisioning response body into active endpoints.
/// `max` caps the number of endpoints returned.
pub fn parse_proxy_response(
    body: &str,
    max: Option<usize>,
) -> Result<Vec<ProxyEndpoint>, ProvisionError> {
    let resp: ProxyResponse = serde_json::from_str(body)?;
    if resp.status != "yes" {
        return Err(ProvisionError::Rejected(
            resp.error.unwrap_or_else(|| format!("status {}", resp.status)),
        ));
    }

    let records = match resp.list {
        ProxyList::Records(records) => records,
        ProxyList::Empty(_) => BTreeMap::new(),
    };

    let mut endpoints = Vec::new();
    for (id, rec) in records {
        if rec.active != "1" {
            continue;
        }
        let Ok(port) = rec.port.trim().parse::<u16>() else {
            tracing::warn!(proxy_id = %id, port = %rec.port, "skipping proxy with invalid port");
            continue;
        };
        if rec.host.trim().is_empty() {
            tracing::warn!(proxy_id = %id, "skipping proxy without host");
            continue;
        }
        endpoints.push(ProxyEndpoint {
            host: rec.host.trim().to_string(),
            port,
            user: rec.user,
            password: rec.pass,
        });
        if max.is_some_and(|m| endpoints.len() >= m) {
            break;
        }
    }

    if endpoints.is_empty() {
        return Err(ProvisionError::NoActiveProxies);
    }
    Ok(endpoints)
}

/// Fetch the active proxy list from the provider.
/// Blocking; call from `spawn_blocking` in async code.
pub fn fetch_proxies(
    api_base: &str,
    key: &str,
    max: Option<usize>,
) -> Result<Vec<ProxyEndpoint>, ProvisionError> {
    let url = format!("{}/{}/getproxy", api_base.trim_end_matches('/'), key);
    let mut body = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(&url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(ProvisionError::Http(code));
    }

    let text = String::from_utf8_lossy(&body);
    let endpoints = parse_proxy_response(&text, max)?;
    tracing::info!(count = endpoints.len(), "provisioned proxies");
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "status": "yes",
        "user_id": "1",
        "balance": "48.80",
        "currency": "RUB",
        "list_count": 3,
        "list": {
            "11": {"id":"11","ip":"1.1.1.1","host":"10.0.0.1","port":"8000","user":"u1","pass":"p1","type":"http","active":"1"},
            "12": {"id":"12","ip":"1.1.1.2","host":"10.0.0.2","port":"8001","user":"u2","pass":"p2","type":"http","active":"0"},
            "10": {"id":"10","ip":"1.1.1.3","host":"10.0.0.3","port":"8002","user":"u3","pass":"p3","type":"http","active":"1"}
        }
    }"#;

    #[test]
    fn keeps_only_active_in_id_order() {
        let eps = parse_proxy_response(SAMPLE, None).unwrap();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].host, "10.0.0.3");
        assert_eq!(eps[0].port, 8002);
        assert_eq!(eps[1].host, "10.0.0.1");
        assert_eq!(eps[1].user, "u1");
        assert_eq!(eps[1].password, "p1");
        assert_eq!(eps[1].proxy_url(), "http://10.0.0.1:8000");
    }

    #[test]
    fn max_truncates() {
        let eps = parse_proxy_response(SAMPLE, Some(1)).unwrap();
        assert_eq!(eps.len(), 1);
    }

    #[test]
    fn provider_error_is_rejected() {
        let body = r#"{"status":"no","error_id":100,"error":"Error key"}"#;
        match parse_proxy_response(body, None) {
            Err(ProvisionError::Rejected(msg)) => assert_eq!(msg, "Error key"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn empty_list_means_no_proxies() {
        let body = r#"{"status":"yes","list_count":0,"list":[]}"#;
        assert!(matches!(
            parse_proxy_response(body, None),
            Err(ProvisionError::NoActiveProxies)
        ));
    }

    #[test]
    fn malformed_body_is_json_error() {
        assert!(matches!(
            parse_proxy_response("<html>", None),
            Err(ProvisionError::Json(_))
        ));
    }

    #[test]
    fn debug_hides_password() {
        let ep = ProxyEndpoint {
            host: "h".into(),
            port: 1,
            user: "u".into(),
            password: "secret".into(),
        };
        assert!(!format!("{:?}", ep).contains("secret"));
        assert_eq!(ep.to_string(), "h:1");
    }
}
