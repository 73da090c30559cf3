//! `fetch` backed by `reqwest`.
//!
//! The request runs on the host runtime; the script awaits a ticket that is
//! settled with the buffered response.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use harbor_capabilities::DomainPolicy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, redirect};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::util::{decode_bytes, encode_bytes};
use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Options accepted by `fetch(url, options)`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    /// Absolute URL.
    pub url: String,
    /// HTTP method, `GET` by default.
    #[serde(default)]
    pub method: Option<String>,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Text body.
    #[serde(default)]
    pub body: Option<String>,
    /// Binary body, base64 encoded. Wins over `body`.
    #[serde(default)]
    pub body_base64: Option<String>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl FetchRequest {
    fn timeout(&self, default: Duration) -> Duration {
        self.timeout
            .filter(|t| t.is_finite() && *t > 0.0)
            .map_or(default, Duration::from_secs_f64)
    }
}

pub(crate) struct FetchModule {
    client: OnceLock<Client>,
}

impl FetchModule {
    pub(crate) fn new() -> Self {
        Self {
            client: OnceLock::new(),
        }
    }

    fn client(&self, domains: &DomainPolicy) -> RuntimeResult<Client> {
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }
        let client = build_client(domains)?;
        Ok(self.client.get_or_init(|| client).clone())
    }
}

/// Client whose redirects stay inside the domain allow-list.
pub(crate) fn build_client(domains: &DomainPolicy) -> RuntimeResult<Client> {
    let policy = if domains.is_unrestricted() {
        redirect::Policy::limited(MAX_REDIRECTS)
    } else {
        let domains = domains.clone();
        redirect::Policy::custom(move |attempt| {
            let allowed = attempt.url().host_str().is_some_and(|h| domains.allows_host(h));
            if !allowed || attempt.previous().len() >= MAX_REDIRECTS {
                attempt.stop()
            } else {
                attempt.follow()
            }
        })
    };
    Client::builder()
        .redirect(policy)
        .build()
        .map_err(|e| RuntimeError::Engine(format!("failed to build http client: {e}")))
}

fn header_map(op: &str, headers: &BTreeMap<String, String>) -> RuntimeResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_str(name)
            .map_err(|e| RuntimeError::invalid_argument(op, format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RuntimeError::invalid_argument(op, format!("header value: {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Perform a request already authorized against the allow-list.
pub(crate) async fn perform(
    client: Client,
    url: url::Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Duration,
) -> RuntimeResult<Value> {
    let started = std::time::Instant::now();
    let mut request = client.request(method, url).headers(headers).timeout(timeout);
    if let Some(body) = body {
        request = request.body(body);
    }
    let response = request.send().await.map_err(|e| map_reqwest(e, started))?;
    let status = response.status();
    let final_url = response.url().to_string();
    let mut headers = serde_json::Map::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match headers.get_mut(name.as_str()) {
            // Repeated headers are joined the way `Headers.get` does.
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            },
            _ => {
                headers.insert(name.as_str().to_string(), Value::String(value));
            },
        }
    }
    let bytes = response.bytes().await.map_err(|e| map_reqwest(e, started))?;
    Ok(json!({
        "status": status.as_u16(),
        "statusText": status.canonical_reason().unwrap_or_default(),
        "ok": status.is_success(),
        "headers": headers,
        "url": final_url,
        "body": String::from_utf8_lossy(&bytes),
        "bodyBase64": encode_bytes(&bytes),
    }))
}

fn map_reqwest(e: reqwest::Error, started: std::time::Instant) -> RuntimeError {
    if e.is_timeout() {
        RuntimeError::Timeout {
            operation: "fetch".into(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        RuntimeError::Io {
            operation: "fetch".into(),
            source: std::io::Error::other(e),
        }
    }
}

impl HostModule for FetchModule {
    fn namespace(&self) -> &'static str {
        "fetch"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        if method != "request" {
            return Err(unknown_method("fetch", method));
        }
        let request: FetchRequest = args.decode(0)?;
        // Denials fail before a ticket exists.
        let url = cx.gate().check_url("fetch", &request.url)?;
        let http_method = request
            .method
            .as_deref()
            .map(|m| Method::from_str(&m.to_ascii_uppercase()))
            .transpose()
            .map_err(|e| RuntimeError::invalid_argument(args.op(), e.to_string()))?
            .unwrap_or(Method::GET);
        let headers = header_map(args.op(), &request.headers)?;
        let body = match (&request.body_base64, &request.body) {
            (Some(encoded), _) => Some(decode_bytes(args.op(), encoded)?),
            (None, Some(text)) => Some(text.clone().into_bytes()),
            (None, None) => None,
        };
        let timeout = request.timeout(cx.options().fetch_timeout);
        let handle = cx.handle()?.clone();
        let client = self.client(cx.gate().domains())?;

        let completions = std::sync::Arc::clone(cx.completions());
        let ticket = completions.ticket();
        debug!(extension_id = %cx.extension_id(), url = %url, method = %http_method, "fetch");
        handle.spawn(async move {
            let result = perform(client, url, http_method, headers, body, timeout).await;
            completions.resolve(ticket, result);
        });
        Ok(json!(ticket))
    }
}
