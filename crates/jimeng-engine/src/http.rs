//! Blocking HTTP implementations of the collaborator traits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT as USER_AGENT_HEADER};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::{ServiceConfig, USER_AGENT};
use crate::rpc::{
    BrowserProxy, CreditBalance, CreditService, HttpMethod, ProxyRequest, RpcCaller, RpcRequest,
    TransportRequest, TransportResponse, UploadTransport,
};

const USER_CREDIT_PATH: &str = "/commerce/v1/benefits/user_credit";
const CREDIT_RECEIVE_PATH: &str = "/commerce/v1/benefits/credit_receive";

fn session_cookie(token: &str) -> String {
    format!("sessionid={token}; sessionid_ss={token}; sid_tt={token}")
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} request failed ({code}): {}", truncate_text(&body, 512));
    }
    serde_json::from_str(&body).with_context(|| format!("{label} returned invalid JSON payload"))
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Unwrap the provider's `{ret, errmsg, data}` envelope.
pub fn unwrap_envelope(path: &str, envelope: Value) -> Result<Value> {
    let ret = envelope
        .get("ret")
        .map(param_text)
        .unwrap_or_else(|| "0".to_string());
    if ret.trim() != "0" {
        let errmsg = envelope
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or_default();
        bail!("{path} failed (ret={ret}): {errmsg}");
    }
    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
}

/// Provider JSON API authenticated with the session cookie.
#[derive(Clone)]
pub struct HttpRpcCaller {
    config: ServiceConfig,
    http: HttpClient,
}

impl HttpRpcCaller {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn query(&self, params: &Map<String, Value>) -> Vec<(String, String)> {
        let mut query = vec![
            ("aid".to_string(), self.config.assistant_id.to_string()),
            ("device_platform".to_string(), "web".to_string()),
            ("region".to_string(), "cn".to_string()),
            ("webId".to_string(), self.config.web_id.clone()),
        ];
        for (key, value) in params {
            query.retain(|(existing, _)| existing != key);
            query.push((key.clone(), param_text(value)));
        }
        query
    }
}

impl RpcCaller for HttpRpcCaller {
    fn call(&self, token: &str, request: &RpcRequest) -> Result<Value> {
        let url = format!("{}{}", self.config.api_base, request.path);
        debug!(method = request.method.as_str(), %url, "provider rpc");
        let builder = match request.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self
                .http
                .post(&url)
                .json(request.data.as_ref().unwrap_or(&json!({}))),
        };
        let response = builder
            .query(&self.query(&request.params))
            .header(COOKIE, session_cookie(token))
            .header(USER_AGENT_HEADER, USER_AGENT)
            .header(ORIGIN, &self.config.origin)
            .header(REFERER, &self.config.referer)
            .header("appid", self.config.assistant_id.to_string())
            .timeout(self.config.request_timeout)
            .send()
            .with_context(|| format!("provider request {} failed", request.path))?;
        let envelope = response_json_or_error(&request.path, response)?;
        unwrap_envelope(&request.path, envelope)
    }
}

/// Credit lookups routed through any [`RpcCaller`].
#[derive(Clone)]
pub struct HttpCreditService {
    rpc: Arc<dyn RpcCaller>,
}

impl HttpCreditService {
    pub fn new(rpc: Arc<dyn RpcCaller>) -> Self {
        Self { rpc }
    }
}

fn credit_field(credit: &Value, key: &str) -> i64 {
    credit
        .get(key)
        .and_then(|value| value.as_i64().or_else(|| value.as_str()?.trim().parse().ok()))
        .unwrap_or_default()
}

impl CreditService for HttpCreditService {
    fn get_credit(&self, token: &str) -> Result<CreditBalance> {
        let data = self
            .rpc
            .call(token, &RpcRequest::post(USER_CREDIT_PATH, json!({})))
            .context("credit lookup failed")?;
        let credit = data.get("credit").unwrap_or(&data);
        Ok(CreditBalance {
            gift_credit: credit_field(credit, "gift_credit"),
            purchase_credit: credit_field(credit, "purchase_credit"),
            vip_credit: credit_field(credit, "vip_credit"),
        })
    }

    fn replenish_credit(&self, token: &str) -> Result<()> {
        self.rpc
            .call(
                token,
                &RpcRequest::post(CREDIT_RECEIVE_PATH, json!({ "time_zone": "Asia/Shanghai" })),
            )
            .context("credit claim failed")?;
        Ok(())
    }
}

/// Sends proxied submissions as plain requests with the session cookie.
#[derive(Clone)]
pub struct DirectBrowserProxy {
    config: ServiceConfig,
    http: HttpClient,
}

impl DirectBrowserProxy {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }
}

impl BrowserProxy for DirectBrowserProxy {
    fn fetch(&self, token: &str, url: &str, request: &ProxyRequest) -> Result<Value> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url).body(request.body.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .header(COOKIE, session_cookie(token))
            .header(USER_AGENT_HEADER, USER_AGENT)
            .header(ORIGIN, &self.config.origin)
            .header(REFERER, &self.config.referer)
            .timeout(self.config.request_timeout)
            .send()
            .with_context(|| format!("proxied request to {url} failed"))?;
        response_json_or_error("proxied submission", response)
    }
}

/// Raw exchange with the storage hosts; non-2xx statuses are returned, not raised.
#[derive(Clone)]
pub struct HttpUploadTransport {
    http: HttpClient,
    timeout: Duration,
}

impl HttpUploadTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }
}

impl UploadTransport for HttpUploadTransport {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url).body(request.body.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method == HttpMethod::Post && request.header_value("content-type").is_none() {
            builder = builder.header(CONTENT_TYPE, "application/octet-stream");
        }
        let response = builder
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("storage request to {} failed", request.url))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("storage response from {} unreadable", request.url))?
            .to_vec();
        Ok(TransportResponse { status, body })
    }
}
