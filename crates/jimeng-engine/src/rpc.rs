use anyhow::Result;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A call against the provider's own JSON API.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Map<String, Value>,
    pub data: Option<Value>,
}

impl RpcRequest {
    pub fn post(path: impl Into<String>, data: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            params: Map::new(),
            data: Some(data),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Authenticated access to the provider API; returns the unwrapped `data` payload.
pub trait RpcCaller: Send + Sync {
    fn call(&self, token: &str, request: &RpcRequest) -> Result<Value>;
}

/// Request dispatched through a real browser session.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Dispatch used for submissions that must look like a browser; returns the raw envelope.
pub trait BrowserProxy: Send + Sync {
    fn fetch(&self, token: &str, url: &str, request: &ProxyRequest) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreditBalance {
    pub gift_credit: i64,
    pub purchase_credit: i64,
    pub vip_credit: i64,
}

impl CreditBalance {
    pub fn total_credit(&self) -> i64 {
        self.gift_credit + self.purchase_credit + self.vip_credit
    }
}

pub trait CreditService: Send + Sync {
    fn get_credit(&self, token: &str) -> Result<CreditBalance>;
    fn replenish_credit(&self, token: &str) -> Result<()>;
}

/// Raw HTTP exchange with the storage services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn headers(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(pairs);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub trait UploadTransport: Send + Sync {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse>;
}
