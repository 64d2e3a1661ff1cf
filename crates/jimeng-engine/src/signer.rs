//! SigV4-style request signing for the provider's storage control plane.
//!
//! The canonical request is
//!
//! ```text
//! METHOD\n
//! path\n
//! sorted query\n
//! name:value\n ... (one line per signed header)\n
//! signed;header;names\n
//! payload sha256
//! ```
//!
//! and the signing key is derived by chaining HMAC-SHA256 over date, region,
//! service and `aws4_request`, starting from `AWS4` + secret.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const KEY_PREFIX: &str = "AWS4";
const SCOPE_TERMINATOR: &str = "aws4_request";

/// Temporary storage credentials handed out by the upload-token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// A request about to be signed. `amz_date` is the `x-amz-date` header value.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub amz_date: &'a str,
    pub payload: Option<&'a [u8]>,
}

/// Headers produced by signing, ready to attach to the outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub security_token: Option<String>,
    pub content_sha256: Option<String>,
}

impl SignedHeaders {
    pub fn into_pairs(self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("authorization".to_string(), self.authorization),
            ("x-amz-date".to_string(), self.amz_date),
        ];
        if let Some(token) = self.security_token {
            pairs.push(("x-amz-security-token".to_string(), token));
        }
        if let Some(hash) = self.content_sha256 {
            pairs.push(("x-amz-content-sha256".to_string(), hash));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSigner {
    region: String,
    service: String,
}

impl RequestSigner {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn sign(&self, request: &SignableRequest<'_>, credential: &Credential) -> SignedHeaders {
        let (path, query) = split_url(request.url);
        let date = request.amz_date.get(..8).unwrap_or(request.amz_date);

        let mut headers: Vec<(&str, &str)> = vec![("x-amz-date", request.amz_date)];
        let session_token = credential
            .session_token
            .as_deref()
            .filter(|token| !token.is_empty());
        if let Some(token) = session_token {
            headers.push(("x-amz-security-token", token));
        }

        let mut payload_hash = hash_payload(b"");
        let mut content_sha256 = None;
        if let Some(payload) = request.payload.filter(|bytes| !bytes.is_empty()) {
            if request.method.eq_ignore_ascii_case("POST") {
                payload_hash = hash_payload(payload);
                content_sha256 = Some(payload_hash.clone());
            }
        }
        if let Some(hash) = content_sha256.as_deref() {
            headers.push(("x-amz-content-sha256", hash));
        }

        let canonical_request = build_canonical_request(
            &request.method.to_ascii_uppercase(),
            &path,
            &build_canonical_query_string(&query),
            &headers,
            &payload_hash,
        );
        let scope = format!(
            "{date}/{}/{}/{SCOPE_TERMINATOR}",
            self.region, self.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{scope}\n{}",
            request.amz_date,
            hash_payload(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &credential.secret_access_key,
            date,
            &self.region,
            &self.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        SignedHeaders {
            authorization: format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
                credential.access_key_id,
                build_signed_headers_string(&headers)
            ),
            amz_date: request.amz_date.to_string(),
            security_token: session_token.map(str::to_string),
            content_sha256,
        }
    }
}

fn split_url(raw: &str) -> (String, String) {
    match Url::parse(raw) {
        Ok(url) => {
            let path = if url.path().is_empty() {
                "/".to_string()
            } else {
                url.path().to_string()
            };
            (path, url.query().unwrap_or_default().to_string())
        }
        Err(_) => ("/".to_string(), String::new()),
    }
}

/// Sort `key=value` pairs by key; values are kept exactly as they appear.
pub fn build_canonical_query_string(query: &str) -> String {
    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();
    params.sort_by(|a, b| a.0.cmp(b.0));
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn sorted_headers<'a>(headers: &[(&'a str, &'a str)]) -> Vec<(String, &'a str)> {
    let mut rows: Vec<(String, &str)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), *value))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows
}

pub fn build_signed_headers_string(headers: &[(&str, &str)]) -> String {
    sorted_headers(headers)
        .into_iter()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join(";")
}

fn build_canonical_headers(headers: &[(&str, &str)]) -> String {
    sorted_headers(headers)
        .into_iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect()
}

pub fn build_canonical_request(
    method: &str,
    path: &str,
    canonical_query: &str,
    headers: &[(&str, &str)],
    payload_hash: &str,
) -> String {
    [
        method,
        path,
        canonical_query,
        &build_canonical_headers(headers),
        &build_signed_headers_string(headers),
        payload_hash,
    ]
    .join("\n")
}

pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("{KEY_PREFIX}{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}
