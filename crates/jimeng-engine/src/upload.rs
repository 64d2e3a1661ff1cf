//! Four-phase upload against the provider's storage services.
//!
//! Both stores run the same sequence: upload token, signed apply, raw byte
//! POST to the granted host, signed commit. [`StoreProtocol`] captures the
//! parts that differ between the image store and the video/audio store.

use std::fmt;
use std::sync::Arc;

use jimeng_contracts::{Material, MaterialRef, MaterialType, ResolutionSpec};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::checksum::{audio_duration_ms, crc32_hex};
use crate::clock::{Clock, IdSource};
use crate::config::{ServiceConfig, USER_AGENT};
use crate::error::{VideoError, VideoResult};
use crate::rpc::{RpcCaller, RpcRequest, TransportRequest, TransportResponse, UploadTransport};
use crate::signer::{Credential, RequestSigner, SignableRequest};

const UPLOAD_TOKEN_PATH: &str = "/mweb/v1/get_upload_token";
const UPLOAD_OK_CODE: i64 = 2000;
const URI_STATUS_OK: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    TokenAcquired,
    PermissionGranted,
    BytesUploaded,
    Committed,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TokenAcquired => "token_acquired",
            Self::PermissionGranted => "permission_granted",
            Self::BytesUploaded => "bytes_uploaded",
            Self::Committed => "committed",
        };
        f.write_str(label)
    }
}

/// Credentials for one upload plus the store's service id or space name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub credential: Credential,
    pub space: String,
}

/// Grant returned by the apply phase; consumed by the byte upload and commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub upload_host: String,
    pub store_uri: String,
    pub auth: String,
    pub session_key: String,
    pub vid: Option<String>,
}

/// What the store reports for a committed object.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedObject {
    pub reference: MaterialRef,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub fps: u32,
}

/// Differences between the image store and the media store.
pub trait StoreProtocol: Send + Sync {
    fn label(&self) -> &'static str;
    /// `scene` sent to the upload-token endpoint.
    fn scene(&self) -> u8;
    /// Service name used in the signing scope.
    fn signing_service(&self) -> &'static str;
    fn host<'a>(&self, config: &'a ServiceConfig) -> &'a str;
    fn space(&self, token: &Value, config: &ServiceConfig) -> String;
    fn apply_query(&self, space: &str, file_size: usize, nonce: &str) -> String;
    fn parse_apply(&self, result: &Value) -> Option<UploadTicket>;
    fn upload_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
    fn check_upload(&self, response: &TransportResponse) -> Result<(), String>;
    fn commit_query(&self, space: &str) -> String;
    fn commit_body(&self, ticket: &UploadTicket) -> Value;
    fn parse_commit(&self, result: &Value) -> Result<CommittedObject, String>;
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).and_then(Value::as_array).and_then(|rows| rows.first())
}

fn store_info(node: &Value) -> Option<(String, String)> {
    let info = first(node, "StoreInfos")?;
    Some((
        str_field(info, "StoreUri")?.to_string(),
        str_field(info, "Auth")?.to_string(),
    ))
}

fn first_result(body: &Value) -> Result<&Value, String> {
    body.get("Result")
        .and_then(|result| first(result, "Results"))
        .ok_or_else(|| format!("commit response has no results: {body}"))
}

fn as_u32(value: Option<&Value>) -> u32 {
    value
        .and_then(Value::as_f64)
        .filter(|number| *number > 0.0)
        .map(|number| number.round() as u32)
        .unwrap_or(0)
}

/// ImageX store (`scene = 2`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageStore;

impl StoreProtocol for ImageStore {
    fn label(&self) -> &'static str {
        "image"
    }

    fn scene(&self) -> u8 {
        2
    }

    fn signing_service(&self) -> &'static str {
        "imagex"
    }

    fn host<'a>(&self, config: &'a ServiceConfig) -> &'a str {
        &config.imagex_host
    }

    fn space(&self, token: &Value, config: &ServiceConfig) -> String {
        str_field(token, "service_id")
            .map(str::to_string)
            .unwrap_or_else(|| config.default_image_service_id.clone())
    }

    fn apply_query(&self, space: &str, file_size: usize, nonce: &str) -> String {
        format!(
            "Action=ApplyImageUpload&Version=2018-08-01&ServiceId={space}&FileSize={file_size}&s={nonce}"
        )
    }

    fn parse_apply(&self, result: &Value) -> Option<UploadTicket> {
        let address = result.get("Result")?.get("UploadAddress")?;
        let (store_uri, auth) = store_info(address)?;
        let upload_host = first(address, "UploadHosts")?.as_str()?.to_string();
        Some(UploadTicket {
            upload_host,
            store_uri,
            auth,
            session_key: str_field(address, "SessionKey")?.to_string(),
            vid: None,
        })
    }

    fn upload_headers(&self) -> Vec<(String, String)> {
        vec![(
            "Content-Disposition".to_string(),
            "attachment; filename=\"undefined\"".to_string(),
        )]
    }

    fn check_upload(&self, _response: &TransportResponse) -> Result<(), String> {
        Ok(())
    }

    fn commit_query(&self, space: &str) -> String {
        format!("Action=CommitImageUpload&Version=2018-08-01&ServiceId={space}")
    }

    fn commit_body(&self, ticket: &UploadTicket) -> Value {
        json!({
            "SessionKey": ticket.session_key,
            "SuccessActionStatus": "200",
        })
    }

    fn parse_commit(&self, body: &Value) -> Result<CommittedObject, String> {
        let result = first_result(body)?;
        let status = result.get("UriStatus").and_then(Value::as_i64);
        if status != Some(URI_STATUS_OK) {
            return Err(format!(
                "UriStatus={}",
                status.map_or_else(|| "missing".to_string(), |code| code.to_string())
            ));
        }
        // post-processing may rewrite the canonical uri
        let plugin_uri = body
            .get("Result")
            .and_then(|result| first(result, "PluginResult"))
            .and_then(|plugin| str_field(plugin, "ImageUri"));
        let uri = plugin_uri
            .or_else(|| str_field(result, "Uri"))
            .ok_or_else(|| format!("commit result has no uri: {result}"))?;
        Ok(CommittedObject {
            reference: MaterialRef::Uri(uri.to_string()),
            width: 0,
            height: 0,
            duration_ms: 0,
            fps: 0,
        })
    }
}

/// VOD store for video and audio (`scene = 1`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaStore;

impl StoreProtocol for MediaStore {
    fn label(&self) -> &'static str {
        "media"
    }

    fn scene(&self) -> u8 {
        1
    }

    fn signing_service(&self) -> &'static str {
        "vod"
    }

    fn host<'a>(&self, config: &'a ServiceConfig) -> &'a str {
        &config.vod_host
    }

    fn space(&self, token: &Value, config: &ServiceConfig) -> String {
        str_field(token, "space_name")
            .map(str::to_string)
            .unwrap_or_else(|| config.default_media_space.clone())
    }

    fn apply_query(&self, space: &str, file_size: usize, nonce: &str) -> String {
        format!(
            "Action=ApplyUploadInner&Version=2020-11-19&SpaceName={space}&FileType=video&IsInner=1&FileSize={file_size}&s={nonce}"
        )
    }

    fn parse_apply(&self, result: &Value) -> Option<UploadTicket> {
        let node = first(result.get("Result")?.get("InnerUploadAddress")?, "UploadNodes")?;
        let (store_uri, auth) = store_info(node)?;
        Some(UploadTicket {
            upload_host: str_field(node, "UploadHost")?.to_string(),
            store_uri,
            auth,
            session_key: str_field(node, "SessionKey")?.to_string(),
            vid: str_field(node, "Vid").map(str::to_string),
        })
    }

    fn check_upload(&self, response: &TransportResponse) -> Result<(), String> {
        let body = response
            .json()
            .map_err(|err| format!("unreadable upload response: {err}"))?;
        let code = body.get("code").and_then(Value::as_i64);
        if code == Some(UPLOAD_OK_CODE) {
            return Ok(());
        }
        Err(format!(
            "code={}, message={}",
            code.map_or_else(|| "missing".to_string(), |code| code.to_string()),
            body.get("message").and_then(Value::as_str).unwrap_or("")
        ))
    }

    fn commit_query(&self, space: &str) -> String {
        format!("Action=CommitUploadInner&Version=2020-11-19&SpaceName={space}")
    }

    fn commit_body(&self, ticket: &UploadTicket) -> Value {
        json!({
            "SessionKey": ticket.session_key,
            "Functions": [],
        })
    }

    fn parse_commit(&self, body: &Value) -> Result<CommittedObject, String> {
        let result = first_result(body)?;
        let vid = str_field(result, "Vid").ok_or_else(|| format!("commit result has no Vid: {result}"))?;
        let meta = result.get("VideoMeta").cloned().unwrap_or(Value::Null);
        let duration_ms = meta
            .get("Duration")
            .and_then(Value::as_f64)
            .filter(|seconds| *seconds > 0.0)
            .map(|seconds| (seconds * 1000.0).round() as u64)
            .unwrap_or(0);
        Ok(CommittedObject {
            reference: MaterialRef::Vid(vid.to_string()),
            width: as_u32(meta.get("Width")),
            height: as_u32(meta.get("Height")),
            duration_ms,
            fps: as_u32(meta.get("Fps")),
        })
    }
}

/// Drives the upload phases for either store.
#[derive(Clone)]
pub struct UploadCoordinator {
    config: ServiceConfig,
    rpc: Arc<dyn RpcCaller>,
    transport: Arc<dyn UploadTransport>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
}

impl UploadCoordinator {
    pub fn new(
        config: ServiceConfig,
        rpc: Arc<dyn RpcCaller>,
        transport: Arc<dyn UploadTransport>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
    ) -> Self {
        Self {
            config,
            rpc,
            transport,
            clock,
            ids,
        }
    }

    /// Upload `bytes` as a material of `kind`; images go to the image store,
    /// video and audio to the media store.
    pub fn upload_material(
        &self,
        token: &str,
        bytes: &[u8],
        kind: MaterialType,
        name: &str,
        frame: ResolutionSpec,
    ) -> VideoResult<Material> {
        match kind {
            MaterialType::Image => {
                let object = self.upload(&ImageStore, token, bytes)?;
                Ok(Material {
                    kind,
                    reference: object.reference,
                    width: frame.width,
                    height: frame.height,
                    duration_ms: 0,
                    fps: 0,
                    name: String::new(),
                })
            }
            MaterialType::Video | MaterialType::Audio => {
                let object = self.upload(&MediaStore, token, bytes)?;
                let mut duration_ms = object.duration_ms;
                if duration_ms == 0 && kind == MaterialType::Audio {
                    duration_ms = audio_duration_ms(bytes);
                    info!(duration_ms, "store reported no audio duration, measured locally");
                }
                Ok(Material {
                    kind,
                    reference: object.reference,
                    width: object.width,
                    height: object.height,
                    duration_ms,
                    fps: object.fps,
                    name: name.to_string(),
                })
            }
        }
    }

    /// Fetch a remote input file.
    pub fn download(&self, url: &str) -> VideoResult<Vec<u8>> {
        let response = self
            .transport
            .send(&TransportRequest::get(url))
            .map_err(|err| VideoError::UploadTransport {
                store: "remote",
                status: None,
                body: format!("{err:#}"),
            })?;
        if !response.is_success() {
            return Err(VideoError::UploadTransport {
                store: "remote",
                status: Some(response.status),
                body: response.text(),
            });
        }
        Ok(response.body)
    }

    pub fn upload(
        &self,
        protocol: &dyn StoreProtocol,
        token: &str,
        bytes: &[u8],
    ) -> VideoResult<CommittedObject> {
        let store = protocol.label();
        info!(store, size = bytes.len(), "starting upload");

        let session = self.acquire_token(protocol, token)?;
        debug!(store, phase = %UploadPhase::TokenAcquired, space = %session.space);

        let ticket = self.apply(protocol, &session, bytes.len())?;
        debug!(store, phase = %UploadPhase::PermissionGranted, host = %ticket.upload_host);

        self.put_bytes(protocol, &ticket, bytes)?;
        debug!(store, phase = %UploadPhase::BytesUploaded);

        let object = self.commit(protocol, &session, &ticket)?;
        info!(
            store,
            phase = %UploadPhase::Committed,
            reference = object.reference.as_str(),
            "upload complete"
        );
        Ok(object)
    }

    fn acquire_token(&self, protocol: &dyn StoreProtocol, token: &str) -> VideoResult<UploadSession> {
        let store = protocol.label();
        let request = RpcRequest::post(UPLOAD_TOKEN_PATH, json!({ "scene": protocol.scene() }));
        let result = self
            .rpc
            .call(token, &request)
            .map_err(|err| VideoError::Token {
                store,
                message: format!("{err:#}"),
            })?;
        let field = |key: &str| {
            str_field(&result, key)
                .map(str::to_string)
                .ok_or_else(|| VideoError::Token {
                    store,
                    message: format!("response is missing {key}"),
                })
        };
        Ok(UploadSession {
            credential: Credential {
                access_key_id: field("access_key_id")?,
                secret_access_key: field("secret_access_key")?,
                session_token: Some(field("session_token")?),
            },
            space: protocol.space(&result, &self.config),
        })
    }

    fn signer(&self, protocol: &dyn StoreProtocol) -> RequestSigner {
        RequestSigner::new(self.config.region.clone(), protocol.signing_service())
    }

    fn browser_headers(&self, request: TransportRequest) -> TransportRequest {
        request
            .header("accept", "*/*")
            .header("origin", self.config.origin.clone())
            .header("referer", self.config.referer.clone())
            .header("user-agent", USER_AGENT)
    }

    fn apply(
        &self,
        protocol: &dyn StoreProtocol,
        session: &UploadSession,
        file_size: usize,
    ) -> VideoResult<UploadTicket> {
        let store = protocol.label();
        let denied = |status: Option<u16>, body: String| VideoError::Permission {
            store,
            status,
            body,
        };
        let url = format!(
            "{}/?{}",
            protocol.host(&self.config),
            protocol.apply_query(&session.space, file_size, &self.ids.nonce())
        );
        let amz_date = self.clock.amz_date();
        let signed = self.signer(protocol).sign(
            &SignableRequest {
                method: "GET",
                url: &url,
                amz_date: &amz_date,
                payload: None,
            },
            &session.credential,
        );
        let request = self
            .browser_headers(TransportRequest::get(url.clone()))
            .headers(signed.into_pairs());
        info!(store, %url, "applying for upload");

        let response = self
            .transport
            .send(&request)
            .map_err(|err| denied(None, format!("{err:#}")))?;
        if !response.is_success() {
            return Err(denied(Some(response.status), response.text()));
        }
        let body = response
            .json()
            .map_err(|err| denied(Some(response.status), format!("{err:#}: {}", response.text())))?;
        if let Some(error) = body.get("ResponseMetadata").and_then(|meta| meta.get("Error")) {
            return Err(denied(Some(response.status), error.to_string()));
        }
        protocol.parse_apply(&body).ok_or_else(|| {
            denied(
                Some(response.status),
                format!("no store or upload host in response: {body}"),
            )
        })
    }

    fn put_bytes(
        &self,
        protocol: &dyn StoreProtocol,
        ticket: &UploadTicket,
        bytes: &[u8],
    ) -> VideoResult<()> {
        let store = protocol.label();
        let failed = |status: Option<u16>, body: String| VideoError::UploadTransport {
            store,
            status,
            body,
        };
        let url = format!(
            "https://{}/upload/v1/{}",
            ticket.upload_host, ticket.store_uri
        );
        let crc32 = crc32_hex(bytes);
        let request = self
            .browser_headers(TransportRequest::post(url.clone(), bytes.to_vec()))
            .header("Authorization", ticket.auth.clone())
            .header("Content-CRC32", crc32.clone())
            .header("Content-Type", "application/octet-stream")
            .headers(protocol.upload_headers());
        info!(store, %url, %crc32, "uploading bytes");

        let response = self
            .transport
            .send(&request)
            .map_err(|err| failed(None, format!("{err:#}")))?;
        if !response.is_success() {
            return Err(failed(Some(response.status), response.text()));
        }
        protocol
            .check_upload(&response)
            .map_err(|message| failed(Some(response.status), message))
    }

    fn commit(
        &self,
        protocol: &dyn StoreProtocol,
        session: &UploadSession,
        ticket: &UploadTicket,
    ) -> VideoResult<CommittedObject> {
        let store = protocol.label();
        let failed = |status: Option<u16>, body: String| VideoError::Commit {
            store,
            status,
            body,
        };
        let url = format!(
            "{}/?{}",
            protocol.host(&self.config),
            protocol.commit_query(&session.space)
        );
        let payload = protocol.commit_body(&ticket).to_string();
        let amz_date = self.clock.amz_date();
        let signed = self.signer(protocol).sign(
            &SignableRequest {
                method: "POST",
                url: &url,
                amz_date: &amz_date,
                payload: Some(payload.as_bytes()),
            },
            &session.credential,
        );
        let request = self
            .browser_headers(TransportRequest::post(url.clone(), payload.into_bytes()))
            .header("content-type", "application/json")
            .headers(signed.into_pairs());
        info!(store, %url, "committing upload");

        let response = self
            .transport
            .send(&request)
            .map_err(|err| failed(None, format!("{err:#}")))?;
        if !response.is_success() {
            return Err(failed(Some(response.status), response.text()));
        }
        let body = response
            .json()
            .map_err(|err| failed(Some(response.status), format!("{err:#}: {}", response.text())))?;
        if let Some(error) = body.get("ResponseMetadata").and_then(|meta| meta.get("Error")) {
            return Err(failed(Some(response.status), error.to_string()));
        }
        let object = protocol
            .parse_commit(&body)
            .map_err(|message| failed(Some(response.status), message))?;
        if let (MaterialRef::Vid(vid), Some(granted)) = (&object.reference, ticket.vid.as_deref()) {
            if vid != granted {
                debug!(store, committed = %vid, granted, "commit returned a different vid");
            }
        }
        Ok(object)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::{StoreTransport, TokenRpc};
    use super::*;
    use crate::clock::testing::{CountingIds, ManualClock};

    const FRAME: ResolutionSpec = ResolutionSpec {
        width: 720,
        height: 1280,
    };

    fn coordinator(rpc: Arc<TokenRpc>, transport: Arc<StoreTransport>) -> UploadCoordinator {
        UploadCoordinator::new(
            ServiceConfig::default(),
            rpc,
            transport,
            Arc::new(ManualClock::new()),
            Arc::new(CountingIds::default()),
        )
    }

    #[test]
    fn image_upload_runs_all_four_phases() -> anyhow::Result<()> {
        let rpc = Arc::new(TokenRpc::default());
        let transport = Arc::new(StoreTransport::image_ok());
        let material = coordinator(rpc.clone(), transport.clone()).upload_material(
            "session",
            b"png-bytes",
            MaterialType::Image,
            "a.png",
            FRAME,
        )?;

        assert_eq!(material.reference, MaterialRef::Uri("tos-cn-i/abc".to_string()));
        assert_eq!((material.width, material.height), (720, 1280));

        let calls = rpc.calls.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].data, Some(json!({"scene": 2})));

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].url.starts_with(
            "https://imagex.bytedanceapi.com/?Action=ApplyImageUpload&Version=2018-08-01&ServiceId=svc-image&FileSize=9&s=nonce00001"
        ));
        assert!(requests[0]
            .header_value("authorization")
            .is_some_and(|auth| auth.contains("/cn-north-1/imagex/aws4_request")));
        assert_eq!(requests[0].header_value("x-amz-date"), Some("20240501T083000Z"));

        assert_eq!(requests[1].url, "https://tos-up.example.com/upload/v1/tos-cn-i/abc");
        assert_eq!(requests[1].header_value("Authorization"), Some("SpaceKey/xyz"));
        assert_eq!(
            requests[1].header_value("Content-CRC32"),
            Some(crc32_hex(b"png-bytes").as_str())
        );
        assert_eq!(requests[1].body, b"png-bytes".to_vec());

        let commit: Value = serde_json::from_slice(&requests[2].body)?;
        assert_eq!(commit["SessionKey"], "session-1");
        assert!(requests[2].header_value("x-amz-content-sha256").is_some());
        Ok(())
    }

    #[test]
    fn plugin_image_uri_is_preferred() -> anyhow::Result<()> {
        let mut transport = StoreTransport::image_ok();
        transport.commit = (
            200,
            json!({"Result": {
                "Results": [{"Uri": "tos-cn-i/raw", "UriStatus": 2000}],
                "PluginResult": [{"ImageUri": "tos-cn-i/processed"}],
            }}),
        );
        let object = coordinator(Arc::new(TokenRpc::default()), Arc::new(transport)).upload(
            &ImageStore,
            "session",
            b"x",
        )?;
        assert_eq!(object.reference, MaterialRef::Uri("tos-cn-i/processed".to_string()));
        Ok(())
    }

    #[test]
    fn missing_credentials_fail_with_token_error() {
        let rpc = Arc::new(TokenRpc {
            fail: true,
            ..TokenRpc::default()
        });
        let transport = Arc::new(StoreTransport::image_ok());
        let err = coordinator(rpc, transport.clone())
            .upload(&ImageStore, "session", b"x")
            .unwrap_err();
        assert!(matches!(err, VideoError::Token { store: "image", .. }));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn apply_service_error_is_a_permission_error() {
        let mut transport = StoreTransport::image_ok();
        transport.apply = (
            200,
            json!({"ResponseMetadata": {"Error": {"Code": "SignatureDoesNotMatch"}}}),
        );
        let err = coordinator(Arc::new(TokenRpc::default()), Arc::new(transport))
            .upload(&ImageStore, "session", b"x")
            .unwrap_err();
        match err {
            VideoError::Permission { status, body, .. } => {
                assert_eq!(status, Some(200));
                assert!(body.contains("SignatureDoesNotMatch"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn apply_without_hosts_is_a_permission_error() {
        let mut transport = StoreTransport::image_ok();
        transport.apply = (
            200,
            json!({"Result": {"UploadAddress": {"StoreInfos": [], "SessionKey": "s"}}}),
        );
        let err = coordinator(Arc::new(TokenRpc::default()), Arc::new(transport))
            .upload(&ImageStore, "session", b"x")
            .unwrap_err();
        assert!(matches!(err, VideoError::Permission { .. }));
    }

    #[test]
    fn non_success_put_is_a_transport_error() {
        let mut transport = StoreTransport::image_ok();
        transport.upload = (503, json!({"error": "busy"}));
        let transport = Arc::new(transport);
        let err = coordinator(Arc::new(TokenRpc::default()), transport.clone())
            .upload(&ImageStore, "session", b"x")
            .unwrap_err();
        assert!(matches!(
            err,
            VideoError::UploadTransport {
                status: Some(503),
                ..
            }
        ));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn media_put_requires_success_code_in_body() {
        let mut transport = StoreTransport::media_ok(json!({}));
        transport.upload = (200, json!({"code": 4001, "message": "crc mismatch"}));
        let err = coordinator(Arc::new(TokenRpc::default()), Arc::new(transport))
            .upload(&MediaStore, "session", b"x")
            .unwrap_err();
        match err {
            VideoError::UploadTransport { body, .. } => {
                assert_eq!(body, "code=4001, message=crc mismatch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn image_commit_requires_uri_status_2000() {
        let mut transport = StoreTransport::image_ok();
        transport.commit = (
            200,
            json!({"Result": {"Results": [{"Uri": "u", "UriStatus": 2001}]}}),
        );
        let err = coordinator(Arc::new(TokenRpc::default()), Arc::new(transport))
            .upload(&ImageStore, "session", b"x")
            .unwrap_err();
        match err {
            VideoError::Commit { body, .. } => assert_eq!(body, "UriStatus=2001"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn media_commit_requires_vid() {
        let mut transport = StoreTransport::media_ok(json!({}));
        transport.commit = (200, json!({"Result": {"Results": [{"VideoMeta": {}}]}}));
        let err = coordinator(Arc::new(TokenRpc::default()), Arc::new(transport))
            .upload(&MediaStore, "session", b"x")
            .unwrap_err();
        assert!(matches!(err, VideoError::Commit { store: "media", .. }));
    }

    #[test]
    fn video_upload_propagates_store_metadata() -> anyhow::Result<()> {
        let rpc = Arc::new(TokenRpc::default());
        let transport = Arc::new(StoreTransport::media_ok(
            json!({"Width": 1920, "Height": 1080, "Duration": 4.25, "Fps": 30}),
        ));
        let material = coordinator(rpc.clone(), transport.clone()).upload_material(
            "session",
            b"mp4",
            MaterialType::Video,
            "clip.mp4",
            FRAME,
        )?;
        assert_eq!(material.reference, MaterialRef::Vid("v0200abc".to_string()));
        assert_eq!((material.width, material.height), (1920, 1080));
        assert_eq!(material.duration_ms, 4250);
        assert_eq!(material.fps, 30);
        assert_eq!(material.name, "clip.mp4");

        let calls = rpc.calls.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(calls[0].data, Some(json!({"scene": 1})));
        let requests = transport.requests();
        assert!(requests[0].url.starts_with(
            "https://vod.bytedanceapi.com/?Action=ApplyUploadInner&Version=2020-11-19&SpaceName=space-media&FileType=video&IsInner=1&FileSize=3"
        ));
        assert!(requests[0]
            .header_value("authorization")
            .is_some_and(|auth| auth.contains("/cn-north-1/vod/aws4_request")));
        assert_eq!(requests[1].url, "https://vod-up.example.com/upload/v1/tos-vod/xyz");
        assert!(requests[2].url.contains("Action=CommitUploadInner"));
        Ok(())
    }

    #[test]
    fn audio_without_reported_duration_is_measured_locally() -> anyhow::Result<()> {
        let transport = Arc::new(StoreTransport::media_ok(json!({})));
        let bytes = vec![0u8; 32_000];
        let material = coordinator(Arc::new(TokenRpc::default()), transport).upload_material(
            "session",
            &bytes,
            MaterialType::Audio,
            "song.mp3",
            FRAME,
        )?;
        assert_eq!(material.kind, MaterialType::Audio);
        assert_eq!(material.duration_ms, 2000);
        Ok(())
    }

    #[test]
    fn download_returns_remote_bytes() -> anyhow::Result<()> {
        let transport = Arc::new(StoreTransport::image_ok());
        let bytes = coordinator(Arc::new(TokenRpc::default()), transport)
            .download("https://cdn.example.com/frame.png")?;
        assert_eq!(bytes, b"remote-bytes".to_vec());
        Ok(())
    }
}
