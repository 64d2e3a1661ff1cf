use std::sync::{Arc, OnceLock};

use jimeng_contracts::events::{EventWriter, GenerationEvent};
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::PollPolicy;
use crate::error::{VideoError, VideoResult, CONTENT_FILTERED_FAIL_CODE};
use crate::record_event;
use crate::rpc::{RpcCaller, RpcRequest};

pub const PENDING_STATUS: i64 = 20;
pub const FAILED_STATUS: i64 = 30;

const HISTORY_PATH: &str = "/mweb/v1/get_history_by_ids";
const HISTORY_RECORDS_PATH: &str = "/mweb/v1/get_history_records";
const LOCAL_ITEM_PATH: &str = "/mweb/v1/get_local_item_list";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Failed,
    /// Any status other than pending or failed.
    Succeeded,
}

impl JobStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            PENDING_STATUS => Self::Pending,
            FAILED_STATUS => Self::Failed,
            _ => Self::Succeeded,
        }
    }
}

/// One history record as returned by either lookup shape.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub status: i64,
    pub fail_code: Option<i64>,
    pub item_list: Vec<Value>,
}

impl HistoryRecord {
    fn from_value(value: &Value) -> Self {
        Self {
            status: value
                .get("status")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            fail_code: value.get("fail_code").and_then(lenient_i64),
            item_list: value
                .get("item_list")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

fn lenient_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

/// The three places a history lookup may put the record, in decode priority.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEnvelope {
    Records(HistoryRecord),
    List(HistoryRecord),
    Keyed(HistoryRecord),
}

impl HistoryEnvelope {
    pub fn record(&self) -> &HistoryRecord {
        match self {
            Self::Records(record) | Self::List(record) | Self::Keyed(record) => record,
        }
    }

    pub fn into_record(self) -> HistoryRecord {
        match self {
            Self::Records(record) | Self::List(record) | Self::Keyed(record) => record,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Records(_) => "history_records",
            Self::List(_) => "history_list",
            Self::Keyed(_) => "history_id",
        }
    }
}

/// Decode a lookup response. `None` means the record is not visible yet.
pub fn decode_history(body: &Value, history_id: &str) -> Option<HistoryEnvelope> {
    let first = |key: &str| {
        body.get(key)
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .filter(|row| row.is_object())
            .map(HistoryRecord::from_value)
    };
    if let Some(record) = first("history_records") {
        return Some(HistoryEnvelope::Records(record));
    }
    if let Some(record) = first("history_list") {
        return Some(HistoryEnvelope::List(record));
    }
    body.get(history_id)
        .filter(|value| value.is_object())
        .map(|value| HistoryEnvelope::Keyed(HistoryRecord::from_value(value)))
}

/// The job being tracked for one generate call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub history_id: String,
    pub status: i64,
    pub fail_code: Option<i64>,
    pub item_list: Vec<Value>,
}

impl GenerationJob {
    pub fn submitted(history_id: impl Into<String>) -> Self {
        Self {
            history_id: history_id.into(),
            status: PENDING_STATUS,
            fail_code: None,
            item_list: Vec::new(),
        }
    }

    pub fn state(&self) -> JobStatus {
        JobStatus::from_code(self.status)
    }

    fn refresh(&mut self, record: HistoryRecord) {
        self.status = record.status;
        self.fail_code = record.fail_code;
        self.item_list = record.item_list;
    }

    fn failure(&self) -> VideoError {
        if self.fail_code == Some(CONTENT_FILTERED_FAIL_CODE) {
            VideoError::ContentFiltered {
                history_id: self.history_id.clone(),
            }
        } else {
            VideoError::GenerationFailed {
                history_id: self.history_id.clone(),
                fail_code: self.fail_code,
            }
        }
    }

    /// Identifier of the first item, used for the high-quality lookup.
    pub fn item_id(&self) -> Option<String> {
        let item = self.item_list.first()?;
        ["item_id", "id", "local_item_id"]
            .iter()
            .filter_map(|key| item.get(*key))
            .chain(item.get("common_attr").and_then(|attr| attr.get("id")))
            .find_map(id_text)
    }

    /// Preview URL of the first item.
    pub fn preview_url(&self) -> Option<String> {
        let video = self.item_list.first()?.get("video")?;
        video
            .pointer("/transcoded_video/origin/video_url")
            .into_iter()
            .chain(["play_url", "download_url", "url"].iter().filter_map(|key| video.get(*key)))
            .find_map(non_empty_str)
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Secondary lookup for the full-quality download URL of a finished item.
pub struct HighQualityLookup {
    rpc: Arc<dyn RpcCaller>,
}

impl HighQualityLookup {
    pub fn new(rpc: Arc<dyn RpcCaller>) -> Self {
        Self { rpc }
    }

    /// Best-effort: any failure yields `None`.
    pub fn fetch(&self, token: &str, item_id: &str) -> Option<String> {
        let request = RpcRequest::post(
            LOCAL_ITEM_PATH,
            json!({
                "item_id_list": [item_id],
                "pack_item_opt": { "scene": 1, "need_data_integrity": true },
                "is_for_video_download": true,
            }),
        );
        match self.rpc.call(token, &request) {
            Ok(body) => extract_high_quality_url(&body),
            Err(err) => {
                warn!(item_id, error = %format!("{err:#}"), "high quality lookup failed");
                None
            }
        }
    }
}

fn cdn_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"https://v[0-9]+-dreamnia\.jimeng\.com/[^"\s\\]+"#,
            r#"https://v[0-9]+-[^"\\]*\.jimeng\.com/[^"\s\\]+"#,
            r#"https://v[0-9]+-[^"\\]*\.(vlabvod|jimeng)\.com/[^"\s\\]+"#,
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid cdn pattern"))
        .collect()
    })
}

/// Structured fields of the first item, then CDN URL scans of the raw body.
pub fn extract_high_quality_url(body: &Value) -> Option<String> {
    let item = ["item_list", "local_item_list"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_array))
        .find(|rows| !rows.is_empty())
        .and_then(|rows| rows.first());
    if let Some(video) = item.and_then(|item| item.get("video")) {
        let structured = video
            .pointer("/transcoded_video/origin/video_url")
            .into_iter()
            .chain(["download_url", "play_url", "url"].iter().filter_map(|key| video.get(*key)))
            .find_map(non_empty_str);
        if structured.is_some() {
            return structured;
        }
    }

    let raw = body.to_string();
    cdn_patterns()
        .iter()
        .find_map(|pattern| pattern.find(&raw))
        .map(|found| found.as_str().to_string())
}

/// Polls a submitted job until it reaches a terminal state.
pub struct GenerationJobPoller {
    rpc: Arc<dyn RpcCaller>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    events: Option<EventWriter>,
}

impl GenerationJobPoller {
    pub fn new(
        rpc: Arc<dyn RpcCaller>,
        clock: Arc<dyn Clock>,
        policy: PollPolicy,
        events: Option<EventWriter>,
    ) -> Self {
        Self {
            rpc,
            clock,
            policy,
            events,
        }
    }

    fn lookup(&self, history_id: &str, alternate: bool) -> RpcRequest {
        if alternate {
            RpcRequest::post(HISTORY_RECORDS_PATH, json!({ "history_record_ids": [history_id] }))
        } else {
            RpcRequest::post(HISTORY_PATH, json!({ "history_ids": [history_id] }))
        }
    }

    /// Poll until the job succeeds; failures and the retry budget are errors.
    pub fn poll(&self, token: &str, history_id: &str) -> VideoResult<GenerationJob> {
        let mut job = GenerationJob::submitted(history_id);
        let max_attempts = self.policy.max_attempts;
        self.clock.sleep(self.policy.warmup);
        info!(history_id, max_attempts, "polling generation result");

        let mut attempt = 0u32;
        while attempt < max_attempts {
            let alternate = self.policy.use_alternate(attempt);
            let request = self.lookup(history_id, alternate);
            let body = match self.rpc.call(token, &request) {
                Ok(body) => body,
                Err(err) => {
                    attempt += 1;
                    warn!(history_id, attempt, error = %format!("{err:#}"), "history lookup failed");
                    self.clock.sleep(self.policy.error_delay(attempt));
                    continue;
                }
            };

            let Some(envelope) = decode_history(&body, history_id) else {
                attempt += 1;
                warn!(history_id, attempt, max_attempts, alternate, "history record not visible yet");
                self.clock.sleep(self.policy.missing_delay(attempt));
                continue;
            };
            let shape = envelope.shape();
            job.refresh(envelope.into_record());
            info!(
                history_id,
                attempt,
                shape,
                status = job.status,
                fail_code = ?job.fail_code,
                items = job.item_list.len(),
                "history polled"
            );
            record_event(
                self.events.as_ref(),
                GenerationEvent::JobPolled {
                    history_id: history_id.to_string(),
                    attempt: attempt + 1,
                    status: job.status,
                    fail_code: job.fail_code,
                },
            );

            match job.state() {
                JobStatus::Failed => return Err(job.failure()),
                JobStatus::Succeeded => return Ok(job),
                JobStatus::Pending => {
                    self.clock.sleep(self.policy.pending_delay(attempt));
                    attempt += 1;
                }
            }
        }

        warn!(history_id, attempts = attempt, "generation timed out");
        Err(VideoError::PollingTimeout {
            history_id: history_id.to_string(),
            attempts: attempt,
        })
    }

    /// High-quality URL when available, else the first populated preview URL.
    pub fn resolve_video_url(&self, token: &str, job: &GenerationJob) -> VideoResult<String> {
        match job.item_id() {
            Some(item_id) => {
                if let Some(url) = HighQualityLookup::new(self.rpc.clone()).fetch(token, &item_id) {
                    info!(history_id = %job.history_id, %url, "resolved high quality video url");
                    return Ok(url);
                }
            }
            None => warn!(history_id = %job.history_id, "first item has no id, using preview url"),
        }
        job.preview_url().ok_or_else(|| VideoError::ResultExtraction {
            history_id: job.history_id.clone(),
        })
    }

    pub fn wait_for_video(&self, token: &str, history_id: &str) -> VideoResult<String> {
        let job = self.poll(token, history_id)?;
        self.resolve_video_url(token, &job)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;

    use super::*;
    use crate::clock::testing::ManualClock;

    /// Replays scripted responses; repeats the last one when exhausted.
    struct ScriptedRpc {
        replies: Mutex<VecDeque<anyhow::Result<Value>>>,
        fallback: Value,
        paths: Mutex<Vec<String>>,
    }

    impl ScriptedRpc {
        fn new(replies: Vec<anyhow::Result<Value>>, fallback: Value) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback,
                paths: Mutex::new(Vec::new()),
            })
        }

        fn paths(&self) -> Vec<String> {
            self.paths.lock().map(|rows| rows.clone()).unwrap_or_default()
        }
    }

    impl RpcCaller for ScriptedRpc {
        fn call(&self, _token: &str, request: &RpcRequest) -> anyhow::Result<Value> {
            if let Ok(mut paths) = self.paths.lock() {
                paths.push(request.path.clone());
            }
            if request.path == LOCAL_ITEM_PATH {
                return Err(anyhow!("no local items"));
            }
            let next = self.replies.lock().ok().and_then(|mut rows| rows.pop_front());
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn poller(rpc: Arc<ScriptedRpc>, clock: Arc<ManualClock>) -> GenerationJobPoller {
        GenerationJobPoller::new(rpc, clock, PollPolicy::default(), None)
    }

    fn keyed(status: i64, extra: Value) -> Value {
        let mut record = json!({ "status": status });
        if let (Some(record), Some(extra)) = (record.as_object_mut(), extra.as_object()) {
            record.extend(extra.clone());
        }
        json!({ "h1": record })
    }

    #[test]
    fn always_pending_times_out_after_budget() {
        let rpc = ScriptedRpc::new(Vec::new(), keyed(20, json!({})));
        let clock = Arc::new(ManualClock::new());
        let err = poller(rpc.clone(), clock.clone()).poll("t", "h1").unwrap_err();

        assert!(matches!(
            err,
            VideoError::PollingTimeout { ref history_id, attempts: 60 } if history_id == "h1"
        ));
        assert_eq!(rpc.paths().len(), 60);
        let sleeps = clock.sleeps();
        assert_eq!(sleeps[0], Duration::from_secs(5));
        assert_eq!(sleeps[1], Duration::from_secs(2));
        assert_eq!(sleeps[5], Duration::from_secs(10));
        assert_eq!(sleeps[6], Duration::from_secs(10));
    }

    #[test]
    fn alternate_lookup_used_on_even_attempts_after_ten() {
        let rpc = ScriptedRpc::new(Vec::new(), json!({}));
        let _ = poller(rpc.clone(), Arc::new(ManualClock::new())).poll("t", "h1");
        let paths = rpc.paths();
        assert_eq!(paths.len(), 60);
        assert!(paths[..11].iter().all(|path| path == HISTORY_PATH));
        assert_eq!(paths[11], HISTORY_PATH);
        assert_eq!(paths[12], HISTORY_RECORDS_PATH);
        assert_eq!(paths[13], HISTORY_PATH);
    }

    #[test]
    fn missing_data_backs_off_with_cap() {
        let rpc = ScriptedRpc::new(Vec::new(), json!({}));
        let clock = Arc::new(ManualClock::new());
        let _ = poller(rpc, clock.clone()).poll("t", "h1");
        let sleeps = clock.sleeps();
        assert_eq!(sleeps[1], Duration::from_secs(4));
        assert_eq!(sleeps[2], Duration::from_secs(6));
        assert_eq!(sleeps.last().copied(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rpc_errors_are_retried() -> anyhow::Result<()> {
        let rpc = ScriptedRpc::new(
            vec![Err(anyhow!("gateway timeout"))],
            keyed(50, json!({"item_list": [{"video": {"play_url": "https://cdn/p.mp4"}}]})),
        );
        let clock = Arc::new(ManualClock::new());
        let job = poller(rpc, clock.clone()).poll("t", "h1")?;
        assert_eq!(job.state(), JobStatus::Succeeded);
        assert_eq!(clock.sleeps()[1], Duration::from_secs(4));
        Ok(())
    }

    #[test]
    fn content_filter_code_is_classified() {
        let rpc = ScriptedRpc::new(Vec::new(), keyed(30, json!({"fail_code": 2038})));
        let err = poller(rpc, Arc::new(ManualClock::new())).poll("t", "h1").unwrap_err();
        assert!(matches!(err, VideoError::ContentFiltered { .. }));
        assert_eq!(err.history_id(), Some("h1"));
    }

    #[test]
    fn other_fail_codes_are_generation_failures() {
        let rpc = ScriptedRpc::new(
            vec![Ok(keyed(20, json!({})))],
            keyed(30, json!({"fail_code": "1180"})),
        );
        let err = poller(rpc.clone(), Arc::new(ManualClock::new()))
            .poll("t", "h1")
            .unwrap_err();
        assert!(matches!(
            err,
            VideoError::GenerationFailed {
                fail_code: Some(1180),
                ..
            }
        ));
        assert_eq!(err.history_id(), Some("h1"));
        assert_eq!(rpc.paths().len(), 2);
    }

    #[test]
    fn decodes_each_envelope_shape_in_priority() {
        let record = json!({"status": 50, "item_list": [{"id": 7}]});
        assert!(matches!(
            decode_history(&json!({"history_records": [record.clone()], "history_list": [{"status": 20}]}), "h"),
            Some(HistoryEnvelope::Records(_))
        ));
        assert!(matches!(
            decode_history(&json!({"history_list": [record.clone()], "h": {"status": 20}}), "h"),
            Some(HistoryEnvelope::List(_))
        ));
        let keyed = decode_history(&json!({"history_list": [], "h": record}), "h");
        assert!(matches!(keyed, Some(HistoryEnvelope::Keyed(_))));
        assert_eq!(keyed.map(|envelope| envelope.record().status), Some(50));
        assert_eq!(decode_history(&json!({"history_list": []}), "h"), None);
    }

    #[test]
    fn result_falls_back_to_preview_url() -> anyhow::Result<()> {
        let rpc = ScriptedRpc::new(
            Vec::new(),
            keyed(
                50,
                json!({"item_list": [{
                    "item_id": "77",
                    "video": {
                        "play_url": "https://cdn/play.mp4",
                        "transcoded_video": {"origin": {"video_url": "https://cdn/origin.mp4"}},
                    }
                }]}),
            ),
        );
        let url = poller(rpc.clone(), Arc::new(ManualClock::new())).wait_for_video("t", "h1")?;
        assert_eq!(url, "https://cdn/origin.mp4");
        assert_eq!(rpc.paths().last().map(String::as_str), Some(LOCAL_ITEM_PATH));
        Ok(())
    }

    #[test]
    fn success_without_urls_is_an_extraction_error() {
        let rpc = ScriptedRpc::new(Vec::new(), keyed(50, json!({"item_list": [{"video": {}}]})));
        let err = poller(rpc, Arc::new(ManualClock::new()))
            .wait_for_video("t", "h1")
            .unwrap_err();
        assert!(matches!(err, VideoError::ResultExtraction { .. }));
        assert_eq!(err.history_id(), Some("h1"));
    }

    #[test]
    fn item_id_is_read_from_fallback_fields() {
        let mut job = GenerationJob::submitted("h");
        job.item_list = vec![json!({"common_attr": {"id": 9_001}})];
        assert_eq!(job.item_id().as_deref(), Some("9001"));
        job.item_list = vec![json!({"local_item_id": "abc", "common_attr": {"id": 1}})];
        assert_eq!(job.item_id().as_deref(), Some("abc"));
    }

    #[test]
    fn high_quality_url_prefers_structured_fields_then_cdn_scan() {
        let structured = json!({"local_item_list": [{"video": {
            "download_url": "https://v9-x.jimeng.com/dl",
            "play_url": "https://v9-x.jimeng.com/play",
        }}]});
        assert_eq!(
            extract_high_quality_url(&structured).as_deref(),
            Some("https://v9-x.jimeng.com/dl")
        );

        let scanned = json!({"blob": {
            "a": "https://v3-web.jimeng.com/plain",
            "b": "https://v26-dreamnia.jimeng.com/hq/video.mp4?x=1",
        }});
        assert_eq!(
            extract_high_quality_url(&scanned).as_deref(),
            Some("https://v26-dreamnia.jimeng.com/hq/video.mp4?x=1")
        );

        let vod = json!({"x": "https://v5-abc.vlabvod.com/video/1"});
        assert_eq!(
            extract_high_quality_url(&vod).as_deref(),
            Some("https://v5-abc.vlabvod.com/video/1")
        );
        assert_eq!(extract_high_quality_url(&json!({"item_list": []})), None);
    }
}
