use std::env;
use std::time::Duration;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

/// Endpoints and client constants of the provider's web API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub api_base: String,
    pub imagex_host: String,
    pub vod_host: String,
    pub region: String,
    pub default_image_service_id: String,
    pub default_media_space: String,
    pub assistant_id: u64,
    pub web_id: String,
    pub web_version: String,
    pub reference_web_version: String,
    pub origin: String,
    pub referer: String,
    /// Upper bound for any single HTTP exchange.
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://jimeng.jianying.com".to_string(),
            imagex_host: "https://imagex.bytedanceapi.com".to_string(),
            vod_host: "https://vod.bytedanceapi.com".to_string(),
            region: "cn-north-1".to_string(),
            default_image_service_id: "tb4s082cfz".to_string(),
            default_media_space: "dreamina".to_string(),
            assistant_id: 513695,
            web_id: "7390432651247125010".to_string(),
            web_version: "6.6.0".to_string(),
            reference_web_version: "7.5.0".to_string(),
            origin: "https://jimeng.jianying.com".to_string(),
            referer: "https://jimeng.jianying.com/ai-tool/video/generate".to_string(),
            request_timeout: Duration::from_secs(90),
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with `JIMENG_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_base("JIMENG_API_BASE") {
            config.api_base = value;
        }
        if let Some(value) = env_base("JIMENG_IMAGEX_HOST") {
            config.imagex_host = value;
        }
        if let Some(value) = env_base("JIMENG_VOD_HOST") {
            config.vod_host = value;
        }
        if let Some(value) = non_empty_env("JIMENG_REGION") {
            config.region = value;
        }
        if let Some(secs) = non_empty_env("JIMENG_REQUEST_TIMEOUT")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
        {
            config.request_timeout = Duration::from_secs_f64(secs.clamp(5.0, 600.0));
        }
        config
    }
}

/// Timing of the history poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub warmup: Duration,
    pub max_attempts: u32,
    pub step: Duration,
    pub pending_factor_cap: u32,
    pub missing_cap: Duration,
    /// Attempts after which the secondary history lookup is tried on even attempts.
    pub alternate_after: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(5),
            max_attempts: 60,
            step: Duration::from_millis(2000),
            pending_factor_cap: 5,
            missing_cap: Duration::from_secs(30),
            alternate_after: 10,
        }
    }
}

impl PollPolicy {
    pub fn pending_delay(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1).min(self.pending_factor_cap)
    }

    pub fn missing_delay(&self, attempt: u32) -> Duration {
        (self.step * (attempt + 1)).min(self.missing_cap)
    }

    pub fn error_delay(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1)
    }

    pub fn use_alternate(&self, attempt: u32) -> bool {
        attempt > self.alternate_after && attempt % 2 == 0
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_base(key: &str) -> Option<String> {
    non_empty_env(key).map(|value| value.trim_end_matches('/').to_string())
}
