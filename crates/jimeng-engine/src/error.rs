use jimeng_contracts::ResolutionError;
use thiserror::Error;

/// Fail code the provider reports for policy-filtered generations.
pub const CONTENT_FILTERED_FAIL_CODE: i64 = 2038;

/// Everything a generate call can fail with.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{store} upload token unavailable: {message}")]
    Token { store: &'static str, message: String },

    #[error("{store} upload permission denied{}: {body}", status_suffix(.status))]
    Permission {
        store: &'static str,
        status: Option<u16>,
        body: String,
    },

    #[error("{store} byte upload failed{}: {body}", status_suffix(.status))]
    UploadTransport {
        store: &'static str,
        status: Option<u16>,
        body: String,
    },

    #[error("{store} upload commit failed{}: {body}", status_suffix(.status))]
    Commit {
        store: &'static str,
        status: Option<u16>,
        body: String,
    },

    #[error("no usable input files: {0}")]
    MissingFiles(String),

    #[error("job submission rejected: {0}")]
    Submission(String),

    #[error("insufficient credit to generate video: {0}")]
    InsufficientCredit(String),

    #[error("generation {history_id} was blocked by the content filter")]
    ContentFiltered { history_id: String },

    #[error("generation {history_id} failed with code {}", fail_code_text(.fail_code))]
    GenerationFailed {
        history_id: String,
        fail_code: Option<i64>,
    },

    #[error("generation {history_id} still pending after {attempts} polls")]
    PollingTimeout { history_id: String, attempts: u32 },

    #[error("generation {history_id} finished without a video url")]
    ResultExtraction { history_id: String },

    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

fn fail_code_text(fail_code: &Option<i64>) -> String {
    fail_code.map_or_else(|| "unknown".to_string(), |code| code.to_string())
}

impl VideoError {
    /// The provider history record the error refers to, if the job was submitted.
    pub fn history_id(&self) -> Option<&str> {
        match self {
            Self::ContentFiltered { history_id }
            | Self::GenerationFailed { history_id, .. }
            | Self::PollingTimeout { history_id, .. }
            | Self::ResultExtraction { history_id } => Some(history_id),
            _ => None,
        }
    }

    pub fn is_upload_failure(&self) -> bool {
        matches!(
            self,
            Self::Token { .. }
                | Self::Permission { .. }
                | Self::UploadTransport { .. }
                | Self::Commit { .. }
        )
    }
}

impl From<ResolutionError> for VideoError {
    fn from(err: ResolutionError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type VideoResult<T> = std::result::Result<T, VideoError>;
