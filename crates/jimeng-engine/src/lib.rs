pub mod checksum;
pub mod clock;
pub mod config;
pub mod draft;
pub mod error;
pub mod generator;
pub mod http;
pub mod poller;
pub mod rpc;
pub mod signer;
pub mod upload;

use jimeng_contracts::events::{EventWriter, GenerationEvent};
use tracing::warn;

pub use config::{PollPolicy, ServiceConfig};
pub use error::{VideoError, VideoResult};
pub use generator::{Collaborators, GenerateRequest, InputFile, VideoGenerator};
pub use http::{DirectBrowserProxy, HttpCreditService, HttpRpcCaller, HttpUploadTransport};

/// Best-effort append to the event log; a failed write never aborts a generation.
pub(crate) fn record_event(events: Option<&EventWriter>, event: GenerationEvent) {
    let Some(events) = events else {
        return;
    };
    if let Err(err) = events.record(&event) {
        warn!(error = %format!("{err:#}"), ?event, "could not write event log");
    }
}
