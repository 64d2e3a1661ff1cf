use std::sync::Arc;

use jimeng_contracts::events::{EventWriter, GenerationEvent};
use jimeng_contracts::models::ModelRegistry;
use jimeng_contracts::{classify_file, classify_url, resolve_resolution, Material, MaterialType, ResolutionSpec};
use tracing::{error, info, warn};

use crate::clock::{Clock, IdSource, RandomIds, SystemClock};
use crate::config::{PollPolicy, ServiceConfig};
use crate::draft::{
    history_id_from_data, history_id_from_envelope, DraftEnv, DraftInput, FrameVideo,
    GenerationFlavor, ReferenceVideo, SubmitRoute,
};
use crate::error::{VideoError, VideoResult};
use crate::poller::GenerationJobPoller;
use crate::record_event;
use crate::rpc::{BrowserProxy, CreditService, RpcCaller, UploadTransport};
use crate::upload::UploadCoordinator;

/// One input to upload before generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFile {
    Bytes {
        bytes: Vec<u8>,
        filename: Option<String>,
        mime: Option<String>,
    },
    /// Remote file, downloaded before upload. Empty URLs are skipped.
    Url(String),
}

impl InputFile {
    pub fn label(&self) -> &str {
        match self {
            Self::Bytes { filename, .. } => filename.as_deref().unwrap_or("<bytes>"),
            Self::Url(url) => url,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Bytes { bytes, .. } => bytes.is_empty(),
            Self::Url(url) => url.trim().is_empty(),
        }
    }

    fn classify(&self) -> MaterialType {
        match self {
            Self::Bytes { filename, mime, .. } => classify_file(mime.as_deref(), filename.as_deref()),
            Self::Url(url) => classify_url(url),
        }
    }
}

/// Caller-facing parameters; unset fields take the flavour's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: Option<String>,
    pub prompt: String,
    pub ratio: Option<String>,
    pub resolution: Option<String>,
    pub duration_s: Option<u32>,
    pub files: Vec<InputFile>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// External services a generator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub rpc: Arc<dyn RpcCaller>,
    pub proxy: Arc<dyn BrowserProxy>,
    pub credit: Arc<dyn CreditService>,
    pub transport: Arc<dyn UploadTransport>,
}

/// Drives both public generate operations end to end.
pub struct VideoGenerator {
    config: ServiceConfig,
    policy: PollPolicy,
    registry: ModelRegistry,
    services: Collaborators,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    events: Option<EventWriter>,
}

impl VideoGenerator {
    pub fn new(config: ServiceConfig, services: Collaborators) -> Self {
        Self {
            config,
            policy: PollPolicy::default(),
            registry: ModelRegistry::default(),
            services,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>, ids: Arc<dyn IdSource>) -> Self {
        self.clock = clock;
        self.ids = ids;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Text or image-to-video. Up to two images fill the first and end frames.
    pub fn generate_video(&self, token: &str, request: &GenerateRequest) -> VideoResult<String> {
        self.generate(&FrameVideo, token, request)
    }

    /// Multi-material generation; the prompt may reference materials as `@1`, `@2`, ...
    pub fn generate_reference_video(
        &self,
        token: &str,
        request: &GenerateRequest,
    ) -> VideoResult<String> {
        self.generate(&ReferenceVideo, token, request)
    }

    fn generate(
        &self,
        flavor: &dyn GenerationFlavor,
        token: &str,
        request: &GenerateRequest,
    ) -> VideoResult<String> {
        let outcome = self.run(flavor, token, request);
        if let Err(err) = &outcome {
            error!(flavor = flavor.name(), history_id = ?err.history_id(), error = %err, "generation failed");
            record_event(
                self.events.as_ref(),
                GenerationEvent::GenerationFailed {
                    flavor: flavor.name().to_string(),
                    history_id: err.history_id().map(str::to_string),
                    error: err.to_string(),
                },
            );
        }
        outcome
    }

    fn run(
        &self,
        flavor: &dyn GenerationFlavor,
        token: &str,
        request: &GenerateRequest,
    ) -> VideoResult<String> {
        let defaults = flavor.defaults();
        let model = request.model.as_deref().unwrap_or(defaults.model);
        let ratio = request.ratio.as_deref().unwrap_or(defaults.ratio);
        let resolution = request.resolution.as_deref().unwrap_or(defaults.resolution);
        let duration_s = request.duration_s.filter(|secs| *secs > 0).unwrap_or(defaults.duration_s);

        let frame = resolve_resolution(resolution, ratio)?;
        info!(
            flavor = flavor.name(),
            model,
            req_key = %self.registry.req_key(model),
            width = frame.width,
            height = frame.height,
            ratio,
            resolution,
            duration_s,
            files = request.files.len(),
            "starting generation"
        );
        record_event(
            self.events.as_ref(),
            GenerationEvent::GenerationStarted {
                flavor: flavor.name().to_string(),
                model: model.to_string(),
                ratio: ratio.to_string(),
                resolution: resolution.to_string(),
                width: frame.width,
                height: frame.height,
                duration_s,
                files: request.files.len(),
            },
        );

        self.ensure_credit(token)?;

        let materials = self.upload_all(flavor, token, &request.files, frame)?;
        if materials.is_empty() && (flavor.requires_material() || !request.files.is_empty()) {
            return Err(VideoError::MissingFiles(if request.files.is_empty() {
                format!("{} generation needs at least one image, video or audio file", flavor.name())
            } else {
                format!("all {} input files failed to upload", request.files.len())
            }));
        }

        let route = flavor.build_submission(
            &DraftInput {
                model,
                prompt: &request.prompt,
                resolution,
                frame,
                duration_s,
                materials: &materials,
            },
            DraftEnv {
                config: &self.config,
                registry: &self.registry,
                clock: self.clock.as_ref(),
                ids: self.ids.as_ref(),
            },
        );
        let history_id = self.submit(token, &route)?;
        info!(flavor = flavor.name(), %history_id, materials = materials.len(), "job submitted");
        record_event(
            self.events.as_ref(),
            GenerationEvent::JobSubmitted {
                history_id: history_id.clone(),
                materials: materials.len(),
            },
        );

        let poller = GenerationJobPoller::new(
            self.services.rpc.clone(),
            self.clock.clone(),
            self.policy.clone(),
            self.events.clone(),
        );
        let url = poller.wait_for_video(token, &history_id)?;
        info!(%history_id, %url, "video ready");
        record_event(
            self.events.as_ref(),
            GenerationEvent::VideoReady {
                history_id,
                url: url.clone(),
            },
        );
        Ok(url)
    }

    fn ensure_credit(&self, token: &str) -> VideoResult<()> {
        let balance = self.services.credit.get_credit(token)?;
        let total = balance.total_credit();
        if total <= 0 {
            info!(total, "credit depleted, claiming daily credit");
            self.services.credit.replenish_credit(token)?;
        }
        Ok(())
    }

    fn coordinator(&self) -> UploadCoordinator {
        UploadCoordinator::new(
            self.config.clone(),
            self.services.rpc.clone(),
            self.services.transport.clone(),
            self.clock.clone(),
            self.ids.clone(),
        )
    }

    /// Sequential uploads. A failure of the first input aborts the call;
    /// later failures are skipped.
    fn upload_all(
        &self,
        flavor: &dyn GenerationFlavor,
        token: &str,
        files: &[InputFile],
        frame: ResolutionSpec,
    ) -> VideoResult<Vec<Material>> {
        let coordinator = self.coordinator();
        let mut materials = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            let position = index + 1;
            if file.is_blank() {
                warn!(position, "input file is empty, skipping");
                record_event(
                    self.events.as_ref(),
                    GenerationEvent::MaterialSkipped {
                        index,
                        reason: "empty input".to_string(),
                    },
                );
                continue;
            }

            let kind = flavor.upload_kind(file.classify());
            info!(position, kind = kind.as_str(), file = file.label(), "uploading input");
            match self.upload_one(&coordinator, token, file, kind, frame) {
                Ok(material) => {
                    info!(position, reference = material.reference.as_str(), "input uploaded");
                    record_event(
                        self.events.as_ref(),
                        GenerationEvent::MaterialUploaded {
                            index,
                            kind,
                            reference: material.reference.clone(),
                        },
                    );
                    materials.push(material);
                }
                Err(err) if index == 0 => {
                    error!(position, error = %err, "first input failed to upload, aborting");
                    return Err(err);
                }
                Err(err) => {
                    warn!(position, error = %err, "input failed to upload, skipping");
                    record_event(
                        self.events.as_ref(),
                        GenerationEvent::MaterialSkipped {
                            index,
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }
        info!(uploaded = materials.len(), requested = files.len(), "uploads finished");
        Ok(materials)
    }

    fn upload_one(
        &self,
        coordinator: &UploadCoordinator,
        token: &str,
        file: &InputFile,
        kind: MaterialType,
        frame: ResolutionSpec,
    ) -> VideoResult<Material> {
        match file {
            InputFile::Bytes {
                bytes, filename, ..
            } => coordinator.upload_material(
                token,
                bytes,
                kind,
                filename.as_deref().unwrap_or_default(),
                frame,
            ),
            InputFile::Url(url) => {
                let bytes = coordinator.download(url)?;
                coordinator.upload_material(token, &bytes, kind, "", frame)
            }
        }
    }

    fn submit(&self, token: &str, route: &SubmitRoute) -> VideoResult<String> {
        match route {
            SubmitRoute::Rpc(request) => {
                let data = self.services.rpc.call(token, request)?;
                history_id_from_data(&data)
            }
            SubmitRoute::Browser { url, request } => {
                let envelope = self.services.proxy.fetch(token, url, request)?;
                history_id_from_envelope(&envelope)
            }
        }
    }
}
