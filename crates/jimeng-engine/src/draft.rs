//! Job submission payloads.
//!
//! A [`GenerationFlavor`] decides how inputs are uploaded and how the
//! uploaded materials are embedded into the provider's draft document.
//! [`FrameVideo`] places images into first/end frame slots; [`ReferenceVideo`]
//! sends a mixed material list plus a meta list parsed from the prompt.

use jimeng_contracts::models::{ModelRegistry, DEFAULT_MODEL};
use jimeng_contracts::{
    parse_prompt_references, Material, MaterialType, MetaListEntry, ResolutionSpec,
};
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::clock::{Clock, IdSource};
use crate::config::ServiceConfig;
use crate::error::{VideoError, VideoResult};
use crate::rpc::{HttpMethod, ProxyRequest, RpcRequest};

pub const GENERATE_PATH: &str = "/mweb/v1/aigc_draft/generate";
pub const DEFAULT_REFERENCE_MODEL: &str = "jimeng-video-seedance-2.0";
const FRAME_DRAFT_VERSION: &str = "3.2.8";
const REFERENCE_DRAFT_VERSION: &str = "3.3.9";
const FRAME_BENEFIT_TYPE: &str = "basic_video_operation_vgfm_v_three";
const AIGC_FEATURES: &str = "app_lip_sync";
const INSUFFICIENT_CREDIT_RET: i64 = 5000;
const FPS: u32 = 24;
const VIDEO_MODE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDefaults {
    pub model: &'static str,
    pub ratio: &'static str,
    pub resolution: &'static str,
    pub duration_s: u32,
}

/// Resolved inputs of one generate call.
#[derive(Debug, Clone)]
pub struct DraftInput<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub resolution: &'a str,
    pub frame: ResolutionSpec,
    pub duration_s: u32,
    pub materials: &'a [Material],
}

/// Shared services needed to build a draft.
#[derive(Clone, Copy)]
pub struct DraftEnv<'a> {
    pub config: &'a ServiceConfig,
    pub registry: &'a ModelRegistry,
    pub clock: &'a dyn Clock,
    pub ids: &'a dyn IdSource,
}

/// Where a built submission is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitRoute {
    /// Through the RPC caller, which unwraps the response envelope.
    Rpc(RpcRequest),
    /// Through the browser proxy; the raw envelope comes back.
    Browser { url: String, request: ProxyRequest },
}

pub trait GenerationFlavor: Send + Sync {
    fn name(&self) -> &'static str;
    fn defaults(&self) -> RequestDefaults;
    /// Whether a call without any uploaded material is rejected.
    fn requires_material(&self) -> bool;
    /// Store kind used for an input classified as `classified`.
    fn upload_kind(&self, classified: MaterialType) -> MaterialType;
    fn build_submission(&self, input: &DraftInput<'_>, env: DraftEnv<'_>) -> SubmitRoute;
}

fn commerce_info(benefit_type: &str) -> Value {
    json!({
        "benefit_type": benefit_type,
        "resource_id": "generate_video",
        "resource_id_type": "str",
        "resource_sub_type": "aigc",
    })
}

fn extend(root_model: &str, benefit_type: &str) -> Value {
    json!({
        "root_model": root_model,
        "m_video_commerce_info": commerce_info(benefit_type),
        "m_video_commerce_info_list": [commerce_info(benefit_type)],
    })
}

/// Image-to-video with optional first and end frames; text-only is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameVideo;

impl FrameVideo {
    fn frame_image(material: &Material, frame: ResolutionSpec, ids: &dyn IdSource) -> Value {
        let uri = material.reference.as_str();
        json!({
            "format": "",
            "height": frame.height,
            "id": ids.uuid(),
            "image_uri": uri,
            "name": "",
            "platform_type": 1,
            "source_from": "upload",
            "type": "image",
            "uri": uri,
            "width": frame.width,
        })
    }
}

impl GenerationFlavor for FrameVideo {
    fn name(&self) -> &'static str {
        "frame"
    }

    fn defaults(&self) -> RequestDefaults {
        RequestDefaults {
            model: DEFAULT_MODEL,
            ratio: "1:1",
            resolution: "720p",
            duration_s: 5,
        }
    }

    fn requires_material(&self) -> bool {
        false
    }

    fn upload_kind(&self, _classified: MaterialType) -> MaterialType {
        MaterialType::Image
    }

    fn build_submission(&self, input: &DraftInput<'_>, env: DraftEnv<'_>) -> SubmitRoute {
        let ids = env.ids;
        let req_key = env.registry.req_key(input.model);
        let draft_version = env.registry.draft_version(input.model, FRAME_DRAFT_VERSION);

        let first_frame = input
            .materials
            .first()
            .map(|material| Self::frame_image(material, input.frame, ids));
        let end_frame = input
            .materials
            .get(1)
            .map(|material| Self::frame_image(material, input.frame, ids));
        // end frames are only honoured by the 3.0 model
        let root_model = if end_frame.is_some() {
            env.registry.req_key(DEFAULT_MODEL)
        } else {
            req_key.clone()
        };

        let metrics_extra = json!({
            "enterFrom": "click",
            "isDefaultSeed": 1,
            "promptSource": "custom",
            "isRegenerate": false,
            "originSubmitId": ids.uuid(),
        })
        .to_string();

        let mut gen_input = json!({
            "duration_ms": u64::from(input.duration_s) * 1000,
            "fps": FPS,
            "id": ids.uuid(),
            "min_version": "3.0.5",
            "prompt": input.prompt,
            "resolution": input.resolution,
            "type": "",
            "video_mode": VIDEO_MODE,
        });
        if let Some(slots) = gen_input.as_object_mut() {
            if let Some(image) = first_frame {
                slots.insert("first_frame_image".to_string(), image);
            }
            if let Some(image) = end_frame {
                slots.insert("end_frame_image".to_string(), image);
            }
        }

        let component_id = ids.uuid();
        let draft = json!({
            "type": "draft",
            "id": ids.uuid(),
            "min_version": "3.0.5",
            "is_from_tsn": true,
            "version": draft_version,
            "main_component_id": component_id,
            "component_list": [{
                "type": "video_base_component",
                "id": component_id,
                "min_version": "1.0.0",
                "metadata": {
                    "type": "",
                    "id": ids.uuid(),
                    "created_platform": 3,
                    "created_platform_version": "",
                    "created_time_in_ms": env.clock.now_millis(),
                    "created_did": "",
                },
                "generate_type": "gen_video",
                "aigc_mode": "workbench",
                "abilities": {
                    "type": "",
                    "id": ids.uuid(),
                    "gen_video": {
                        "id": ids.uuid(),
                        "type": "",
                        "text_to_video_params": {
                            "type": "",
                            "id": ids.uuid(),
                            "model_req_key": req_key,
                            "priority": 0,
                            "seed": ids.seed(2_500_000_000, 100_000_000),
                            "video_aspect_ratio": input.frame.aspect_ratio(),
                            "video_gen_inputs": [gen_input],
                        },
                        "video_task_extra": metrics_extra,
                    },
                },
            }],
        });

        let body = json!({
            "extend": extend(&root_model, FRAME_BENEFIT_TYPE),
            "submit_id": ids.uuid(),
            "metrics_extra": metrics_extra,
            "draft_content": draft.to_string(),
            "http_common_info": { "aid": env.config.assistant_id },
        });
        SubmitRoute::Rpc(
            RpcRequest::post(GENERATE_PATH, body)
                .with_param("aigc_features", AIGC_FEATURES)
                .with_param("web_version", env.config.web_version.clone())
                .with_param("da_version", draft_version),
        )
    }
}

/// Multi-material generation driven by prompt placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceVideo;

impl ReferenceVideo {
    /// Distinct material type codes in first-seen order.
    pub fn material_type_codes(materials: &[Material]) -> Vec<u8> {
        let mut codes = Vec::new();
        for material in materials {
            let code = material.kind.code();
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }

    pub fn benefit_type(registry: &ModelRegistry, model: &str, materials: &[Material]) -> String {
        let base = registry.benefit_type(model);
        if materials.iter().any(|material| material.kind == MaterialType::Video) {
            format!("{base}_with_video")
        } else {
            base
        }
    }

    fn generate_url(config: &ServiceConfig, draft_version: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("aid", &config.assistant_id.to_string())
            .append_pair("device_platform", "web")
            .append_pair("region", "cn")
            .append_pair("webId", &config.web_id)
            .append_pair("da_version", draft_version)
            .append_pair("web_component_open_flag", "1")
            .append_pair("web_version", &config.reference_web_version)
            .append_pair("aigc_features", AIGC_FEATURES)
            .finish();
        format!("{}{GENERATE_PATH}?{query}", config.api_base)
    }
}

impl GenerationFlavor for ReferenceVideo {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn defaults(&self) -> RequestDefaults {
        RequestDefaults {
            model: DEFAULT_REFERENCE_MODEL,
            ratio: "4:3",
            resolution: "720p",
            duration_s: 4,
        }
    }

    fn requires_material(&self) -> bool {
        true
    }

    fn upload_kind(&self, classified: MaterialType) -> MaterialType {
        classified
    }

    fn build_submission(&self, input: &DraftInput<'_>, env: DraftEnv<'_>) -> SubmitRoute {
        let ids = env.ids;
        let req_key = env.registry.req_key(input.model);
        let draft_version = env.registry.draft_version(input.model, REFERENCE_DRAFT_VERSION);
        let benefit_type = Self::benefit_type(env.registry, input.model, input.materials);

        let material_list: Vec<Value> = input
            .materials
            .iter()
            .map(|material| material.to_material_entry(|| ids.uuid()))
            .collect();
        let kinds: Vec<MaterialType> = input.materials.iter().map(|material| material.kind).collect();
        let meta_list: Vec<Value> = parse_prompt_references(input.prompt, &kinds)
            .iter()
            .map(MetaListEntry::to_value)
            .collect();

        let submit_id = ids.uuid();
        let scene_options = json!([{
            "type": "video",
            "scene": "BasicVideoGenerateButton",
            "modelReqKey": req_key,
            "videoDuration": input.duration_s,
            "reportParams": {
                "enterSource": "generate",
                "vipSource": "generate",
                "extraVipFunctionKey": req_key,
                "useVipFunctionDetailsReporterHoc": true,
            },
            "materialTypes": Self::material_type_codes(input.materials),
        }]);
        let metrics_extra = json!({
            "isDefaultSeed": 1,
            "originSubmitId": submit_id,
            "isRegenerate": false,
            "enterFrom": "click",
            "position": "page_bottom_box",
            "functionMode": "omni_reference",
            "sceneOptions": scene_options.to_string(),
        })
        .to_string();

        let component_id = ids.uuid();
        let draft = json!({
            "type": "draft",
            "id": ids.uuid(),
            "min_version": draft_version,
            "min_features": ["AIGC_Video_UnifiedEdit"],
            "is_from_tsn": true,
            "version": draft_version,
            "main_component_id": component_id,
            "component_list": [{
                "type": "video_base_component",
                "id": component_id,
                "min_version": "1.0.0",
                "aigc_mode": "workbench",
                "metadata": {
                    "type": "",
                    "id": ids.uuid(),
                    "created_platform": 3,
                    "created_platform_version": "",
                    "created_time_in_ms": env.clock.now_millis().to_string(),
                    "created_did": "",
                },
                "generate_type": "gen_video",
                "abilities": {
                    "type": "",
                    "id": ids.uuid(),
                    "gen_video": {
                        "type": "",
                        "id": ids.uuid(),
                        "text_to_video_params": {
                            "type": "",
                            "id": ids.uuid(),
                            "video_gen_inputs": [{
                                "type": "",
                                "id": ids.uuid(),
                                "min_version": draft_version,
                                "prompt": "",
                                "video_mode": VIDEO_MODE,
                                "fps": FPS,
                                "duration_ms": u64::from(input.duration_s) * 1000,
                                "idip_meta_list": [],
                                "unified_edit_input": {
                                    "type": "",
                                    "id": ids.uuid(),
                                    "material_list": material_list,
                                    "meta_list": meta_list,
                                },
                            }],
                            "video_aspect_ratio": input.frame.aspect_ratio(),
                            "seed": ids.seed(0, 1_000_000_000),
                            "model_req_key": req_key,
                            "priority": 0,
                        },
                        "video_task_extra": metrics_extra,
                    },
                },
                "process_type": 1,
            }],
        });

        let body = json!({
            "extend": extend(&req_key, &benefit_type),
            "submit_id": submit_id,
            "metrics_extra": metrics_extra,
            "draft_content": draft.to_string(),
            "http_common_info": { "aid": env.config.assistant_id },
        });
        SubmitRoute::Browser {
            url: Self::generate_url(env.config, &draft_version),
            request: ProxyRequest {
                method: HttpMethod::Post,
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body: body.to_string(),
            },
        }
    }
}

fn history_record_id(aigc_data: Option<&Value>) -> VideoResult<String> {
    let id = aigc_data
        .and_then(|data| data.get("history_record_id"))
        .and_then(|value| match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        });
    id.ok_or_else(|| VideoError::Submission("response has no history_record_id".to_string()))
}

/// History id from an already-unwrapped RPC `data` payload.
pub fn history_id_from_data(data: &Value) -> VideoResult<String> {
    history_record_id(data.get("aigc_data"))
}

/// History id from a raw `{ret, errmsg, data}` envelope.
pub fn history_id_from_envelope(envelope: &Value) -> VideoResult<String> {
    let ret = envelope.get("ret").and_then(|value| {
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
    });
    if let Some(ret) = ret.filter(|code| *code != 0) {
        let errmsg = envelope
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if ret == INSUFFICIENT_CREDIT_RET {
            return Err(VideoError::InsufficientCredit(errmsg));
        }
        return Err(VideoError::Submission(format!("ret={ret}: {errmsg}")));
    }
    let aigc_data = envelope
        .get("data")
        .and_then(|data| data.get("aigc_data"))
        .or_else(|| envelope.get("aigc_data"));
    history_record_id(aigc_data)
}
