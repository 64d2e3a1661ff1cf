use indexmap::IndexMap;

pub const DEFAULT_MODEL: &str = "jimeng-video-3.0";
pub const DEFAULT_REFERENCE_BENEFIT_TYPE: &str = "dreamina_video_seedance_20_pro";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoModelSpec {
    pub name: String,
    pub req_key: String,
    pub draft_version: String,
    pub benefit_type: Option<String>,
}

impl VideoModelSpec {
    /// Models driven through the multi-material reference flow.
    pub fn is_reference(&self) -> bool {
        is_reference_model(&self.name)
    }
}

pub fn is_reference_model(name: &str) -> bool {
    name.starts_with("seedance-") || name.starts_with("jimeng-video-seedance-")
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, VideoModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, VideoModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&VideoModelSpec> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &VideoModelSpec> {
        self.models.values()
    }

    /// Request key for `name`, falling back to the default model's key.
    pub fn req_key(&self, name: &str) -> String {
        self.get(name)
            .or_else(|| self.get(DEFAULT_MODEL))
            .map(|model| model.req_key.clone())
            .unwrap_or_default()
    }

    pub fn draft_version(&self, name: &str, default_version: &str) -> String {
        self.get(name)
            .map(|model| model.draft_version.clone())
            .unwrap_or_else(|| default_version.to_string())
    }

    pub fn benefit_type(&self, name: &str) -> String {
        self.get(name)
            .and_then(|model| model.benefit_type.clone())
            .unwrap_or_else(|| DEFAULT_REFERENCE_BENEFIT_TYPE.to_string())
    }
}

fn default_models() -> IndexMap<String, VideoModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, req_key: &str, draft_version: &str, benefit: Option<&str>| {
        map.insert(
            name.to_string(),
            VideoModelSpec {
                name: name.to_string(),
                req_key: req_key.to_string(),
                draft_version: draft_version.to_string(),
                benefit_type: benefit.map(str::to_string),
            },
        );
    };

    insert(
        "jimeng-video-3.5-pro",
        "dreamina_ic_generate_video_model_vgfm_3.5_pro",
        "3.3.4",
        None,
    );
    insert(
        "jimeng-video-3.0-pro",
        "dreamina_ic_generate_video_model_vgfm_3.0_pro",
        "3.2.8",
        None,
    );
    insert(
        "jimeng-video-3.0",
        "dreamina_ic_generate_video_model_vgfm_3.0",
        "3.2.8",
        None,
    );
    insert(
        "jimeng-video-2.0",
        "dreamina_ic_generate_video_model_vgfm_lite",
        "3.2.8",
        None,
    );
    insert(
        "jimeng-video-2.0-pro",
        "dreamina_ic_generate_video_model_vgfm1.0",
        "3.2.8",
        None,
    );
    insert(
        "jimeng-video-seedance-2.0",
        "dreamina_seedance_40_pro",
        "3.3.9",
        Some("dreamina_video_seedance_20_pro"),
    );
    insert(
        "seedance-2.0",
        "dreamina_seedance_40_pro",
        "3.3.9",
        Some("dreamina_video_seedance_20_pro"),
    );
    insert(
        "seedance-2.0-pro",
        "dreamina_seedance_40_pro",
        "3.3.9",
        Some("dreamina_video_seedance_20_pro"),
    );
    // fast variants have no "video_" infix in their benefit type
    insert(
        "jimeng-video-seedance-2.0-fast",
        "dreamina_seedance_40",
        "3.3.9",
        Some("dreamina_seedance_20_fast"),
    );
    insert(
        "seedance-2.0-fast",
        "dreamina_seedance_40",
        "3.3.9",
        Some("dreamina_seedance_20_fast"),
    );

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_default_key_and_given_version() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.req_key("missing"),
            "dreamina_ic_generate_video_model_vgfm_3.0"
        );
        assert_eq!(registry.draft_version("missing", "3.2.8"), "3.2.8");
        assert_eq!(
            registry.benefit_type("missing"),
            DEFAULT_REFERENCE_BENEFIT_TYPE
        );
    }

    #[test]
    fn known_models_carry_their_draft_version() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.draft_version("jimeng-video-3.5-pro", "3.2.8"), "3.3.4");
        assert_eq!(registry.draft_version("seedance-2.0-fast", "3.2.8"), "3.3.9");
        assert_eq!(
            registry.benefit_type("seedance-2.0-fast"),
            "dreamina_seedance_20_fast"
        );
    }

    #[test]
    fn reference_models_are_detected_by_prefix() {
        let registry = ModelRegistry::default();
        assert!(registry
            .get("jimeng-video-seedance-2.0")
            .is_some_and(VideoModelSpec::is_reference));
        assert!(!is_reference_model("jimeng-video-3.0"));
        assert!(is_reference_model("seedance-9"));
    }
}
