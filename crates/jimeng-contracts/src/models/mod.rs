mod registry;

pub use registry::{
    is_reference_model, ModelRegistry, VideoModelSpec, DEFAULT_MODEL,
    DEFAULT_REFERENCE_BENEFIT_TYPE,
};
