pub mod events;
pub mod materials;
pub mod models;
pub mod prompt;
pub mod resolution;

pub use events::{EventWriter, GenerationEvent};
pub use materials::{classify_file, classify_url, Material, MaterialRef, MaterialType};
pub use prompt::{parse_prompt_references, MetaListEntry};
pub use resolution::{aspect_ratio, resolve_resolution, ResolutionError, ResolutionSpec};
