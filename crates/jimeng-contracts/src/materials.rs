use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

/// Semantic kind of an uploaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialType {
    Image,
    Video,
    Audio,
}

impl MaterialType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Numeric code used in `sceneOptions.materialTypes`.
    pub fn code(self) -> u8 {
        match self {
            Self::Image => 1,
            Self::Video => 2,
            Self::Audio => 3,
        }
    }
}

const MIME_TABLE: &[(&str, MaterialType)] = &[
    ("image/jpeg", MaterialType::Image),
    ("image/png", MaterialType::Image),
    ("image/webp", MaterialType::Image),
    ("image/gif", MaterialType::Image),
    ("image/bmp", MaterialType::Image),
    ("video/mp4", MaterialType::Video),
    ("video/quicktime", MaterialType::Video),
    ("video/x-m4v", MaterialType::Video),
    ("audio/mpeg", MaterialType::Audio),
    ("audio/wav", MaterialType::Audio),
    ("audio/x-wav", MaterialType::Audio),
    ("audio/mp3", MaterialType::Audio),
];

const EXTENSION_TABLE: &[(&str, MaterialType)] = &[
    (".jpg", MaterialType::Image),
    (".jpeg", MaterialType::Image),
    (".png", MaterialType::Image),
    (".webp", MaterialType::Image),
    (".gif", MaterialType::Image),
    (".bmp", MaterialType::Image),
    (".mp4", MaterialType::Video),
    (".mov", MaterialType::Video),
    (".m4v", MaterialType::Video),
    (".mp3", MaterialType::Audio),
    (".wav", MaterialType::Audio),
];

fn lookup_mime(mime: &str) -> Option<MaterialType> {
    let normalized = mime.trim().to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(key, _)| *key == normalized)
        .map(|(_, kind)| *kind)
}

fn lookup_extension(name: &str) -> Option<MaterialType> {
    let lowered = name.to_ascii_lowercase();
    let idx = lowered.rfind('.')?;
    let ext = &lowered[idx..];
    EXTENSION_TABLE
        .iter()
        .find(|(key, _)| *key == ext)
        .map(|(_, kind)| *kind)
}

/// Classify an uploaded file: MIME type first, then filename extension, else image.
pub fn classify_file(mime_type: Option<&str>, filename: Option<&str>) -> MaterialType {
    mime_type
        .filter(|value| !value.trim().is_empty())
        .and_then(lookup_mime)
        .or_else(|| filename.and_then(lookup_extension))
        .unwrap_or(MaterialType::Image)
}

/// Classify a remote file from the extension of its URL path, else image.
pub fn classify_url(raw: &str) -> MaterialType {
    Url::parse(raw)
        .ok()
        .and_then(|url| lookup_extension(url.path()))
        .unwrap_or(MaterialType::Image)
}

/// Mime type guess for a local path, used when the caller only has a filename.
pub fn mime_for_filename(filename: &str) -> Option<&'static str> {
    let lowered = filename.to_ascii_lowercase();
    let ext = lowered.rsplit('.').next()?;
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "m4v" => Some("video/x-m4v"),
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        _ => None,
    }
}

/// Provider-side handle for an uploaded asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialRef {
    /// Image-store URI.
    Uri(String),
    /// Media-store video id.
    Vid(String),
}

impl MaterialRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Uri(value) | Self::Vid(value) => value,
        }
    }
}

/// One successfully uploaded asset. Order within a generate call is meaningful:
/// index 0 is the primary reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub kind: MaterialType,
    pub reference: MaterialRef,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub fps: u32,
    pub name: String,
}

impl Material {
    pub fn image(uri: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: MaterialType::Image,
            reference: MaterialRef::Uri(uri.into()),
            width,
            height,
            duration_ms: 0,
            fps: 0,
            name: String::new(),
        }
    }

    /// Material list entry embedded in a reference draft.
    pub fn to_material_entry(&self, mut next_id: impl FnMut() -> String) -> Value {
        let reference = self.reference.as_str();
        match self.kind {
            MaterialType::Image => json!({
                "type": "",
                "id": next_id(),
                "material_type": "image",
                "image_info": {
                    "type": "image",
                    "id": next_id(),
                    "source_from": "upload",
                    "platform_type": 1,
                    "name": "",
                    "image_uri": reference,
                    "aigc_image": { "type": "", "id": next_id() },
                    "width": self.width,
                    "height": self.height,
                    "format": "",
                    "uri": reference,
                }
            }),
            MaterialType::Video => json!({
                "type": "",
                "id": next_id(),
                "material_type": "video",
                "video_info": {
                    "type": "video",
                    "id": next_id(),
                    "source_from": "upload",
                    "name": self.name,
                    "vid": reference,
                    "fps": self.fps,
                    "width": self.width,
                    "height": self.height,
                    "duration": self.duration_ms,
                }
            }),
            MaterialType::Audio => json!({
                "type": "",
                "id": next_id(),
                "material_type": "audio",
                "audio_info": {
                    "type": "audio",
                    "id": next_id(),
                    "source_from": "upload",
                    "vid": reference,
                    "duration": self.duration_ms,
                    "name": self.name,
                }
            }),
        }
    }
}
