use std::fmt;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionSpec {
    pub width: u32,
    pub height: u32,
}

impl ResolutionSpec {
    /// Width:height reduced by their greatest common divisor, e.g. `16:9`.
    pub fn aspect_ratio(&self) -> String {
        aspect_ratio(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    UnknownResolution {
        resolution: String,
        supported: Vec<String>,
    },
    UnknownRatio {
        resolution: String,
        ratio: String,
        supported: Vec<String>,
    },
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownResolution {
                resolution,
                supported,
            } => write!(
                f,
                "unsupported video resolution \"{resolution}\"; supported: {}",
                supported.join(", ")
            ),
            Self::UnknownRatio {
                resolution,
                ratio,
                supported,
            } => write!(
                f,
                "unsupported ratio \"{ratio}\" for resolution \"{resolution}\"; supported: {}",
                supported.join(", ")
            ),
        }
    }
}

impl std::error::Error for ResolutionError {}

fn resolution_table() -> IndexMap<&'static str, IndexMap<&'static str, ResolutionSpec>> {
    let group = |rows: [(&'static str, u32, u32); 5]| {
        rows.into_iter()
            .map(|(ratio, width, height)| (ratio, ResolutionSpec { width, height }))
            .collect::<IndexMap<_, _>>()
    };
    let mut table = IndexMap::new();
    table.insert(
        "480p",
        group([
            ("1:1", 480, 480),
            ("4:3", 640, 480),
            ("3:4", 480, 640),
            ("16:9", 854, 480),
            ("9:16", 480, 854),
        ]),
    );
    table.insert(
        "720p",
        group([
            ("1:1", 720, 720),
            ("4:3", 960, 720),
            ("3:4", 720, 960),
            ("16:9", 1280, 720),
            ("9:16", 720, 1280),
        ]),
    );
    table.insert(
        "1080p",
        group([
            ("1:1", 1080, 1080),
            ("4:3", 1440, 1080),
            ("3:4", 1080, 1440),
            ("16:9", 1920, 1080),
            ("9:16", 1080, 1920),
        ]),
    );
    table
}

pub fn resolve_resolution(resolution: &str, ratio: &str) -> Result<ResolutionSpec, ResolutionError> {
    let table = resolution_table();
    let Some(group) = table.get(resolution) else {
        return Err(ResolutionError::UnknownResolution {
            resolution: resolution.to_string(),
            supported: table.keys().map(|key| key.to_string()).collect(),
        });
    };
    group
        .get(ratio)
        .copied()
        .ok_or_else(|| ResolutionError::UnknownRatio {
            resolution: resolution.to_string(),
            ratio: ratio.to_string(),
            supported: group.keys().map(|key| key.to_string()).collect(),
        })
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

pub fn aspect_ratio(width: u32, height: u32) -> String {
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}
