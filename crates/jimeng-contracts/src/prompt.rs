use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::materials::MaterialType;

const DEFAULT_LEAD_TEXT: &str = "使用";
const DEFAULT_JOINER_TEXT: &str = "和";
const DEFAULT_PROMPT_PREFIX: &str = "素材，";
const DEFAULT_FILLER_TEXT: &str = "素材生成视频";

/// One element of a meta list: a literal text span or a reference into the
/// material list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaListEntry {
    Text(String),
    MaterialRef {
        index: usize,
        kind: MaterialType,
    },
}

impl MetaListEntry {
    fn material(index: usize, materials: &[MaterialType]) -> Option<Self> {
        materials
            .get(index)
            .map(|kind| Self::MaterialRef { index, kind: *kind })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => json!({ "meta_type": "text", "text": text }),
            Self::MaterialRef { index, kind } => json!({
                "meta_type": kind.as_str(),
                "text": "",
                "material_ref": { "material_idx": index },
            }),
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)@(?:图|image)?([0-9]+)").expect("valid placeholder pattern"))
}

fn push_text(entries: &mut Vec<MetaListEntry>, text: &str) {
    if !text.trim().is_empty() {
        entries.push(MetaListEntry::Text(text.to_string()));
    }
}

/// Split a prompt on `@N` placeholders into text spans and material references.
///
/// References are one-based in the prompt and bounds-checked against
/// `materials`; out-of-range references are dropped. A prompt without any
/// placeholder references every material in order, followed by the prompt text.
pub fn parse_prompt_references(prompt: &str, materials: &[MaterialType]) -> Vec<MetaListEntry> {
    let mut entries = Vec::new();
    let mut last_end = 0;
    let mut placeholders = 0;

    for captures in placeholder_pattern().captures_iter(prompt) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        placeholders += 1;
        push_text(&mut entries, &prompt[last_end..whole.start()]);
        let reference = captures
            .get(1)
            .and_then(|digits| digits.as_str().parse::<usize>().ok())
            .and_then(|position| position.checked_sub(1))
            .and_then(|index| MetaListEntry::material(index, materials));
        if let Some(entry) = reference {
            entries.push(entry);
        }
        last_end = whole.end();
    }
    push_text(&mut entries, &prompt[last_end..]);

    if placeholders == 0 || entries.is_empty() {
        return default_references(prompt, materials);
    }
    entries
}

fn default_references(prompt: &str, materials: &[MaterialType]) -> Vec<MetaListEntry> {
    let mut entries = Vec::new();
    for (index, kind) in materials.iter().enumerate() {
        if index == 0 {
            entries.push(MetaListEntry::Text(DEFAULT_LEAD_TEXT.to_string()));
        }
        entries.push(MetaListEntry::MaterialRef { index, kind: *kind });
        if index + 1 < materials.len() {
            entries.push(MetaListEntry::Text(DEFAULT_JOINER_TEXT.to_string()));
        }
    }
    if prompt.trim().is_empty() {
        entries.push(MetaListEntry::Text(DEFAULT_FILLER_TEXT.to_string()));
    } else {
        entries.push(MetaListEntry::Text(format!("{DEFAULT_PROMPT_PREFIX}{prompt}")));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> MetaListEntry {
        MetaListEntry::Text(value.to_string())
    }

    fn reference(index: usize, kind: MaterialType) -> MetaListEntry {
        MetaListEntry::MaterialRef { index, kind }
    }

    #[test]
    fn placeholders_split_prompt_preserving_literal_spans() {
        let entries = parse_prompt_references(
            "use @1 and @2",
            &[MaterialType::Image, MaterialType::Video],
        );
        assert_eq!(
            entries,
            vec![
                text("use "),
                reference(0, MaterialType::Image),
                text(" and "),
                reference(1, MaterialType::Video),
            ]
        );
    }

    #[test]
    fn fullwidth_digits_stay_literal_text() {
        let entries = parse_prompt_references("@1 then @\u{ff12}", &[MaterialType::Image, MaterialType::Video]);
        assert_eq!(entries, vec![reference(0, MaterialType::Image), text(" then @\u{ff12}")]);

        let entries = parse_prompt_references("make @\u{ff11} dance", &[MaterialType::Image]);
        assert!(entries.contains(&reference(0, MaterialType::Image)));
        assert!(entries
            .iter()
            .any(|entry| matches!(entry, MetaListEntry::Text(span) if span.contains("make @\u{ff11} dance"))));
    }

    #[test]
    fn marker_words_and_trailing_text_are_supported() {
        let entries = parse_prompt_references(
            "@图1 dances to @IMAGE2 slowly",
            &[MaterialType::Image, MaterialType::Audio],
        );
        assert_eq!(
            entries,
            vec![
                reference(0, MaterialType::Image),
                text(" dances to "),
                reference(1, MaterialType::Audio),
                text(" slowly"),
            ]
        );
    }

    #[test]
    fn out_of_range_references_are_dropped() {
        let entries = parse_prompt_references("a @0 b @3 c @1", &[MaterialType::Image]);
        assert_eq!(
            entries,
            vec![
                text("a "),
                text(" b "),
                text(" c "),
                reference(0, MaterialType::Image),
            ]
        );
    }

    #[test]
    fn whitespace_only_spans_are_not_emitted() {
        let entries = parse_prompt_references(
            "@1 @2",
            &[MaterialType::Image, MaterialType::Image],
        );
        assert_eq!(
            entries,
            vec![
                reference(0, MaterialType::Image),
                reference(1, MaterialType::Image),
            ]
        );
    }

    #[test]
    fn prompt_without_placeholders_references_every_material() {
        let entries = parse_prompt_references(
            "make it move",
            &[MaterialType::Image, MaterialType::Video],
        );
        assert_eq!(
            entries,
            vec![
                text("使用"),
                reference(0, MaterialType::Image),
                text("和"),
                reference(1, MaterialType::Video),
                text("素材，make it move"),
            ]
        );
    }

    #[test]
    fn empty_prompt_uses_filler_text() {
        let entries = parse_prompt_references("  ", &[MaterialType::Audio]);
        assert_eq!(
            entries,
            vec![
                text("使用"),
                reference(0, MaterialType::Audio),
                text("素材生成视频"),
            ]
        );
    }

    #[test]
    fn meta_entries_serialize_to_wire_shape() {
        assert_eq!(
            reference(1, MaterialType::Video).to_value(),
            json!({"meta_type": "video", "text": "", "material_ref": {"material_idx": 1}})
        );
        assert_eq!(
            text("hi").to_value(),
            json!({"meta_type": "text", "text": "hi"})
        );
    }
}
