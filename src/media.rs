use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::card::Card;

/// Directory holding a collection's media files, next to the collection file.
pub const MEDIA_DIR_NAME: &str = "collection.media";

/// Field name to the `[sound:...]` filenames found in that field, in order.
///
/// Only fields with at least one reference are present.
pub type FieldAudioMap = BTreeMap<String, Vec<String>>;

fn sound_regex() -> &'static Regex {
    static SOUND_RE: OnceLock<Regex> = OnceLock::new();
    SOUND_RE.get_or_init(|| Regex::new(r"\[sound:(.*?)\]").expect("Invalid regex"))
}

/// Filenames of every `[sound:<file>]` marker in `field_text`, verbatim and in
/// order. The same file may appear more than once.
pub fn extract_audio_refs(field_text: &str) -> Vec<String> {
    sound_regex()
        .captures_iter(field_text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Audio references of every field of `card` that embeds at least one clip.
pub fn find_audio_fields(card: &Card) -> FieldAudioMap {
    card.fields
        .iter()
        .filter_map(|(name, value)| {
            let refs = extract_audio_refs(value);
            (!refs.is_empty()).then(|| (name.clone(), refs))
        })
        .collect()
}

/// Names of the fields in `map`, as the known-field set for template scans.
pub fn audio_field_names(map: &FieldAudioMap) -> HashSet<String> {
    map.keys().cloned().collect()
}

/// `<dir of collection file>/collection.media`.
pub fn media_dir_for_collection(collection_path: &Path) -> PathBuf {
    collection_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(MEDIA_DIR_NAME)
}
