//! Interpretation of client hints, actions and icons.
//!
//! Malformed input is logged and the offending piece ignored; the
//! notification itself is still shown.

use crate::{NativeWindowId, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// A typed hint value as sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HintValue {
    Bool(bool),
    Int(i32),
    #[serde(rename = "uint")]
    UInt(u32),
    Byte(u8),
    #[serde(rename = "string")]
    Str(String),
    Image(ImageData),
}

impl HintValue {
    fn type_name(&self) -> &'static str {
        match self {
            HintValue::Bool(_) => "bool",
            HintValue::Int(_) => "int",
            HintValue::UInt(_) => "uint",
            HintValue::Byte(_) => "byte",
            HintValue::Str(_) => "string",
            HintValue::Image(_) => "image",
        }
    }
}

/// Raw pixel data, laid out like the `image-data` hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub width: i32,
    pub height: i32,
    pub rowstride: i32,
    pub has_alpha: bool,
    pub bits_per_sample: i32,
    pub channels: i32,
    pub data: Vec<u8>,
}

impl ImageData {
    /// Byte length the header fields imply, or `None` if they are nonsense.
    pub fn expected_len(&self) -> Option<usize> {
        if self.width <= 0 || self.height <= 0 || self.rowstride <= 0 {
            return None;
        }
        if self.channels <= 0 || self.bits_per_sample <= 0 {
            return None;
        }
        let bytes_per_pixel = (i64::from(self.channels) * i64::from(self.bits_per_sample) + 7) / 8;
        let last_row = i64::from(self.width) * bytes_per_pixel;
        if last_row > i64::from(self.rowstride) {
            return None;
        }
        let len = (i64::from(self.height) - 1) * i64::from(self.rowstride) + last_row;
        usize::try_from(len).ok()
    }

    pub fn is_valid(&self) -> bool {
        self.expected_len() == Some(self.data.len())
    }
}

/// Where the popup icon comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconSource {
    Image(ImageData),
    File(PathBuf),
    /// A themed icon name such as `dialog-information`.
    Name(String),
}

impl IconSource {
    /// Interpret an icon string: `file://` URI, absolute path, or icon name.
    pub fn from_path_or_name(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        if let Some(rest) = s.strip_prefix("file://") {
            let decoded = match urlencoding::decode(rest) {
                Ok(path) => path.into_owned(),
                Err(e) => {
                    warn!("Icon URI '{}' is not valid UTF-8 once decoded: {}", s, e);
                    rest.to_string()
                }
            };
            return Some(IconSource::File(PathBuf::from(decoded)));
        }
        if s.starts_with('/') {
            return Some(IconSource::File(PathBuf::from(s)));
        }
        Some(IconSource::Name(s.to_string()))
    }
}

/// How a popup gets its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Follow a client window.
    SourceWindow(NativeWindowId),
    /// Point at a fixed root coordinate.
    Fixed(Point),
    /// Join the monitor stack.
    Stack,
}

/// Placement from hints: `window-xid` wins over `x`/`y`, which need each other.
pub fn placement(hints: &HashMap<String, HintValue>) -> Placement {
    if let Some(value) = hints.get("window-xid") {
        match value {
            HintValue::UInt(xid) if *xid != 0 => return Placement::SourceWindow(*xid),
            HintValue::UInt(_) => {}
            other => warn!("window-xid hint is of type {} (expected uint)", other.type_name()),
        }
    }

    let x = hints.get("x").and_then(|v| int_hint("x", v));
    let y = hints.get("y").and_then(|v| int_hint("y", v));
    match (x, y) {
        (Some(x), Some(y)) => Placement::Fixed(Point::new(x, y)),
        _ => Placement::Stack,
    }
}

fn int_hint(name: &str, value: &HintValue) -> Option<i32> {
    match value {
        HintValue::Int(v) => Some(*v),
        other => {
            warn!("{} hint is of type {} (expected int)", name, other.type_name());
            None
        }
    }
}

/// Sound to play, honouring `suppress-sound` and validating `sound-file`.
pub fn sound_file(hints: &HashMap<String, HintValue>, sound_enabled: bool) -> Option<PathBuf> {
    let mut enabled = sound_enabled;

    match hints.get("suppress-sound") {
        Some(HintValue::Bool(suppress)) => enabled = !suppress,
        Some(HintValue::Int(suppress)) => enabled = *suppress == 0,
        Some(other) => warn!(
            "suppress-sound is of type {} (expected bool or int)",
            other.type_name()
        ),
        None => {}
    }

    if !enabled {
        return None;
    }

    match hints.get("sound-file") {
        Some(HintValue::Str(path)) if !path.is_empty() => {
            let path = PathBuf::from(path);
            if path.exists() {
                Some(path)
            } else {
                warn!("Sound file {} does not exist", path.display());
                None
            }
        }
        Some(HintValue::Str(_)) | None => None,
        Some(other) => {
            warn!("sound-file hint is of type {} (expected string)", other.type_name());
            None
        }
    }
}

/// Action buttons to draw, from the flat `[key, label, ...]` list.
///
/// A trailing key without a label stops processing. The `default` action is
/// the click-on-body action and gets no button.
pub fn action_buttons(actions: &[String]) -> Vec<(String, String)> {
    let mut buttons = Vec::new();
    for pair in actions.chunks(2) {
        let [key, label] = pair else {
            warn!(
                "Label not found for action {}. A label must follow every action key",
                pair[0]
            );
            break;
        };
        if key.eq_ignore_ascii_case("default") {
            continue;
        }
        buttons.push((key.clone(), label.clone()));
    }
    buttons
}

/// Icon precedence: `image_data`, `image-data`, `image_path`, `image-path`,
/// the icon argument, then the deprecated `icon_data`.
pub fn icon_source(icon: &str, hints: &HashMap<String, HintValue>) -> Option<IconSource> {
    if let Some(value) = hints.get("image_data").or_else(|| hints.get("image-data")) {
        return image_from_hint("image-data", value);
    }
    for name in ["image_path", "image-path"] {
        if let Some(value) = hints.get(name) {
            return match value {
                HintValue::Str(path) => IconSource::from_path_or_name(path),
                other => {
                    warn!("{} hint is of type {} (expected string)", name, other.type_name());
                    None
                }
            };
        }
    }
    if !icon.is_empty() {
        return IconSource::from_path_or_name(icon);
    }
    if let Some(value) = hints.get("icon_data") {
        warn!("\"icon_data\" hint is deprecated, please use \"image-data\" instead");
        return image_from_hint("icon_data", value);
    }
    None
}

fn image_from_hint(name: &str, value: &HintValue) -> Option<IconSource> {
    match value {
        HintValue::Image(image) if image.is_valid() => Some(IconSource::Image(image.clone())),
        HintValue::Image(image) => {
            warn!(
                "{} hint has {} bytes of pixel data, expected {:?}",
                name,
                image.data.len(),
                image.expected_len()
            );
            None
        }
        other => {
            warn!("{} hint is of type {} (expected image)", name, other.type_name());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(pairs: &[(&str, HintValue)]) -> HashMap<String, HintValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn image(width: i32, height: i32, len: usize) -> ImageData {
        ImageData {
            width,
            height,
            rowstride: width * 4,
            has_alpha: true,
            bits_per_sample: 8,
            channels: 4,
            data: vec![0; len],
        }
    }

    #[test]
    fn test_placement_precedence() {
        let all = hints(&[
            ("window-xid", HintValue::UInt(0x400001)),
            ("x", HintValue::Int(10)),
            ("y", HintValue::Int(20)),
        ]);
        assert_eq!(placement(&all), Placement::SourceWindow(0x400001));

        let xy = hints(&[("x", HintValue::Int(10)), ("y", HintValue::Int(20))]);
        assert_eq!(placement(&xy), Placement::Fixed(Point::new(10, 20)));

        let only_x = hints(&[("x", HintValue::Int(10))]);
        assert_eq!(placement(&only_x), Placement::Stack);

        assert_eq!(placement(&HashMap::new()), Placement::Stack);
    }

    #[test]
    fn test_placement_ignores_mistyped_hints() {
        let bad = hints(&[
            ("window-xid", HintValue::Str("0x1".into())),
            ("x", HintValue::Str("10".into())),
            ("y", HintValue::Int(20)),
        ]);
        assert_eq!(placement(&bad), Placement::Stack);
    }

    #[test]
    fn test_suppress_sound() {
        let existing = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let file = ("sound-file", HintValue::Str(existing.into()));

        assert_eq!(sound_file(&hints(&[file.clone()]), true), Some(PathBuf::from(existing)));
        assert_eq!(sound_file(&hints(&[file.clone()]), false), None);
        assert_eq!(
            sound_file(&hints(&[file.clone(), ("suppress-sound", HintValue::Bool(true))]), true),
            None
        );
        assert_eq!(
            sound_file(&hints(&[file.clone(), ("suppress-sound", HintValue::Bool(false))]), false),
            Some(PathBuf::from(existing))
        );
        assert_eq!(
            sound_file(&hints(&[file.clone(), ("suppress-sound", HintValue::Int(1))]), true),
            None
        );
        assert_eq!(
            sound_file(&hints(&[file.clone(), ("suppress-sound", HintValue::Int(0))]), true),
            Some(PathBuf::from(existing))
        );
        // Wrong type is ignored, the default stands.
        assert_eq!(
            sound_file(&hints(&[file, ("suppress-sound", HintValue::Str("yes".into()))]), true),
            Some(PathBuf::from(existing))
        );
    }

    #[test]
    fn test_sound_file_must_exist() {
        let missing = hints(&[("sound-file", HintValue::Str("/nonexistent/bell.oga".into()))]);
        assert_eq!(sound_file(&missing, true), None);
        let empty = hints(&[("sound-file", HintValue::Str(String::new()))]);
        assert_eq!(sound_file(&empty, true), None);
    }

    #[test]
    fn test_action_buttons_skip_default() {
        let actions: Vec<String> = ["default", "Open", "reply", "Reply", "DEFAULT", "Again"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            action_buttons(&actions),
            vec![("reply".to_string(), "Reply".to_string())]
        );
    }

    #[test]
    fn test_action_buttons_stop_at_missing_label() {
        let actions: Vec<String> = ["a", "A", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(action_buttons(&actions), vec![("a".to_string(), "A".to_string())]);
    }

    #[test]
    fn test_image_length_validation() {
        // 3x2 RGBA, rowstride 12: (2-1)*12 + 3*4 = 24
        assert_eq!(image(3, 2, 24).expected_len(), Some(24));
        assert!(image(3, 2, 24).is_valid());
        assert!(!image(3, 2, 23).is_valid());

        let mut padded = image(3, 2, 28);
        padded.rowstride = 16;
        assert!(padded.is_valid());

        assert_eq!(image(0, 2, 0).expected_len(), None);
    }

    #[test]
    fn test_icon_precedence() {
        let valid = HintValue::Image(image(1, 1, 4));
        let all = hints(&[
            ("image-data", valid.clone()),
            ("image-path", HintValue::Str("/tmp/a.png".into())),
            ("icon_data", valid.clone()),
        ]);
        assert!(matches!(icon_source("mail", &all), Some(IconSource::Image(_))));

        let path = hints(&[("image_path", HintValue::Str("/tmp/a.png".into()))]);
        assert_eq!(
            icon_source("mail", &path),
            Some(IconSource::File(PathBuf::from("/tmp/a.png")))
        );

        assert_eq!(
            icon_source("mail-unread", &HashMap::new()),
            Some(IconSource::Name("mail-unread".into()))
        );

        let deprecated = hints(&[("icon_data", valid)]);
        assert!(matches!(icon_source("", &deprecated), Some(IconSource::Image(_))));
        assert_eq!(icon_source("", &HashMap::new()), None);
    }

    #[test]
    fn test_malformed_image_is_dropped() {
        let bad = hints(&[("image_data", HintValue::Image(image(4, 4, 3)))]);
        assert_eq!(icon_source("mail", &bad), None);
    }

    #[test]
    fn test_file_uri_is_decoded() {
        assert_eq!(
            IconSource::from_path_or_name("file:///home/me/My%20Icons/a.png"),
            Some(IconSource::File(PathBuf::from("/home/me/My Icons/a.png")))
        );
    }
}
