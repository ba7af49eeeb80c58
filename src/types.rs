use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// DOTA v1 class order used by the aerial OBB models.
pub const DOTA_V1_CLASSES: [&str; 15] = [
    "plane",
    "ship",
    "storage tank",
    "baseball diamond",
    "tennis court",
    "basketball court",
    "ground track field",
    "harbor",
    "bridge",
    "large vehicle",
    "small vehicle",
    "helicopter",
    "roundabout",
    "soccer ball field",
    "swimming pool",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// Square network input side.
    pub input_size: u32,
    pub pad_value: u8,
    /// Minimum class score for a candidate to enter NMS.
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub max_detections: usize,
    /// 0 lets ONNX Runtime decide.
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            input_size: 1024,
            pad_value: 114,
            score_thresh: 0.25,
            iou_thresh: 0.7,
            max_detections: 300,
            intra_threads: 0,
        }
    }
}

impl DetectorConfig {
    /// YOLO oriented-box model trained on DOTA (1024 input).
    pub fn yolo_obb(model_path: PathBuf) -> Self {
        Self {
            model_path,
            ..Self::default()
        }
    }

    /// Plain axis-aligned YOLO detection model (640 input).
    pub fn yolo_detect(model_path: PathBuf) -> Self {
        Self {
            model_path,
            input_size: 640,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceConfig {
    pub target_class: String,
    /// Detections must score strictly above this.
    pub confidence_threshold: f32,
    /// Axis-aligned boxes narrower or shorter than this are skipped.
    pub min_box_side: i32,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub output_extension: String,
}

impl Default for ReplaceConfig {
    fn default() -> Self {
        Self {
            target_class: "plane".to_string(),
            confidence_threshold: 0.5,
            min_box_side: 10,
            output_dir: PathBuf::from("detection_results"),
            output_prefix: "replaced".to_string(),
            output_extension: "jpg".to_string(),
        }
    }
}

impl ReplaceConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Immutable class-name table indexed by detector class id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassTable {
    names: Vec<String>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::dota_v1()
    }
}

impl ClassTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn dota_v1() -> Self {
        Self::new(DOTA_V1_CLASSES)
    }

    /// One class name per line; blank lines are ignored.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_lines(&text))
    }

    pub fn from_lines(text: &str) -> Self {
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))
    }

    /// Parse the Python-dict style `names` metadata Ultralytics writes into
    /// exported models, e.g. `{0: 'plane', 1: 'ship'}`.
    pub fn from_model_names(raw: &str) -> Option<Self> {
        let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
        let mut entries = parse_names_dict(body)?;
        if entries.is_empty() {
            return None;
        }
        entries.sort_by_key(|(id, _)| *id);
        if entries.iter().enumerate().any(|(i, (id, _))| i != *id) {
            return None;
        }
        Some(Self::new(entries.into_iter().map(|(_, name)| name)))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Tokenize `id: name` pairs of a dict body. Names may be quoted with `'` or
/// `"` (backslash escapes the next character), so commas and colons inside
/// quotes stay part of the name.
fn parse_names_dict(body: &str) -> Option<Vec<(usize, String)>> {
    let mut entries = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            return Some(entries);
        }

        let mut id = String::new();
        while let Some(c) = chars.next_if(|c| *c != ':') {
            id.push(c);
        }
        chars.next()?;
        let id: usize = id.trim().parse().ok()?;

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let mut name = String::new();
        match chars.peek().copied() {
            Some(quote @ ('\'' | '"')) => {
                chars.next();
                loop {
                    match chars.next()? {
                        '\\' => name.push(chars.next()?),
                        c if c == quote => break,
                        c => name.push(c),
                    }
                }
                while chars.next_if(|c| c.is_whitespace()).is_some() {}
                if chars.peek().is_some_and(|c| *c != ',') {
                    return None;
                }
            }
            _ => {
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    name.push(c);
                }
                name = name.trim().to_string();
            }
        }
        entries.push((id, name));
    }
}
