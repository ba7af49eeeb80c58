//! Detector output model and the `Detector` seam.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::image_impl::{Mat, Point2f};

/// Integer pixel box, `x2`/`y2` exclusive once clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl AxisBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Truncates toward zero, matching an integer cast of detector floats.
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    /// Clamp every coordinate into `[0, width-1] x [0, height-1]`.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let max_x = width as i32 - 1;
        let max_y = height as i32 - 1;
        Self {
            x1: self.x1.min(max_x).max(0),
            y1: self.y1.min(max_y).max(0),
            x2: self.x2.min(max_x).max(0),
            y2: self.y2.min(max_y).max(0),
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn corners(&self) -> [Point2f; 4] {
        let (x1, y1, x2, y2) = (self.x1 as f32, self.y1 as f32, self.x2 as f32, self.y2 as f32);
        [
            Point2f::new(x1, y1),
            Point2f::new(x2, y1),
            Point2f::new(x2, y2),
            Point2f::new(x1, y2),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// Oriented box corners, detector order.
    Quad([Point2f; 4]),
    Axis(AxisBox),
}

impl Geometry {
    /// 8 values are four `(x, y)` corners, 4 values are `x1, y1, x2, y2`.
    pub fn from_coords(coords: &[f32]) -> Option<Self> {
        match coords.len() {
            8 => Some(Self::Quad([
                Point2f::new(coords[0], coords[1]),
                Point2f::new(coords[2], coords[3]),
                Point2f::new(coords[4], coords[5]),
                Point2f::new(coords[6], coords[7]),
            ])),
            4 => Some(Self::Axis(AxisBox::from_xyxy(
                coords[0], coords[1], coords[2], coords[3],
            ))),
            _ => None,
        }
    }

    pub fn outline(&self) -> [Point2f; 4] {
        match self {
            Self::Quad(pts) => *pts,
            Self::Axis(b) => b.corners(),
        }
    }

    pub fn is_oriented(&self) -> bool {
        matches!(self, Self::Quad(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub geometry: Geometry,
    pub class_id: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn new(geometry: Geometry, class_id: usize, confidence: f32) -> Self {
        Self {
            geometry,
            class_id,
            confidence,
        }
    }
}

/// Common interface for object detectors feeding the replacer.
pub trait Detector: Send + Sync {
    /// Detections in the detector's own output order.
    fn detect(&self, image: &Mat) -> Result<Vec<Detection>, EngineError>;

    fn is_ready(&self) -> bool {
        true
    }

    /// Get the detector name (for logging)
    fn name(&self) -> &str;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&self, image: &Mat) -> Result<Vec<Detection>, EngineError> {
        (**self).detect(image)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Replays a fixed detection list regardless of the image.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedDetector {
    detections: Vec<Detection>,
}

impl PrecomputedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }
}

impl Detector for PrecomputedDetector {
    fn detect(&self, _image: &Mat) -> Result<Vec<Detection>, EngineError> {
        Ok(self.detections.clone())
    }

    fn name(&self) -> &str {
        "precomputed"
    }
}
