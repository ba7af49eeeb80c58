//! # regionswap - detection-driven region replacement
//!
//! regionswap finds objects in an image with a detector (an ONNX Runtime YOLO
//! model, oriented or axis-aligned) and pastes a substitute image over every
//! detection of a chosen class. Oriented detections are handled with a
//! perspective warp and a non-zero mask, so only the rotated footprint of
//! the object is overwritten.
//!
//! ## Features
//!
//! - **Oriented boxes**: canonical corner ordering, rotation estimate and
//!   homography-based warp into arbitrary quadrilaterals
//! - **Axis-aligned boxes**: clamped area-resize and copy
//! - **Pluggable detectors**: YOLO OBB/detect models through ONNX Runtime, or
//!   precomputed detections from JSON
//! - **Auditable**: every detection yields a replaced/skipped outcome
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regionswap::{DetectorConfig, ImageReplacer, ReplaceConfig};
//!
//! let engine = ImageReplacer::from_model(
//!     DetectorConfig::yolo_obb("models/yolo11n-obb.onnx".into()),
//!     ReplaceConfig::default(),
//! )?;
//! let report = engine.replace_objects_in_image("airport.jpg", "logo.png", "plane", 0.5)?;
//!
//! println!("{} replacements -> {:?}", report.replacements, report.output_path);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod annotate;
mod det;
mod detection;
mod engine;
mod geometry;
mod image_impl;
mod postprocess;
mod preprocess;
mod region;
mod replacer;
mod types;

pub use crate::annotate::{annotate, class_color};
pub use crate::det::YoloDetector;
pub use crate::detection::{AxisBox, Detection, Detector, Geometry, PrecomputedDetector};
pub use crate::engine::EngineError;
pub use crate::geometry::{
    is_convex_clockwise, letterbox, order_points_clockwise, quad_dimensions, rotation_angle, unwarp_quad, warp_into_quad,
    Letterbox,
};
pub use crate::image_impl::{
    box_points, get_perspective_transform, imread, imwrite, perspective_point, resize, resize_bounded,
    warp_perspective, Mat, Point2f, ResizeError, Size, TransformError, INTER_AREA, INTER_CUBIC, INTER_LINEAR,
    MAX_OUTPUT_PIXELS,
};
pub use crate::postprocess::{iou, HeadKind, YoloPostProcess};
pub use crate::region::{
    extract_rotated_region, replace_axis_region, replace_rotated_region, RegionError, RotatedReplacement,
};
pub use crate::replacer::{
    unique_file_name, DetectReport, DetectionOutcome, ImageReplacer, OutcomeStatus, ReplaceReport, SkipReason,
};
pub use crate::types::{ClassTable, DetectorConfig, ReplaceConfig, DOTA_V1_CLASSES};
