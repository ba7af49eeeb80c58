use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::annotate::annotate;
use crate::det::YoloDetector;
use crate::detection::{Detection, Detector, Geometry};
use crate::engine::EngineError;
use crate::geometry::rotation_angle;
use crate::image_impl::{imread, imwrite, Mat};
use crate::region::{replace_axis_region, replace_rotated_region, RegionError};
use crate::types::{ClassTable, DetectorConfig, ReplaceConfig};

/// Why a detection did not lead to a replacement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ClassOutOfRange,
    ClassMismatch,
    LowConfidence,
    /// Dispatched, but the region operation declined.
    Region(RegionError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Replaced { resize_fallback: bool },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    /// Position in detector output order.
    pub index: usize,
    pub class_id: usize,
    pub class_name: Option<String>,
    pub confidence: f32,
    pub status: OutcomeStatus,
}

impl DetectionOutcome {
    pub fn is_replaced(&self) -> bool {
        matches!(self.status, OutcomeStatus::Replaced { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceReport {
    /// Unset for in-memory runs.
    pub output_path: Option<PathBuf>,
    /// Detections dispatched to a region operation, successful or not.
    pub replacements: usize,
    pub outcomes: Vec<DetectionOutcome>,
}

impl ReplaceReport {
    pub fn replaced(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_replaced()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.replaced()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    pub output_path: PathBuf,
    pub detections: Vec<Detection>,
}

/// Detection-driven region replacement engine.
///
/// Holds only read-only state, so one engine can serve independent calls.
pub struct ImageReplacer<D: Detector> {
    detector: D,
    class_table: ClassTable,
    config: ReplaceConfig,
}

impl ImageReplacer<YoloDetector> {
    /// Build an engine around an ONNX YOLO model. Class names come from the
    /// model metadata when present, DOTA v1 otherwise.
    pub fn from_model(det_cfg: DetectorConfig, config: ReplaceConfig) -> Result<Self, EngineError> {
        let (detector, class_table) = YoloDetector::with_model_classes(det_cfg, ClassTable::dota_v1())?;
        Ok(Self::new(detector, class_table, config))
    }
}

impl<D: Detector> ImageReplacer<D> {
    pub fn new(detector: D, class_table: ClassTable, config: ReplaceConfig) -> Self {
        Self {
            detector,
            class_table,
            config,
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn class_table(&self) -> &ClassTable {
        &self.class_table
    }

    pub fn config(&self) -> &ReplaceConfig {
        &self.config
    }

    /// [`Self::replace_objects_in_image`] with the configured target class and threshold.
    pub fn replace_objects<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        original: P,
        replacement: Q,
    ) -> Result<ReplaceReport, EngineError> {
        self.replace_objects_in_image(
            original,
            replacement,
            &self.config.target_class,
            self.config.confidence_threshold,
        )
    }

    /// Replace every detection of `target_class` scoring above `threshold`
    /// with `replacement` and write the result to the output directory.
    pub fn replace_objects_in_image<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        original: P,
        replacement: Q,
        target_class: &str,
        threshold: f32,
    ) -> Result<ReplaceReport, EngineError> {
        let original = load(original.as_ref())?;
        let replacement = load(replacement.as_ref())?;

        let (image, mut report) = self.replace_on_mat(&original, &replacement, target_class, threshold)?;

        let path = self.persist(&image, &self.config.output_prefix, &self.config.output_extension)?;
        info!(
            "{} of {} detections replaced, saved to {}",
            report.replaced(),
            report.outcomes.len(),
            path.display()
        );
        report.output_path = Some(path);
        Ok(report)
    }

    /// In-memory variant: returns the modified copy of `original`.
    pub fn replace_on_mat(
        &self,
        original: &Mat,
        replacement: &Mat,
        target_class: &str,
        threshold: f32,
    ) -> Result<(Mat, ReplaceReport), EngineError> {
        let detections = self.run_detector(original)?;

        let mut working = original.clone();
        let (replacements, outcomes) =
            self.apply_detections(&mut working, replacement, &detections, target_class, threshold);

        Ok((
            working,
            ReplaceReport {
                output_path: None,
                replacements,
                outcomes,
            },
        ))
    }

    /// Filter and dispatch `detections` in order onto `working`.
    ///
    /// Returns the number of dispatched detections and one outcome per input.
    pub fn apply_detections(
        &self,
        working: &mut Mat,
        replacement: &Mat,
        detections: &[Detection],
        target_class: &str,
        threshold: f32,
    ) -> (usize, Vec<DetectionOutcome>) {
        let mut replacements = 0;
        let mut outcomes = Vec::with_capacity(detections.len());

        for (index, det) in detections.iter().enumerate() {
            let class_name = self.class_table.name(det.class_id);
            let status = match class_name {
                None => {
                    debug!("detection {index}: class id {} out of range", det.class_id);
                    OutcomeStatus::Skipped(SkipReason::ClassOutOfRange)
                }
                Some(name) if name != target_class => OutcomeStatus::Skipped(SkipReason::ClassMismatch),
                Some(_) if det.confidence <= threshold => {
                    debug!(
                        "detection {index}: confidence {:.3} <= {threshold}",
                        det.confidence
                    );
                    OutcomeStatus::Skipped(SkipReason::LowConfidence)
                }
                Some(_) => {
                    replacements += 1;
                    self.dispatch(working, replacement, &det.geometry, index)
                }
            };

            outcomes.push(DetectionOutcome {
                index,
                class_id: det.class_id,
                class_name: class_name.map(str::to_string),
                confidence: det.confidence,
                status,
            });
        }

        (replacements, outcomes)
    }

    fn dispatch(&self, working: &mut Mat, replacement: &Mat, geometry: &Geometry, index: usize) -> OutcomeStatus {
        let result = match geometry {
            Geometry::Quad(points) => {
                let angle = rotation_angle(points);
                replace_rotated_region(working, replacement, points, angle).map(|r| r.resize_fallback)
            }
            Geometry::Axis(bbox) => {
                replace_axis_region(working, replacement, *bbox, self.config.min_box_side).map(|_| false)
            }
        };

        match result {
            Ok(resize_fallback) => OutcomeStatus::Replaced { resize_fallback },
            Err(e) => {
                match e {
                    RegionError::RegionTooSmall { .. } | RegionError::EmptyMask => {
                        debug!("detection {index} skipped: {e}")
                    }
                    _ => warn!("detection {index} skipped: {e}"),
                }
                OutcomeStatus::Skipped(SkipReason::Region(e))
            }
        }
    }

    /// Detect objects in `image_path`, draw their outlines and save the
    /// annotated copy as `<stem>_detected_<hex>.<ext>`.
    pub fn detect_and_annotate<P: AsRef<Path>>(&self, image_path: P) -> Result<DetectReport, EngineError> {
        let image_path = image_path.as_ref();
        let img = load(image_path)?;
        let detections = self.run_detector(&img)?;

        let annotated = annotate(&img, &detections, &self.class_table);
        let stem = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let ext = image_path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.config.output_extension);
        let output_path = self.persist(&annotated, &format!("{stem}_detected"), ext)?;

        info!("{} detections drawn to {}", detections.len(), output_path.display());
        Ok(DetectReport {
            output_path,
            detections,
        })
    }

    fn run_detector(&self, img: &Mat) -> Result<Vec<Detection>, EngineError> {
        if !self.detector.is_ready() {
            return Err(EngineError::DetectorUnavailable(format!(
                "{} detector is not ready",
                self.detector.name()
            )));
        }
        let detections = self.detector.detect(img)?;
        debug!("{} returned {} detections", self.detector.name(), detections.len());
        Ok(detections)
    }

    fn persist(&self, img: &Mat, prefix: &str, ext: &str) -> Result<PathBuf, EngineError> {
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| EngineError::ImageWrite {
            path: dir.clone(),
            source: image::ImageError::IoError(e),
        })?;
        let path = dir.join(unique_file_name(prefix, ext));
        imwrite(&path, img).map_err(|source| EngineError::ImageWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn load(path: &Path) -> Result<Mat, EngineError> {
    imread(path).map_err(|source| EngineError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// `<prefix>_<8 hex digits>.<ext>`
pub fn unique_file_name(prefix: &str, ext: &str) -> String {
    format!("{prefix}_{:08x}.{ext}", rand::random::<u32>())
}
