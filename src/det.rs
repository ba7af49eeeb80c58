use std::time::Instant;

use log::debug;

use crate::detection::{Detection, Detector};
use crate::engine::{EngineError, OrtSession};
use crate::image_impl::Mat;
use crate::postprocess::YoloPostProcess;
use crate::preprocess::DetPreProcess;
use crate::types::{ClassTable, DetectorConfig};

/// YOLO detector (oriented or axis-aligned head) on ONNX Runtime.
pub struct YoloDetector {
    pub cfg: DetectorConfig,
    pub session: OrtSession,
    pub preprocess: DetPreProcess,
    pub postprocess: YoloPostProcess,
}

impl YoloDetector {
    pub fn new(cfg: DetectorConfig, num_classes: usize) -> Result<Self, EngineError> {
        let session = OrtSession::from_det_config(&cfg)?;
        let preprocess = DetPreProcess::new(cfg.input_size, cfg.pad_value);
        let postprocess = YoloPostProcess::new(
            cfg.score_thresh,
            cfg.iou_thresh,
            cfg.max_detections,
            num_classes,
        );
        Ok(Self {
            cfg,
            session,
            preprocess,
            postprocess,
        })
    }

    /// Load the model and size the decoder from its embedded `names`,
    /// falling back to `fallback` when the model carries none.
    pub fn with_model_classes(
        cfg: DetectorConfig,
        fallback: ClassTable,
    ) -> Result<(Self, ClassTable), EngineError> {
        let mut det = Self::new(cfg, fallback.len())?;
        let table = match det.class_table_from_metadata() {
            Some(table) => {
                debug!("model declares {} classes", table.len());
                det.postprocess.num_classes = table.len();
                table
            }
            None => fallback,
        };
        Ok((det, table))
    }

    pub fn class_table_from_metadata(&self) -> Option<ClassTable> {
        self.session
            .metadata_value("names")
            .and_then(|raw| ClassTable::from_model_names(&raw))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, img: &Mat) -> Result<Vec<Detection>, EngineError> {
        let start = Instant::now();

        let (input, lb) = self.preprocess.run(img)?;
        let (shape, data) = self.session.run(input)?;
        let dets = self
            .postprocess
            .process(&shape, &data, &lb, img.cols() as u32, img.rows() as u32)?;

        debug!(
            "{} detections on {}x{} in {:.3}s",
            dets.len(),
            img.cols(),
            img.rows(),
            start.elapsed().as_secs_f64()
        );
        Ok(dets)
    }

    fn is_ready(&self) -> bool {
        self.session.is_usable()
    }

    fn name(&self) -> &str {
        "yolo"
    }
}
