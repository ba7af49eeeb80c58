//! Decoding of YOLO detection heads into [`Detection`]s.

use geo_clipper::Clipper;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use log::debug;

use crate::detection::{AxisBox, Detection, Geometry};
use crate::engine::EngineError;
use crate::geometry::Letterbox;
use crate::image_impl::{box_points, Point2f};

/// Fixed-point scale handed to the polygon clipper.
const CLIP_FACTOR: f64 = 1024.0;

/// Which head layout a model output uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadKind {
    /// `cx, cy, w, h, scores.., angle`
    Oriented,
    /// `cx, cy, w, h, scores..`
    Axis,
}

pub struct YoloPostProcess {
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub max_detections: usize,
    pub num_classes: usize,
}

impl YoloPostProcess {
    pub fn new(score_thresh: f32, iou_thresh: f32, max_detections: usize, num_classes: usize) -> Self {
        Self {
            score_thresh,
            iou_thresh,
            max_detections,
            num_classes,
        }
    }

    pub fn head_kind(&self, rows: usize) -> Option<HeadKind> {
        if rows == 4 + self.num_classes + 1 {
            Some(HeadKind::Oriented)
        } else if rows == 4 + self.num_classes {
            Some(HeadKind::Axis)
        } else {
            None
        }
    }

    /// `shape` is `[1, rows, proposals]`, row-major `data`.
    pub fn process(
        &self,
        shape: &[usize],
        data: &[f32],
        lb: &Letterbox,
        ori_w: u32,
        ori_h: u32,
    ) -> Result<Vec<Detection>, EngineError> {
        let [batch, rows, proposals] = *shape else {
            return Err(EngineError::InvalidOutputShape(format!("{shape:?}")));
        };
        if batch != 1 || data.len() != rows * proposals {
            return Err(EngineError::InvalidOutputShape(format!(
                "{shape:?} with {} values",
                data.len()
            )));
        }
        let kind = self.head_kind(rows).ok_or_else(|| {
            EngineError::InvalidOutputShape(format!(
                "{rows} rows does not fit {} classes",
                self.num_classes
            ))
        })?;

        let at = |row: usize, i: usize| data[row * proposals + i];
        let mut candidates = Vec::new();

        for i in 0..proposals {
            let mut best_class = 0;
            let mut best_score = f32::MIN;
            for c in 0..self.num_classes {
                let s = at(4 + c, i);
                if s > best_score {
                    best_score = s;
                    best_class = c;
                }
            }
            if best_score < self.score_thresh {
                continue;
            }

            let center = lb.to_original(Point2f::new(at(0, i), at(1, i)));
            let w = at(2, i) / lb.scale;
            let h = at(3, i) / lb.scale;

            let geometry = match kind {
                HeadKind::Oriented => {
                    let angle = at(4 + self.num_classes, i).to_degrees();
                    Geometry::Quad(box_points(center, w, h, angle))
                }
                HeadKind::Axis => {
                    let x1 = (center.x - w / 2.0).clamp(0.0, ori_w as f32);
                    let y1 = (center.y - h / 2.0).clamp(0.0, ori_h as f32);
                    let x2 = (center.x + w / 2.0).clamp(0.0, ori_w as f32);
                    let y2 = (center.y + h / 2.0).clamp(0.0, ori_h as f32);
                    Geometry::Axis(AxisBox::from_xyxy(x1, y1, x2, y2))
                }
            };
            candidates.push(Detection::new(geometry, best_class, best_score));
        }

        let total = candidates.len();
        let kept = self.nms(candidates);
        debug!("{kind:?} head: {total} candidates, {} after NMS", kept.len());
        Ok(kept)
    }

    /// Class-aware greedy suppression, highest confidence first.
    fn nms(&self, mut candidates: Vec<Detection>) -> Vec<Detection> {
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut kept: Vec<Detection> = Vec::new();
        for cand in candidates {
            if kept.len() >= self.max_detections {
                break;
            }
            let suppressed = kept.iter().any(|k| {
                k.class_id == cand.class_id && iou(&k.geometry, &cand.geometry) > self.iou_thresh
            });
            if !suppressed {
                kept.push(cand);
            }
        }
        kept
    }
}

pub fn iou(a: &Geometry, b: &Geometry) -> f32 {
    match (a, b) {
        (Geometry::Axis(a), Geometry::Axis(b)) => axis_iou(a, b),
        _ => polygon_iou(&a.outline(), &b.outline()),
    }
}

fn axis_iou(a: &AxisBox, b: &AxisBox) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0) as f32;
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0) as f32;
    let inter = ix * iy;
    if inter == 0.0 {
        return 0.0;
    }
    let union = (a.width() * a.height() + b.width() * b.height()) as f32 - inter;
    inter / union
}

fn polygon_iou(a: &[Point2f; 4], b: &[Point2f; 4]) -> f32 {
    let pa = quad_polygon(a);
    let pb = quad_polygon(b);
    let area_a = ring_area(pa.exterior());
    let area_b = ring_area(pb.exterior());
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }

    let inter = multipolygon_area(&pa.intersection(&pb, CLIP_FACTOR));
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    (inter / union) as f32
}

fn quad_polygon(q: &[Point2f; 4]) -> Polygon<f64> {
    let mut ring: Vec<Coord<f64>> = q
        .iter()
        .map(|p| Coord {
            x: p.x as f64,
            y: p.y as f64,
        })
        .collect();
    ring.push(ring[0]);
    Polygon::new(LineString::from(ring), vec![])
}

/// Unsigned shoelace area.
fn ring_area(ring: &LineString<f64>) -> f64 {
    let twice: f64 = ring
        .0
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum();
    (twice / 2.0).abs()
}

fn multipolygon_area(mp: &MultiPolygon<f64>) -> f64 {
    mp.0
        .iter()
        .map(|p| ring_area(p.exterior()) - p.interiors().iter().map(ring_area).sum::<f64>())
        .sum()
}
