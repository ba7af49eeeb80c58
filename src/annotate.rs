use image::Rgb;
use imageproc::drawing::draw_line_segment_mut;

use crate::detection::Detection;
use crate::image_impl::Mat;
use crate::types::ClassTable;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
];

/// Outline colour for a class; classes outside the table share the last entry.
pub fn class_color(class_id: usize, classes: &ClassTable) -> [u8; 3] {
    if class_id >= classes.len() {
        return PALETTE[PALETTE.len() - 1];
    }
    PALETTE[class_id % PALETTE.len()]
}

/// Copy of `img` with every detection outline drawn in its class colour.
pub fn annotate(img: &Mat, detections: &[Detection], classes: &ClassTable) -> Mat {
    let mut out = img.clone();
    let canvas = out.as_rgb8_mut();

    for det in detections {
        let color = Rgb(class_color(det.class_id, classes));
        let outline = det.geometry.outline();
        for i in 0..4 {
            let a = outline[i];
            let b = outline[(i + 1) % 4];
            draw_line_segment_mut(canvas, (a.x, a.y), (b.x, b.y), color);
        }
    }

    out
}
