//! Per-region operations: rectified extraction and in-place replacement.

use log::{debug, warn};
use serde::Serialize;

use crate::detection::AxisBox;
use crate::geometry::{order_points_clockwise, quad_dimensions, rotation_angle, unwarp_quad, warp_into_quad};
use crate::image_impl::{self, Mat, Point2f, Size, INTER_AREA};

/// Failures that skip a single region without aborting the call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionError {
    #[error("perspective transform is singular for this region")]
    TransformSingular,

    #[error("region {width}x{height} is below the minimum size")]
    RegionTooSmall { width: i32, height: i32 },

    #[error("could not resize substitute: {message}")]
    ResizeFailure { message: String },

    #[error("warped substitute covers no pixels")]
    EmptyMask,
}

impl From<image_impl::TransformError> for RegionError {
    fn from(e: image_impl::TransformError) -> Self {
        match e {
            image_impl::TransformError::Singular => RegionError::TransformSingular,
            image_impl::TransformError::OutputTooLarge { .. } => RegionError::ResizeFailure {
                message: e.to_string(),
            },
        }
    }
}

/// A substitute is never resized beyond this many multiples of the canvas area.
const MAX_PATCH_TO_CANVAS: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatedReplacement {
    pub pixels_written: usize,
    /// The substitute could not be resized and was warped at its own size.
    pub resize_fallback: bool,
}

/// Rectify the quad spanned by `points` into an axis-aligned patch and report
/// its rotation. Inputs without exactly four points return the image as is.
pub fn extract_rotated_region(img: &Mat, points: &[Point2f]) -> Result<(Mat, f32), RegionError> {
    let Ok(quad) = <[Point2f; 4]>::try_from(points) else {
        return Ok((img.clone(), 0.0));
    };

    let rect = order_points_clockwise(&quad);
    let warped = unwarp_quad(img, &rect)?;
    Ok((warped, rotation_angle(points)))
}

/// Warp `replacement` onto the quad `points` of `dst` and overwrite the
/// covered pixels.
///
/// `angle` is informational: the homography from the substitute's corners to
/// the canonical quad already carries the orientation, so the pixels written
/// do not depend on it. On any error `dst` is left untouched.
pub fn replace_rotated_region(
    dst: &mut Mat,
    replacement: &Mat,
    points: &[Point2f; 4],
    angle: f32,
) -> Result<RotatedReplacement, RegionError> {
    let rect = order_points_clockwise(points);
    let size = quad_dimensions(&rect);
    debug!(
        "rotated region {:?} -> {}x{} patch, angle {:.2}",
        rect, size.width, size.height, angle
    );

    let canvas_pixels = dst.cols().max(1) as u64 * dst.rows().max(1) as u64;
    let max_pixels = canvas_pixels.saturating_mul(MAX_PATCH_TO_CANVAS);
    let (resized, resize_fallback) = match image_impl::resize_bounded(replacement, size, INTER_AREA, max_pixels) {
        Ok(resized) => (resized, false),
        Err(e) => {
            warn!("resize to {}x{} failed ({e}), using substitute as is", size.width, size.height);
            (replacement.clone(), true)
        }
    };

    let warped = match warp_into_quad(&resized, &rect, dst.size()) {
        Ok(warped) => warped,
        Err(e) => {
            warn!("perspective transform failed: {e}");
            return Err(e.into());
        }
    };

    let pixels_written = composite_nonzero(dst, &warped);
    if pixels_written == 0 {
        return Err(RegionError::EmptyMask);
    }

    Ok(RotatedReplacement {
        pixels_written,
        resize_fallback,
    })
}

/// Copy every pixel of `src` that is non-zero in any channel onto `dst`.
fn composite_nonzero(dst: &mut Mat, src: &Mat) -> usize {
    let mut written = 0;
    let dst_img = dst.as_rgb8_mut();
    for (d, s) in dst_img.pixels_mut().zip(src.as_rgb8().pixels()) {
        if s.0 != [0, 0, 0] {
            *d = *s;
            written += 1;
        }
    }
    written
}

/// Resize `replacement` into the clamped `bbox` of `dst`.
///
/// Returns the clamped box that was written.
pub fn replace_axis_region(
    dst: &mut Mat,
    replacement: &Mat,
    bbox: AxisBox,
    min_side: i32,
) -> Result<AxisBox, RegionError> {
    let clamped = bbox.clamped(dst.cols().max(0) as u32, dst.rows().max(0) as u32);
    let (width, height) = (clamped.width(), clamped.height());
    if width < min_side || height < min_side || width <= 0 || height <= 0 {
        debug!("box {:?} is {}x{}, too small to replace", clamped, width, height);
        return Err(RegionError::RegionTooSmall { width, height });
    }

    let resized = image_impl::resize(replacement, Size::new(width, height), INTER_AREA).map_err(|e| {
        warn!(
            "failed to replace at ({},{})-({},{}): {e}",
            clamped.x1, clamped.y1, clamped.x2, clamped.y2
        );
        RegionError::ResizeFailure {
            message: e.to_string(),
        }
    })?;

    image::imageops::replace(
        dst.as_rgb8_mut(),
        resized.as_rgb8(),
        clamped.x1 as i64,
        clamped.y1 as i64,
    );
    Ok(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAY: [u8; 3] = [128, 128, 128];
    const RED: [u8; 3] = [255, 0, 0];

    fn pts(raw: [(f32, f32); 4]) -> [Point2f; 4] {
        raw.map(|(x, y)| Point2f::new(x, y))
    }

    #[test]
    fn small_axis_box_is_skipped_without_mutation() {
        let mut dst = Mat::from_pixel(100, 100, GRAY);
        let before = dst.clone();
        let res = replace_axis_region(&mut dst, &Mat::from_pixel(20, 20, RED), AxisBox::new(5, 5, 8, 8), 10);
        assert_eq!(res, Err(RegionError::RegionTooSmall { width: 3, height: 3 }));
        assert_eq!(dst, before);
    }

    #[test]
    fn axis_box_is_filled_exactly() {
        let mut dst = Mat::from_pixel(100, 100, GRAY);
        let written =
            replace_axis_region(&mut dst, &Mat::from_pixel(20, 20, RED), AxisBox::new(10, 10, 50, 50), 10).unwrap();
        assert_eq!(written, AxisBox::new(10, 10, 50, 50));
        for y in 0..100 {
            for x in 0..100 {
                let inside = (10..50).contains(&x) && (10..50).contains(&y);
                assert_eq!(dst.get_pixel(x, y), if inside { RED } else { GRAY }, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn axis_box_past_the_border_is_clamped() {
        let mut dst = Mat::from_pixel(40, 40, GRAY);
        let written =
            replace_axis_region(&mut dst, &Mat::from_pixel(8, 8, RED), AxisBox::new(20, -10, 90, 30), 10).unwrap();
        assert_eq!(written, AxisBox::new(20, 0, 39, 30));
        assert_eq!(dst.get_pixel(38, 0), RED);
        assert_eq!(dst.get_pixel(39, 0), GRAY);
        assert_eq!(dst.get_pixel(20, 30), GRAY);
    }

    #[test]
    fn empty_substitute_is_a_resize_failure() {
        let mut dst = Mat::from_pixel(40, 40, GRAY);
        let before = dst.clone();
        let res = replace_axis_region(&mut dst, &Mat::from_pixel(0, 0, RED), AxisBox::new(0, 0, 20, 20), 10);
        assert!(matches!(res, Err(RegionError::ResizeFailure { .. })));
        assert_eq!(dst, before);
    }

    #[test]
    fn rotated_replacement_touches_only_the_quad() {
        let sentinel = [7, 7, 7];
        let mut dst = Mat::from_pixel(60, 60, sentinel);
        let quad = pts([(30.0, 10.0), (50.0, 30.0), (30.0, 50.0), (10.0, 30.0)]);
        let out = replace_rotated_region(&mut dst, &Mat::from_pixel(16, 16, RED), &quad, 45.0).unwrap();
        assert!(out.pixels_written > 0);
        assert!(!out.resize_fallback);
        assert_eq!(dst.get_pixel(30, 30), RED);

        // Diamond |x-30| + |y-30| <= 20; anything beyond it by half a pixel is untouched.
        for y in 0..60u32 {
            for x in 0..60u32 {
                let manhattan = (x as f32 - 30.0).abs() + (y as f32 - 30.0).abs();
                if manhattan > 20.5 {
                    assert_eq!(dst.get_pixel(x, y), sentinel, "pixel ({x},{y}) modified");
                }
            }
        }
    }

    #[test]
    fn concave_quad_is_rejected_without_painting() {
        let sentinel = [7, 7, 7];
        let mut dst = Mat::from_pixel(200, 200, sentinel);
        let before = dst.clone();
        // (60,60) sits inside the triangle of the other three corners.
        let dart = pts([(50.0, 50.0), (130.0, 50.0), (60.0, 60.0), (50.0, 130.0)]);
        let res = replace_rotated_region(&mut dst, &Mat::from_pixel(16, 16, RED), &dart, 0.0);
        assert_eq!(res, Err(RegionError::TransformSingular));
        assert_eq!(dst, before);

        assert_eq!(extract_rotated_region(&before, &dart).err(), Some(RegionError::TransformSingular));
    }

    #[test]
    fn quad_far_beyond_the_canvas_falls_back_to_the_unresized_substitute() {
        let mut dst = Mat::from_pixel(100, 100, GRAY);
        let huge = pts([(-60000.0, -60000.0), (60000.0, -60000.0), (60000.0, 60000.0), (-60000.0, 60000.0)]);
        let out = replace_rotated_region(&mut dst, &Mat::from_pixel(20, 20, RED), &huge, 0.0).unwrap();
        assert!(out.resize_fallback);
        assert_eq!(out.pixels_written, 100 * 100);
        assert!(dst.as_rgb8().pixels().all(|p| p.0 == RED));
    }

    #[test]
    fn long_band_uses_resize_fallback_and_stays_on_canvas() {
        let mut dst = Mat::from_pixel(100, 100, GRAY);
        // 2000x40 patch is 80000 pixels, past four times the 100x100 canvas.
        let band = crate::image_impl::box_points(Point2f::new(50.0, 50.0), 2000.0, 40.0, 30.0);
        let out = replace_rotated_region(&mut dst, &Mat::from_pixel(20, 20, RED), &band, 30.0).unwrap();
        assert!(out.resize_fallback);
        assert!(out.pixels_written > 0 && out.pixels_written < 100 * 100);
        assert_eq!(dst.get_pixel(50, 50), RED);
        assert_eq!(dst.get_pixel(85, 70), RED);
        assert_eq!(dst.get_pixel(0, 99), GRAY);
        assert_eq!(dst.get_pixel(99, 0), GRAY);
    }

    #[test]
    fn huge_quad_extraction_is_refused() {
        let img = Mat::from_pixel(10, 10, GRAY);
        let huge = pts([(-60000.0, -60000.0), (60000.0, -60000.0), (60000.0, 60000.0), (-60000.0, 60000.0)]);
        assert!(matches!(
            extract_rotated_region(&img, &huge),
            Err(RegionError::ResizeFailure { .. })
        ));
    }

    #[test]
    fn degenerate_quad_leaves_destination_untouched() {
        let mut dst = Mat::from_pixel(30, 30, GRAY);
        let before = dst.clone();
        let line = pts([(1.0, 1.0), (5.0, 5.0), (10.0, 10.0), (20.0, 20.0)]);
        let res = replace_rotated_region(&mut dst, &Mat::from_pixel(4, 4, RED), &line, 0.0);
        assert_eq!(res, Err(RegionError::TransformSingular));
        assert_eq!(dst, before);
    }

    #[test]
    fn black_substitute_yields_empty_mask() {
        let mut dst = Mat::from_pixel(30, 30, GRAY);
        let before = dst.clone();
        let quad = pts([(5.0, 5.0), (20.0, 5.0), (20.0, 20.0), (5.0, 20.0)]);
        let res = replace_rotated_region(&mut dst, &Mat::from_pixel(4, 4, [0, 0, 0]), &quad, 0.0);
        assert_eq!(res, Err(RegionError::EmptyMask));
        assert_eq!(dst, before);
    }

    #[test]
    fn quad_outside_the_canvas_yields_empty_mask() {
        let mut dst = Mat::from_pixel(30, 30, GRAY);
        let quad = pts([(100.0, 100.0), (120.0, 100.0), (120.0, 120.0), (100.0, 120.0)]);
        let res = replace_rotated_region(&mut dst, &Mat::from_pixel(4, 4, RED), &quad, 0.0);
        assert_eq!(res, Err(RegionError::EmptyMask));
    }

    #[test]
    fn empty_substitute_is_never_composited() {
        let mut dst = Mat::from_pixel(30, 30, GRAY);
        let quad = pts([(5.0, 5.0), (20.0, 5.0), (20.0, 20.0), (5.0, 20.0)]);
        let before = dst.clone();
        // A 0x0 substitute cannot be resized; the fallback then has nothing to warp.
        let res = replace_rotated_region(&mut dst, &Mat::from_pixel(0, 0, RED), &quad, 0.0);
        assert_eq!(res, Err(RegionError::EmptyMask));
        assert_eq!(dst, before);
    }

    // The angle argument is carried for callers but does not steer the warp.
    // Pinned here so a change in that contract is a deliberate decision.
    #[test]
    fn rotation_angle_argument_does_not_change_output() {
        let quad = pts([(12.0, 4.0), (40.0, 14.0), (30.0, 42.0), (3.0, 31.0)]);
        let mut substitute = Mat::from_pixel(10, 6, RED);
        substitute.put_pixel(0, 0, [0, 255, 0]);

        let mut a = Mat::from_pixel(50, 50, GRAY);
        let mut b = a.clone();
        replace_rotated_region(&mut a, &substitute, &quad, 0.0).unwrap();
        replace_rotated_region(&mut b, &substitute, &quad, 137.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn warp_then_unwarp_reproduces_solid_colour() {
        let color = [30, 160, 90];
        let mut dst = Mat::from_pixel(80, 80, GRAY);
        let quad = pts([(20.0, 20.0), (59.0, 20.0), (59.0, 49.0), (20.0, 49.0)]);
        replace_rotated_region(&mut dst, &Mat::from_pixel(10, 10, color), &quad, 0.0).unwrap();

        let (patch, angle) = extract_rotated_region(&dst, &quad).unwrap();
        assert_eq!(angle, 0.0);
        assert_eq!(patch.size(), Size::new(39, 29));
        for p in patch.as_rgb8().pixels() {
            for c in 0..3 {
                assert!((p[c] as i32 - color[c] as i32).abs() <= 1, "got {:?}", p.0);
            }
        }
    }

    #[test]
    fn extraction_needs_four_points() {
        let img = Mat::from_pixel(10, 10, GRAY);
        let (out, angle) = extract_rotated_region(&img, &[Point2f::new(1.0, 1.0)]).unwrap();
        assert_eq!(out, img);
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn extraction_reports_rotation() {
        let img = Mat::from_pixel(60, 60, GRAY);
        let quad = crate::image_impl::box_points(Point2f::new(30.0, 30.0), 20.0, 10.0, 20.0);
        let (patch, angle) = extract_rotated_region(&img, &quad).unwrap();
        assert!((angle - 20.0).abs() < 1e-3);
        assert_eq!(patch.size(), Size::new(20, 10));
    }
}
