use crate::engine::EngineError;
use crate::image_impl::{
    self, get_perspective_transform, Mat, Point2f, Size, TransformError, INTER_LINEAR,
};

/// Tie-break weight on x when picking the top-left corner.
const TOP_LEFT_X_WEIGHT: f64 = 1e-6;

/// Order four points clockwise (y pointing down) starting at the top-left corner.
///
/// Points are sorted by polar angle around their centroid, the sequence is
/// rotated so the point minimising `y + x * 1e-6` comes first, and reversed
/// if the first two edges wind counter-clockwise. Collinear or duplicate
/// points are not rejected here.
pub fn order_points_clockwise(pts: &[Point2f; 4]) -> [Point2f; 4] {
    let cx = pts.iter().map(|p| p.x as f64).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y as f64).sum::<f64>() / 4.0;

    let mut sorted = *pts;
    sorted.sort_by(|a, b| {
        let angle_a = (a.y as f64 - cy).atan2(a.x as f64 - cx);
        let angle_b = (b.y as f64 - cy).atan2(b.x as f64 - cx);
        angle_a.partial_cmp(&angle_b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ordered = roll_to_top_left(sorted);

    let v1 = (ordered[1].x - ordered[0].x, ordered[1].y - ordered[0].y);
    let v2 = (ordered[2].x - ordered[1].x, ordered[2].y - ordered[1].y);
    let cross = v1.0 as f64 * v2.1 as f64 - v1.1 as f64 * v2.0 as f64;
    if cross < 0.0 {
        ordered.reverse();
        ordered = roll_to_top_left(ordered);
    }

    ordered
}

fn roll_to_top_left(mut pts: [Point2f; 4]) -> [Point2f; 4] {
    let mut top_left = 0;
    let mut best = f64::INFINITY;
    for (i, p) in pts.iter().enumerate() {
        let key = p.y as f64 + p.x as f64 * TOP_LEFT_X_WEIGHT;
        if key < best {
            best = key;
            top_left = i;
        }
    }
    pts.rotate_left(top_left);
    pts
}

/// In-plane rotation in degrees `[0, 360)` of the canonical top edge.
///
/// Anything other than exactly four points yields `0.0`.
pub fn rotation_angle(points: &[Point2f]) -> f32 {
    let Ok(quad) = <[Point2f; 4]>::try_from(points) else {
        return 0.0;
    };

    let pts = order_points_clockwise(&quad);
    let dx = (pts[1].x - pts[0].x) as f64;
    let dy = (pts[1].y - pts[0].y) as f64;
    let angle = ((dy.atan2(dx).to_degrees() + 360.0) % 360.0) as f32;
    // f32 rounding can push 359.99999999 up to exactly 360.
    if angle >= 360.0 {
        0.0
    } else {
        angle
    }
}

/// Target rectangle for a canonical quad: the longer of each pair of opposite
/// edges, rounded, never below one pixel.
pub fn quad_dimensions(rect: &[Point2f; 4]) -> Size {
    let width_a = rect[2].distance(&rect[3]);
    let width_b = rect[1].distance(&rect[0]);
    let max_width = (width_a.round() as i32).max(width_b.round() as i32).max(1);

    let height_a = rect[1].distance(&rect[2]);
    let height_b = rect[0].distance(&rect[3]);
    let max_height = (height_a.round() as i32).max(height_b.round() as i32).max(1);

    Size::new(max_width, max_height)
}

/// Pixel-centre corners of a `size` rectangle in canonical order.
pub fn rect_corners(size: Size) -> [Point2f; 4] {
    let w = (size.width - 1) as f32;
    let h = (size.height - 1) as f32;
    [
        Point2f::new(0.0, 0.0),
        Point2f::new(w, 0.0),
        Point2f::new(w, h),
        Point2f::new(0.0, h),
    ]
}

/// Every corner of the canonical quad turns clockwise (y down), i.e. the quad
/// is strictly convex. A rectangle only maps projectively onto such quads.
pub fn is_convex_clockwise(rect: &[Point2f; 4]) -> bool {
    (0..4).all(|i| {
        let (a, b, c) = (rect[i], rect[(i + 1) % 4], rect[(i + 2) % 4]);
        let cross = (b.x - a.x) as f64 * (c.y - b.y) as f64 - (b.y - a.y) as f64 * (c.x - b.x) as f64;
        cross > 0.0
    })
}

/// Rectify the canonical quad `rect` of `img` into an axis-aligned patch.
pub fn unwarp_quad(img: &Mat, rect: &[Point2f; 4]) -> Result<Mat, TransformError> {
    if !is_convex_clockwise(rect) {
        return Err(TransformError::Singular);
    }
    let size = quad_dimensions(rect);
    let m = get_perspective_transform(rect, &rect_corners(size))?;
    image_impl::warp_perspective(img, &m, size)
}

/// Project `patch` onto the canonical quad `rect` on a black canvas of `canvas` size.
pub fn warp_into_quad(patch: &Mat, rect: &[Point2f; 4], canvas: Size) -> Result<Mat, TransformError> {
    if !is_convex_clockwise(rect) {
        return Err(TransformError::Singular);
    }
    let m = get_perspective_transform(&rect_corners(patch.size()), rect)?;
    image_impl::warp_perspective(patch, &m, canvas)
}

/// Scale and padding applied by [`letterbox`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_left: f32,
    pub pad_top: f32,
}

impl Letterbox {
    pub fn to_original(&self, p: Point2f) -> Point2f {
        Point2f::new(
            (p.x - self.pad_left) / self.scale,
            (p.y - self.pad_top) / self.scale,
        )
    }
}

/// Aspect-preserving resize onto a `target x target` canvas, centred and
/// padded with `pad_value`.
pub fn letterbox(img: &Mat, target: u32, pad_value: u8) -> Result<(Mat, Letterbox), EngineError> {
    use image::{imageops, Rgb, RgbImage};

    if img.empty() || target == 0 {
        return Err(EngineError::Preprocess(format!(
            "cannot letterbox {}x{} image to {target}",
            img.cols(),
            img.rows()
        )));
    }

    let w = img.cols() as f32;
    let h = img.rows() as f32;
    let scale = (target as f32 / w).min(target as f32 / h);
    let new_w = ((w * scale).round() as i32).clamp(1, target as i32);
    let new_h = ((h * scale).round() as i32).clamp(1, target as i32);

    let resized = image_impl::resize(img, Size::new(new_w, new_h), INTER_LINEAR)
        .map_err(|e| EngineError::Preprocess(e.to_string()))?;

    let pad_left = (target as i32 - new_w) / 2;
    let pad_top = (target as i32 - new_h) / 2;

    let mut canvas = RgbImage::from_pixel(target, target, Rgb([pad_value; 3]));
    imageops::replace(&mut canvas, resized.as_rgb8(), pad_left as i64, pad_top as i64);

    Ok((
        Mat::new(canvas),
        Letterbox {
            scale,
            pad_left: pad_left as f32,
            pad_top: pad_top as f32,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pts(raw: [(f32, f32); 4]) -> [Point2f; 4] {
        raw.map(|(x, y)| Point2f::new(x, y))
    }

    fn rotated_square(center: (f64, f64), side: f64, theta_deg: f64) -> [Point2f; 4] {
        let (s, c) = theta_deg.to_radians().sin_cos();
        let h = side / 2.0;
        [(-h, -h), (h, -h), (h, h), (-h, h)].map(|(dx, dy)| {
            Point2f::new(
                (center.0 + dx * c - dy * s) as f32,
                (center.1 + dx * s + dy * c) as f32,
            )
        })
    }

    fn congruent(a: f32, b: f32, period: f32, tol: f32) -> bool {
        let d = (a - b).rem_euclid(period);
        d < tol || period - d < tol
    }

    #[test]
    fn orders_shuffled_square() {
        let expected = pts([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let shuffled = pts([(10.0, 10.0), (0.0, 0.0), (0.0, 10.0), (10.0, 0.0)]);
        assert_eq!(order_points_clockwise(&shuffled), expected);
    }

    #[test]
    fn reverses_counter_clockwise_input() {
        let ccw = pts([(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)]);
        let ordered = order_points_clockwise(&ccw);
        assert_eq!(ordered, pts([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]));
    }

    #[test]
    fn canonical_order_is_idempotent() {
        let quad = pts([(31.0, 80.0), (12.5, 40.0), (70.0, 15.0), (90.0, 66.0)]);
        let once = order_points_clockwise(&quad);
        assert_eq!(order_points_clockwise(&once), once);
    }

    #[test]
    fn canonical_order_ignores_input_permutation() {
        let quad = pts([(31.0, 80.0), (12.5, 40.0), (70.0, 15.0), (90.0, 66.0)]);
        let reference = order_points_clockwise(&quad);
        let mut idx = [0usize, 1, 2, 3];
        // Heap's algorithm over all 24 orderings.
        let mut c = [0usize; 4];
        let mut i = 0;
        while i < 4 {
            if c[i] < i {
                if i % 2 == 0 {
                    idx.swap(0, i);
                } else {
                    idx.swap(c[i], i);
                }
                let permuted = idx.map(|k| quad[k]);
                assert_eq!(order_points_clockwise(&permuted), reference);
                c[i] += 1;
                i = 0;
            } else {
                c[i] = 0;
                i += 1;
            }
        }
    }

    #[test]
    fn canonical_start_is_topmost_point() {
        let quad = pts([(12.5, 40.0), (70.0, 15.0), (90.0, 66.0), (31.0, 80.0)]);
        let ordered = order_points_clockwise(&quad);
        assert_eq!(ordered[0], Point2f::new(70.0, 15.0));
        assert_eq!(ordered[1], Point2f::new(90.0, 66.0));
    }

    #[test]
    fn axis_aligned_square_has_zero_rotation() {
        let square = pts([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert_eq!(rotation_angle(&square), 0.0);
    }

    #[test]
    fn rotation_of_rigid_square_is_recovered_modulo_symmetry() {
        for theta in [0.0f32, 30.0, 90.0, 180.0, 270.0, 359.0] {
            let square = rotated_square((50.0, 50.0), 10.0, theta as f64);
            let angle = rotation_angle(&square);
            assert!((0.0..360.0).contains(&angle), "angle {angle} out of range");
            assert!(
                congruent(angle, theta, 90.0, 1e-3),
                "theta {theta}: estimated {angle}"
            );
        }
    }

    #[test]
    fn rotation_of_small_angle_is_exact() {
        let square = rotated_square((50.0, 50.0), 10.0, 30.0);
        assert_relative_eq!(rotation_angle(&square), 30.0, epsilon = 1e-3);
    }

    #[test]
    fn rotation_needs_four_points() {
        let three = [Point2f::new(0.0, 0.0), Point2f::new(1.0, 0.0), Point2f::new(0.0, 1.0)];
        assert_eq!(rotation_angle(&three), 0.0);
        assert_eq!(rotation_angle(&[]), 0.0);
    }

    #[test]
    fn dimensions_use_longest_edges_and_clamp() {
        let quad = pts([(0.0, 0.0), (40.0, 0.0), (42.0, 20.0), (0.0, 30.0)]);
        let size = quad_dimensions(&quad);
        assert_eq!(size.width, 43);
        assert_eq!(size.height, 30);

        let collapsed = pts([(5.0, 5.0); 4]);
        assert_eq!(quad_dimensions(&collapsed), Size::new(1, 1));
    }

    #[test]
    fn only_strictly_convex_quads_are_warpable() {
        let square = pts([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert!(is_convex_clockwise(&square));

        let dart = order_points_clockwise(&pts([(50.0, 50.0), (130.0, 50.0), (60.0, 60.0), (50.0, 130.0)]));
        assert!(!is_convex_clockwise(&dart));
        let patch = Mat::from_pixel(4, 4, [255, 0, 0]);
        assert_eq!(warp_into_quad(&patch, &dart, Size::new(200, 200)), Err(TransformError::Singular));
        assert_eq!(unwarp_quad(&patch, &dart), Err(TransformError::Singular));

        let counter_clockwise = pts([(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)]);
        assert!(!is_convex_clockwise(&counter_clockwise));
    }

    #[test]
    fn unwarp_of_axis_aligned_region_is_a_crop() {
        let mut img = Mat::from_pixel(30, 30, [0, 0, 0]);
        for y in 10..20 {
            for x in 5..25 {
                img.put_pixel(x, y, [x as u8 * 10, y as u8 * 10, 7]);
            }
        }
        let quad = pts([(5.0, 10.0), (24.0, 10.0), (24.0, 19.0), (5.0, 19.0)]);
        let patch = unwarp_quad(&img, &quad).unwrap();
        assert_eq!(patch.size(), Size::new(19, 9));
        assert_eq!(patch.get_pixel(0, 0), img.get_pixel(5, 10));
    }

    #[test]
    fn letterbox_maps_back_to_original() {
        let img = Mat::from_pixel(200, 100, [1, 2, 3]);
        let (boxed, lb) = letterbox(&img, 64, 114).unwrap();
        assert_eq!(boxed.size(), Size::new(64, 64));
        assert_relative_eq!(lb.scale, 0.32);
        assert_eq!(lb.pad_left, 0.0);
        assert_eq!(lb.pad_top, 16.0);
        assert_eq!(boxed.get_pixel(0, 0), [114, 114, 114]);
        assert_eq!(boxed.get_pixel(32, 32), [1, 2, 3]);

        let p = lb.to_original(Point2f::new(32.0, 32.0));
        assert_relative_eq!(p.x, 100.0, epsilon = 1e-3);
        assert_relative_eq!(p.y, 50.0, epsilon = 1e-3);
    }
}
