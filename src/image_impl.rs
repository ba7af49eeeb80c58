//! Image abstraction layer: an RGB8 `Mat`, resampling and projective warps.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2f {
    pub x: f32,
    pub y: f32,
}

impl Default for Point2f {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

impl Point2f {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2f) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("degenerate point set, perspective transform is singular")]
    Singular,

    #[error("warp output {width}x{height} exceeds {max_pixels} pixels")]
    OutputTooLarge { width: i32, height: i32, max_pixels: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResizeError {
    #[error("cannot resize {src_w}x{src_h} image to {dst_w}x{dst_h}")]
    EmptyDimension {
        src_w: i32,
        src_h: i32,
        dst_w: i32,
        dst_h: i32,
    },

    #[error("resize target {dst_w}x{dst_h} exceeds {max_pixels} pixels")]
    TooLarge { dst_w: i32, dst_h: i32, max_pixels: u64 },
}

/// Upper bound on the pixel count of any buffer produced by [`resize`] or
/// [`warp_perspective`].
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 26;

/// `width * height`, or `None` when a side is negative or the product overflows.
fn pixel_count(size: Size) -> Option<u64> {
    let w = u64::try_from(size.width).ok()?;
    let h = u64::try_from(size.height).ok()?;
    w.checked_mul(h)
}

/// Owned RGB8 raster.
#[derive(Clone, Debug, PartialEq)]
pub struct Mat {
    image: RgbImage,
}

impl Default for Mat {
    fn default() -> Self {
        Self {
            image: RgbImage::new(1, 1),
        }
    }
}

impl Mat {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            image: image.into_rgb8(),
        }
    }

    /// Solid-colour image, zero sized dimensions allowed.
    pub fn from_pixel(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(color)),
        }
    }

    pub fn rows(&self) -> i32 {
        self.image.height() as i32
    }

    pub fn cols(&self) -> i32 {
        self.image.width() as i32
    }

    pub fn size(&self) -> Size {
        Size::new(self.cols(), self.rows())
    }

    pub fn empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn as_rgb8(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_rgb8_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.image.put_pixel(x, y, Rgb(color));
    }
}

pub fn imread<P: AsRef<Path>>(path: P) -> image::ImageResult<Mat> {
    let img = image::open(path)?;
    Ok(Mat::from_dynamic(img))
}

pub fn imwrite<P: AsRef<Path>>(path: P, img: &Mat) -> image::ImageResult<()> {
    img.image.save(path)
}

pub fn resize(src: &Mat, dsize: Size, interpolation: i32) -> Result<Mat, ResizeError> {
    resize_bounded(src, dsize, interpolation, MAX_OUTPUT_PIXELS)
}

/// [`resize`] refusing targets above `max_pixels` before allocating.
pub fn resize_bounded(src: &Mat, dsize: Size, interpolation: i32, max_pixels: u64) -> Result<Mat, ResizeError> {
    if src.empty() || dsize.width <= 0 || dsize.height <= 0 {
        return Err(ResizeError::EmptyDimension {
            src_w: src.cols(),
            src_h: src.rows(),
            dst_w: dsize.width,
            dst_h: dsize.height,
        });
    }
    let max_pixels = max_pixels.min(MAX_OUTPUT_PIXELS);
    if pixel_count(dsize).map_or(true, |n| n > max_pixels) {
        return Err(ResizeError::TooLarge {
            dst_w: dsize.width,
            dst_h: dsize.height,
            max_pixels,
        });
    }

    let filter = match interpolation {
        INTER_AREA => return Ok(resize_area(src, dsize)),
        INTER_CUBIC => image::imageops::FilterType::CatmullRom,
        _ => image::imageops::FilterType::Triangle,
    };

    let resized = image::imageops::resize(
        &src.image,
        dsize.width as u32,
        dsize.height as u32,
        filter,
    );
    Ok(Mat::new(resized))
}

/// Pixel-area relation resampling: every output pixel is the coverage-weighted
/// mean of the source pixels under its footprint. Callers guarantee non-empty
/// source and destination.
fn resize_area(src: &Mat, dsize: Size) -> Mat {
    let (src_w, src_h) = (src.image.width(), src.image.height());
    let (dst_w, dst_h) = (dsize.width as u32, dsize.height as u32);
    if (src_w, src_h) == (dst_w, dst_h) {
        return src.clone();
    }

    let x_spans = area_spans(dst_w, src_w);
    let y_spans = area_spans(dst_h, src_h);
    let mut out = RgbImage::new(dst_w, dst_h);

    for (dy, ys) in y_spans.iter().enumerate() {
        for (dx, xs) in x_spans.iter().enumerate() {
            let mut acc = [0.0f64; 3];
            let mut total = 0.0f64;
            for &(sy, wy) in ys {
                for &(sx, wx) in xs {
                    let w = wx * wy;
                    let p = src.image.get_pixel(sx, sy);
                    acc[0] += p[0] as f64 * w;
                    acc[1] += p[1] as f64 * w;
                    acc[2] += p[2] as f64 * w;
                    total += w;
                }
            }
            let px = acc.map(|v| (v / total).round().clamp(0.0, 255.0) as u8);
            out.put_pixel(dx as u32, dy as u32, Rgb(px));
        }
    }

    Mat::new(out)
}

/// Source indices and coverage weights for each destination index along one axis.
fn area_spans(dst_len: u32, src_len: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src_len as f64);
            let mut span = Vec::new();
            let mut s = start.floor() as u32;
            while (s as f64) < end && s < src_len {
                let lo = start.max(s as f64);
                let hi = end.min(s as f64 + 1.0);
                if hi > lo {
                    span.push((s, hi - lo));
                }
                s += 1;
            }
            if span.is_empty() {
                span.push(((start.floor() as u32).min(src_len - 1), 1.0));
            }
            span
        })
        .collect()
}

/// Inverse-map every destination pixel through `matrix` and sample the source
/// bilinearly. Samples mapping outside `[0, w-1] x [0, h-1]` stay zero.
pub fn warp_perspective(
    src: &Mat,
    matrix: &[[f64; 3]; 3],
    dsize: Size,
) -> Result<Mat, TransformError> {
    if pixel_count(dsize).map_or(false, |n| n > MAX_OUTPUT_PIXELS) {
        return Err(TransformError::OutputTooLarge {
            width: dsize.width,
            height: dsize.height,
            max_pixels: MAX_OUTPUT_PIXELS,
        });
    }
    let mut out_img = RgbImage::new(dsize.width.max(0) as u32, dsize.height.max(0) as u32);
    let m_inv = invert_matrix_3x3(matrix)?;
    if src.empty() {
        return Ok(Mat::new(out_img));
    }

    let (m00, m01, m02) = (m_inv[0][0], m_inv[0][1], m_inv[0][2]);
    let (m10, m11, m12) = (m_inv[1][0], m_inv[1][1], m_inv[1][2]);
    let (m20, m21, m22) = (m_inv[2][0], m_inv[2][1], m_inv[2][2]);

    for y in 0..out_img.height() {
        let y_f = y as f64;
        let m01y = m01 * y_f;
        let m11y = m11 * y_f;
        let m21y = m21 * y_f;

        for x in 0..out_img.width() {
            let x_f = x as f64;
            let w = m20 * x_f + m21y + m22;
            if w.abs() < 1e-12 {
                continue;
            }
            let src_x = (m00 * x_f + m01y + m02) / w;
            let src_y = (m10 * x_f + m11y + m12) / w;

            if let Some(px) = sample_bilinear(&src.image, src_x, src_y) {
                out_img.put_pixel(x, y, Rgb(px));
            }
        }
    }

    Ok(Mat::new(out_img))
}

fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Option<[u8; 3]> {
    const EDGE_EPS: f64 = 1e-6;

    let max_x = (img.width() - 1) as f64;
    let max_y = (img.height() - 1) as f64;
    // Negated comparisons so NaN coordinates are rejected too.
    if !(x >= -EDGE_EPS && x <= max_x + EDGE_EPS && y >= -EDGE_EPS && y <= max_y + EDGE_EPS) {
        return None;
    }

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut px = [0u8; 3];
    for (c, out) in px.iter_mut().enumerate() {
        let v = (1.0 - fx) * (1.0 - fy) * p00[c] as f64
            + fx * (1.0 - fy) * p10[c] as f64
            + (1.0 - fx) * fy * p01[c] as f64
            + fx * fy * p11[c] as f64;
        *out = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(px)
}

/// Solve the homography taking `src_pts[i]` to `dst_pts[i]`.
///
/// Fails with [`TransformError::Singular`] when either point set has three
/// collinear (or coincident) points, or when the linear system has no
/// consistent solution.
pub fn get_perspective_transform(
    src_pts: &[Point2f; 4],
    dst_pts: &[Point2f; 4],
) -> Result<[[f64; 3]; 3], TransformError> {
    use nalgebra::{SMatrix, SVector};

    if is_degenerate(src_pts) || is_degenerate(dst_pts) {
        return Err(TransformError::Singular);
    }

    // Eight unknowns with c22 fixed to 1.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let x = src_pts[i].x as f64;
        let y = src_pts[i].y as f64;
        let u = dst_pts[i].x as f64;
        let v = dst_pts[i].y as f64;

        a[(i, 0)] = x;
        a[(i, 1)] = y;
        a[(i, 2)] = 1.0;
        a[(i, 6)] = -u * x;
        a[(i, 7)] = -u * y;
        b[i] = u;

        a[(i + 4, 3)] = x;
        a[(i + 4, 4)] = y;
        a[(i + 4, 5)] = 1.0;
        a[(i + 4, 6)] = -v * x;
        a[(i + 4, 7)] = -v * y;
        b[i + 4] = v;
    }

    let h = a.lu().solve(&b).ok_or(TransformError::Singular)?;
    let residual = (a * h - b).norm();
    if !residual.is_finite() || residual > 1e-6 * (1.0 + b.norm()) {
        return Err(TransformError::Singular);
    }

    let m = [
        [h[0], h[1], h[2]],
        [h[3], h[4], h[5]],
        [h[6], h[7], 1.0],
    ];
    invert_matrix_3x3(&m)?;
    Ok(m)
}

/// True when any three of the four points are collinear or coincident.
fn is_degenerate(pts: &[Point2f; 4]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES.iter().any(|&(i, j, k)| {
        let (ax, ay) = ((pts[j].x - pts[i].x) as f64, (pts[j].y - pts[i].y) as f64);
        let (bx, by) = ((pts[k].x - pts[i].x) as f64, (pts[k].y - pts[i].y) as f64);
        let cross = ax * by - ay * bx;
        cross.abs() <= 1e-6 * ax.hypot(ay) * bx.hypot(by)
    })
}

pub fn invert_matrix_3x3(m: &[[f64; 3]; 3]) -> Result<[[f64; 3]; 3], TransformError> {
    use nalgebra::Matrix3;

    let mat = Matrix3::new(
        m[0][0], m[0][1], m[0][2],
        m[1][0], m[1][1], m[1][2],
        m[2][0], m[2][1], m[2][2],
    );

    let inv = mat.try_inverse().ok_or(TransformError::Singular)?;
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(TransformError::Singular);
    }

    Ok([
        [inv[(0, 0)], inv[(0, 1)], inv[(0, 2)]],
        [inv[(1, 0)], inv[(1, 1)], inv[(1, 2)]],
        [inv[(2, 0)], inv[(2, 1)], inv[(2, 2)]],
    ])
}

/// Apply a homography to a single point.
pub fn perspective_point(m: &[[f64; 3]; 3], p: Point2f) -> Point2f {
    let (x, y) = (p.x as f64, p.y as f64);
    let w = m[2][0] * x + m[2][1] * y + m[2][2];
    Point2f::new(
        ((m[0][0] * x + m[0][1] * y + m[0][2]) / w) as f32,
        ((m[1][0] * x + m[1][1] * y + m[1][2]) / w) as f32,
    )
}

/// Corners of a rotated rectangle, angle in degrees (clockwise on screen).
pub fn box_points(center: Point2f, width: f32, height: f32, angle: f32) -> [Point2f; 4] {
    let angle_rad = angle.to_radians();
    let cos_a = angle_rad.cos();
    let sin_a = angle_rad.sin();

    let w = width / 2.0;
    let h = height / 2.0;

    let corners = [(-w, -h), (w, -h), (w, h), (-w, h)];

    corners.map(|(dx, dy)| {
        Point2f::new(
            center.x + dx * cos_a - dy * sin_a,
            center.y + dx * sin_a + dy * cos_a,
        )
    })
}

pub const INTER_LINEAR: i32 = 1;
pub const INTER_CUBIC: i32 = 2;
pub const INTER_AREA: i32 = 3;
