use ndarray::Array4;

use crate::engine::EngineError;
use crate::geometry::{letterbox, Letterbox};
use crate::image_impl::Mat;

pub struct DetPreProcess {
    pub input_size: u32,
    pub pad_value: u8,
}

impl DetPreProcess {
    pub fn new(input_size: u32, pad_value: u8) -> Self {
        Self {
            input_size,
            pad_value,
        }
    }

    pub fn run(&self, img: &Mat) -> Result<(Array4<f32>, Letterbox), EngineError> {
        let (boxed, lb) = letterbox(img, self.input_size, self.pad_value)?;
        Ok((self.normalize_and_permute(&boxed), lb))
    }

    /// HWC u8 RGB -> NCHW f32 in `[0, 1]`.
    fn normalize_and_permute(&self, img: &Mat) -> Array4<f32> {
        let h = img.rows() as usize;
        let w = img.cols() as usize;
        let scale = 1.0 / 255.0;

        let mut out = Array4::<f32>::zeros((1, 3, h, w));
        for (x, y, pix) in img.as_rgb8().enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            out[[0, 0, y, x]] = pix[0] as f32 * scale;
            out[[0, 1, y, x]] = pix[1] as f32 * scale;
            out[[0, 2, y, x]] = pix[2] as f32 * scale;
        }
        out
    }
}
