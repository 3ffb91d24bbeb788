use anyhow::Result;
use image::{imageops::FilterType, RgbImage};

/// Anything that yields RGB frames one at a time, such as a [`crate::Camera`].
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<RgbImage>;
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn next_frame(&mut self) -> Result<RgbImage> {
        (**self).next_frame()
    }
}

/// Shrink a frame by `factor` in each dimension (bilinear), never below 1x1.
pub fn downscale(frame: &RgbImage, factor: u32) -> RgbImage {
    if factor <= 1 {
        return frame.clone();
    }
    let (w, h) = frame.dimensions();
    let width = (w / factor).max(1);
    let height = (h / factor).max(1);
    image::imageops::resize(frame, width, height, FilterType::Triangle)
}
