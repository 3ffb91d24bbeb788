use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::frame::FrameSource;

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

/// Requested capture mode. The driver may settle on something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Exclusive V4L2 capture handle. Dropping it releases the device.
pub struct Camera {
    device: String,
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str, wanted: CaptureFormat) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {device}"))?;
        let current = dev.format().context("get format")?;

        // Prefer RGB at the requested size, then YUYV, else keep what the driver has
        let mut fmt = dev
            .set_format(&Format::new(wanted.width, wanted.height, FourCC::new(RGB3)))
            .unwrap_or(current);
        if fmt.fourcc != FourCC::new(RGB3) {
            let yuyv = Format::new(wanted.width, wanted.height, FourCC::new(YUYV));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }

        if let Err(e) = dev.set_params(&Parameters::with_fps(wanted.fps)) {
            log::warn!("camera {} refused {} fps: {}", device, wanted.fps, e);
        }

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        log::debug!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        Ok(Self {
            device: device.to_string(),
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: {}x{} fourcc={:?} seq={} len={}",
            self.width,
            self.height,
            self.fourcc,
            meta.sequence,
            data.len()
        );

        let pixels = (self.width * self.height) as usize;
        let rgb = match &self.fourcc.repr {
            RGB3 => data.get(..pixels * 3).map(<[u8]>::to_vec),
            YUYV => yuyv_to_rgb(data, pixels),
            GREY => grey_to_rgb(data, pixels),
            other => anyhow::bail!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(other)
            ),
        }
        .with_context(|| {
            format!(
                "short {:?} buffer: {} bytes for {}x{}",
                self.fourcc,
                data.len(),
                self.width,
                self.height
            )
        })?;

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<RgbImage> {
        self.frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        log::debug!("releasing camera {}", self.device);
    }
}

/// BT.601 YUYV 4:2:2 to packed RGB. `None` when `data` is short.
fn yuyv_to_rgb(data: &[u8], pixels: usize) -> Option<Vec<u8>> {
    let packed = data.get(..pixels * 2)?;
    let mut out = Vec::with_capacity(pixels * 3);
    for quad in packed.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0] as f32, quad[2] as f32] {
            out.push(to_u8(y + 1.402 * v));
            out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
            out.push(to_u8(y + 1.772 * u));
        }
    }
    Some(out)
}

fn grey_to_rgb(data: &[u8], pixels: usize) -> Option<Vec<u8>> {
    let luma = data.get(..pixels)?;
    Some(luma.iter().flat_map(|&y| [y, y, y]).collect())
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
