use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet runs on a fixed square input.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace consumes aligned 112x112 crops.
pub const ENCODER_INPUT: u32 = 112;

// ArcFace template eye positions inside a 112x112 crop
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// A face located by the detector, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // eyes, nose tip, mouth corners as x,y pairs
}

impl Detection {
    /// Shift a detection found in a sub-image into parent image coordinates.
    pub fn offset(mut self, dx: f32, dy: f32) -> Self {
        self.bbox[0] += dx;
        self.bbox[1] += dy;
        for point in self.landmarks.chunks_exact_mut(2) {
            point[0] += dx;
            point[1] += dy;
        }
        self
    }

    fn eyes(&self) -> ((f32, f32), (f32, f32)) {
        (
            (self.landmarks[0], self.landmarks[1]),
            (self.landmarks[2], self.landmarks[3]),
        )
    }
}

/// L2-normalised face encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_raw(raw: Vec<f32>) -> Self {
        let mut vector = Array1::from(raw);
        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            vector.mapv_inplace(|x| x / norm);
        }
        Self { vector }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Euclidean distance between two normalised encodings, in `[0, 2]`.
    ///
    /// Encodings of different lengths never match and report `f32::INFINITY`.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.len() != other.len() {
            return f32::INFINITY;
        }
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Pack an RGB image into a `[1, 3, H, W]` BGR tensor with values in `[0, 255]`.
pub fn bgr_planes(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
        img.get_pixel(x as u32, y as u32)[2 - c] as f32
    })
}

/// Aspect-preserving fit of an image onto the square detector canvas.
struct Letterbox {
    canvas: RgbImage,
    side: f32,
    scale: f32,
    offset: (f32, f32),
}

impl Letterbox {
    fn fit(img: &DynamicImage, side: u32) -> Self {
        let (width, height) = img.dimensions();
        let scale = side as f32 / width.max(height) as f32;
        let fit_w = ((width as f32 * scale) as u32).clamp(1, side);
        let fit_h = ((height as f32 * scale) as u32).clamp(1, side);
        let resized = img.resize_exact(fit_w, fit_h, FilterType::Triangle).to_rgb8();

        let mut canvas = RgbImage::new(side, side);
        let (off_x, off_y) = ((side - fit_w) / 2, (side - fit_h) / 2);
        image::imageops::overlay(&mut canvas, &resized, off_x as i64, off_y as i64);

        Self {
            canvas,
            side: side as f32,
            scale,
            offset: (off_x as f32, off_y as f32),
        }
    }

    /// Undo the letterbox: normalised canvas coordinates to source pixels.
    fn restore(&self, raw: yunet::Candidate) -> Detection {
        let x = |v: f32| (v * self.side - self.offset.0) / self.scale;
        let y = |v: f32| (v * self.side - self.offset.1) / self.scale;
        let len = |v: f32| v * self.side / self.scale;

        let mut landmarks = [0.0f32; 10];
        for (dst, src) in landmarks
            .chunks_exact_mut(2)
            .zip(raw.landmarks.chunks_exact(2))
        {
            dst[0] = x(src[0]);
            dst[1] = y(src[1]);
        }

        Detection {
            bbox: [x(raw.bbox[0]), y(raw.bbox[1]), len(raw.bbox[2]), len(raw.bbox[3])],
            score: raw.score,
            landmarks,
        }
    }
}

/// Detect faces with YuNet. Results are in `img` pixel coordinates.
///
/// `nms_threshold >= 1.0` disables suppression so callers can merge several
/// passes before suppressing once.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("cannot detect faces in an empty image");
    }

    let boxed = Letterbox::fit(img, DETECTOR_INPUT);
    let input = Value::from_array(bgr_planes(&boxed.canvas))?;
    let outputs = session
        .run(ort::inputs![input])
        .context("running detector")?;

    let mut heads = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push(yunet::RawTensor {
            shape: shape.iter().copied().collect(),
            data: data.to_vec(),
        });
    }

    let detections: Vec<Detection> =
        yunet::decode(&heads, DETECTOR_INPUT as usize, score_threshold)?
            .into_iter()
            .map(|candidate| boxed.restore(candidate))
            .collect();

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression; the result is ordered best first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut ranked = detections.to_vec();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::with_capacity(ranked.len());
    for candidate in ranked {
        if kept
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop so the eyes land on the ArcFace template.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let (left, right) = detection.eyes();
    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if !eye_dist.is_finite() || eye_dist < f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eye positions coincide");
    }

    let unit = size as f32 / ENCODER_INPUT as f32;
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let scale = unit * ref_dist / eye_dist;
    let (sin, cos) = dy.atan2(dx).sin_cos();

    let eye_center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );

    // Inverse mapping: walk the output grid and sample the source.
    let src = img.to_rgb8();
    let aligned = RgbImage::from_fn(size, size, |x, y| {
        let ox = (x as f32 - ref_center.0) / scale;
        let oy = (y as f32 - ref_center.1) / scale;
        let sx = cos * ox - sin * oy + eye_center.0;
        let sy = sin * ox + cos * oy + eye_center.1;
        sample_bilinear(&src, sx, sy).unwrap_or(Rgb([0, 0, 0]))
    });

    Ok(DynamicImage::ImageRgb8(aligned))
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if !(x >= 0.0 && y >= 0.0 && x < w as f32 && y < h as f32) {
        return None;
    }

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let [p00, p10, p01, p11] =
        [(x0, y0), (x1, y0), (x0, y1), (x1, y1)].map(|(px, py)| img.get_pixel(px, py).0);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    Some(Rgb(out))
}

/// Encode an aligned face crop with SFace.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let crop = face_img
        .resize_exact(ENCODER_INPUT, ENCODER_INPUT, FilterType::Triangle)
        .to_rgb8();
    let input = Value::from_array(bgr_planes(&crop))?;

    let outputs = session
        .run(ort::inputs![input])
        .context("running encoder")?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting [1, 128]
    let width = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if width == 0 || width > data.len() {
        anyhow::bail!("encoder returned an empty embedding ({} values)", data.len());
    }

    Ok(Embedding::from_raw(data[..width].to_vec()))
}
