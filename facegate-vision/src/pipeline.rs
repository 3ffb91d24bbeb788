use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;

use crate::face::{self, Detection, Embedding, ENCODER_INPUT};
use crate::model::{self, ModelPaths};

/// How hard to look for faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One detector pass over the whole image.
    Fast,
    /// Relaxed score threshold plus a pass over four overlapping tiles, so
    /// small or off-centre faces get more detector resolution.
    Thorough,
}

/// Detect-and-encode capability used by reference acquisition and the
/// verification loop.
pub trait FaceEngine {
    /// Faces in `img`, best score first.
    fn locate(&mut self, img: &DynamicImage, strategy: Strategy) -> Result<Vec<Detection>>;

    /// Encode one located face of `img`.
    fn encode(&mut self, img: &DynamicImage, face: &Detection) -> Result<Embedding>;

    /// Locate every face and encode each one.
    fn encode_all(&mut self, img: &DynamicImage, strategy: Strategy) -> Result<Vec<Embedding>> {
        let faces = self.locate(img, strategy)?;
        faces.iter().map(|f| self.encode(img, f)).collect()
    }
}

impl<T: FaceEngine + ?Sized> FaceEngine for &mut T {
    fn locate(&mut self, img: &DynamicImage, strategy: Strategy) -> Result<Vec<Detection>> {
        (**self).locate(img, strategy)
    }

    fn encode(&mut self, img: &DynamicImage, face: &Detection) -> Result<Embedding> {
        (**self).encode(img, face)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub score: f32,
    pub nms: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            score: 0.6,
            nms: 0.3,
        }
    }
}

// Score relief granted to the thorough strategy, floored at MIN_SCORE.
const THOROUGH_RELIEF: f32 = 0.15;
const MIN_SCORE: f32 = 0.3;
// Each tile spans this share of the image in both dimensions.
const TILE_SHARE: f32 = 0.6;

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    thresholds: Thresholds,
}

impl Pipeline {
    pub fn new(models: &ModelPaths, thresholds: Thresholds) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(models)?,
            encoder: model::recog_session(models)?,
            thresholds,
        })
    }

    fn thorough(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let score = (self.thresholds.score - THOROUGH_RELIEF).max(MIN_SCORE);
        let mut found = face::detect_faces(&mut self.detector, img, score, 1.0)?;

        let (width, height) = img.dimensions();
        for [x, y, w, h] in overlapping_tiles(width, height) {
            let tile = img.crop_imm(x, y, w, h);
            let hits = face::detect_faces(&mut self.detector, &tile, score, 1.0)
                .with_context(|| format!("detecting in tile at ({x}, {y})"))?;
            found.extend(hits.into_iter().map(|d| d.offset(x as f32, y as f32)));
        }

        log::debug!("thorough pass: {} raw detections", found.len());
        Ok(face::nms(&found, self.thresholds.nms))
    }
}

impl FaceEngine for Pipeline {
    fn locate(&mut self, img: &DynamicImage, strategy: Strategy) -> Result<Vec<Detection>> {
        match strategy {
            Strategy::Fast => face::detect_faces(
                &mut self.detector,
                img,
                self.thresholds.score,
                self.thresholds.nms,
            )
            .context("detecting faces"),
            Strategy::Thorough => self.thorough(img),
        }
    }

    fn encode(&mut self, img: &DynamicImage, face: &Detection) -> Result<Embedding> {
        let aligned = face::align_face(img, face, ENCODER_INPUT).context("aligning face")?;
        face::encode_face(&mut self.encoder, &aligned).context("encoding face")
    }
}

/// Four tiles `[x, y, w, h]` anchored at the image corners, overlapping in
/// the middle. Empty when the image is too small to split.
pub fn overlapping_tiles(width: u32, height: u32) -> Vec<[u32; 4]> {
    let w = (width as f32 * TILE_SHARE) as u32;
    let h = (height as f32 * TILE_SHARE) as u32;
    if w == 0 || h == 0 || w >= width || h >= height {
        return Vec::new();
    }

    let (right, bottom) = (width - w, height - h);
    vec![
        [0, 0, w, h],
        [right, 0, w, h],
        [0, bottom, w, h],
        [right, bottom, w, h],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_cover_image() {
        let tiles = overlapping_tiles(100, 50);
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[0], [0, 0, 60, 30]);
        assert_eq!(tiles[3], [40, 20, 60, 30]);
        for [x, y, w, h] in tiles {
            assert!(x + w <= 100 && y + h <= 50);
        }
    }

    #[test]
    fn test_tiles_skip_tiny_images() {
        assert!(overlapping_tiles(1, 1).is_empty());
        assert!(overlapping_tiles(0, 100).is_empty());
    }

    struct Counting {
        located: usize,
        encoded: usize,
    }

    impl FaceEngine for Counting {
        fn locate(&mut self, _img: &DynamicImage, _strategy: Strategy) -> Result<Vec<Detection>> {
            self.located += 1;
            let face = Detection {
                bbox: [0.0; 4],
                score: 0.9,
                landmarks: [0.0; 10],
            };
            Ok(vec![face.clone(), face])
        }

        fn encode(&mut self, _img: &DynamicImage, _face: &Detection) -> Result<Embedding> {
            self.encoded += 1;
            Ok(Embedding::from_raw(vec![1.0, 0.0]))
        }
    }

    #[test]
    fn test_encode_all_encodes_every_face() {
        let mut engine = Counting {
            located: 0,
            encoded: 0,
        };
        let img = DynamicImage::new_rgb8(4, 4);
        let encodings = engine.encode_all(&img, Strategy::Fast).unwrap();
        assert_eq!(encodings.len(), 2);
        assert_eq!((engine.located, engine.encoded), (1, 2));
    }
}
