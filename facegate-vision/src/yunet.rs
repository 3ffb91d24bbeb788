//! YuNet detector post-processing.
//!
//! The 2023mar export emits twelve tensors grouped by kind, each kind holding
//! one tensor per stride (8, 16, 32):
//! - `cls_*`: `[1, H*W, 1]` classification score
//! - `obj_*`: `[1, H*W, 1]` objectness score
//! - `bbox_*`: `[1, H*W, 4]` box regression `(dx, dy, log w, log h)`
//! - `kps_*`: `[1, H*W, 10]` landmark offsets
//!
//! Decoding is anchor-free. A grid cell at `(row, col)` with stride `s` maps to
//! `cx = (col + dx) * s`, `cy = (row + dy) * s`, `w = exp(log w) * s`.

use anyhow::{Context, Result};

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// One detector output copied out of the inference session.
#[derive(Debug, Clone)]
pub struct RawTensor {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Decoded face, normalised to `[0, 1]` of the detector input.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Combined face score. Both heads are already sigmoid outputs.
pub fn score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

fn head<'a>(
    outputs: &'a [RawTensor],
    index: usize,
    cells: usize,
    width: usize,
    kind: &str,
) -> Result<&'a [f32]> {
    let tensor = outputs
        .get(index)
        .with_context(|| format!("missing {kind} output at index {index}"))?;

    if tensor.shape != [1, cells as i64, width as i64] {
        anyhow::bail!(
            "unexpected {kind} shape at index {index}: {:?}, expected [1, {cells}, {width}]",
            tensor.shape
        );
    }
    if tensor.data.len() != cells * width {
        anyhow::bail!(
            "{kind} output at index {index} holds {} values, expected {}",
            tensor.data.len(),
            cells * width
        );
    }

    Ok(&tensor.data)
}

/// Decode all grid cells scoring at least `score_threshold`.
pub fn decode(
    outputs: &[RawTensor],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<Candidate>> {
    let norm = input_size as f32;
    let mut found = Vec::new();

    for (level, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let cells = side * side;

        let cls = head(outputs, level, cells, 1, "cls")?;
        let obj = head(outputs, level + 3, cells, 1, "obj")?;
        let bbox = head(outputs, level + 6, cells, 4, "bbox")?;
        let kps = head(outputs, level + 9, cells, 10, "kps")?;

        let s = stride as f32;
        for idx in 0..cells {
            let score = score(cls[idx], obj[idx]);
            if score < score_threshold {
                continue;
            }

            let row = (idx / side) as f32;
            let col = (idx % side) as f32;
            let delta = &bbox[idx * 4..idx * 4 + 4];

            let cx = (col + delta[0]) * s;
            let cy = (row + delta[1]) * s;
            let w = delta[2].exp() * s;
            let h = delta[3].exp() * s;

            let mut landmarks = [0.0f32; 10];
            for (dst, offset) in landmarks
                .chunks_exact_mut(2)
                .zip(kps[idx * 10..idx * 10 + 10].chunks_exact(2))
            {
                dst[0] = (col + offset[0]) * s / norm;
                dst[1] = (row + offset[1]) * s / norm;
            }

            found.push(Candidate {
                bbox: [
                    (cx - w / 2.0) / norm,
                    (cy - h / 2.0) / norm,
                    w / norm,
                    h / norm,
                ],
                score,
                landmarks,
            });
        }
    }

    Ok(found)
}
