//! Reference face acquisition.
//!
//! A run compares live frames against exactly one reference encoding. The
//! reference image comes either from a directory of `<token>.<ext>` files or
//! from an HTTP(S) URL; both paths end in [`encode_reference`].

use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::{info, warn};

use crate::config::Config;
use crate::error::{Result, VerifyError};
use crate::fetch::Fetch;
use crate::{Embedding, FaceEngine, Strategy};

/// Placeholder replaced by the identity token in URL sources.
pub const TOKEN_PLACEHOLDER: &str = "{token}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSource {
    Directory(PathBuf),
    Url(String),
}

impl ReferenceSource {
    pub fn parse(source: &str) -> Self {
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ReferenceSource::Url(source.to_string())
        } else {
            ReferenceSource::Directory(PathBuf::from(source))
        }
    }

    /// Detection attempts, in order. Downloaded images get one heavier retry.
    pub fn strategies(&self) -> &'static [Strategy] {
        match self {
            ReferenceSource::Directory(_) => &[Strategy::Fast],
            ReferenceSource::Url(_) => &[Strategy::Fast, Strategy::Thorough],
        }
    }
}

/// First `<token>.<ext>` in `dir`, trying `extensions` in order.
pub fn find_reference_file(dir: &Path, token: &str, extensions: &[String]) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(VerifyError::ReferenceDirMissing(dir.to_path_buf()));
    }

    if let Some(found) = extensions
        .iter()
        .map(|ext| dir.join(format!("{token}.{ext}")))
        .find(|candidate| candidate.is_file())
    {
        return Ok(found);
    }

    let available = list_images(dir, extensions);
    info!("Available image files: {:?}", available);
    Err(VerifyError::ReferenceNotFound {
        token: token.to_string(),
        dir: dir.to_path_buf(),
    })
}

fn list_images(dir: &Path, extensions: &[String]) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        })
        .collect();
    names.sort();
    names
}

pub fn resolve_url(template: &str, token: &str) -> String {
    template.replace(TOKEN_PLACEHOLDER, &urlencoding::encode(token))
}

/// Produce the reference encoding for `token` from `source`.
pub fn acquire<E, F>(
    source: &ReferenceSource,
    token: &str,
    engine: &mut E,
    fetcher: &F,
    cfg: &Config,
) -> Result<Embedding>
where
    E: FaceEngine,
    F: Fetch,
{
    let (img, origin) = match source {
        ReferenceSource::Directory(dir) => {
            let path = find_reference_file(dir, token, &cfg.extensions)?;
            info!("Loading reference face: {}", path.display());
            let origin = path.display().to_string();
            let img = image::open(&path).map_err(|source| VerifyError::DecodeFailure {
                origin: origin.clone(),
                source,
            })?;
            (img, origin)
        }
        ReferenceSource::Url(template) => {
            let url = resolve_url(template, token);
            info!("Downloading reference face: {}", url);
            let bytes = fetcher.fetch(&url)?;
            let img =
                image::load_from_memory(&bytes).map_err(|source| VerifyError::DecodeFailure {
                    origin: url.clone(),
                    source,
                })?;
            (img, url)
        }
    };

    // Drop alpha and widen greyscale so every source looks the same downstream
    let img = DynamicImage::ImageRgb8(img.to_rgb8());
    let embedding = encode_reference(engine, &img, &origin, source.strategies())?;
    info!("✓ Loaded reference face for {}", token);
    Ok(embedding)
}

/// Encode the first face found, walking `strategies` until one finds a face.
pub fn encode_reference<E: FaceEngine>(
    engine: &mut E,
    img: &DynamicImage,
    origin: &str,
    strategies: &[Strategy],
) -> Result<Embedding> {
    for (attempt, &strategy) in strategies.iter().enumerate() {
        if attempt > 0 {
            info!("No face in {}, retrying with {:?} detection", origin, strategy);
        }

        let faces = engine.locate(img, strategy).map_err(VerifyError::Engine)?;
        let Some(first) = faces.first() else {
            continue;
        };
        if faces.len() > 1 {
            warn!(
                "{} faces in reference {}, using the highest scoring one",
                faces.len(),
                origin
            );
        }
        return engine.encode(img, first).map_err(VerifyError::Engine);
    }

    Err(VerifyError::ReferenceNoFace(origin.to_string()))
}
