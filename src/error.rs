use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a successful live match.
pub const EXIT_VERIFIED: u8 = 0;
/// Exit code for every "not verified" outcome, including failures to get that far.
pub const EXIT_NOT_VERIFIED: u8 = 1;
/// Exit code for a malformed invocation.
pub const EXIT_USAGE: u8 = 2;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{0}")]
    InvalidArgs(String),

    #[error("configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("reference directory {} not found", .0.display())]
    ReferenceDirMissing(PathBuf),

    #[error("no reference image for {token} in {}", .dir.display())]
    ReferenceNotFound { token: String, dir: PathBuf },

    #[error("no face found in reference image {0}")]
    ReferenceNoFace(String),

    #[error("downloading {url}: {reason}")]
    DownloadFailure { url: String, reason: String },

    #[error("decoding reference image {origin}: {source}")]
    DecodeFailure {
        origin: String,
        #[source]
        source: image::ImageError,
    },

    #[error("face engine: {0:#}")]
    Engine(anyhow::Error),

    #[error("camera unavailable: {0:#}")]
    CameraUnavailable(anyhow::Error),

    #[error("camera read failed: {0:#}")]
    CameraReadFailure(anyhow::Error),

    #[error("no live match within {0} seconds")]
    NotVerified(u64),
}

impl VerifyError {
    pub fn exit_code(&self) -> u8 {
        match self {
            VerifyError::InvalidArgs(_) => EXIT_USAGE,
            _ => EXIT_NOT_VERIFIED,
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_usage_errors_exit_two() {
        assert_eq!(VerifyError::InvalidArgs("x".into()).exit_code(), EXIT_USAGE);
        assert_eq!(
            VerifyError::ReferenceNoFace("a.jpg".into()).exit_code(),
            EXIT_NOT_VERIFIED
        );
        assert_eq!(
            VerifyError::DownloadFailure {
                url: "http://x".into(),
                reason: "refused".into()
            }
            .exit_code(),
            EXIT_NOT_VERIFIED
        );
        assert_eq!(VerifyError::NotVerified(15).exit_code(), EXIT_NOT_VERIFIED);
    }

    #[test]
    fn test_messages_name_the_reference() {
        let err = VerifyError::ReferenceNotFound {
            token: "04A1".into(),
            dir: PathBuf::from("/faces"),
        };
        assert_eq!(err.to_string(), "no reference image for 04A1 in /faces");
    }
}
