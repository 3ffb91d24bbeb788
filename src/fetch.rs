use std::time::Duration;

use ureq::Agent;

use crate::error::{Result, VerifyError};

/// Retrieves the raw bytes of a remote reference image.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP(S) download with a global deadline and a body cap.
pub struct HttpFetcher {
    agent: Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent, max_bytes }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let failure = |reason: ureq::Error| VerifyError::DownloadFailure {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let mut response = self.agent.get(url).call().map_err(failure)?;
        let bytes = response
            .body_mut()
            .with_config()
            .limit(self.max_bytes)
            .read_to_vec()
            .map_err(failure)?;

        log::debug!("downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}
