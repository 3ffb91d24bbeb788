use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{Result, VerifyError};

#[derive(Parser, Debug)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Check that the person in front of the camera matches a reference face"
)]
pub struct Cli {
    /// Identity token naming the reference face (e.g. an RFID tag)
    #[arg(value_parser = identity_token, allow_hyphen_values = true)]
    pub token: String,

    /// Directory of <token>.<ext> images, or an http(s) URL ({token} is substituted)
    pub source: String,

    /// Config file (defaults to the installed config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the live verification timeout, in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Override the camera device
    #[arg(long)]
    pub camera: Option<String>,
}

/// Tokens are opaque, but they become a file stem so they must stay inside
/// the reference directory.
fn identity_token(raw: &str) -> std::result::Result<String, String> {
    if raw.is_empty() {
        return Err("identity token is empty".to_string());
    }
    if raw == "." || raw == ".." {
        return Err(format!("identity token {:?} is not a file name", raw));
    }
    if let Some(bad) = raw.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(format!("identity token contains {:?}", bad));
    }
    Ok(raw.to_string())
}

/// Parse the command line. Help and version output is not a verification,
/// so it is reported as a usage error.
pub fn parse<I, T>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| VerifyError::InvalidArgs(e.render().to_string()))
}
