use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvesterError {
    #[error("Cannot reuse instance of CaptchaHarvester")]
    InstanceReused,

    #[error("Failed to bind listener on port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("No browser binary found; set browserPath or install Chrome/Chromium")]
    BrowserNotFound,

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, HarvesterError>;
