use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{ConfigError, Result};

/// Configuration for a single harvest session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvesterConfig {
    /// The website URL whose root page gets replaced with the challenge page
    pub target_url: Url,

    /// The site-specific challenge key injected into the served page
    pub site_key: String,

    /// User agent applied to the launched browser, when set
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Port the interception listener binds on (0 for an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the challenge page template
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,

    /// Explicit browser binary, overriding discovery
    #[serde(default)]
    pub browser_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    7777
}

fn default_template_path() -> PathBuf {
    PathBuf::from("./harvester-body.html")
}

impl HarvesterConfig {
    pub fn new(target_url: Url, site_key: impl Into<String>) -> Self {
        Self {
            target_url,
            site_key: site_key.into(),
            user_agent: None,
            port: default_port(),
            template_path: default_template_path(),
            browser_path: None,
        }
    }
}

/// Load configuration from a TOML file, with `HARVESTER_`-prefixed
/// environment variables taking precedence.
pub fn load_from_path(path: &Path) -> Result<HarvesterConfig> {
    let config: HarvesterConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("HARVESTER_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &HarvesterConfig) -> Result<()> {
    if config.target_url.host_str().is_none() {
        return Err(ConfigError::Validation("Target URL must have a host".into()).into());
    }

    if config.site_key.is_empty() {
        return Err(ConfigError::Validation("Site key must not be empty".into()).into());
    }

    Ok(())
}
