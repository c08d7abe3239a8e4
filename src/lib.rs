pub mod browser;
pub mod config;
pub mod error;
pub mod harvester;
pub mod proxy;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use config::HarvesterConfig;
pub use error::{HarvesterError, Result};
pub use harvester::CaptchaHarvester;
