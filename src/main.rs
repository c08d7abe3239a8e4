use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use url::Url;

use captcha_harvester::config::{self, HarvesterConfig};
use captcha_harvester::CaptchaHarvester;

#[derive(Parser, Debug)]
#[command(name = "captcha-harvester")]
#[command(about = "Harvest a human-solved CAPTCHA token through a local interception proxy", long_about = None)]
struct Args {
    /// Target site URL whose root page carries the challenge
    #[arg(short, long)]
    url: Option<Url>,

    /// Site challenge key injected into the served page
    #[arg(short, long)]
    sitekey: Option<String>,

    /// User agent applied to the launched browser
    #[arg(long)]
    user_agent: Option<String>,

    /// Listener port
    #[arg(short, long)]
    port: Option<u16>,

    /// Challenge page template path
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Browser binary, overriding discovery
    #[arg(long)]
    browser: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("captcha_harvester={log_level}").parse()?),
        )
        .init();

    let config = build_config(args)?;
    info!(
        target = %config.target_url,
        port = config.port,
        "Starting captcha harvester"
    );

    let mut harvester = CaptchaHarvester::new(config).await?;
    let token = harvester.solve_captcha().await?;

    println!("{token}");
    Ok(())
}

/// Config file first when given, CLI flags on top.
fn build_config(args: Args) -> anyhow::Result<HarvesterConfig> {
    let mut config = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => {
            let url = args
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--url is required without a config file"))?;
            let sitekey = args
                .sitekey
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--sitekey is required without a config file"))?;
            HarvesterConfig::new(url, sitekey)
        }
    };

    if let Some(url) = args.url {
        config.target_url = url;
    }
    if let Some(sitekey) = args.sitekey {
        config.site_key = sitekey;
    }
    if let Some(user_agent) = args.user_agent {
        config.user_agent = Some(user_agent);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(template) = args.template {
        config.template_path = template;
    }
    if let Some(browser) = args.browser {
        config.browser_path = Some(browser);
    }

    config::validate(&config)?;
    Ok(config)
}
