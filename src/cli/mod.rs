//! CLI mode for playback-dl: one run for one date.

mod progress;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::Parser;

use crate::{
    AppConfig, ChannelFilter, DateRange, Engine, EngineSettings, Error, HttpRemote,
    event_channel, format_duration, install_signal_handler,
};

use progress::{ConsoleProgress, print_summary};

#[derive(Debug, Parser)]
#[command(
    name = "playback-dl",
    version,
    about = "Retrieve a day of recordings from a network video recorder and file them by channel"
)]
struct Args {
    /// Day to retrieve (YYYY-MM-DD); defaults to yesterday
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Channel number or inclusive range, e.g. `3` or `1-8`
    #[arg(long)]
    channels: Option<ChannelFilter>,

    /// Seconds allowed for one transfer batch
    #[arg(long)]
    batch_timeout: Option<u64>,

    /// Seconds allowed for one page, retries included
    #[arg(long)]
    page_timeout: Option<u64>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the UI-automation bridge
    #[arg(long)]
    bridge: Option<String>,
}

fn yesterday() -> NaiveDate {
    let today = Local::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

/// Loads the configuration and applies command-line overrides.
fn load_config(args: &Args) -> crate::Result<AppConfig> {
    let path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_create(&path)?;

    if !config.credentials.has_credentials() {
        return Err(Error::Config(format!(
            "no device credentials; set [credentials] username and password in {}",
            path.display()
        )));
    }
    if !config.credentials.encrypted {
        config.credentials.encrypt_in_place();
        config.save(&path)?;
        log::info!("Encrypted stored password in {}", path.display());
    }

    if let Some(bridge) = &args.bridge {
        config.device.bridge_url.clone_from(bridge);
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    if let Some(secs) = args.batch_timeout {
        config.timing = config.timing.with_batch_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.page_timeout {
        config.timing = config
            .timing
            .with_page_timeout(Some(Duration::from_secs(secs)));
    }
    Ok(config)
}

/// Runs the CLI.
///
/// # Errors
///
/// Returns an error if configuration is unusable, login fails, or the
/// channel list cannot be read.
pub async fn run() -> crate::Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config(&args)?;
    let credentials = config.credentials.decrypt_if_needed().ok_or_else(|| {
        Error::Config("stored password cannot be decrypted on this machine; re-enter it".into())
    })?;

    let date = args.date.unwrap_or_else(yesterday);
    let range = DateRange::for_day(date);
    std::fs::create_dir_all(&config.paths.landing_dir)?;
    std::fs::create_dir_all(&config.paths.organized_dir)?;
    log::info!(
        "Retrieving {date} ({} to {}) into {}",
        range.start_text(),
        range.end_text(),
        config.paths.organized_dir.display()
    );

    let cancel = install_signal_handler()?;
    let (events_tx, events_rx) = event_channel();
    let remote = HttpRemote::connect(&config.device.bridge_url, &config.device.host, events_tx)?;
    let grace = config.timing.shutdown_grace;
    let mut engine = Engine::new(
        remote,
        events_rx,
        EngineSettings {
            credentials,
            timing: config.timing,
            paths: config.paths,
            range,
        },
        cancel.clone(),
    );

    let progress = ConsoleProgress::new();
    let outcome = {
        let run = engine.run(config.channels, &progress);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => Some(result),
            () = cancel.cancelled() => {
                if let Ok(result) = tokio::time::timeout(grace, &mut run).await {
                    Some(result)
                } else {
                    log::warn!(
                        "Run did not stop within {}, forcing shutdown",
                        format_duration(grace)
                    );
                    None
                }
            }
        }
    };
    progress.finish();

    let closed = engine.shutdown().await;
    match outcome {
        Some(Ok(stats)) => {
            print_summary(&stats);
            closed
        }
        Some(Err(e)) => Err(e),
        None => Err(Error::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "playback-dl",
            "--date",
            "2025-01-29",
            "--channels",
            "2-5",
            "--batch-timeout",
            "300",
        ])
        .unwrap();
        assert_eq!(args.date, NaiveDate::from_ymd_opt(2025, 1, 29));
        assert_eq!(args.channels, Some(ChannelFilter { min: 2, max: 5 }));
        assert_eq!(args.batch_timeout, Some(300));
        assert!(args.page_timeout.is_none());
    }

    #[test]
    fn rejects_bad_channel_range() {
        assert!(Args::try_parse_from(["playback-dl", "--channels", "9-3"]).is_err());
    }

    #[test]
    fn overrides_apply_to_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.credentials.username = "admin".into();
        config.credentials.password = "secret".into();
        config.save(&path).unwrap();

        let args = Args::try_parse_from([
            "playback-dl",
            "--config",
            path.to_str().unwrap(),
            "--page-timeout",
            "900",
            "--bridge",
            "http://bridge:1",
        ])
        .unwrap();
        let loaded = load_config(&args).unwrap();

        assert_eq!(loaded.timing.page_timeout, Some(Duration::from_secs(900)));
        assert_eq!(loaded.device.bridge_url, "http://bridge:1");
        assert!(loaded.credentials.encrypted);
        assert_eq!(
            loaded.credentials.decrypt_if_needed().unwrap().password,
            "secret"
        );
    }

    #[test]
    fn missing_credentials_are_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let args =
            Args::try_parse_from(["playback-dl", "--config", path.to_str().unwrap()]).unwrap();

        assert!(matches!(load_config(&args), Err(Error::Config(_))));
        assert!(path.exists());
    }
}
