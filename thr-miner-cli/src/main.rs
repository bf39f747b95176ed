use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use log::{error, info, LevelFilter};
use thiserror::Error;
use thr_miner_lib::{
    init_global_logger, logger::LoggerError, settings::default_config_path, ClientError,
    ConfigSettings, Log, LoggerConfig, Server, SettingsError,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to initialise logging: {0}")]
    Logger(#[from] LoggerError),

    #[error("invalid configuration: {0}")]
    Settings(#[from] SettingsError),

    #[error("failed to set up HTTP client: {0}")]
    Client(#[from] ClientError),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("{0}")]
    Mining(String),
}

/// CPU proof-of-work miner for Thronos chain endpoints
#[derive(Parser, Debug)]
#[command(name = "thr-miner", version, about)]
struct Args {
    /// THR address credited for mined blocks (overrides `mine_to_address`)
    address: Option<String>,

    /// Base URL of the chain endpoint
    #[arg(long)]
    server_url: Option<String>,

    /// Number of leading zero hex characters a block hash needs
    #[arg(long, short)]
    difficulty: Option<i64>,

    /// Number of hashing threads
    #[arg(long, short)]
    workers: Option<i64>,

    /// Config file to use instead of ~/.thr-miner/config.toml
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// File the log is appended to
    #[arg(long, default_value = "thr-miner.log")]
    log_file: PathBuf,

    /// Only log to the console
    #[arg(long)]
    no_log_file: bool,

    /// Log debug messages
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn apply(&self, settings: &mut ConfigSettings) {
        if let Some(address) = &self.address {
            settings.mine_to_address = address.clone();
        }
        if let Some(server_url) = &self.server_url {
            settings.server_url = server_url.clone();
        }
        if let Some(difficulty) = self.difficulty {
            settings.difficulty = difficulty;
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();

    let logger_config = LoggerConfig {
        console_output: true,
        file_output: !args.no_log_file,
        log_file_path: Some(args.log_file.clone()),
        level: if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        ..Default::default()
    };
    init_global_logger(logger_config)?;

    let mut config = ConfigSettings::load(args.config.as_deref()).map_err(SettingsError::from)?;
    args.apply(&mut config);
    let settings = match config.resolve() {
        Ok(settings) => settings,
        Err(err) => {
            error!("⚠️  {}", err);
            if let SettingsError::Address(_) = err {
                error!("   Set mine_to_address in the config file or pass it as an argument.");
                error!("   Usage: thr-miner <YOUR_THR_ADDRESS>");
                if let Some(path) = args.config.clone().or_else(default_config_path) {
                    error!("   Config file: {}", path.display());
                }
            }
            return Err(err.into());
        }
    };
    info!("✅ Configuration loaded successfully");
    info!(
        "⏱️ Reporting hashrate every {} seconds",
        settings.mining.report_interval.as_secs()
    );

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    ctrlc::set_handler(move || {
        if let Ok(mut tx) = tx.lock() {
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
        }
    })?;

    let server = Arc::new(Server::from_settings(settings, Log::new())?);

    let result = tokio::select! {
        _ = rx => {
            info!("👋 Received shutdown signal, stopping miner...");
            Ok(())
        }
        result = Arc::clone(&server).run() => result,
    };
    server.request_shutdown();

    info!("🔄 Shutting down THR miner...");
    info!("📊 {}", server.stats().summary());
    result.map_err(|e| CliError::Mining(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_address_overrides_config() {
        let args = Args::parse_from(["thr-miner", "THRcli", "--workers", "4"]);
        let mut settings = ConfigSettings::builtin().unwrap();
        args.apply(&mut settings);
        assert_eq!(settings.mine_to_address, "THRcli");
        assert_eq!(settings.workers, 4);
        assert!(settings.resolve().is_ok());
    }

    #[test]
    fn test_flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("thr-miner-cli-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "mine_to_address = \"THRfromfile\"\ndifficulty = 3\nworkers = 2\n",
        )
        .unwrap();
        let loaded = ConfigSettings::load(Some(&path));
        let _ = std::fs::remove_file(&path);
        let mut settings = loaded.unwrap();

        let args = Args::parse_from(["thr-miner", "THRcli", "--difficulty", "6"]);
        args.apply(&mut settings);
        assert_eq!(settings.mine_to_address, "THRcli");
        assert_eq!(settings.difficulty, 6);
        assert_eq!(settings.workers, 2);

        let resolved = settings.resolve().unwrap();
        assert_eq!(resolved.address.as_str(), "THRcli");
        assert_eq!(resolved.mining.workers, 2);
    }

    #[test]
    fn test_missing_address_is_rejected() {
        let args = Args::parse_from(["thr-miner"]);
        let mut settings = ConfigSettings::builtin().unwrap();
        args.apply(&mut settings);
        assert!(matches!(
            settings.resolve(),
            Err(SettingsError::Address(_))
        ));
    }
}
