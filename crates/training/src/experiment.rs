//! Experiment directories and logging setup.

use crate::config::SearchConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_TIME_FORMAT: &str = "%m/%d %I:%M:%S %p";
pub const LOG_FILE: &str = "log.txt";
pub const CONFIG_SNAPSHOT: &str = "config.json";

#[derive(Debug, Clone)]
pub struct Experiment {
    dir: PathBuf,
}

impl Experiment {
    /// Create `<output_root>/Search-<save>-<YYYYmmdd-HHMMSS>/`.
    pub fn create(output_root: &Path, save: &str) -> io::Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let dir = output_root.join(format!("Search-{save}-{stamp}"));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Reuse an existing directory, e.g. when resuming.
    pub fn open(dir: &Path) -> io::Result<Self> {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("experiment directory {} does not exist", dir.display()),
            ));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn write_config(&self, cfg: &SearchConfig) -> io::Result<()> {
        let json = serde_json::to_string_pretty(cfg).map_err(io::Error::other)?;
        fs::write(self.dir.join(CONFIG_SNAPSHOT), json)
    }
}

/// Log to stdout and append to `log_path`. `RUST_LOG` overrides the `info`
/// default. Returns `false` when a global subscriber was already installed.
pub fn init_logging(log_path: &Path) -> io::Result<bool> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let stdout = fmt::layer()
        .with_target(false)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()));
    let to_file = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_writer(Mutex::new(file));
    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(to_file)
        .try_init()
        .is_ok())
}
