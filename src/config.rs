use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "archmaster";
const CONFIG_FILE: &str = "config.json";

/// Default AUR RPC endpoint.
pub const DEFAULT_AUR_URL: &str = "https://aur.archlinux.org/rpc/v5";

/// Application configuration.
///
/// Built once at startup and handed to each component that needs it. Nothing
/// reads configuration from a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Filesystem root pacman operates on
    pub root_dir: PathBuf,
    /// pacman database directory (contains `local/` and `sync/`)
    pub db_path: PathBuf,
    /// Where the annotation database and profile files live.
    /// `None` resolves to the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Base URL of the AUR RPC interface, without a trailing slash
    pub aur_base_url: String,
    /// User-Agent sent with AUR requests
    pub user_agent: String,
    /// Privilege escalation helper. Must accept `-S` and `-p`.
    pub sudo_program: String,
    /// How long a cancelled command gets after SIGTERM before SIGKILL
    pub terminate_grace_ms: u64,
    /// Location of pacman.conf, used for IgnorePkg pinning
    pub pacman_conf: PathBuf,
    /// Location of pacman.log, used for the recent-upgrades report
    pub pacman_log: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/"),
            db_path: PathBuf::from("/var/lib/pacman"),
            data_dir: None,
            aur_base_url: DEFAULT_AUR_URL.to_string(),
            user_agent: format!("ArchMaster/{}", env!("CARGO_PKG_VERSION")),
            sudo_program: "sudo".to_string(),
            terminate_grace_ms: 2000,
            pacman_conf: PathBuf::from("/etc/pacman.conf"),
            pacman_log: PathBuf::from("/var/log/pacman.log"),
        }
    }
}

impl AppConfig {
    /// Configuration from `<config dir>/archmaster/config.json` with
    /// environment overrides applied. A missing or unreadable file yields the
    /// defaults.
    pub fn load() -> Self {
        let from_file = match config_file() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring {}: {:#}", path.display(), e);
                Self::default()
            }),
            None => Self::default(),
        };
        from_file.with_env_overrides()
    }

    /// Parse the file at `path`, or return the defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    /// Apply `ARCHMASTER_DB_PATH` and `ARCHMASTER_AUR_URL` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(db_path) = std::env::var("ARCHMASTER_DB_PATH") {
            self.db_path = PathBuf::from(db_path);
        }
        if let Ok(url) = std::env::var("ARCHMASTER_AUR_URL") {
            self.aur_base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn save(&self) -> Result<()> {
        let path = config_file()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Cannot write {}", path.display()))
    }

    /// Resolve the data directory, falling back to the platform default.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", APP_NAME)
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn annotations_db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("archmaster.db"))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

fn config_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
}
