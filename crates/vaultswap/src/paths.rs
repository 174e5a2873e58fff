use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

const LOG_FILE_NAME: &str = "vaultswap.log.jsonl";

#[derive(Debug, Clone)]
pub struct VaultswapPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl VaultswapPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("VAULTSWAP_DATA_DIR"),
            std::env::var("VAULTSWAP_CONFIG_DIR"),
        ) {
            return Ok(Self::from_dirs(
                PathBuf::from(config_dir),
                PathBuf::from(data_dir),
            ));
        }

        // macOS: ~/Library/Application Support/vaultswap
        // Linux: ~/.config/vaultswap
        // Windows: %APPDATA%\\vaultswap
        let proj =
            ProjectDirs::from("", "", "vaultswap").context("failed to resolve project dirs")?;
        Ok(Self::from_dirs(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join(LOG_FILE_NAME);
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
