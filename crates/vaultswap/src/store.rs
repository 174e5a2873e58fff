use crate::{config::VaultswapConfig, network::NETWORK_NAMES, paths::VaultswapPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// If an env var is set and non-empty, hand its trimmed value to `setter`.
fn apply_env(var: &str, setter: impl FnOnce(&str)) {
    if let Ok(u) = std::env::var(var) {
        let t = u.trim();
        if !t.is_empty() {
            setter(t);
        }
    }
}

/// `VAULTSWAP_RPC_URL_POLYGON`, `VAULTSWAP_RPC_URL_ETHEREUM`, ...
fn rpc_env_var(network: &str) -> String {
    format!(
        "VAULTSWAP_RPC_URL_{}",
        network.to_ascii_uppercase().replace('-', "_")
    )
}

/// Apply environment variable overrides (endpoints only; never persisted).
fn apply_env_overrides(cfg: &mut VaultswapConfig) {
    apply_env("VAULTSWAP_ODOS_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.odos_base_url);
    });
    for name in NETWORK_NAMES {
        apply_env(&rpc_env_var(name), |v| {
            cfg.network_override_mut(name).rpc_url = Some(v.to_owned());
        });
    }
}

impl ConfigStore {
    pub fn new(paths: &VaultswapPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<VaultswapConfig> {
        let mut cfg = if self.path.exists() {
            let s = fs::read_to_string(&self.path).context("read config.toml")?;
            toml::from_str(&s).context("parse config.toml")?
        } else {
            let cfg = VaultswapConfig::default();
            self.save(&cfg)?;
            cfg
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &VaultswapConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_env_var_names() {
        assert_eq!(rpc_env_var("polygon"), "VAULTSWAP_RPC_URL_POLYGON");
        assert_eq!(rpc_env_var("base-sepolia"), "VAULTSWAP_RPC_URL_BASE_SEPOLIA");
    }

    #[test]
    fn first_load_writes_defaults_then_reads_edits() -> eyre::Result<()> {
        let cfg_dir = tempfile::tempdir()?;
        let data_dir = tempfile::tempdir()?;
        let paths = VaultswapPaths::from_dirs(
            cfg_dir.path().to_path_buf(),
            data_dir.path().to_path_buf(),
        );
        let store = ConfigStore::new(&paths);

        let first = store.load_or_init_default()?;
        assert!(paths.config_file().exists(), "defaults should be persisted");
        assert_eq!(first.engine.default_slippage_bps, 500);

        fs::write(
            paths.config_file(),
            "[engine]\ndefault_slippage_bps = 250\n",
        )?;
        let edited = store.load_or_init_default()?;
        assert_eq!(edited.engine.default_slippage_bps, 250);
        assert_eq!(edited.engine.deadline_seconds, 600);
        Ok(())
    }
}
