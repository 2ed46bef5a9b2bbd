use crate::{
    config::{NetworkMode, TesseraConfig},
    paths::TesseraPaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn parse_network_mode_env(s: &str) -> Option<NetworkMode> {
    match s.trim().to_lowercase().as_str() {
        "mainnet" | "main" | "prod" | "production" => Some(NetworkMode::Mainnet),
        "testnet" | "test" | "dev" | "devnet" => Some(NetworkMode::Testnet),
        _ => None,
    }
}

/// Apply environment variable overrides. They are never written back to `config.toml`.
fn apply_env_overrides(cfg: &mut TesseraConfig) {
    /// If an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("TESSERA_KDF_MEMORY_KIB", |v| {
        if let Ok(n) = v.parse::<u32>() {
            cfg.kdf.memory_kib = n;
        }
    });
    apply_env("TESSERA_KDF_ITERATIONS", |v| {
        if let Ok(n) = v.parse::<u32>() {
            cfg.kdf.iterations = n;
        }
    });
    apply_env("TESSERA_PRIMARY_CHAIN", |v| {
        v.clone_into(&mut cfg.chains.primary);
    });
    apply_env("TESSERA_NETWORK_MODE", |v| {
        if let Some(m) = parse_network_mode_env(v) {
            cfg.network_mode = m;
        }
    });
}

impl ConfigStore {
    pub fn new(paths: &TesseraPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<TesseraConfig> {
        let mut cfg = if self.path.exists() {
            let s = fs::read_to_string(&self.path).context("read config.toml")?;
            toml::from_str(&s).context("parse config.toml")?
        } else {
            let cfg = TesseraConfig::default();
            self.save(&cfg)?;
            cfg
        };
        apply_env_overrides(&mut cfg);
        cfg.validate().context("validate config")?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &TesseraConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_atomic_restrictive(&self.path, s.as_bytes())
            .context("write config.toml")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = TesseraPaths::at(td.path().join("config"), td.path().join("data"));
        let store = ConfigStore::new(&paths);
        let cfg = store.load_or_init_default()?;
        assert!(paths.config_file().exists(), "config.toml created");

        let on_disk: TesseraConfig = toml::from_str(&fs::read_to_string(paths.config_file())?)?;
        assert_eq!(on_disk.chains, cfg.chains);
        Ok(())
    }

    #[test]
    fn invalid_config_is_refused() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = TesseraPaths::at(td.path().join("config"), td.path().join("data"));
        crate::fsutil::write_atomic_restrictive(
            &paths.config_file(),
            b"[chains]\nprimary = \"dogecoin\"\n",
        )?;
        let err = ConfigStore::new(&paths)
            .load_or_init_default()
            .err()
            .ok_or_else(|| eyre::eyre!("unknown primary chain should fail"))?;
        assert!(
            format!("{err:#}").contains("unsupported chain"),
            "{err:#}"
        );
        Ok(())
    }

    #[test]
    fn network_mode_aliases() {
        assert_eq!(parse_network_mode_env(" Devnet "), Some(NetworkMode::Testnet));
        assert_eq!(parse_network_mode_env("prod"), Some(NetworkMode::Mainnet));
        assert_eq!(parse_network_mode_env("moon"), None);
    }
}
