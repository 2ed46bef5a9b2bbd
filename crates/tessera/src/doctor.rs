use crate::{
    config::TesseraConfig,
    paths::{TesseraPaths, MASTER_SECRET_ENV},
    records::{FsRecordStore, WalletKeyRecordStore as _},
};
use eyre::Context as _;
use serde_json::json;
use std::{fs, path::Path, path::PathBuf};

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<TesseraConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TesseraConfig = toml::from_str(&s).context("parse config.toml")?;
    cfg.validate().context("validate config.toml")?;
    Ok(cfg)
}

struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    primary_chain: Option<String>,
    address_chains: Vec<String>,
    kdf_memory_kib: Option<u32>,
}

struct MasterSecretReport {
    source: &'static str,
    path: PathBuf,
    ok: bool,
    note: Option<String>,
}

struct WalletsReport {
    dir: PathBuf,
    count: usize,
    error: Option<String>,
}

struct DoctorReport {
    version: &'static str,
    paths: TesseraPaths,
    config: ConfigReport,
    master_secret: MasterSecretReport,
    wallets: WalletsReport,
    audit_log: PathBuf,
    env: serde_json::Value,
}

fn master_secret_status(paths: &TesseraPaths) -> MasterSecretReport {
    let path = paths.master_secret_path();
    if let Some(v) = env_opt(MASTER_SECRET_ENV) {
        let ok = v.len() == 64 && v.chars().all(|c| c.is_ascii_hexdigit());
        return MasterSecretReport {
            source: "env",
            path,
            ok,
            note: (!ok).then(|| format!("{MASTER_SECRET_ENV} must be 64 hex chars")),
        };
    }
    match fs::metadata(&path) {
        Ok(md) if md.len() == 32 => MasterSecretReport {
            source: "file",
            path,
            ok: true,
            note: None,
        },
        Ok(md) => MasterSecretReport {
            source: "file",
            path,
            ok: false,
            note: Some(format!("expected 32 bytes, found {}", md.len())),
        },
        Err(_missing) => MasterSecretReport {
            source: "missing",
            path,
            ok: true,
            note: Some("will be created on first wallet operation".to_owned()),
        },
    }
}

fn collect(paths: &TesseraPaths) -> DoctorReport {
    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    let (parse_ok, config_err, cfg) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    let wallets_dir = paths.wallets_dir();
    let (wallet_count, wallets_err) = if wallets_dir.exists() {
        match FsRecordStore::open(&wallets_dir).and_then(|s| s.list()) {
            Ok(list) => (list.len(), None),
            Err(e) => (0, Some(format!("{e:#}"))),
        }
    } else {
        (0, None)
    };

    let env = json!({
      "TESSERA_CONFIG_DIR": env_opt("TESSERA_CONFIG_DIR"),
      "TESSERA_DATA_DIR": env_opt("TESSERA_DATA_DIR"),
      "TESSERA_NETWORK_MODE": env_opt("TESSERA_NETWORK_MODE"),
      "TESSERA_PRIMARY_CHAIN": env_opt("TESSERA_PRIMARY_CHAIN"),
      "TESSERA_KDF_MEMORY_KIB": env_opt("TESSERA_KDF_MEMORY_KIB"),
      "TESSERA_KDF_ITERATIONS": env_opt("TESSERA_KDF_ITERATIONS"),
      "TESSERA_MASTER_SECRET_set": std::env::var(MASTER_SECRET_ENV).is_ok(),
    });

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: paths.clone(),
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            parse_ok,
            error: config_err,
            primary_chain: cfg.as_ref().map(TesseraConfig::primary_chain),
            address_chains: cfg
                .as_ref()
                .map(TesseraConfig::address_chains)
                .unwrap_or_default(),
            kdf_memory_kib: cfg.as_ref().map(|c| c.kdf.memory_kib),
        },
        master_secret: master_secret_status(paths),
        wallets: WalletsReport {
            dir: wallets_dir,
            count: wallet_count,
            error: wallets_err,
        },
        audit_log: paths.audit_log_path(),
        env,
    }
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(&json!({
      "ok": r.master_secret.ok && r.wallets.error.is_none() && (r.config.parse_ok || !r.config.exists),
      "version": r.version,
      "paths": {
        "config_dir": r.paths.config_dir,
        "data_dir": r.paths.data_dir,
        "log_file": r.paths.log_file,
      },
      "config": {
        "path": r.config.path,
        "exists": r.config.exists,
        "parse_ok": r.config.parse_ok,
        "error": r.config.error,
        "primary_chain": r.config.primary_chain,
        "address_chains": r.config.address_chains,
        "kdf_memory_kib": r.config.kdf_memory_kib,
      },
      "master_secret": {
        "source": r.master_secret.source,
        "path": r.master_secret.path,
        "ok": r.master_secret.ok,
        "note": r.master_secret.note,
      },
      "wallets": {
        "dir": r.wallets.dir,
        "count": r.wallets.count,
        "error": r.wallets.error,
      },
      "audit_log": r.audit_log,
      "env": r.env,
    }))
    .context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "Tessera doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out, "  audit_log:  {}", r.audit_log.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (will be created on first run)")
            .context("write config")?;
    } else if r.config.parse_ok {
        writeln!(
            out,
            "  status: ok (primary chain: {}, chains: {})",
            r.config.primary_chain.as_deref().unwrap_or("?"),
            r.config.address_chains.join(", ")
        )
        .context("write config")?;
    } else {
        writeln!(out, "  status: invalid").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Master secret:").context("write master header")?;
    writeln!(out, "  source: {}", r.master_secret.source).context("write master")?;
    writeln!(out, "  ok: {}", r.master_secret.ok).context("write master")?;
    if let Some(note) = &r.master_secret.note {
        writeln!(out, "  note: {note}").context("write master")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Wallets:").context("write wallets header")?;
    writeln!(out, "  dir: {}", r.wallets.dir.display()).context("write wallets")?;
    writeln!(out, "  count: {}", r.wallets.count).context("write wallets")?;
    if let Some(e) = &r.wallets.error {
        writeln!(out, "  error: {e}").context("write wallets")?;
    }
    Ok(())
}

pub fn run(paths: &TesseraPaths, as_json: bool) -> eyre::Result<()> {
    let report = collect(paths);
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)
    } else {
        print_human(&mut out, &report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_install_reports_missing_but_healthy() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = TesseraPaths::at(td.path().join("config"), td.path().join("data"));
        let r = collect(&paths);
        assert!(!r.config.exists, "no config yet");
        assert_eq!(r.wallets.count, 0);

        let mut buf = Vec::new();
        print_json(&mut buf, &r)?;
        let v: serde_json::Value = serde_json::from_slice(&buf)?;
        assert_eq!(v.get("wallets").and_then(|w| w.get("count")), Some(&json!(0)));
        Ok(())
    }

    #[test]
    fn short_master_secret_is_flagged() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = TesseraPaths::at(td.path().join("config"), td.path().join("data"));
        paths.ensure_private_dirs()?;
        fs::write(paths.master_secret_path(), b"short")?;
        let r = master_secret_status(&paths);
        assert!(!r.ok, "5-byte secret must be flagged");
        Ok(())
    }
}
