use directories::ProjectDirs;
use eyre::{Context as _, ContextCompat as _};
use rand::Rng as _;
use std::path::PathBuf;
use std::{fs::OpenOptions, io::Write as _};
use zeroize::Zeroizing;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt as _;

pub const MASTER_SECRET_ENV: &str = "TESSERA_MASTER_SECRET";

#[derive(Debug, Clone)]
pub struct TesseraPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl TesseraPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("TESSERA_DATA_DIR"),
            std::env::var("TESSERA_CONFIG_DIR"),
        ) {
            return Ok(Self::at(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // macOS: ~/Library/Application Support/tessera
        // Linux: ~/.config/tessera, ~/.local/share/tessera
        let proj = ProjectDirs::from("", "", "tessera").context("failed to resolve project dirs")?;
        Ok(Self::at(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("tessera.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn master_secret_path(&self) -> PathBuf {
        self.config_dir.join("master_secret.bin")
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.data_dir.join("wallets")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    /// The master secret every backend share key is derived from.
    ///
    /// `TESSERA_MASTER_SECRET` (64 hex chars) wins; otherwise 32 random bytes are created once in
    /// `master_secret.bin` and reused. Losing this file makes every stored backend share unreadable.
    pub fn load_or_create_master_secret(&self) -> eyre::Result<Zeroizing<[u8; 32]>> {
        if let Ok(hex_secret) = std::env::var(MASTER_SECRET_ENV) {
            return parse_master_secret(hex_secret.trim())
                .with_context(|| format!("parse {MASTER_SECRET_ENV}"));
        }

        self.ensure_private_dirs()?;
        let p = self.master_secret_path();

        // Never expose a half-written secret: write a temp file and hard-link it into place, which
        // fails if another process got there first. In that case read theirs.
        for _ in 0_usize..5_usize {
            if p.exists() {
                let md = std::fs::symlink_metadata(&p)
                    .with_context(|| format!("stat {}", p.display()))?;
                if md.file_type().is_symlink() {
                    eyre::bail!("refusing to read symlink: {}", p.display());
                }
                let buf = Zeroizing::new(
                    std::fs::read(&p).with_context(|| format!("read {}", p.display()))?,
                );
                let mut out = Zeroizing::new([0_u8; 32]);
                if buf.len() != out.len() {
                    eyre::bail!(
                        "master secret at {} has {} bytes, expected 32",
                        p.display(),
                        buf.len()
                    );
                }
                out.copy_from_slice(&buf);
                return Ok(out);
            }

            let mut secret = Zeroizing::new([0_u8; 32]);
            rand::rng().fill_bytes(&mut *secret);

            let parent = p
                .parent()
                .ok_or_else(|| eyre::eyre!("missing parent for {}", p.display()))?;
            let mut suffix = [0_u8; 8];
            rand::rng().fill_bytes(&mut suffix);
            let tmp = parent.join(format!(".master_secret.bin.tmp.{}", hex::encode(suffix)));

            let mut oo = OpenOptions::new();
            oo.create_new(true).write(true);
            #[cfg(unix)]
            {
                oo.mode(crate::fsutil::MODE_FILE_PRIVATE);
            }
            let mut f = oo
                .open(&tmp)
                .with_context(|| format!("open temp {}", tmp.display()))?;
            f.write_all(&*secret)
                .with_context(|| format!("write {}", tmp.display()))?;
            f.sync_all()
                .with_context(|| format!("fsync {}", tmp.display()))?;
            drop(f);

            let linked = std::fs::hard_link(&tmp, &p);
            drop(std::fs::remove_file(&tmp));
            match linked {
                Ok(()) => {
                    tracing::info!(path = %p.display(), "created master secret");
                    return Ok(secret);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(eyre::Report::new(e).wrap_err(format!(
                        "hard_link {} -> {}",
                        tmp.display(),
                        p.display()
                    )));
                }
            }
        }

        eyre::bail!("failed to create/read master secret: {}", p.display())
    }
}

fn parse_master_secret(s: &str) -> eyre::Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(hex::decode(s).context("not hex")?);
    let mut out = Zeroizing::new([0_u8; 32]);
    if bytes.len() != out.len() {
        eyre::bail!("expected 32 bytes (64 hex chars), got {}", bytes.len());
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}
