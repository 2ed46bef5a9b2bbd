use crate::{
    errors::CustodyError,
    fsutil,
    keystore::{
        crypto::{EncryptedShare, KdfParams},
        share::ShareBatch,
    },
    wallet::canonical_address,
};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Persisted custody state for one wallet. Holds no plaintext share material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKeyRecord {
    pub wallet_address: String,
    /// Chain `wallet_address` was derived for; recovery re-derives on this chain.
    pub primary_chain: String,
    pub encrypted_backend_share_1: EncryptedShare,
    pub encrypted_backend_share_2: EncryptedShare,
    /// Argon2id cost both backend shares were sealed under. Config changes only affect new seals.
    #[serde(default)]
    pub kdf: KdfParams,
    pub share_threshold: u8,
    pub total_shares: u8,
    #[serde(default)]
    pub chain_addresses: BTreeMap<String, String>,
    pub share_batch: ShareBatch,
    pub generation: u32,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<String>,
}

/// Durable home of [`WalletKeyRecord`]s, keyed by the canonical form of `wallet_address`.
pub trait WalletKeyRecordStore {
    fn get(&self, wallet_address: &str) -> eyre::Result<Option<WalletKeyRecord>>;

    /// Create-only. A record for the same address already present is `WalletExists`.
    fn insert(&self, record: &WalletKeyRecord) -> eyre::Result<()>;

    /// Swap in `record` only if the stored record still carries `expected_batch`.
    fn replace(&self, expected_batch: ShareBatch, record: &WalletKeyRecord) -> eyre::Result<()>;

    fn list(&self) -> eyre::Result<Vec<WalletKeyRecord>>;
}

fn check_replace(
    current: Option<&WalletKeyRecord>,
    expected_batch: ShareBatch,
    address: &str,
) -> Result<(), CustodyError> {
    match current {
        None => Err(CustodyError::WalletNotFound(address.to_owned())),
        Some(cur) if cur.share_batch != expected_batch => {
            Err(CustodyError::RotationConflict(address.to_owned()))
        }
        Some(_) => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, WalletKeyRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(
        &self,
    ) -> eyre::Result<std::sync::MutexGuard<'_, BTreeMap<String, WalletKeyRecord>>> {
        self.records
            .lock()
            .map_err(|_poisoned| eyre::eyre!("record store mutex poisoned"))
    }
}

impl WalletKeyRecordStore for MemoryRecordStore {
    fn get(&self, wallet_address: &str) -> eyre::Result<Option<WalletKeyRecord>> {
        Ok(self.locked()?.get(&canonical_address(wallet_address)).cloned())
    }

    fn insert(&self, record: &WalletKeyRecord) -> eyre::Result<()> {
        let key = canonical_address(&record.wallet_address);
        let mut records = self.locked()?;
        if records.contains_key(&key) {
            return Err(CustodyError::WalletExists(record.wallet_address.clone()).into());
        }
        records.insert(key, record.clone());
        Ok(())
    }

    fn replace(&self, expected_batch: ShareBatch, record: &WalletKeyRecord) -> eyre::Result<()> {
        let key = canonical_address(&record.wallet_address);
        let mut records = self.locked()?;
        check_replace(records.get(&key), expected_batch, &record.wallet_address)?;
        records.insert(key, record.clone());
        Ok(())
    }

    fn list(&self) -> eyre::Result<Vec<WalletKeyRecord>> {
        Ok(self.locked()?.values().cloned().collect())
    }
}

/// One JSON file per wallet under `<data_dir>/wallets/`, serialised across processes by a lock file.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    dir: PathBuf,
}

impl FsRecordStore {
    pub fn open(dir: impl Into<PathBuf>) -> eyre::Result<Self> {
        let dir = dir.into();
        fsutil::ensure_private_dir(&dir)?;
        Ok(Self { dir })
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    fn record_path(&self, wallet_address: &str) -> Option<PathBuf> {
        let key = canonical_address(wallet_address);
        // Every supported address encoding is plain alphanumerics.
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(self.dir.join(format!("{key}.json")))
    }

    fn read_at(path: &Path) -> eyre::Result<Option<WalletKeyRecord>> {
        if !path.exists() {
            return Ok(None);
        }
        fsutil::read_json(path).map(Some)
    }
}

impl WalletKeyRecordStore for FsRecordStore {
    fn get(&self, wallet_address: &str) -> eyre::Result<Option<WalletKeyRecord>> {
        match self.record_path(wallet_address) {
            Some(p) => Self::read_at(&p),
            None => Ok(None),
        }
    }

    fn insert(&self, record: &WalletKeyRecord) -> eyre::Result<()> {
        let path = self.record_path(&record.wallet_address).ok_or_else(|| {
            CustodyError::InvalidParameters(format!(
                "unusable wallet address: {}",
                record.wallet_address
            ))
        })?;
        let _lock = fsutil::LockGuard::try_exclusive(&self.lock_path())?;
        if path.exists() {
            return Err(CustodyError::WalletExists(record.wallet_address.clone()).into());
        }
        fsutil::write_json_restrictive(&path, record)
    }

    fn replace(&self, expected_batch: ShareBatch, record: &WalletKeyRecord) -> eyre::Result<()> {
        let Some(path) = self.record_path(&record.wallet_address) else {
            return Err(CustodyError::WalletNotFound(record.wallet_address.clone()).into());
        };
        let _lock = fsutil::LockGuard::try_exclusive(&self.lock_path())?;
        let current = Self::read_at(&path)?;
        check_replace(current.as_ref(), expected_batch, &record.wallet_address)?;
        fsutil::write_json_restrictive(&path, record)
    }

    fn list(&self) -> eyre::Result<Vec<WalletKeyRecord>> {
        let mut out: Vec<WalletKeyRecord> = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("list {}", self.dir.display()))?;
        for entry in entries {
            let path = entry.context("read wallets dir entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            out.push(fsutil::read_json(&path)?);
        }
        out.sort_by(|a, b| a.wallet_address.cmp(&b.wallet_address));
        Ok(out)
    }
}
