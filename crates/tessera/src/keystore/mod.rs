pub mod crypto;
pub mod distribute;
pub mod recovery;
pub mod rotation;
pub mod shamir;
pub mod share;

use crate::{
    audit::AuditLog,
    errors::{CustodyError, ErrorReport},
    paths::TesseraPaths,
    records::{FsRecordStore, WalletKeyRecord, WalletKeyRecordStore},
    store::ConfigStore,
    wallet::{canonical_address, generate_mnemonic_entropy, MnemonicSigner, Signer},
};
use crypto::{ShareCipher, ShareCodec};
use distribute::{distribute, ShareBundle, THRESHOLD, TOTAL_SHARES};
use eyre::Context as _;
use share::{Secret, Share};
use tracing::{info, warn};

/// A freshly created wallet: the persisted record plus the one-time share handout.
#[derive(Debug, Clone)]
pub struct CreatedWallet {
    pub record: WalletKeyRecord,
    pub bundle: ShareBundle,
}

/// Custody service: wallet creation, verified recovery and share rotation over a record store.
///
/// Secrets only exist inside a single call. Every outcome is traced and written to the audit log;
/// share payloads and encrypted shares are never logged.
#[derive(Debug)]
pub struct Keystore<S, G, C> {
    store: S,
    signer: G,
    cipher: C,
    primary_chain: String,
    chains: Vec<String>,
    audit: AuditLog,
}

impl Keystore<FsRecordStore, MnemonicSigner, ShareCodec> {
    /// Production wiring: on-disk records, config from `config.toml`, master secret from disk or env.
    pub fn open(paths: &TesseraPaths) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        let cfg = ConfigStore::new(paths).load_or_init_default()?;
        let master = paths.load_or_create_master_secret()?;
        let store = FsRecordStore::open(paths.wallets_dir())?;
        Ok(Self::new(
            store,
            MnemonicSigner::new(cfg.evm_chains()),
            ShareCodec::new(*master, cfg.kdf),
            cfg.primary_chain(),
            cfg.address_chains(),
        )
        .with_audit(AuditLog::new(paths.audit_log_path())))
    }
}

impl<S, G, C> Keystore<S, G, C>
where
    S: WalletKeyRecordStore,
    G: Signer,
    C: ShareCipher,
{
    pub fn new(
        store: S,
        signer: G,
        cipher: C,
        primary_chain: impl Into<String>,
        chains: Vec<String>,
    ) -> Self {
        let primary_chain = primary_chain.into();
        let mut all = vec![primary_chain.clone()];
        all.extend(chains.into_iter().filter(|c| *c != primary_chain));
        Self {
            store,
            signer,
            cipher,
            primary_chain,
            chains: all,
            audit: AuditLog::disabled(),
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    fn record_outcome<T>(
        &self,
        op: &str,
        wallet: Option<&str>,
        generation: Option<u32>,
        res: &eyre::Result<T>,
    ) {
        let (result, error_code) = match res {
            Ok(_) => ("ok", None),
            Err(e) => {
                let report = ErrorReport::from_report(e);
                warn!(op, wallet, code = %report.code, error = %e, "custody operation failed");
                ("error", Some(report.code))
            }
        };
        let entry = serde_json::json!({
            "op": op,
            "wallet": wallet,
            "generation": generation,
            "result": result,
            "error_code": error_code,
        });
        // The operation already happened; a broken audit sink must not hide its result.
        if let Err(e) = self.audit.append(entry) {
            warn!(op, error = %e, "failed to write audit entry");
        }
    }

    fn create_inner(&self) -> eyre::Result<CreatedWallet> {
        let secret = generate_mnemonic_entropy()?;
        let bundle = distribute(&secret, &self.cipher).context("distribute shares")?;
        let chain_addresses = self
            .signer
            .derive_addresses(&secret, &self.chains)
            .context("derive wallet addresses")?;
        let wallet_address = chain_addresses
            .get(&self.primary_chain)
            .cloned()
            .ok_or_else(|| CustodyError::UnsupportedChain(self.primary_chain.clone()))?;

        let record = WalletKeyRecord {
            wallet_address,
            primary_chain: self.primary_chain.clone(),
            encrypted_backend_share_1: bundle.backend_primary.clone(),
            encrypted_backend_share_2: bundle.backend_redundant.clone(),
            kdf: bundle.kdf,
            share_threshold: THRESHOLD,
            total_shares: TOTAL_SHARES,
            chain_addresses,
            share_batch: bundle.batch,
            generation: 1,
            created_at: utc_now_iso(),
            rotated_at: None,
        };
        self.store.insert(&record).context("persist wallet record")?;
        Ok(CreatedWallet { record, bundle })
    }

    /// Generate a wallet, split its seed 3-of-5 and persist the record. Nothing is stored if the
    /// share self-check fails.
    pub fn create_wallet(&self) -> eyre::Result<CreatedWallet> {
        let res = self.create_inner();
        let wallet = res.as_ref().ok().map(|w| w.record.wallet_address.as_str());
        self.record_outcome("create_wallet", wallet, Some(1), &res);
        if let Ok(w) = &res {
            info!(wallet = %w.record.wallet_address, batch = %w.bundle.batch, "wallet created");
        }
        res
    }

    pub fn wallet(&self, address: &str) -> eyre::Result<WalletKeyRecord> {
        self.store
            .get(address)?
            .ok_or_else(|| CustodyError::WalletNotFound(address.to_owned()).into())
    }

    pub fn list_wallets(&self) -> eyre::Result<Vec<WalletKeyRecord>> {
        self.store.list()
    }

    /// Verify that `supplied` plus the stored backend share rebuild `address`.
    pub fn recover_wallet(&self, address: &str, supplied: &[Share]) -> eyre::Result<String> {
        self.with_unlocked_secret(address, supplied, |_secret| ())
            .map(|()| canonical_address(address))
    }

    /// Verified recovery that lends the secret to `f`, e.g. to sign a transaction.
    pub fn with_unlocked_secret<T>(
        &self,
        address: &str,
        supplied: &[Share],
        f: impl FnOnce(&Secret) -> T,
    ) -> eyre::Result<T> {
        let mut generation = None;
        let res = self.wallet(address).and_then(|record| {
            generation = Some(record.generation);
            recovery::recover_with(supplied, &record, &self.signer, &self.cipher, f)
                .context("recover wallet secret")
        });
        self.record_outcome("recover_wallet", Some(address), generation, &res);
        if res.is_ok() {
            info!(wallet = address, supplied = supplied.len(), "wallet recovered");
        }
        res
    }

    /// Re-share the wallet under a new polynomial. After this returns, only the new bundle's
    /// shares recover the wallet.
    pub fn rotate_shares(&self, address: &str, supplied: &[Share]) -> eyre::Result<ShareBundle> {
        let mut generation = None;
        let res = self.wallet(address).and_then(|record| {
            let plan = rotation::rotate(
                supplied,
                &record,
                &self.signer,
                &self.cipher,
                utc_now_iso(),
            )
            .context("rotate shares")?;
            self.store
                .replace(plan.expected_batch, &plan.record)
                .context("swap wallet record")?;
            generation = Some(plan.record.generation);
            Ok(plan.bundle)
        });
        self.record_outcome("rotate_shares", Some(address), generation, &res);
        if let Ok(bundle) = &res {
            info!(wallet = address, ?generation, batch = %bundle.batch, "shares rotated");
        }
        res
    }
}

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keystore::{
            crypto::{tests::FAST, KdfParams},
            distribute::tests::GarbageCipher,
        },
        records::MemoryRecordStore,
    };
    use eyre::ContextCompat as _;

    fn keystore() -> Keystore<MemoryRecordStore, MnemonicSigner, ShareCodec> {
        Keystore::new(
            MemoryRecordStore::new(),
            MnemonicSigner::new(["ethereum", "polygon"]),
            ShareCodec::new([8_u8; 32], FAST),
            "ethereum",
            vec!["polygon".to_owned(), "solana".to_owned(), "bitcoin".to_owned()],
        )
    }

    fn code(e: &eyre::Report) -> String {
        ErrorReport::from_report(e).code
    }

    #[test]
    fn create_then_recover_with_merchant_shares() -> eyre::Result<()> {
        let ks = keystore();
        let created = ks.create_wallet()?;
        let record = ks.wallet(&created.record.wallet_address)?;
        assert_eq!(record, created.record);
        assert_eq!(record.chain_addresses.len(), 4);
        assert_eq!(
            record.chain_addresses.get("polygon"),
            Some(&record.wallet_address)
        );

        // Only the text forms leave the process; recover from those.
        let email = created.bundle.recovery_email();
        let supplied = [
            Share::from_compact(&email.merchant_device)?,
            Share::from_compact(&email.merchant_backup)?,
        ];
        drop(created);
        let address = ks.recover_wallet(&record.wallet_address, &supplied)?;
        assert_eq!(address, record.wallet_address);
        Ok(())
    }

    #[test]
    fn config_cost_change_only_affects_new_wallets() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let open = |params: KdfParams| -> eyre::Result<_> {
            Ok(Keystore::new(
                FsRecordStore::open(td.path().join("wallets"))?,
                MnemonicSigner::new(["ethereum"]),
                ShareCodec::new([8_u8; 32], params),
                "ethereum",
                Vec::new(),
            ))
        };
        let created = open(FAST)?.create_wallet()?;
        let address = created.record.wallet_address.clone();
        assert_eq!(created.record.kdf, FAST);

        let hardened = KdfParams {
            memory_kib: 128,
            ..FAST
        };
        let ks = open(hardened)?;
        let supplied = [
            created.bundle.merchant_device.clone(),
            created.bundle.merchant_backup.clone(),
        ];
        assert_eq!(
            ks.recover_wallet(&address.to_lowercase(), &supplied)?,
            address
        );
        assert_eq!(ks.create_wallet()?.record.kdf, hardened);
        Ok(())
    }

    #[test]
    fn one_share_is_insufficient() -> eyre::Result<()> {
        let ks = keystore();
        let created = ks.create_wallet()?;
        let err = ks
            .recover_wallet(
                &created.record.wallet_address,
                &[created.bundle.merchant_device.clone()],
            )
            .err()
            .context("one share must fail")?;
        assert_eq!(code(&err), "insufficient_shares");
        Ok(())
    }

    #[test]
    fn unknown_wallet_is_not_found() -> eyre::Result<()> {
        let err = keystore()
            .recover_wallet("0xnope", &[])
            .err()
            .context("unknown wallet")?;
        assert_eq!(code(&err), "wallet_not_found");
        Ok(())
    }

    #[test]
    fn failed_self_check_persists_nothing() -> eyre::Result<()> {
        let ks = Keystore::new(
            MemoryRecordStore::new(),
            MnemonicSigner::new(["ethereum"]),
            GarbageCipher(ShareCodec::new([8_u8; 32], FAST)),
            "ethereum",
            Vec::new(),
        );
        let err = ks.create_wallet().err().context("self-check must fail")?;
        assert_eq!(code(&err), "share_validation_failed");
        assert!(ks.list_wallets()?.is_empty(), "no record may be persisted");
        Ok(())
    }

    #[test]
    fn rotation_retires_previous_shares() -> eyre::Result<()> {
        let ks = keystore();
        let created = ks.create_wallet()?;
        let address = created.record.wallet_address.clone();
        let old = [
            created.bundle.merchant_device.clone(),
            created.bundle.merchant_backup.clone(),
        ];

        let fresh = ks.rotate_shares(&address, &old)?;
        assert_eq!(ks.wallet(&address)?.generation, 2);
        assert_eq!(ks.wallet(&address)?.share_batch, fresh.batch);

        let err = ks
            .recover_wallet(&address, &old)
            .err()
            .context("old shares must fail")?;
        assert_eq!(code(&err), "malformed_share");

        let new_shares = [fresh.merchant_device.clone(), fresh.third_party.clone()];
        assert_eq!(ks.recover_wallet(&address, &new_shares)?, address);

        // A rotation verified against the old generation cannot be committed any more.
        let err = ks
            .rotate_shares(&address, &old)
            .err()
            .context("stale rotation")?;
        assert_eq!(code(&err), "malformed_share");
        Ok(())
    }

    #[test]
    fn concurrent_rotation_loses_the_swap() -> eyre::Result<()> {
        let ks = keystore();
        let created = ks.create_wallet()?;
        let record = created.record.clone();
        let old = [
            created.bundle.merchant_device.clone(),
            created.bundle.merchant_backup.clone(),
        ];

        // Two rotations verified against the same generation; only the first swap lands.
        let first = rotation::rotate(&old, &record, &ks.signer, &ks.cipher, utc_now_iso())?;
        let second = rotation::rotate(&old, &record, &ks.signer, &ks.cipher, utc_now_iso())?;
        ks.store().replace(first.expected_batch, &first.record)?;
        let err = ks
            .store()
            .replace(second.expected_batch, &second.record)
            .err()
            .context("second swap must conflict")?;
        assert_eq!(code(&err), "rotation_conflict");
        Ok(())
    }

    #[test]
    fn lent_secret_matches_recorded_addresses() -> eyre::Result<()> {
        let ks = keystore();
        let created = ks.create_wallet()?;
        let supplied = [
            created.bundle.merchant_backup.clone(),
            created.bundle.third_party.clone(),
        ];
        let solana = ks.with_unlocked_secret(&created.record.wallet_address, &supplied, |s| {
            ks.signer.derive_address(s, "solana")
        })??;
        assert_eq!(
            created.record.chain_addresses.get("solana"),
            Some(&solana)
        );
        Ok(())
    }

    #[test]
    fn audit_log_records_outcomes_without_material() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let log_path = td.path().join("audit.jsonl");
        let ks = keystore().with_audit(AuditLog::new(log_path.clone()));
        let created = ks.create_wallet()?;
        let res = ks.recover_wallet(
            &created.record.wallet_address,
            &[created.bundle.merchant_device.clone()],
        );
        assert!(res.is_err(), "one share must fail");

        let text = std::fs::read_to_string(&log_path)?;
        let entries: Vec<serde_json::Value> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(entries.len(), 2);
        let last = entries.last().context("last entry")?;
        assert_eq!(
            last.get("error_code").and_then(serde_json::Value::as_str),
            Some("insufficient_shares")
        );
        let device_hex = hex::encode(&created.bundle.merchant_device.payload);
        assert!(!text.contains(&device_hex), "share payload leaked into audit log");
        assert!(
            !text.contains(&created.record.encrypted_backend_share_1.to_string()),
            "encrypted share leaked into audit log"
        );
        Ok(())
    }
}
