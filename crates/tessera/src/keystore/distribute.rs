use super::{
    crypto::{EncryptedShare, KdfParams, ShareCipher},
    shamir,
    share::{CustodyLocation, Secret, Share, ShareBatch},
};
use crate::errors::CustodyError;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const THRESHOLD: u8 = 3;
pub const TOTAL_SHARES: u8 = 5;

/// x-coordinate of `encrypted_backend_share_1` in every generation.
pub const BACKEND_PRIMARY_INDEX: u8 = CustodyLocation::BackendPrimary.share_index();
/// x-coordinate of `encrypted_backend_share_2` in every generation.
pub const BACKEND_REDUNDANT_INDEX: u8 = CustodyLocation::BackendRedundant.share_index();

/// Off-device backup payload mailed to the merchant at onboarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEmail {
    pub merchant_device: String,
    pub merchant_backup: String,
}

/// Everything produced by one distribution. Only the sealed backend shares are fit for storage.
#[derive(Debug, Clone)]
pub struct ShareBundle {
    pub batch: ShareBatch,
    pub threshold: u8,
    pub total: u8,
    pub merchant_device: Share,
    pub merchant_backup: Share,
    pub third_party: Share,
    pub backend_primary: EncryptedShare,
    pub backend_redundant: EncryptedShare,
    /// Cost both backend shares were sealed under.
    pub kdf: KdfParams,
}

impl ShareBundle {
    /// Scannable payload: the merchant device share only.
    pub fn recovery_qr(&self) -> String {
        self.merchant_device.to_compact()
    }

    pub fn recovery_email(&self) -> RecoveryEmail {
        RecoveryEmail {
            merchant_device: self.merchant_device.to_compact(),
            merchant_backup: self.merchant_backup.to_compact(),
        }
    }
}

fn take_share(shares: &[Share], custody: CustodyLocation) -> Result<Share, CustodyError> {
    shares
        .iter()
        .find(|s| s.custody == custody)
        .cloned()
        .ok_or_else(|| CustodyError::InvalidParameters(format!("split produced no {custody} share")))
}

/// Split `secret` 3-of-5 across the fixed custody layout and seal the two backend shares.
///
/// Before returning, the bundle is proven to rebuild `secret` from the two merchant shares and the
/// decrypted backend primary share. Any failure on that path is `ShareValidationFailed`.
pub fn distribute<C: ShareCipher + ?Sized>(
    secret: &Secret,
    cipher: &C,
) -> Result<ShareBundle, CustodyError> {
    let shares = shamir::split(
        secret.expose(),
        &CustodyLocation::DISTRIBUTION_ORDER,
        usize::from(THRESHOLD),
    )?;

    let merchant_device = take_share(&shares, CustodyLocation::MerchantDevice)?;
    let merchant_backup = take_share(&shares, CustodyLocation::MerchantBackup)?;
    let primary = take_share(&shares, CustodyLocation::BackendPrimary)?;
    let redundant = take_share(&shares, CustodyLocation::BackendRedundant)?;
    let third_party = take_share(&shares, CustodyLocation::ThirdParty)?;
    if primary.index != BACKEND_PRIMARY_INDEX || redundant.index != BACKEND_REDUNDANT_INDEX {
        return Err(CustodyError::InvalidParameters(
            "backend shares landed on unexpected indices".to_owned(),
        ));
    }

    let kdf = cipher.kdf_params();
    let backend_primary = cipher.encrypt(&primary.payload, primary.index)?;
    let backend_redundant = cipher.encrypt(&redundant.payload, redundant.index)?;

    self_check(
        secret,
        cipher,
        &merchant_device,
        &merchant_backup,
        &backend_primary,
        kdf,
        primary.batch,
    )?;

    Ok(ShareBundle {
        batch: primary.batch,
        threshold: THRESHOLD,
        total: TOTAL_SHARES,
        merchant_device,
        merchant_backup,
        third_party,
        backend_primary,
        backend_redundant,
        kdf,
    })
}

fn self_check<C: ShareCipher + ?Sized>(
    secret: &Secret,
    cipher: &C,
    device: &Share,
    backup: &Share,
    sealed_primary: &EncryptedShare,
    kdf: KdfParams,
    batch: ShareBatch,
) -> Result<(), CustodyError> {
    let opened = cipher
        .decrypt(sealed_primary, BACKEND_PRIMARY_INDEX, kdf)
        .map_err(|e| {
            warn!(code = e.code(), "self-check could not open backend primary share");
            CustodyError::ShareValidationFailed
        })?;
    let primary = Share {
        index: BACKEND_PRIMARY_INDEX,
        payload: opened.to_vec(),
        custody: CustodyLocation::BackendPrimary,
        batch,
    };
    let rebuilt = shamir::combine(
        &[device.clone(), backup.clone(), primary],
        usize::from(THRESHOLD),
    )
    .map_err(|e| {
        warn!(code = e.code(), "self-check combine failed");
        CustodyError::ShareValidationFailed
    })?;
    if rebuilt != *secret {
        warn!("self-check rebuilt a different secret");
        return Err(CustodyError::ShareValidationFailed);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keystore::crypto::{tests::FAST, ShareCodec};
    use eyre::ContextCompat as _;
    use zeroize::Zeroizing;

    /// Seals fine, but opens every share to garbage of the right length.
    pub(crate) struct GarbageCipher(pub(crate) ShareCodec);

    impl ShareCipher for GarbageCipher {
        fn kdf_params(&self) -> KdfParams {
            self.0.kdf_params()
        }

        fn encrypt(&self, share: &[u8], share_index: u8) -> Result<EncryptedShare, CustodyError> {
            self.0.encrypt(share, share_index)
        }

        fn decrypt(
            &self,
            encrypted: &EncryptedShare,
            share_index: u8,
            params: KdfParams,
        ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
            let real = self.0.decrypt(encrypted, share_index, params)?;
            Ok(Zeroizing::new(real.iter().map(|b| b ^ 0x5a).collect()))
        }
    }

    struct FailingCipher(ShareCodec);

    impl ShareCipher for FailingCipher {
        fn kdf_params(&self) -> KdfParams {
            self.0.kdf_params()
        }

        fn encrypt(&self, share: &[u8], share_index: u8) -> Result<EncryptedShare, CustodyError> {
            self.0.encrypt(share, share_index)
        }

        fn decrypt(
            &self,
            _: &EncryptedShare,
            _: u8,
            _: KdfParams,
        ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
            Err(CustodyError::AuthenticationFailed)
        }
    }

    fn codec() -> ShareCodec {
        ShareCodec::new([3_u8; 32], FAST)
    }

    #[test]
    fn bundle_layout_matches_custody_order() -> eyre::Result<()> {
        let secret = Secret::new(vec![0x11; 32]);
        let cipher = codec();
        let bundle = distribute(&secret, &cipher)?;

        assert_eq!(bundle.threshold, 3);
        assert_eq!(bundle.total, 5);
        assert_eq!(bundle.kdf, FAST);
        assert_eq!(bundle.merchant_device.index, 1);
        assert_eq!(bundle.merchant_backup.index, 2);
        assert_eq!(bundle.third_party.index, 5);
        for share in [
            &bundle.merchant_device,
            &bundle.merchant_backup,
            &bundle.third_party,
        ] {
            assert_eq!(share.batch, bundle.batch);
            assert_eq!(share.payload.len(), 32);
        }

        let redundant = cipher.decrypt(
            &bundle.backend_redundant,
            BACKEND_REDUNDANT_INDEX,
            bundle.kdf,
        )?;
        let rebuilt = shamir::combine(
            &[
                bundle.third_party.clone(),
                bundle.merchant_backup.clone(),
                Share {
                    index: BACKEND_REDUNDANT_INDEX,
                    payload: redundant.to_vec(),
                    custody: CustodyLocation::BackendRedundant,
                    batch: bundle.batch,
                },
            ],
            usize::from(THRESHOLD),
        )?;
        assert_eq!(rebuilt, secret);
        Ok(())
    }

    #[test]
    fn recovery_payloads_carry_merchant_shares_only() -> eyre::Result<()> {
        let bundle = distribute(&Secret::new(vec![0x22; 32]), &codec())?;

        let qr = bundle.recovery_qr();
        assert!(qr.starts_with("merchant_device:"), "{qr}");
        assert_eq!(Share::from_compact(&qr)?, bundle.merchant_device);

        let email = bundle.recovery_email();
        let json = serde_json::to_value(&email)?;
        let backup = json
            .get("merchant_backup")
            .and_then(serde_json::Value::as_str)
            .context("merchant_backup field")?;
        assert_eq!(Share::from_compact(backup)?, bundle.merchant_backup);
        assert_eq!(email.merchant_device, qr);
        assert!(
            !json.to_string().contains("third_party"),
            "escrow share must not be mailed"
        );
        Ok(())
    }

    #[test]
    fn broken_decrypt_fails_self_check() -> eyre::Result<()> {
        let secret = Secret::new(vec![0x33; 32]);

        let err = distribute(&secret, &GarbageCipher(codec()))
            .err()
            .context("garbage decrypt must fail")?;
        assert_eq!(err, CustodyError::ShareValidationFailed);

        let err = distribute(&secret, &FailingCipher(codec()))
            .err()
            .context("failing decrypt must fail")?;
        assert_eq!(err, CustodyError::ShareValidationFailed);
        Ok(())
    }

    #[test]
    fn empty_secret_is_rejected() {
        let res = distribute(&Secret::new(Vec::new()), &codec());
        assert!(
            matches!(res, Err(CustodyError::InvalidParameters(_))),
            "{res:?}"
        );
    }
}
