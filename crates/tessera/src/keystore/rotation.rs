use super::{
    crypto::ShareCipher,
    distribute::{distribute, ShareBundle, THRESHOLD, TOTAL_SHARES},
    recovery::recover_with,
    share::{Share, ShareBatch},
};
use crate::{errors::CustodyError, records::WalletKeyRecord, wallet::Signer};

/// A verified re-share, not yet committed to the record store.
#[derive(Debug, Clone)]
pub struct RotationPlan {
    pub bundle: ShareBundle,
    pub record: WalletKeyRecord,
    /// Batch the store must still hold for the swap to go through.
    pub expected_batch: ShareBatch,
}

/// Prove a quorum for the current generation, then re-split the same secret under a new
/// polynomial. Addresses stay the same; every old share becomes useless once the record is swapped.
pub fn rotate<G, C>(
    supplied: &[Share],
    record: &WalletKeyRecord,
    signer: &G,
    cipher: &C,
    now: String,
) -> Result<RotationPlan, CustodyError>
where
    G: Signer + ?Sized,
    C: ShareCipher + ?Sized,
{
    let bundle = recover_with(supplied, record, signer, cipher, |secret| {
        distribute(secret, cipher)
    })??;

    let generation = record
        .generation
        .checked_add(1)
        .ok_or_else(|| CustodyError::InvalidParameters("generation overflow".to_owned()))?;
    let next = WalletKeyRecord {
        wallet_address: record.wallet_address.clone(),
        primary_chain: record.primary_chain.clone(),
        encrypted_backend_share_1: bundle.backend_primary.clone(),
        encrypted_backend_share_2: bundle.backend_redundant.clone(),
        kdf: bundle.kdf,
        share_threshold: THRESHOLD,
        total_shares: TOTAL_SHARES,
        chain_addresses: record.chain_addresses.clone(),
        share_batch: bundle.batch,
        generation,
        created_at: record.created_at.clone(),
        rotated_at: Some(now),
    };

    Ok(RotationPlan {
        bundle,
        record: next,
        expected_batch: record.share_batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{
        crypto::{tests::FAST, KdfParams, ShareCodec},
        recovery::{recover, tests::fixture},
    };
    use eyre::ContextCompat as _;

    #[test]
    fn rotation_keeps_address_and_retires_old_shares() -> eyre::Result<()> {
        let fx = fixture()?;
        let old = [
            fx.bundle.merchant_device.clone(),
            fx.bundle.merchant_backup.clone(),
        ];
        let plan = rotate(
            &old,
            &fx.record,
            &fx.signer,
            &fx.cipher,
            "2026-10-19T00:00:00+00:00".to_owned(),
        )?;

        assert_eq!(plan.expected_batch, fx.record.share_batch);
        assert_ne!(plan.record.share_batch, fx.record.share_batch);
        assert_eq!(plan.record.generation, 2);
        assert_eq!(plan.record.wallet_address, fx.record.wallet_address);
        assert_eq!(plan.record.chain_addresses, fx.record.chain_addresses);
        assert_eq!(plan.record.created_at, fx.record.created_at);
        assert!(plan.record.rotated_at.is_some(), "rotation timestamp");
        assert_ne!(
            plan.bundle.merchant_device.payload,
            fx.bundle.merchant_device.payload
        );

        let fresh = [
            plan.bundle.merchant_device.clone(),
            plan.bundle.merchant_backup.clone(),
        ];
        assert_eq!(
            recover(&fresh, &plan.record, &fx.signer, &fx.cipher)?,
            fx.record.wallet_address
        );

        let err = recover(&old, &plan.record, &fx.signer, &fx.cipher)
            .err()
            .context("old shares must be retired")?;
        assert!(matches!(err, CustodyError::MalformedShare(_)), "{err}");

        let mixed = [
            fx.bundle.merchant_device.clone(),
            plan.bundle.merchant_backup.clone(),
        ];
        let err = recover(&mixed, &plan.record, &fx.signer, &fx.cipher)
            .err()
            .context("generations must not mix")?;
        assert!(matches!(err, CustodyError::MalformedShare(_)), "{err}");
        Ok(())
    }

    #[test]
    fn rotation_reseals_under_the_current_cost() -> eyre::Result<()> {
        let fx = fixture()?;
        let hardened = KdfParams {
            memory_kib: 128,
            ..FAST
        };
        let cipher = ShareCodec::new([6_u8; 32], hardened);
        let old = [
            fx.bundle.merchant_device.clone(),
            fx.bundle.merchant_backup.clone(),
        ];
        let plan = rotate(
            &old,
            &fx.record,
            &fx.signer,
            &cipher,
            "2026-10-19T00:00:00+00:00".to_owned(),
        )?;
        assert_eq!(fx.record.kdf, FAST);
        assert_eq!(plan.record.kdf, hardened);

        let fresh = [
            plan.bundle.merchant_device.clone(),
            plan.bundle.third_party.clone(),
        ];
        assert_eq!(
            recover(&fresh, &plan.record, &fx.signer, &fx.cipher)?,
            fx.record.wallet_address
        );
        Ok(())
    }

    #[test]
    fn rotation_needs_a_quorum() -> eyre::Result<()> {
        let fx = fixture()?;
        let err = rotate(
            &[fx.bundle.merchant_device.clone()],
            &fx.record,
            &fx.signer,
            &fx.cipher,
            "2026-10-19T00:00:00+00:00".to_owned(),
        )
        .err()
        .context("one share must not rotate")?;
        assert!(
            matches!(err, CustodyError::InsufficientShares { .. }),
            "{err}"
        );
        Ok(())
    }
}
