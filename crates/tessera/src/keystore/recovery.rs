use super::{
    crypto::ShareCipher,
    distribute::BACKEND_PRIMARY_INDEX,
    shamir,
    share::{CustodyLocation, Secret, Share},
};
use crate::{errors::CustodyError, records::WalletKeyRecord, wallet::Signer};
use std::collections::BTreeMap;

/// Merge the supplied shares with the decrypted backend primary share.
///
/// Exact duplicates collapse. A share off its custody slot, two different payloads at one index,
/// or any share from another generation make the whole set unusable.
fn candidate_set(
    supplied: &[Share],
    backend_primary: Share,
    record: &WalletKeyRecord,
) -> Result<Vec<Share>, CustodyError> {
    let mut by_index: BTreeMap<u8, Share> = BTreeMap::new();
    for share in supplied.iter().cloned().chain(std::iter::once(backend_primary)) {
        if share.index > record.total_shares || share.index != share.custody.share_index() {
            return Err(CustodyError::MalformedShare(format!(
                "{} share cannot sit at index {}",
                share.custody, share.index
            )));
        }
        if share.batch != record.share_batch {
            return Err(CustodyError::MalformedShare(format!(
                "share {} belongs to a retired share generation",
                share.index
            )));
        }
        match by_index.get(&share.index) {
            Some(seen) if seen.payload != share.payload => {
                return Err(CustodyError::MalformedShare(format!(
                    "conflicting shares for index {}",
                    share.index
                )));
            }
            Some(_) => {}
            None => {
                by_index.insert(share.index, share);
            }
        }
    }
    Ok(by_index.into_values().collect())
}

fn verified_secret<G, C>(
    supplied: &[Share],
    record: &WalletKeyRecord,
    signer: &G,
    cipher: &C,
) -> Result<Secret, CustodyError>
where
    G: Signer + ?Sized,
    C: ShareCipher + ?Sized,
{
    let opened = cipher.decrypt(
        &record.encrypted_backend_share_1,
        BACKEND_PRIMARY_INDEX,
        record.kdf,
    )?;
    let backend_primary = Share {
        index: BACKEND_PRIMARY_INDEX,
        payload: opened.to_vec(),
        custody: CustodyLocation::BackendPrimary,
        batch: record.share_batch,
    };

    let candidates = candidate_set(supplied, backend_primary, record)?;
    let threshold = usize::from(record.share_threshold);
    if candidates.len() < threshold {
        return Err(CustodyError::InsufficientShares {
            needed: threshold,
            supplied: candidates.len(),
        });
    }

    let secret = shamir::combine(&candidates, threshold)?;
    let derived = signer.derive_address(&secret, &record.primary_chain)?;
    if derived != record.wallet_address {
        return Err(CustodyError::AddressMismatch {
            expected: record.wallet_address.clone(),
            derived,
        });
    }
    Ok(secret)
}

/// Rebuild the wallet secret from merchant-supplied shares plus the stored backend primary share,
/// and prove it by re-deriving the wallet address. The secret is dropped (and zeroized) on return.
pub fn recover<G, C>(
    supplied: &[Share],
    record: &WalletKeyRecord,
    signer: &G,
    cipher: &C,
) -> Result<String, CustodyError>
where
    G: Signer + ?Sized,
    C: ShareCipher + ?Sized,
{
    verified_secret(supplied, record, signer, cipher)?;
    Ok(record.wallet_address.clone())
}

/// Like [`recover`], then lends the verified secret to `f` for the duration of the call.
pub fn recover_with<G, C, T>(
    supplied: &[Share],
    record: &WalletKeyRecord,
    signer: &G,
    cipher: &C,
    f: impl FnOnce(&Secret) -> T,
) -> Result<T, CustodyError>
where
    G: Signer + ?Sized,
    C: ShareCipher + ?Sized,
{
    let secret = verified_secret(supplied, record, signer, cipher)?;
    Ok(f(&secret))
}
