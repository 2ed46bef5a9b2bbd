use crate::errors::CustodyError;
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::{fmt, str::FromStr};
use zeroize::Zeroizing;

const IV_LEN: usize = 12;
const SALT_DOMAIN: &[u8] = b"tessera/share-salt/v1";

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

/// Argon2id cost parameters for per-share key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // Frozen at the argon2 0.5 defaults so a dependency bump never changes derived keys.
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// `iv:ciphertext`, lowercase hex on both sides. This exact text is what lands in storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EncryptedShare {
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
}

#[cfg(test)]
impl EncryptedShare {
    pub(crate) fn ciphertext_mut(&mut self) -> &mut Vec<u8> {
        &mut self.ciphertext
    }
}

impl fmt::Display for EncryptedShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            hex::encode(self.iv),
            hex::encode(&self.ciphertext)
        )
    }
}

impl fmt::Debug for EncryptedShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedShare")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

impl FromStr for EncryptedShare {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((iv_hex, ct_hex)) = s.trim().split_once(':') else {
            return Err(CustodyError::DecryptionFailed(
                "expected iv:ciphertext".to_owned(),
            ));
        };
        let iv = hex::decode(iv_hex)
            .map_err(|e| CustodyError::DecryptionFailed(format!("decode iv: {e}")))?;
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_bad: Vec<u8>| {
                CustodyError::DecryptionFailed("invalid iv length".to_owned())
            })?;
        let ciphertext = hex::decode(ct_hex)
            .map_err(|e| CustodyError::DecryptionFailed(format!("decode ciphertext: {e}")))?;
        if ciphertext.is_empty() {
            return Err(CustodyError::DecryptionFailed(
                "empty ciphertext".to_owned(),
            ));
        }
        Ok(Self { iv, ciphertext })
    }
}

impl From<EncryptedShare> for String {
    fn from(e: EncryptedShare) -> Self {
        e.to_string()
    }
}

impl TryFrom<String> for EncryptedShare {
    type Error = CustodyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Deterministic per-index salt, so every backend share gets its own key from one master secret.
fn share_salt(share_index: u8) -> [u8; 16] {
    let digest = Sha256::new()
        .chain_update(SALT_DOMAIN)
        .chain_update([share_index])
        .finalize();
    let mut salt = [0_u8; 16];
    salt.copy_from_slice(digest.get(..16).unwrap_or(&[0_u8; 16]));
    salt
}

pub fn derive_share_key(
    master_secret: &[u8],
    share_index: u8,
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| CustodyError::InvalidParameters(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0_u8; 32]);
    argon2
        .hash_password_into(master_secret, &share_salt(share_index), &mut *key)
        .map_err(|e| CustodyError::InvalidParameters(format!("argon2 hash: {e}")))?;
    Ok(key)
}

pub fn encrypt_share(
    share: &[u8],
    share_index: u8,
    master_secret: &[u8],
    params: KdfParams,
) -> Result<EncryptedShare, CustodyError> {
    let key = derive_share_key(master_secret, share_index, params)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CustodyError::InvalidParameters(format!("aes init: {e}")))?;
    let mut iv = [0_u8; IV_LEN];
    fill_random(&mut iv);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), share)
        .map_err(|e| CustodyError::InvalidParameters(format!("aes encrypt: {e}")))?;
    Ok(EncryptedShare { iv, ciphertext })
}

pub fn decrypt_share(
    encrypted: &EncryptedShare,
    share_index: u8,
    master_secret: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
    let key = derive_share_key(master_secret, share_index, params)
        .map_err(|e| CustodyError::DecryptionFailed(e.to_string()))?;
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CustodyError::DecryptionFailed(format!("aes init: {e}")))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&encrypted.iv), encrypted.ciphertext.as_ref())
        .map_err(|_tag| CustodyError::AuthenticationFailed)?;
    Ok(Zeroizing::new(plaintext))
}

/// Seals and opens backend-held shares.
pub trait ShareCipher {
    /// Argon2id cost applied to shares sealed from now on.
    fn kdf_params(&self) -> KdfParams;

    fn encrypt(&self, share: &[u8], share_index: u8) -> Result<EncryptedShare, CustodyError>;

    /// Open a share sealed under `params`, which is whatever cost was current when it was sealed.
    fn decrypt(
        &self,
        encrypted: &EncryptedShare,
        share_index: u8,
        params: KdfParams,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError>;
}

/// The production [`ShareCipher`]: Argon2id per-share keys over one process-wide master secret.
pub struct ShareCodec {
    master: SecretBox<[u8; 32]>,
    params: KdfParams,
}

impl ShareCodec {
    pub fn new(master: [u8; 32], params: KdfParams) -> Self {
        Self {
            master: SecretBox::new(Box::new(master)),
            params,
        }
    }
}

impl fmt::Debug for ShareCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareCodec")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ShareCipher for ShareCodec {
    fn kdf_params(&self) -> KdfParams {
        self.params
    }

    fn encrypt(&self, share: &[u8], share_index: u8) -> Result<EncryptedShare, CustodyError> {
        encrypt_share(share, share_index, self.master.expose_secret(), self.params)
    }

    fn decrypt(
        &self,
        encrypted: &EncryptedShare,
        share_index: u8,
        params: KdfParams,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        decrypt_share(encrypted, share_index, self.master.expose_secret(), params)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    // Argon2 minimums keep the suite fast; the cost parameters do not change the semantics.
    pub(crate) const FAST: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn round_trip_for_each_index() -> eyre::Result<()> {
        let master = [7_u8; 32];
        let share = b"backend share payload".to_vec();
        for index in [1_u8, 3, 4, 255] {
            let enc = encrypt_share(&share, index, &master, FAST)?;
            let out = decrypt_share(&enc, index, &master, FAST)?;
            assert_eq!(out.as_slice(), share.as_slice(), "index {index}");
        }
        Ok(())
    }

    #[test]
    fn text_form_is_hex_iv_colon_hex_ciphertext() -> eyre::Result<()> {
        let enc = encrypt_share(b"abc", 3, &[1_u8; 32], FAST)?;
        let text = enc.to_string();
        let (iv, ct) = text.split_once(':').context("delimiter")?;
        assert_eq!(iv.len(), IV_LEN * 2);
        // 3 plaintext bytes + 16 byte GCM tag.
        assert_eq!(ct.len(), (3 + 16) * 2);
        assert!(
            text.chars().all(|c| c == ':' || c.is_ascii_hexdigit()),
            "not hex: {text}"
        );

        let parsed: EncryptedShare = text.parse()?;
        assert_eq!(parsed, enc);
        let json = serde_json::to_string(&enc)?;
        assert_eq!(json, format!("\"{text}\""));
        Ok(())
    }

    #[test]
    fn fresh_iv_per_call() -> eyre::Result<()> {
        let a = encrypt_share(b"same", 3, &[1_u8; 32], FAST)?;
        let b = encrypt_share(b"same", 3, &[1_u8; 32], FAST)?;
        assert_ne!(a.to_string(), b.to_string());
        Ok(())
    }

    #[test]
    fn index_mismatch_fails_closed() -> eyre::Result<()> {
        let master = [9_u8; 32];
        let enc = encrypt_share(b"share three", 3, &master, FAST)?;
        let err = decrypt_share(&enc, 4, &master, FAST)
            .err()
            .context("wrong index must fail")?;
        assert_eq!(err, CustodyError::AuthenticationFailed);
        Ok(())
    }

    #[test]
    fn wrong_master_or_tampering_fails_closed() -> eyre::Result<()> {
        let enc = encrypt_share(b"share three", 3, &[9_u8; 32], FAST)?;
        let err = decrypt_share(&enc, 3, &[8_u8; 32], FAST)
            .err()
            .context("wrong master must fail")?;
        assert_eq!(err, CustodyError::AuthenticationFailed);

        let mut tampered = enc;
        let byte = tampered
            .ciphertext_mut()
            .first_mut()
            .context("ciphertext byte")?;
        *byte ^= 0x01;
        let err = decrypt_share(&tampered, 3, &[9_u8; 32], FAST)
            .err()
            .context("tampered ciphertext must fail")?;
        assert_eq!(err, CustodyError::AuthenticationFailed);
        Ok(())
    }

    #[test]
    fn unparseable_text_is_decryption_failure() {
        for bad in [
            "",
            "nodelimiter",
            "zz:00",
            "00:00",
            "000102030405060708090a0b:",
            "000102030405060708090a0b:xyz",
        ] {
            let res = bad.parse::<EncryptedShare>();
            assert!(
                matches!(res, Err(CustodyError::DecryptionFailed(_))),
                "{bad:?} should fail to parse"
            );
        }
    }

    #[test]
    fn salts_differ_per_index() {
        assert_ne!(share_salt(3), share_salt(4));
        assert_eq!(share_salt(3), share_salt(3));
    }

    #[test]
    fn codec_implements_cipher() -> eyre::Result<()> {
        let codec = ShareCodec::new([5_u8; 32], FAST);
        let enc = codec.encrypt(b"payload", 3)?;
        assert_eq!(codec.decrypt(&enc, 3, codec.kdf_params())?.as_slice(), b"payload");
        assert!(!format!("{codec:?}").contains('5'), "master leaked in debug");
        Ok(())
    }

    #[test]
    fn raised_cost_still_opens_shares_sealed_under_the_old_cost() -> eyre::Result<()> {
        let old = ShareCodec::new([5_u8; 32], FAST);
        let enc = old.encrypt(b"payload", 3)?;

        let hardened = ShareCodec::new(
            [5_u8; 32],
            KdfParams {
                memory_kib: 128,
                ..FAST
            },
        );
        assert_eq!(hardened.decrypt(&enc, 3, FAST)?.as_slice(), b"payload");
        let err = hardened
            .decrypt(&enc, 3, hardened.kdf_params())
            .err()
            .context("the new cost derives a different key")?;
        assert_eq!(err, CustodyError::AuthenticationFailed);
        Ok(())
    }
}
