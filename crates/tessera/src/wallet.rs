use crate::{errors::CustodyError, keystore::share::Secret};
use alloy::{
    primitives::Address,
    signers::local::{coins_bip39::English, MnemonicBuilder},
};
use bip39::{Language, Mnemonic};
use bitcoin::bip32::{DerivationPath as BtcDerivationPath, Xpriv as BtcXpriv};
use bitcoin::secp256k1::Secp256k1 as BtcSecp256k1;
use bitcoin::{
    address::KnownHrp as BtcKnownHrp, Address as BtcAddress,
    CompressedPublicKey as BtcCompressedPublicKey, Network as BtcNetwork,
    PrivateKey as BtcPrivateKey,
};
use solana_derivation_path::DerivationPath as SolanaDerivationPath;
use solana_keypair::seed_derivable::keypair_from_seed_and_derivation_path;
use solana_seed_phrase::generate_seed_from_seed_phrase_and_passphrase;
use solana_signer::Signer as _;
use std::collections::{BTreeMap, BTreeSet};
use zeroize::Zeroizing;

pub const SOLANA: &str = "solana";
pub const BITCOIN: &str = "bitcoin";
pub const BITCOIN_TESTNET: &str = "bitcoin-testnet";

/// Derives public addresses from a wallet secret.
///
/// Balance queries, transfers and fee estimation live in the RPC layer that sits on top of this
/// crate; custody only needs to know which address a secret controls.
pub trait Signer {
    fn derive_address(&self, secret: &Secret, chain: &str) -> Result<String, CustodyError>;

    fn derive_addresses(
        &self,
        secret: &Secret,
        chains: &[String],
    ) -> Result<BTreeMap<String, String>, CustodyError> {
        let mut out = BTreeMap::new();
        for chain in chains {
            out.insert(chain.clone(), self.derive_address(secret, chain)?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainFamily {
    Evm,
    Solana,
    Bitcoin(BtcKnownHrp),
}

/// [`Signer`] for secrets that are BIP-39 entropy: account 0 on every supported chain.
#[derive(Debug, Clone)]
pub struct MnemonicSigner {
    evm_chains: BTreeSet<String>,
}

impl MnemonicSigner {
    pub fn new<I, S>(evm_chains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            evm_chains: evm_chains.into_iter().map(Into::into).collect(),
        }
    }

    fn family(&self, chain: &str) -> Result<ChainFamily, CustodyError> {
        match chain {
            SOLANA => Ok(ChainFamily::Solana),
            BITCOIN => Ok(ChainFamily::Bitcoin(BtcKnownHrp::Mainnet)),
            BITCOIN_TESTNET => Ok(ChainFamily::Bitcoin(BtcKnownHrp::Testnets)),
            c if self.evm_chains.contains(c) => Ok(ChainFamily::Evm),
            other => Err(CustodyError::UnsupportedChain(other.to_owned())),
        }
    }
}

impl Signer for MnemonicSigner {
    fn derive_address(&self, secret: &Secret, chain: &str) -> Result<String, CustodyError> {
        let family = self.family(chain)?;
        let mnemonic = mnemonic_from_entropy(secret)?;
        match family {
            ChainFamily::Evm => evm_address(&mnemonic),
            ChainFamily::Solana => solana_address(&mnemonic),
            ChainFamily::Bitcoin(hrp) => bitcoin_address(&mnemonic, hrp),
        }
    }
}

/// Fresh 24-word mnemonic, returned as its 32 bytes of entropy.
pub fn generate_mnemonic_entropy() -> Result<Secret, CustodyError> {
    let mnemonic = Mnemonic::generate_in(Language::English, 24)
        .map_err(|e| CustodyError::Signer(format!("generate mnemonic: {e}")))?;
    Ok(Secret::new(mnemonic.to_entropy()))
}

pub fn mnemonic_from_entropy(secret: &Secret) -> Result<Mnemonic, CustodyError> {
    Mnemonic::from_entropy_in(Language::English, secret.expose())
        .map_err(|e| CustodyError::Signer(format!("mnemonic from entropy: {e}")))
}

fn evm_address(mnemonic: &Mnemonic) -> Result<String, CustodyError> {
    let phrase = Zeroizing::new(mnemonic.to_string());
    // m/44'/60'/0'/0/0
    let wallet = MnemonicBuilder::<English>::default()
        .phrase(phrase.as_str())
        .index(0_u32)
        .map_err(|e| CustodyError::Signer(format!("evm index: {e}")))?
        .build()
        .map_err(|e| CustodyError::Signer(format!("build evm wallet: {e}")))?;
    Ok(wallet.address().to_checksum(None))
}

/// Storage key for a wallet address. EVM hex is case-insensitive, so any casing maps to its
/// EIP-55 form; other encodings are already canonical and pass through trimmed.
pub fn canonical_address(address: &str) -> String {
    let trimmed = address.trim();
    let evm_shaped = trimmed.len() == 42 && trimmed.starts_with("0x");
    match trimmed.parse::<Address>() {
        Ok(addr) if evm_shaped => addr.to_checksum(None),
        Ok(_) | Err(_) => trimmed.to_owned(),
    }
}

fn solana_address(mnemonic: &Mnemonic) -> Result<String, CustodyError> {
    let phrase = Zeroizing::new(mnemonic.to_string());
    let seed = Zeroizing::new(generate_seed_from_seed_phrase_and_passphrase(
        phrase.as_str(),
        "",
    ));
    // m/44'/501'/0'/0'
    let path = SolanaDerivationPath::new_bip44(Some(0), Some(0));
    let kp = keypair_from_seed_and_derivation_path(&seed, Some(path))
        .map_err(|e| CustodyError::Signer(format!("derive solana keypair: {e}")))?;
    Ok(kp.pubkey().to_string())
}

fn bitcoin_address(mnemonic: &Mnemonic, hrp: BtcKnownHrp) -> Result<String, CustodyError> {
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
    let secp = BtcSecp256k1::new();
    let xpriv = BtcXpriv::new_master(BtcNetwork::Bitcoin, seed.as_slice())
        .map_err(|e| CustodyError::Signer(format!("btc master xpriv: {e}")))?;

    // BIP84 (native segwit): m/84'/0'/0'/0/0 for both networks; only the HRP differs.
    let path: BtcDerivationPath = "m/84'/0'/0'/0/0"
        .parse()
        .map_err(|e: bitcoin::bip32::Error| {
            CustodyError::Signer(format!("parse btc derivation path: {e}"))
        })?;
    let child = xpriv
        .derive_priv(&secp, &path)
        .map_err(|e| CustodyError::Signer(format!("derive btc child: {e}")))?;
    let sk = BtcPrivateKey::new(child.private_key, BtcNetwork::Bitcoin);
    let pk = sk.public_key(&secp);
    let cpk = BtcCompressedPublicKey::try_from(pk)
        .map_err(|e| CustodyError::Signer(format!("btc compressed pubkey: {e}")))?;
    Ok(BtcAddress::p2wpkh(&cpk, hrp).to_string())
}
