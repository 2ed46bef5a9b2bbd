use crate::{
    errors::CustodyError,
    keystore::crypto::KdfParams,
    wallet::{BITCOIN, BITCOIN_TESTNET, SOLANA},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Testnet,
}

/// Which chains a new wallet records addresses for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainsConfig {
    /// Chain whose address becomes `wallet_address` and is re-derived on every recovery.
    pub primary: String,
    /// EVM chain names. They all share one address.
    pub evm: Vec<String>,
    /// Non-EVM chains (`solana`, `bitcoin`).
    pub extra: Vec<String>,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            primary: "ethereum".into(),
            evm: vec![
                "ethereum".into(),
                "polygon".into(),
                "bsc".into(),
                "avalanche".into(),
            ],
            extra: vec![SOLANA.into(), BITCOIN.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// In testnet mode `bitcoin` addresses are derived with the testnet HRP.
    pub network_mode: NetworkMode,
    /// Argon2id cost for backend share keys. Changing this makes existing records unreadable.
    pub kdf: KdfParams,
    pub chains: ChainsConfig,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            network_mode: NetworkMode::Mainnet,
            kdf: KdfParams::default(),
            chains: ChainsConfig::default(),
        }
    }
}

impl TesseraConfig {
    fn resolve_chain(&self, name: &str) -> String {
        let n = name.trim().to_lowercase();
        if n == BITCOIN && self.network_mode == NetworkMode::Testnet {
            return BITCOIN_TESTNET.to_owned();
        }
        n
    }

    pub fn primary_chain(&self) -> String {
        self.resolve_chain(&self.chains.primary)
    }

    /// Primary chain first, then every configured chain once, in config order.
    pub fn address_chains(&self) -> Vec<String> {
        let mut out = vec![self.primary_chain()];
        for name in self.chains.evm.iter().chain(&self.chains.extra) {
            let c = self.resolve_chain(name);
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    pub fn evm_chains(&self) -> Vec<String> {
        self.chains.evm.iter().map(|c| self.resolve_chain(c)).collect()
    }

    pub fn validate(&self) -> Result<(), CustodyError> {
        argon2::Params::new(
            self.kdf.memory_kib,
            self.kdf.iterations,
            self.kdf.parallelism,
            Some(32),
        )
        .map_err(|e| CustodyError::InvalidParameters(format!("kdf: {e}")))?;

        let primary = self.primary_chain();
        if primary.is_empty() {
            return Err(CustodyError::InvalidParameters(
                "chains.primary is empty".to_owned(),
            ));
        }
        let known = self.evm_chains().contains(&primary)
            || [SOLANA, BITCOIN, BITCOIN_TESTNET].contains(&primary.as_str());
        if !known {
            return Err(CustodyError::UnsupportedChain(primary));
        }
        Ok(())
    }
}
