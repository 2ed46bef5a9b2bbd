use crate::errors::CustodyError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Raw wallet seed material. Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([redacted; {} bytes])", self.len())
    }
}

/// Who holds a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyLocation {
    MerchantDevice,
    MerchantBackup,
    BackendPrimary,
    BackendRedundant,
    ThirdParty,
}

impl CustodyLocation {
    /// Assignment order used when distributing a 3-of-5 split.
    pub const DISTRIBUTION_ORDER: [Self; 5] = [
        Self::MerchantDevice,
        Self::MerchantBackup,
        Self::BackendPrimary,
        Self::BackendRedundant,
        Self::ThirdParty,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MerchantDevice => "merchant_device",
            Self::MerchantBackup => "merchant_backup",
            Self::BackendPrimary => "backend_primary",
            Self::BackendRedundant => "backend_redundant",
            Self::ThirdParty => "third_party",
        }
    }

    /// x-coordinate this slot receives in the distribution layout.
    pub const fn share_index(self) -> u8 {
        match self {
            Self::MerchantDevice => 1,
            Self::MerchantBackup => 2,
            Self::BackendPrimary => 3,
            Self::BackendRedundant => 4,
            Self::ThirdParty => 5,
        }
    }
}

impl fmt::Display for CustodyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CustodyLocation {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::DISTRIBUTION_ORDER
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CustodyError::MalformedShare(format!("unknown custody location: {s}")))
    }
}

/// Identifies the single `split` call a share came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareBatch(Uuid);

impl ShareBatch {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ShareBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ShareBatch {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|e| CustodyError::MalformedShare(format!("bad batch id: {e}")))
    }
}

/// One point on a split polynomial, tagged with where it lives.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub index: u8,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub custody: CustodyLocation,
    pub batch: ShareBatch,
}

impl Share {
    /// `<custody>:<batch>:<index>:<payload hex>`, the form merchants see in QR codes and emails.
    pub fn to_compact(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.custody,
            self.batch,
            self.index,
            hex::encode(&self.payload)
        )
    }

    pub fn from_compact(s: &str) -> Result<Self, CustodyError> {
        let mut parts = s.trim().split(':');
        let (Some(custody), Some(batch), Some(index), Some(payload), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(CustodyError::MalformedShare(
                "expected custody:batch:index:payload".to_owned(),
            ));
        };

        let custody: CustodyLocation = custody.parse()?;
        let index: u8 = index
            .parse()
            .map_err(|e| CustodyError::MalformedShare(format!("bad index: {e}")))?;
        if index != custody.share_index() {
            return Err(CustodyError::MalformedShare(format!(
                "{custody} share must have index {}, got {index}",
                custody.share_index()
            )));
        }
        let payload = hex::decode(payload)
            .map_err(|e| CustodyError::MalformedShare(format!("bad payload hex: {e}")))?;
        if payload.is_empty() {
            return Err(CustodyError::MalformedShare("empty payload".to_owned()));
        }

        Ok(Self {
            index,
            payload,
            custody,
            batch: batch.parse()?,
        })
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("custody", &self.custody)
            .field("batch", &self.batch)
            .field("len", &self.payload.len())
            .finish()
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.payload);
    }
}

mod hex_bytes {
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
