//! Address types, abstract address requests and derivation paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Concrete address / locking-script representation.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    /// Pay to public key hash.
    P2pkh,
    /// Pay to script hash.
    P2sh,
    /// Pay to witness public key hash.
    P2wpkh,
    /// Pay to witness script hash.
    P2wsh,
    /// Witness public key hash nested in script hash.
    P2shP2wpkh,
    /// Witness script hash nested in script hash.
    P2shP2wsh,
}

impl AddressType {
    /// All concrete types.
    pub const ALL: [AddressType; 6] = [
        Self::P2pkh,
        Self::P2sh,
        Self::P2wpkh,
        Self::P2wsh,
        Self::P2shP2wpkh,
        Self::P2shP2wsh,
    ];

    /// Whether this type locks to a script rather than a single key.
    pub fn is_script(&self) -> bool {
        matches!(self, Self::P2sh | Self::P2wsh | Self::P2shP2wsh)
    }

    /// Whether spending requires witness data.
    pub fn is_witness(&self) -> bool {
        !matches!(self, Self::P2pkh | Self::P2sh)
    }

    /// The address family this type belongs to.
    pub fn kind(&self) -> AddressKind {
        match self {
            Self::P2pkh | Self::P2sh => AddressKind::Legacy,
            Self::P2wpkh | Self::P2wsh => AddressKind::Segwit,
            Self::P2shP2wpkh | Self::P2shP2wsh => AddressKind::P2shSegwit,
        }
    }

    /// Derivation purpose for key types; `None` for script types.
    pub fn purpose(&self) -> Option<u32> {
        match self {
            Self::P2pkh => Some(44),
            Self::P2shP2wpkh => Some(49),
            Self::P2wpkh => Some(84),
            Self::P2sh | Self::P2wsh | Self::P2shP2wsh => None,
        }
    }

    /// One-byte tag used in encoded addresses and locking scripts.
    pub fn tag(&self) -> u8 {
        match self {
            Self::P2pkh => 0x01,
            Self::P2sh => 0x02,
            Self::P2wpkh => 0x03,
            Self::P2wsh => 0x04,
            Self::P2shP2wpkh => 0x05,
            Self::P2shP2wsh => 0x06,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::P2pkh => "p2pkh",
            Self::P2sh => "p2sh",
            Self::P2wpkh => "p2wpkh",
            Self::P2wsh => "p2wsh",
            Self::P2shP2wpkh => "p2sh-p2wpkh",
            Self::P2shP2wsh => "p2sh-p2wsh",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized address type or kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown address type: {0}")]
pub struct UnknownAddressType(pub String);

impl FromStr for AddressType {
    type Err = UnknownAddressType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s.to_ascii_lowercase())
            .ok_or_else(|| UnknownAddressType(s.to_string()))
    }
}

/// Abstract address family, resolved to a concrete [`AddressType`]
/// depending on whether a key or a script is being locked to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AddressKind {
    /// Base58-era types: p2pkh / p2sh.
    Legacy,
    /// Native witness types: p2wpkh / p2wsh.
    Segwit,
    /// Witness types nested in p2sh.
    P2shSegwit,
}

impl AddressKind {
    /// Concrete type of this family for a key (`false`) or script (`true`).
    pub fn concrete(&self, is_script: bool) -> AddressType {
        match (self, is_script) {
            (Self::Legacy, false) => AddressType::P2pkh,
            (Self::Legacy, true) => AddressType::P2sh,
            (Self::Segwit, false) => AddressType::P2wpkh,
            (Self::Segwit, true) => AddressType::P2wsh,
            (Self::P2shSegwit, false) => AddressType::P2shP2wpkh,
            (Self::P2shSegwit, true) => AddressType::P2shP2wsh,
        }
    }
}

/// An address request as a caller expresses it: the account default, an
/// abstract family, or a concrete type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressRequest {
    /// Whatever the account's default address type is.
    #[default]
    Default,
    /// An abstract family.
    Kind(AddressKind),
    /// A concrete type.
    Type(AddressType),
}

impl FromStr for AddressRequest {
    type Err = UnknownAddressType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "default" => Ok(Self::Default),
            "legacy" => Ok(Self::Kind(AddressKind::Legacy)),
            "segwit" | "bech32" => Ok(Self::Kind(AddressKind::Segwit)),
            "p2sh-segwit" => Ok(Self::Kind(AddressKind::P2shSegwit)),
            other => other.parse::<AddressType>().map(Self::Type),
        }
    }
}

impl From<AddressType> for AddressRequest {
    fn from(t: AddressType) -> Self {
        Self::Type(t)
    }
}

/// Receive or change branch of an HD account.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub enum Chain {
    /// External (receive) branch, `/0/`.
    Receive,
    /// Internal (change) branch, `/1/`.
    Change,
}

impl Chain {
    /// Numeric branch index.
    pub fn index(&self) -> u32 {
        match self {
            Self::Receive => 0,
            Self::Change => 1,
        }
    }
}

/// A BIP44-shaped derivation path: `m/purpose'/coin'/account'/chain/index`.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct DerivationPath {
    /// Purpose (44 / 49 / 84), hardened.
    pub purpose: u32,
    /// Coin type, hardened.
    pub coin_type: u32,
    /// Account number, hardened.
    pub account: u32,
    /// Receive or change branch.
    pub chain: Chain,
    /// Address index within the branch.
    pub index: u32,
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m/{}'/{}'/{}'/{}/{}",
            self.purpose,
            self.coin_type,
            self.account,
            self.chain.index(),
            self.index
        )
    }
}

/// A string that is not a five-level derivation path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid derivation path: {0}")]
pub struct InvalidPath(pub String);

impl FromStr for DerivationPath {
    type Err = InvalidPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidPath(s.to_string());
        let rest = s.strip_prefix("m/").ok_or_else(err)?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 5 {
            return Err(err());
        }
        let hardened = |p: &str| -> Result<u32, InvalidPath> {
            p.strip_suffix('\'')
                .or_else(|| p.strip_suffix('h'))
                .ok_or_else(err)?
                .parse()
                .map_err(|_| err())
        };
        let chain = match parts[3] {
            "0" => Chain::Receive,
            "1" => Chain::Change,
            _ => return Err(err()),
        };
        Ok(Self {
            purpose: hardened(parts[0])?,
            coin_type: hardened(parts[1])?,
            account: hardened(parts[2])?,
            chain,
            index: parts[4].parse().map_err(|_| err())?,
        })
    }
}
