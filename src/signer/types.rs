//! Signer models
//!
//! Funded accounts handed out by the pool, plus the lease request a
//! scenario declares.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address family of a signer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    /// EVM-style `0x` address
    Evm,
    /// Native-chain address
    Native,
}

impl SignerKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignerKind::Evm => "evm",
            SignerKind::Native => "native",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "evm" | "eth" => Some(SignerKind::Evm),
            "native" | "zil" => Some(SignerKind::Native),
            _ => None,
        }
    }

    pub fn all() -> [SignerKind; 2] {
        [SignerKind::Evm, SignerKind::Native]
    }

    /// Check that an address is well-formed for this kind
    pub fn is_valid_address(&self, address: &str) -> bool {
        match self {
            SignerKind::Evm => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            SignerKind::Native => {
                !address.is_empty() && !address.chars().any(char::is_whitespace)
            }
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Secret key material; never printed
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Placeholder with the same emptiness, safe to print
    pub fn redacted(&self) -> Self {
        if self.is_empty() {
            Self::empty()
        } else {
            Self("***".to_string())
        }
    }

    fn empty() -> Self {
        Self(String::new())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(***)")
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

/// A funded account usable to send transactions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signer {
    pub address: String,
    pub kind: SignerKind,
    #[serde(skip_serializing, default = "PrivateKey::empty")]
    pub private_key: PrivateKey,
}

impl Signer {
    pub fn new(address: impl Into<String>, kind: SignerKind) -> Self {
        Self {
            address: address.into(),
            kind,
            private_key: PrivateKey::empty(),
        }
    }

    pub fn with_private_key(mut self, key: PrivateKey) -> Self {
        self.private_key = key;
        self
    }

    /// Same account, ignoring key material
    pub fn same_account(&self, other: &Signer) -> bool {
        self.kind == other.kind && self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl fmt::Display for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.kind)
    }
}

/// Number of signers of each kind a scenario holds while it runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    #[serde(default = "default_evm")]
    pub evm: usize,
    #[serde(default)]
    pub native: usize,
}

fn default_evm() -> usize {
    1
}

impl Default for LeaseRequest {
    fn default() -> Self {
        Self {
            evm: default_evm(),
            native: 0,
        }
    }
}

impl LeaseRequest {
    pub fn new(evm: usize, native: usize) -> Self {
        Self { evm, native }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn single(kind: SignerKind) -> Self {
        match kind {
            SignerKind::Evm => Self::new(1, 0),
            SignerKind::Native => Self::new(0, 1),
        }
    }

    pub fn of(&self, kind: SignerKind) -> usize {
        match kind {
            SignerKind::Evm => self.evm,
            SignerKind::Native => self.native,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.evm == 0 && self.native == 0
    }

    /// Kind of the first signer handed out for this request
    pub fn primary_kind(&self) -> Option<SignerKind> {
        SignerKind::all().into_iter().find(|k| self.of(*k) > 0)
    }
}

impl fmt::Display for LeaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evm={} native={}", self.evm, self.native)
    }
}
