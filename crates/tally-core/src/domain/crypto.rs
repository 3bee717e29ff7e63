//! Opaque signature material.
//!
//! The aggregator never does curve arithmetic itself: signatures and keys are
//! fixed-size byte strings, and combining/verifying them is delegated to a
//! `SignatureScheme` port.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An operator signature (or a combination of several).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub [u8; 32]);

/// An operator public key (or an aggregate of several).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl Signature {
    pub const ZERO: Signature = Signature([0u8; 32]);
}

impl PublicKey {
    pub const ZERO: PublicKey = PublicKey([0u8; 32]);
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
