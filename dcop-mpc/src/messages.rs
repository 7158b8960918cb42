//! Protocol message schemas.
//!
//! Every message carries the sender's single alternating round-parity bit;
//! an agent that receives a message ahead of its own round buffers it
//! instead of processing it. The delivery substrate is external and only
//! has to provide reliable, per-sender-ordered delivery to a named agent,
//! including local self-delivery.

use crate::errors::DcopMpcError;
use crate::field::{Field, Vector};
use crate::paillier::{Ciphertext, PublicKey};
use crate::problem::AgentName;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A batch of field-element shares, one per candidate slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharesVector {
    pub sender: usize,
    pub values: Vector,
    pub round_parity: bool,
}

/// A single field-element share, used by the scalar rounds of the
/// selection circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShare {
    pub sender: usize,
    pub value: i64,
    pub round_parity: bool,
}

/// An owner-tagged encrypted share vector travelling the shuffle ring.
/// The owner's public key rides along so every agent on the ring can
/// encrypt the zero shares it folds in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedSharesVector {
    pub owner: usize,
    pub public_key: PublicKey,
    pub values: Vec<Ciphertext>,
    pub round_parity: bool,
}

/// Per-variable revelation shares, addressed to the variables' owner.
///
/// An empty map is a sentinel: with a non-negative sender it means "no
/// solution at this cost"; a negative sender (`-(rank + 1)`) marks that
/// the sending owner finished reconstructing all of its variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionShares {
    pub sender: i32,
    pub per_variable_share: BTreeMap<String, i64>,
    pub round_parity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    Shares(SharesVector),
    One(OneShare),
    Encrypted(EncryptedSharesVector),
    Solution(SolutionShares),
}

impl ProtocolMessage {
    pub fn round_parity(&self) -> bool {
        match self {
            ProtocolMessage::Shares(m) => m.round_parity,
            ProtocolMessage::One(m) => m.round_parity,
            ProtocolMessage::Encrypted(m) => m.round_parity,
            ProtocolMessage::Solution(m) => m.round_parity,
        }
    }

    /// Range-checks every field element a message carries.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::ValueOutOfRange` on the first non-canonical
    /// element; nothing is reduced silently.
    pub fn check_ranges(&self, field: &Field) -> Result<(), DcopMpcError> {
        match self {
            ProtocolMessage::Shares(m) => m.values.iter().try_for_each(|&v| field.check_element(v)),
            ProtocolMessage::One(m) => field.check_element(m.value),
            ProtocolMessage::Encrypted(_) => Ok(()),
            ProtocolMessage::Solution(m) => m
                .per_variable_share
                .values()
                .try_for_each(|&v| field.check_element(v)),
        }
    }

    /// Serializes for the queue substrate.
    pub fn to_wire(&self) -> Result<String, DcopMpcError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes from the queue substrate.
    pub fn from_wire(wire: &str) -> Result<Self, DcopMpcError> {
        Ok(serde_json::from_str(wire)?)
    }
}

/// A message together with its destination, handed back to the host for
/// delivery. Sending is fire-and-forget; the engine never blocks.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: AgentName,
    pub message: ProtocolMessage,
}
