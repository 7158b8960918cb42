//! Ring-ordered shuffle and un-shuffle of the encrypted candidate vector.
//!
//! Every owner's share vector travels the full ring in the same stage
//! order, so all n vectors end up permuted by the same joint, secret
//! permutation and re-randomized by the same per-slot zero sharings.

use crate::errors::DcopMpcError;
use crate::field::{Field, Vector};
use crate::messages::EncryptedSharesVector;
use crate::paillier::KeyPair;
use crate::sharing::share_vector;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Direction {
    /// Ring order 0 → 1 → … → n−1, private permutations applied.
    Forward,
    /// Ring order n−1 → … → 0, inverse permutations applied.
    Inverse,
}

/// Shared immutable context for one ring pass.
pub(super) struct ShuffleParams<'a> {
    pub field: &'a Field,
    pub degree: usize,
    pub me: usize,
    pub x_values: &'a [i64],
    /// The permutation this agent applies on this pass (already the
    /// inverse one for the reverse pass).
    pub permutation: &'a [usize],
}

pub(super) struct ShuffleState {
    direction: Direction,
    /// zero_rows[owner][slot]: this agent's fresh zero share destined for
    /// `owner`, one polynomial per slot, fixed for the whole pass.
    zero_rows: Vec<Vector>,
    processed: usize,
    my_vector_processed: bool,
    returned: Option<Vector>,
}

impl ShuffleState {
    /// Opens a ring pass: encrypts this agent's share vector under its own
    /// key and addresses it to the ring entry.
    ///
    /// The ring entry owns the one vector nobody else observes before it
    /// randomizes it at its own stage, so that vector takes the direct
    /// (non-randomized) encryption shortcut; every other owner encrypts
    /// with fresh randomness.
    pub(super) fn begin(
        direction: Direction,
        my_shares: &Vector,
        keys: &KeyPair,
        params: &ShuffleParams<'_>,
        rng: &mut impl Rng,
    ) -> Result<(Self, Vec<(usize, EncryptedSharesVector)>), DcopMpcError> {
        let n = params.x_values.len();
        let zeros = vec![0i64; my_shares.len()];
        let zero_rows = share_vector(&zeros, params.degree, params.x_values, params.field, rng);

        let entry = match direction {
            Direction::Forward => 0,
            Direction::Inverse => n - 1,
        };
        let values = my_shares
            .iter()
            .map(|&share| {
                if params.me == entry {
                    keys.public().direct_encrypt(share)
                } else {
                    keys.public().encrypt(share, rng)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let message = EncryptedSharesVector {
            owner: params.me,
            public_key: keys.public().clone(),
            values,
            round_parity: false, // framed by the engine
        };

        let state = ShuffleState {
            direction,
            zero_rows,
            processed: 0,
            my_vector_processed: false,
            returned: None,
        };
        Ok((state, vec![(entry, message)]))
    }

    /// Feeds one vector off the ring. Forwarded messages come back as
    /// (recipient rank, message); completion is reached once this agent has
    /// processed all n vectors and decrypted its own return.
    pub(super) fn on_encrypted(
        &mut self,
        message: EncryptedSharesVector,
        keys: &KeyPair,
        params: &ShuffleParams<'_>,
        rng: &mut impl Rng,
    ) -> Result<Vec<(usize, EncryptedSharesVector)>, DcopMpcError> {
        let n = params.x_values.len();
        if message.owner >= n {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Encrypted vector owned by unknown agent rank {}",
                message.owner
            )));
        }
        if message.values.len() != self.zero_rows[0].len() {
            return Err(DcopMpcError::DimensionMismatch(format!(
                "Encrypted vector of length {} where {} slots are expected",
                message.values.len(),
                self.zero_rows[0].len()
            )));
        }

        // The second sighting of this agent's own vector is the fully
        // processed return; everything else still needs this agent's stage.
        if message.owner == params.me && self.my_vector_processed {
            if self.returned.is_some() {
                return Err(DcopMpcError::ProtocolViolation(
                    "Duplicate shuffle return".into(),
                ));
            }
            let plain = message
                .values
                .iter()
                .map(|c| keys.private().decrypt_element(c, params.field))
                .collect::<Result<Vector, _>>()?;
            self.returned = Some(plain);
            return Ok(Vec::new());
        }

        if self.processed == n {
            return Err(DcopMpcError::ProtocolViolation(
                "Shuffle stage already processed every vector".into(),
            ));
        }

        // Permute positions, then fold an encrypted fresh zero share into
        // every slot under the owner's key.
        let slots = message.values.len();
        let mut permuted = vec![None; slots];
        for (j, value) in message.values.into_iter().enumerate() {
            permuted[params.permutation[j]] = Some(value);
        }

        let owner_zero_row = &self.zero_rows[message.owner];
        let mut values = Vec::with_capacity(slots);
        for (j, slot) in permuted.into_iter().enumerate() {
            let slot = slot.ok_or_else(|| {
                DcopMpcError::InternalError("Permutation is not a bijection".into())
            })?;
            let mask = message.public_key.encrypt(owner_zero_row[j], rng)?;
            values.push(message.public_key.add(&slot, &mask)?);
        }

        self.processed += 1;
        if message.owner == params.me {
            self.my_vector_processed = true;
        }

        let exit = match self.direction {
            Direction::Forward => {
                if params.me + 1 < n {
                    params.me + 1
                } else {
                    message.owner
                }
            }
            Direction::Inverse => {
                if params.me > 0 {
                    params.me - 1
                } else {
                    message.owner
                }
            }
        };

        let forwarded = EncryptedSharesVector {
            owner: message.owner,
            public_key: message.public_key,
            values,
            round_parity: false, // framed by the engine
        };

        // Forwarding to the owner itself happens when this agent is the
        // ring exit; self-delivery handles the case where that owner is us.
        Ok(vec![(exit, forwarded)])
    }

    pub(super) fn is_complete(&self, n: usize) -> bool {
        self.processed == n && self.returned.is_some()
    }

    pub(super) fn take_returned(&mut self) -> Option<Vector> {
        self.returned.take()
    }
}

/// Draws a uniformly random permutation of [0, len).
pub(super) fn random_permutation(len: usize, rng: &mut impl Rng) -> Vec<usize> {
    use rand::seq::SliceRandom;
    let mut permutation: Vec<usize> = (0..len).collect();
    permutation.shuffle(rng);
    permutation
}

/// Inverts a permutation given as `new_position = permutation[old_position]`.
pub(super) fn invert_permutation(permutation: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0usize; permutation.len()];
    for (old, &new) in permutation.iter().enumerate() {
        inverse[new] = old;
    }
    inverse
}
