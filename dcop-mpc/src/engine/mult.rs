//! Secure multiplication of two secret-shared vectors.
//!
//! Local multiply → re-randomize → re-share → degree-reduce → collect.
//! Every step is a distinct synchronization round; the caller owns the
//! round-parity bookkeeping and message framing, this module owns the
//! algebra and the per-step accumulators.

use crate::errors::DcopMpcError;
use crate::field::{Field, Matrix, Vector};
use crate::sharing::share_vector;

use rand::Rng;

/// Shared immutable context for one multiplication.
pub(super) struct MultParams<'a> {
    pub field: &'a Field,
    pub degree: usize,
    pub x_values: &'a [i64],
    pub lagrange: &'a [i64],
    pub reduction: &'a Matrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultStep {
    /// Summing everyone's fresh zero shares into the local product.
    Randomize,
    /// Collecting one re-share row per contributing agent.
    Reshare,
    /// Collecting shares of this agent's reduced share.
    Reduce,
}

/// Per-round outgoing payloads (recipient rank, values) or the finished
/// product share vector.
pub(super) enum MultProgress {
    Continue(Vec<(usize, Vector)>),
    Done(Vector),
}

pub(super) struct MultState {
    step: MultStep,
    local: Vector,
    received: Vec<Option<Vector>>,
    collected: usize,
}

impl MultState {
    /// Multiplies the local shares and deals the randomizing zero shares,
    /// opening the first round.
    pub(super) fn begin(
        a: &Vector,
        b: &Vector,
        params: &MultParams<'_>,
        rng: &mut impl Rng,
    ) -> Result<(Self, Vec<(usize, Vector)>), DcopMpcError> {
        if a.len() != b.len() {
            return Err(DcopMpcError::DimensionMismatch(format!(
                "Cannot multiply sharings of lengths {} and {}",
                a.len(),
                b.len()
            )));
        }
        let n = params.x_values.len();

        // Local product; the sharing degree doubles here and stays doubled
        // until the reduction round.
        let local: Vector = a
            .iter()
            .zip(b)
            .map(|(&x, &y)| params.field.mul(x, y))
            .collect();

        let zeros = vec![0i64; local.len()];
        let rows = share_vector(&zeros, params.degree, params.x_values, params.field, rng);

        let state = MultState {
            step: MultStep::Randomize,
            local,
            received: vec![None; n],
            collected: 0,
        };
        Ok((state, rows.into_iter().enumerate().collect()))
    }

    /// Feeds one incoming share row. Returns `None` while the current round
    /// is still missing contributions.
    pub(super) fn on_shares(
        &mut self,
        sender: usize,
        values: Vector,
        params: &MultParams<'_>,
        rng: &mut impl Rng,
    ) -> Result<Option<MultProgress>, DcopMpcError> {
        let n = params.x_values.len();
        if sender >= n {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Share row from unknown agent rank {}",
                sender
            )));
        }
        if values.len() != self.local.len() {
            return Err(DcopMpcError::DimensionMismatch(format!(
                "Share row of length {} where {} slots are in flight",
                values.len(),
                self.local.len()
            )));
        }
        if self.received[sender].is_some() {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Duplicate share row from agent rank {}",
                sender
            )));
        }
        self.received[sender] = Some(values);
        self.collected += 1;
        if self.collected < n {
            return Ok(None);
        }

        let rows: Vec<Vector> = self
            .received
            .iter_mut()
            .map(|r| r.take().unwrap_or_default())
            .collect();
        self.collected = 0;

        match self.step {
            MultStep::Randomize => {
                for row in &rows {
                    for (slot, &z) in row.iter().enumerate() {
                        self.local[slot] = params.field.add(self.local[slot], z);
                    }
                }

                let reshare =
                    share_vector(&self.local, params.degree, params.x_values, params.field, rng);
                self.step = MultStep::Reshare;
                Ok(Some(MultProgress::Continue(
                    reshare.into_iter().enumerate().collect(),
                )))
            }
            MultStep::Reshare => {
                // rows[k] holds this agent's share of agent k's randomized
                // product. Column i of the reduction operator turns those
                // into this agent's share of agent i's reduced share.
                let slots = self.local.len();
                let mut outgoing = Vec::with_capacity(n);
                for i in 0..n {
                    let mut row = vec![0i64; slots];
                    for (k, reshare) in rows.iter().enumerate() {
                        let coefficient = params.reduction[k][i];
                        for (slot, entry) in row.iter_mut().enumerate() {
                            *entry = params
                                .field
                                .add(*entry, params.field.mul(coefficient, reshare[slot]));
                        }
                    }
                    outgoing.push((i, row));
                }
                self.step = MultStep::Reduce;
                Ok(Some(MultProgress::Continue(outgoing)))
            }
            MultStep::Reduce => {
                // rows[j] is agent j's share of my reduced share; the full
                // Lagrange basis interpolates it exactly.
                let slots = self.local.len();
                let mut result = vec![0i64; slots];
                for (j, row) in rows.iter().enumerate() {
                    let coefficient = params.lagrange[j];
                    for (slot, entry) in result.iter_mut().enumerate() {
                        *entry = params
                            .field
                            .add(*entry, params.field.mul(coefficient, row[slot]));
                    }
                }
                Ok(Some(MultProgress::Done(result)))
            }
        }
    }
}
