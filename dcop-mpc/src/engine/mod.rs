//! # Protocol engine
//!
//! The per-agent, round-synchronized state machine that drives the secure
//! selection end to end: distribute private contributions, combine them
//! into one shared vector, shuffle, run the selection circuit, un-shuffle,
//! and reveal each variable's value to its owner only.
//!
//! Each agent runs one [`Engine`] as a single-threaded event handler.
//! [`Engine::handle`] is a deterministic step function from one incoming
//! message to a batch of outgoing ones; nothing blocks and no state is
//! shared between agents. Messages carry a single alternating round-parity
//! bit; anything that arrives one round early is buffered and replayed
//! once the engine gets there. The host must deliver messages reliably and
//! in per-sender order, including messages an engine addresses to itself.

mod mult;
mod shuffle;

use crate::errors::DcopMpcError;
use crate::field::matrix_ops::reduction_matrix;
use crate::field::{Field, Matrix, Vector};
use crate::messages::{Outbound, ProtocolMessage, SharesVector, OneShare, SolutionShares};
use crate::paillier::KeyPair;
use crate::problem::{Mode, PrivateConstraints, ProblemView, ProtocolConfig};
use crate::sharing::{lagrange_coefficients, reconstruct, share_vector};

use mult::{MultParams, MultProgress, MultState};
use shuffle::{Direction, ShuffleParams, ShuffleState, invert_permutation, random_permutation};

use std::collections::BTreeMap;

use rand::rngs::StdRng;

/// Terminal result of a run, surfaced as a value. Infeasibility is a
/// normal protocol outcome, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The run converged; the map holds the value index of every variable
    /// this agent owns. Other agents' values are not disclosed here.
    Solved(BTreeMap<String, usize>),
    Infeasible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Contribution,
    Combine,
    Indicator,
    Shuffle,
    Select,
    Unshuffle,
    Reveal,
    Verdict,
    Done,
}

/// What to do with the product once a secure multiplication finishes.
enum MultPurpose {
    /// Plain combine chain: fold in the next agent's feasibility vector.
    CombineNext { next: usize },
    /// Weighted indicator chain: remaining cost constants to fold in.
    IndicatorTerm { remaining: Vec<u64> },
    /// Selection circuit, h[index] = h[index-1] · (1 - S[index-1]).
    SelectorGate { index: usize },
    /// Selection circuit, S[index] = S[index] · h[index].
    SelectorMask { index: usize },
}

pub struct Engine {
    problem: ProblemView,
    config: ProtocolConfig,
    field: Field,
    mode: Mode,
    name: String,
    me: usize,
    n: usize,
    degree: usize,
    x_values: Vec<i64>,
    lagrange: Vector,
    reduction: Matrix,
    nbr_sols: usize,
    private_values: Vector,
    rng: StdRng,

    keys: Option<KeyPair>,
    permutation: Vec<usize>,
    inverse_permutation: Vec<usize>,

    phase: Phase,
    parity: bool,
    started: bool,
    pending: Vec<ProtocolMessage>,
    outcome: Option<Outcome>,

    contributions: Vec<Option<Vector>>,
    contributions_collected: usize,
    /// Working share vector: the combined vector, then the selector.
    acc: Vector,
    /// Weighted runs keep the combined cost shares across target costs.
    cost_shares: Vector,
    h_share: i64,
    target_cost: u64,

    mult: Option<(MultState, MultPurpose)>,
    shuffle: Option<ShuffleState>,

    reveal_rows: Vec<Option<BTreeMap<String, i64>>>,
    reveal_collected: usize,
    reveal_expected: usize,
    verdicts: Vec<Option<bool>>,
    verdicts_collected: usize,
    assignment: BTreeMap<String, usize>,
}

impl Engine {
    /// Builds the engine for one agent: fixes the roster ranking, the
    /// Shamir degree ⌊(n−1)/2⌋, the Lagrange basis, the degree-reduction
    /// operator and this agent's private per-candidate contributions.
    pub fn try_with(
        problem: ProblemView,
        config: ProtocolConfig,
        name: &str,
        constraints: &dyn PrivateConstraints,
        mut rng: StdRng,
    ) -> Result<Self, DcopMpcError> {
        let n = problem.agents().len();
        let nbr_sols = problem.nbr_sols();
        let field = config.validate(nbr_sols, n)?;
        let me = problem.rank_of(name)?;
        let degree = (n - 1) / 2;
        let x_values = problem.x_values();
        let lagrange = lagrange_coefficients(&x_values, &field)?;
        let reduction = reduction_matrix(&x_values, &field, degree)?;

        let mode = config.mode;
        let private_values: Vector = problem
            .candidates()
            .iter()
            .map(|candidate| {
                let measure = constraints.evaluate(candidate);
                match mode {
                    Mode::Plain => i64::from(measure == 0),
                    Mode::Weighted { infinite_cost, .. } => measure.min(infinite_cost) as i64,
                }
            })
            .collect();

        let permutation = random_permutation(nbr_sols, &mut rng);
        let inverse_permutation = invert_permutation(&permutation);

        Ok(Engine {
            name: name.to_string(),
            me,
            n,
            degree,
            x_values,
            lagrange,
            reduction,
            nbr_sols,
            private_values,
            rng,
            field,
            mode,
            keys: None,
            permutation,
            inverse_permutation,
            phase: Phase::Contribution,
            parity: false,
            started: false,
            pending: Vec::new(),
            outcome: None,
            contributions: vec![None; n],
            contributions_collected: 0,
            acc: Vec::new(),
            cost_shares: Vec::new(),
            h_share: 1,
            target_cost: 0,
            mult: None,
            shuffle: None,
            reveal_rows: Vec::new(),
            reveal_collected: 0,
            reveal_expected: 0,
            verdicts: Vec::new(),
            verdicts_collected: 0,
            assignment: BTreeMap::new(),
            problem,
            config,
        })
    }

    pub fn agent(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Opens round zero: shares the private per-candidate contributions
    /// with every agent, this one included.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::ProtocolViolation` on a second call.
    pub fn start(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        if self.started {
            return Err(DcopMpcError::ProtocolViolation(
                "Engine already started".into(),
            ));
        }
        self.started = true;
        log::debug!(
            "{}: sharing contributions for {} candidates among {} agents",
            self.name,
            self.nbr_sols,
            self.n
        );
        let rows = share_vector(
            &self.private_values,
            self.degree,
            &self.x_values,
            &self.field,
            &mut self.rng,
        );
        Ok(self.share_rows_to_messages(rows.into_iter().enumerate().collect()))
    }

    /// Feeds one incoming protocol message; returns the batch to send.
    ///
    /// Messages one round ahead are buffered and replayed automatically;
    /// this is ordinary control flow, not an error.
    pub fn handle(&mut self, message: ProtocolMessage) -> Result<Vec<Outbound>, DcopMpcError> {
        if self.phase == Phase::Done {
            return Ok(Vec::new());
        }
        message.check_ranges(&self.field)?;
        if message.round_parity() != self.parity {
            log::trace!("{}: buffering early message", self.name);
            self.pending.push(message);
            return Ok(Vec::new());
        }

        let mut out = self.dispatch(message)?;
        loop {
            if self.phase == Phase::Done {
                break;
            }
            let Some(position) = self
                .pending
                .iter()
                .position(|m| m.round_parity() == self.parity)
            else {
                break;
            };
            let replay = self.pending.remove(position);
            out.extend(self.dispatch(replay)?);
        }
        Ok(out)
    }

    fn dispatch(&mut self, message: ProtocolMessage) -> Result<Vec<Outbound>, DcopMpcError> {
        match self.phase {
            Phase::Contribution => self.on_contribution(message),
            Phase::Combine | Phase::Indicator | Phase::Select => self.on_mult_message(message),
            Phase::Shuffle | Phase::Unshuffle => self.on_shuffle_message(message),
            Phase::Reveal => self.on_reveal_message(message),
            Phase::Verdict => self.on_verdict_message(message),
            Phase::Done => Ok(Vec::new()),
        }
    }

    // ---- round 0: contribution collection -------------------------------

    fn on_contribution(&mut self, message: ProtocolMessage) -> Result<Vec<Outbound>, DcopMpcError> {
        let (sender, values) = share_payload(message)?;
        if sender >= self.n {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Contribution from unknown agent rank {}",
                sender
            )));
        }
        if values.len() != self.nbr_sols {
            return Err(DcopMpcError::DimensionMismatch(format!(
                "Contribution of length {} where {} candidates exist",
                values.len(),
                self.nbr_sols
            )));
        }
        if self.contributions[sender].is_some() {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Duplicate contribution from agent rank {}",
                sender
            )));
        }
        self.contributions[sender] = Some(values);
        self.contributions_collected += 1;
        if self.contributions_collected < self.n {
            return Ok(Vec::new());
        }

        self.parity = !self.parity;
        match self.mode {
            Mode::Plain => {
                let first = self.contributions[0].take().ok_or_else(internal_gap)?;
                self.acc = first;
                self.begin_combine(1)
            }
            Mode::Weighted { .. } => {
                let mut sum = vec![0i64; self.nbr_sols];
                for row in self.contributions.iter_mut() {
                    let row = row.take().ok_or_else(internal_gap)?;
                    for (slot, &share) in row.iter().enumerate() {
                        sum[slot] = self.field.add(sum[slot], share);
                    }
                }
                self.cost_shares = sum;
                self.begin_indicator()
            }
        }
    }

    // ---- secure multiplication chains -----------------------------------

    fn begin_combine(&mut self, next: usize) -> Result<Vec<Outbound>, DcopMpcError> {
        self.phase = Phase::Combine;
        let b = self.contributions[next].take().ok_or_else(internal_gap)?;
        let a = self.acc.clone();
        self.begin_mult(a, b, MultPurpose::CombineNext { next })
    }

    fn begin_indicator(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        self.phase = Phase::Indicator;
        let Mode::Weighted { max_total_cost, .. } = self.mode else {
            return Err(internal_gap());
        };
        let c = self.target_cost;
        log::debug!("{}: building indicator for target cost {}", self.name, c);
        let constants: Vec<u64> = (0..=max_total_cost).filter(|&k| k != c).collect();
        match constants.split_first() {
            None => {
                // Degenerate single-cost search: every candidate matches.
                self.acc = vec![1; self.nbr_sols];
                self.enter_shuffle()
            }
            Some((&first, rest)) => {
                self.acc = self
                    .cost_shares
                    .iter()
                    .map(|&share| self.field.sub(share, first as i64))
                    .collect();
                self.continue_indicator(rest.to_vec())
            }
        }
    }

    fn continue_indicator(&mut self, remaining: Vec<u64>) -> Result<Vec<Outbound>, DcopMpcError> {
        match remaining.split_first() {
            Some((&k, rest)) => {
                let b: Vector = self
                    .cost_shares
                    .iter()
                    .map(|&share| self.field.sub(share, k as i64))
                    .collect();
                let a = self.acc.clone();
                self.begin_mult(
                    a,
                    b,
                    MultPurpose::IndicatorTerm {
                        remaining: rest.to_vec(),
                    },
                )
            }
            None => {
                // Scale by the inverse of Π_{k≠c}(c − k); the indicator is
                // then exactly 1 at candidates costing c and 0 at every
                // other cost inside the search ceiling.
                let Mode::Weighted { max_total_cost, .. } = self.mode else {
                    return Err(internal_gap());
                };
                let c = self.target_cost as i64;
                let mut denominator = 1i64;
                for k in 0..=max_total_cost {
                    if k != self.target_cost {
                        denominator = self
                            .field
                            .mul(denominator, self.field.sub(c, k as i64));
                    }
                }
                let norm = self.field.inv(denominator)?;
                for share in self.acc.iter_mut() {
                    *share = self.field.mul(*share, norm);
                }
                self.enter_shuffle()
            }
        }
    }

    fn begin_mult(
        &mut self,
        a: Vector,
        b: Vector,
        purpose: MultPurpose,
    ) -> Result<Vec<Outbound>, DcopMpcError> {
        let params = MultParams {
            field: &self.field,
            degree: self.degree,
            x_values: &self.x_values,
            lagrange: &self.lagrange,
            reduction: &self.reduction,
        };
        let (state, rows) = MultState::begin(&a, &b, &params, &mut self.rng)?;
        self.mult = Some((state, purpose));
        Ok(self.share_rows_to_messages(rows))
    }

    fn on_mult_message(&mut self, message: ProtocolMessage) -> Result<Vec<Outbound>, DcopMpcError> {
        let (sender, values) = share_payload(message)?;
        let Some((mut state, purpose)) = self.mult.take() else {
            return Err(DcopMpcError::ProtocolViolation(
                "Share row while no multiplication is in flight".into(),
            ));
        };
        let params = MultParams {
            field: &self.field,
            degree: self.degree,
            x_values: &self.x_values,
            lagrange: &self.lagrange,
            reduction: &self.reduction,
        };
        match state.on_shares(sender, values, &params, &mut self.rng)? {
            None => {
                self.mult = Some((state, purpose));
                Ok(Vec::new())
            }
            Some(MultProgress::Continue(rows)) => {
                self.mult = Some((state, purpose));
                self.parity = !self.parity;
                Ok(self.share_rows_to_messages(rows))
            }
            Some(MultProgress::Done(result)) => {
                self.parity = !self.parity;
                self.on_mult_done(result, purpose)
            }
        }
    }

    fn on_mult_done(
        &mut self,
        result: Vector,
        purpose: MultPurpose,
    ) -> Result<Vec<Outbound>, DcopMpcError> {
        match purpose {
            MultPurpose::CombineNext { next } => {
                self.acc = result;
                let next = next + 1;
                if next < self.n {
                    self.begin_combine(next)
                } else {
                    self.contributions.clear();
                    self.enter_shuffle()
                }
            }
            MultPurpose::IndicatorTerm { remaining } => {
                self.acc = result;
                self.continue_indicator(remaining)
            }
            MultPurpose::SelectorGate { index } => {
                self.h_share = *result.first().ok_or_else(internal_gap)?;
                let a = vec![self.acc[index]];
                let b = vec![self.h_share];
                self.begin_mult(a, b, MultPurpose::SelectorMask { index })
            }
            MultPurpose::SelectorMask { index } => {
                self.acc[index] = *result.first().ok_or_else(internal_gap)?;
                if index + 1 < self.nbr_sols {
                    let a = vec![self.h_share];
                    let b = vec![self.field.sub(1, self.acc[index])];
                    self.begin_mult(a, b, MultPurpose::SelectorGate { index: index + 1 })
                } else {
                    self.enter_unshuffle()
                }
            }
        }
    }

    // ---- shuffle ring ---------------------------------------------------

    fn enter_shuffle(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        self.phase = Phase::Shuffle;
        log::debug!("{}: entering shuffle ring", self.name);
        if self.keys.is_none() {
            self.keys = Some(KeyPair::generate(
                self.config.key_bits,
                self.config.key_certainty,
                &mut self.rng,
            )?);
        }
        let Some(keys) = self.keys.as_ref() else {
            return Err(internal_gap());
        };
        let params = ShuffleParams {
            field: &self.field,
            degree: self.degree,
            me: self.me,
            x_values: &self.x_values,
            permutation: &self.permutation,
        };
        let (state, outs) =
            ShuffleState::begin(Direction::Forward, &self.acc, keys, &params, &mut self.rng)?;
        self.shuffle = Some(state);
        Ok(self.encrypted_to_messages(outs))
    }

    fn enter_unshuffle(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        self.phase = Phase::Unshuffle;
        log::debug!("{}: entering un-shuffle ring", self.name);
        let Some(keys) = self.keys.as_ref() else {
            return Err(internal_gap());
        };
        let params = ShuffleParams {
            field: &self.field,
            degree: self.degree,
            me: self.me,
            x_values: &self.x_values,
            permutation: &self.inverse_permutation,
        };
        let (state, outs) =
            ShuffleState::begin(Direction::Inverse, &self.acc, keys, &params, &mut self.rng)?;
        self.shuffle = Some(state);
        Ok(self.encrypted_to_messages(outs))
    }

    fn on_shuffle_message(
        &mut self,
        message: ProtocolMessage,
    ) -> Result<Vec<Outbound>, DcopMpcError> {
        let ProtocolMessage::Encrypted(payload) = message else {
            return Err(DcopMpcError::ProtocolViolation(
                "Non-ciphertext message during a shuffle round".into(),
            ));
        };
        let Some(mut state) = self.shuffle.take() else {
            return Err(DcopMpcError::ProtocolViolation(
                "Encrypted vector while no ring pass is in flight".into(),
            ));
        };
        let Some(keys) = self.keys.as_ref() else {
            return Err(internal_gap());
        };
        let permutation = if self.phase == Phase::Shuffle {
            &self.permutation
        } else {
            &self.inverse_permutation
        };
        let params = ShuffleParams {
            field: &self.field,
            degree: self.degree,
            me: self.me,
            x_values: &self.x_values,
            permutation,
        };
        let outs = state.on_encrypted(payload, keys, &params, &mut self.rng)?;
        let mut messages = self.encrypted_to_messages(outs);

        if state.is_complete(self.n) {
            let returned = state.take_returned().ok_or_else(internal_gap)?;
            self.shuffle = None;
            self.acc = returned;
            self.parity = !self.parity;
            let next = if self.phase == Phase::Shuffle {
                self.enter_select()?
            } else {
                self.enter_reveal()?
            };
            messages.extend(next);
        } else {
            self.shuffle = Some(state);
        }
        Ok(messages)
    }

    // ---- selection circuit ----------------------------------------------

    fn enter_select(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        self.phase = Phase::Select;
        if self.nbr_sols == 1 {
            return self.enter_unshuffle();
        }
        log::debug!("{}: running selection circuit", self.name);
        self.h_share = 1;
        let a = vec![self.h_share];
        let b = vec![self.field.sub(1, self.acc[0])];
        self.begin_mult(a, b, MultPurpose::SelectorGate { index: 1 })
    }

    // ---- revelation and verdict -----------------------------------------

    fn enter_reveal(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        self.phase = Phase::Reveal;
        log::debug!("{}: revealing per-variable shares", self.name);
        self.assignment.clear();
        self.reveal_rows = vec![None; self.n];
        self.reveal_collected = 0;

        let mut out = Vec::new();
        for owner in self.problem.agents().to_vec() {
            let owned = self.problem.owned_variables(&owner);
            if owned.is_empty() {
                continue;
            }
            let mut per_variable_share = BTreeMap::new();
            for (position, variable) in owned {
                // Weighted sum of the one-hot vector by 1 + value index,
                // minus the fixed offset: a share of the winning value's
                // index, or of p − 1 when no candidate was selected.
                let mut share = 0i64;
                for (slot, candidate) in self.problem.candidates().iter().enumerate() {
                    let weight = 1 + candidate.values[position] as i64;
                    share = self.field.add(share, self.field.mul(self.acc[slot], weight));
                }
                share = self.field.sub(share, 1);
                per_variable_share.insert(variable.name.clone(), share);
            }
            out.push(Outbound {
                to: owner,
                message: ProtocolMessage::Solution(SolutionShares {
                    sender: self.me as i32,
                    per_variable_share,
                    round_parity: self.parity,
                }),
            });
        }

        self.reveal_expected = if self.problem.owned_variables(&self.name).is_empty() {
            0
        } else {
            self.n
        };
        if self.reveal_expected == 0 {
            // Nothing is addressed to this agent; its verdict is vacuous.
            let verdicts = self.finish_reveal()?;
            out.extend(verdicts);
        }
        Ok(out)
    }

    fn on_reveal_message(
        &mut self,
        message: ProtocolMessage,
    ) -> Result<Vec<Outbound>, DcopMpcError> {
        let ProtocolMessage::Solution(payload) = message else {
            return Err(DcopMpcError::ProtocolViolation(
                "Unexpected message during revelation".into(),
            ));
        };
        if payload.sender < 0 || payload.per_variable_share.is_empty() {
            return Err(DcopMpcError::ProtocolViolation(
                "Sentinel message during the share-collection round".into(),
            ));
        }
        let sender = payload.sender as usize;
        if sender >= self.n {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Solution shares from unknown agent rank {}",
                sender
            )));
        }
        if self.reveal_rows[sender].is_some() {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Duplicate solution shares from agent rank {}",
                sender
            )));
        }
        self.reveal_rows[sender] = Some(payload.per_variable_share);
        self.reveal_collected += 1;
        if self.reveal_collected < self.reveal_expected {
            return Ok(Vec::new());
        }
        self.finish_reveal()
    }

    fn finish_reveal(&mut self) -> Result<Vec<Outbound>, DcopMpcError> {
        let owned: Vec<(String, usize)> = self
            .problem
            .owned_variables(&self.name)
            .into_iter()
            .map(|(_, v)| (v.name.clone(), v.domain_size))
            .collect();

        let mut all_in_range = true;
        let mut values = BTreeMap::new();
        for (variable, domain_size) in owned {
            let mut row = Vec::with_capacity(self.n);
            for sender in 0..self.n {
                let map = self.reveal_rows[sender].as_ref().ok_or_else(internal_gap)?;
                let share = map.get(&variable).ok_or_else(|| {
                    DcopMpcError::ProtocolViolation(format!(
                        "Agent rank {} sent no share for variable {}",
                        sender, variable
                    ))
                })?;
                row.push(*share);
            }
            let index = reconstruct(&row, &self.lagrange, &self.field)?;
            if index >= 0 && (index as usize) < domain_size {
                values.insert(variable, index as usize);
            } else {
                log::debug!(
                    "{}: index {} for {} is out of range, no solution here",
                    self.name,
                    index,
                    variable
                );
                all_in_range = false;
            }
        }
        if all_in_range {
            self.assignment = values;
        }

        // Verdict round: one broadcast per agent, empty map; a negative
        // sender marks a finished owner, a non-negative one the
        // "no solution at this cost" sentinel.
        self.parity = !self.parity;
        self.phase = Phase::Verdict;
        self.verdicts = vec![None; self.n];
        self.verdicts_collected = 0;
        let sender = if all_in_range {
            -(self.me as i32 + 1)
        } else {
            self.me as i32
        };
        let out = self
            .problem
            .agents()
            .iter()
            .map(|agent| Outbound {
                to: agent.clone(),
                message: ProtocolMessage::Solution(SolutionShares {
                    sender,
                    per_variable_share: BTreeMap::new(),
                    round_parity: self.parity,
                }),
            })
            .collect();
        Ok(out)
    }

    fn on_verdict_message(
        &mut self,
        message: ProtocolMessage,
    ) -> Result<Vec<Outbound>, DcopMpcError> {
        let ProtocolMessage::Solution(payload) = message else {
            return Err(DcopMpcError::ProtocolViolation(
                "Unexpected message during the verdict round".into(),
            ));
        };
        if !payload.per_variable_share.is_empty() {
            return Err(DcopMpcError::ProtocolViolation(
                "Verdict messages carry no shares".into(),
            ));
        }
        let (rank, finished) = if payload.sender < 0 {
            ((-payload.sender - 1) as usize, true)
        } else {
            (payload.sender as usize, false)
        };
        if rank >= self.n {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Verdict from unknown agent rank {}",
                rank
            )));
        }
        if self.verdicts[rank].is_some() {
            return Err(DcopMpcError::ProtocolViolation(format!(
                "Duplicate verdict from agent rank {}",
                rank
            )));
        }
        self.verdicts[rank] = Some(finished);
        self.verdicts_collected += 1;
        if self.verdicts_collected < self.n {
            return Ok(Vec::new());
        }

        let all_finished = self.verdicts.iter().all(|v| *v == Some(true));
        self.parity = !self.parity;
        if all_finished {
            log::debug!("{}: run solved", self.name);
            self.outcome = Some(Outcome::Solved(self.assignment.clone()));
            self.phase = Phase::Done;
            return Ok(Vec::new());
        }

        match self.mode {
            Mode::Plain => {
                log::debug!("{}: no feasible candidate, terminating", self.name);
                self.outcome = Some(Outcome::Infeasible);
                self.phase = Phase::Done;
                Ok(Vec::new())
            }
            Mode::Weighted { max_total_cost, .. } => {
                self.target_cost += 1;
                if self.target_cost > max_total_cost {
                    log::debug!("{}: cost search exhausted, infeasible", self.name);
                    self.outcome = Some(Outcome::Infeasible);
                    self.phase = Phase::Done;
                    Ok(Vec::new())
                } else {
                    self.begin_indicator()
                }
            }
        }
    }

    // ---- message framing ------------------------------------------------

    fn share_rows_to_messages(&self, rows: Vec<(usize, Vector)>) -> Vec<Outbound> {
        rows.into_iter()
            .map(|(to, values)| {
                let message = if values.len() == 1 {
                    ProtocolMessage::One(OneShare {
                        sender: self.me,
                        value: values[0],
                        round_parity: self.parity,
                    })
                } else {
                    ProtocolMessage::Shares(SharesVector {
                        sender: self.me,
                        values,
                        round_parity: self.parity,
                    })
                };
                Outbound {
                    to: self.problem.agents()[to].clone(),
                    message,
                }
            })
            .collect()
    }

    fn encrypted_to_messages(
        &self,
        outs: Vec<(usize, crate::messages::EncryptedSharesVector)>,
    ) -> Vec<Outbound> {
        outs.into_iter()
            .map(|(to, mut payload)| {
                payload.round_parity = self.parity;
                Outbound {
                    to: self.problem.agents()[to].clone(),
                    message: ProtocolMessage::Encrypted(payload),
                }
            })
            .collect()
    }
}

fn share_payload(message: ProtocolMessage) -> Result<(usize, Vector), DcopMpcError> {
    match message {
        ProtocolMessage::Shares(m) => Ok((m.sender, m.values)),
        ProtocolMessage::One(m) => Ok((m.sender, vec![m.value])),
        _ => Err(DcopMpcError::ProtocolViolation(
            "Expected a share row in this round".into(),
        )),
    }
}

fn internal_gap() -> DcopMpcError {
    DcopMpcError::InternalError("Protocol state invariant broken".into())
}
