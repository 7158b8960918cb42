//! External collaborator interfaces: the agent roster, the public variable
//! and candidate model produced by the harness, the private-constraint
//! hook, and run configuration.
//!
//! The candidate enumeration is a harness obligation: every agent must be
//! handed the byte-identical list, in the same order, derived from public
//! constraints alone.

use crate::errors::DcopMpcError;
use crate::field::Field;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub type AgentName = String;

/// A public variable together with its owning agent and domain size.
/// Candidates refer to values by index into the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub owner: AgentName,
    pub domain_size: usize,
}

/// One publicly feasible full assignment: the value index of every variable,
/// aligned with the problem's variable list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub values: Vec<usize>,
}

/// Evaluation of an agent's own private constraints against a candidate.
///
/// The returned measure is 0 when the candidate satisfies every private
/// constraint. The plain protocol treats any nonzero measure as
/// infeasibility; the weighted protocol treats it as a cost and caps it at
/// the configured infinite cost.
pub trait PrivateConstraints {
    fn evaluate(&self, candidate: &Candidate) -> u64;
}

/// Protocol variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Satisfaction: pick the first feasible candidate in shuffle order.
    Plain,
    /// Optimization: search target costs 0..=max_total_cost for the
    /// cheapest feasible candidate. Private costs above `infinite_cost`
    /// are capped at it; `max_total_cost` must cover every achievable
    /// capped sum for the indicator circuit to be sound.
    Weighted {
        infinite_cost: u64,
        max_total_cost: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Shamir field modulus: a prime below 2^31.
    pub field_modulus: u64,
    /// Bit length of each agent's homomorphic key modulus.
    pub key_bits: usize,
    /// Miller-Rabin certainty for key-generation primes.
    pub key_certainty: u32,
    pub mode: Mode,
}

impl ProtocolConfig {
    /// Validates the configuration against a concrete problem size.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::InvalidParameters` when the modulus cannot
    /// represent every value the run may legitimately sum: candidate
    /// counts, value indices, and (for the weighted variant) the total
    /// cost ceiling.
    pub fn validate(&self, nbr_sols: usize, nbr_agents: usize) -> Result<Field, DcopMpcError> {
        let field = Field::try_with(self.field_modulus)?;

        if (nbr_sols as u64) >= self.field_modulus || (nbr_agents as u64) >= self.field_modulus {
            return Err(DcopMpcError::InvalidParameters(format!(
                "Modulus {} is too small for {} candidates and {} agents",
                self.field_modulus, nbr_sols, nbr_agents
            )));
        }

        if let Mode::Weighted {
            infinite_cost,
            max_total_cost,
        } = self.mode
        {
            if infinite_cost == 0 {
                return Err(DcopMpcError::InvalidParameters(
                    "infinite_cost must be positive".into(),
                ));
            }
            if max_total_cost >= self.field_modulus {
                return Err(DcopMpcError::InvalidParameters(format!(
                    "max_total_cost {} exceeds the field",
                    max_total_cost
                )));
            }
        }

        Ok(field)
    }
}

/// The public face of the problem, identical on every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemView {
    agents: Vec<AgentName>,
    variables: Vec<VariableInfo>,
    candidates: Vec<Candidate>,
}

impl ProblemView {
    /// Builds a view from the harness's enumeration. Agent names are
    /// deduplicated and sorted so every agent derives the same ranking.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::InvalidParameters` if fewer than two agents
    /// or no candidates are supplied, if a variable names an unknown
    /// owner, or if a candidate is malformed (wrong arity, value index
    /// outside its variable's domain).
    pub fn try_with(
        agents: Vec<AgentName>,
        variables: Vec<VariableInfo>,
        candidates: Vec<Candidate>,
    ) -> Result<Self, DcopMpcError> {
        let agents: Vec<AgentName> = agents.into_iter().sorted().dedup().collect();
        if agents.len() < 2 {
            return Err(DcopMpcError::InvalidParameters(
                "At least two agents are required".into(),
            ));
        }
        if candidates.is_empty() {
            return Err(DcopMpcError::InvalidParameters(
                "The publicly feasible candidate list is empty".into(),
            ));
        }

        for variable in &variables {
            if !agents.contains(&variable.owner) {
                return Err(DcopMpcError::UnknownAgent(variable.owner.clone()));
            }
            if variable.domain_size == 0 {
                return Err(DcopMpcError::InvalidParameters(format!(
                    "Variable {} has an empty domain",
                    variable.name
                )));
            }
        }

        for candidate in &candidates {
            if candidate.values.len() != variables.len() {
                return Err(DcopMpcError::InvalidParameters(format!(
                    "Candidate arity {} does not match {} variables",
                    candidate.values.len(),
                    variables.len()
                )));
            }
            for (value, variable) in candidate.values.iter().zip(&variables) {
                if *value >= variable.domain_size {
                    return Err(DcopMpcError::InvalidParameters(format!(
                        "Value index {} outside domain of {}",
                        value, variable.name
                    )));
                }
            }
        }

        Ok(Self {
            agents,
            variables,
            candidates,
        })
    }

    pub fn agents(&self) -> &[AgentName] {
        &self.agents
    }

    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn nbr_sols(&self) -> usize {
        self.candidates.len()
    }

    /// Rank of an agent in the fixed lexicographic ordering.
    pub fn rank_of(&self, name: &str) -> Result<usize, DcopMpcError> {
        self.agents
            .iter()
            .position(|a| a == name)
            .ok_or_else(|| DcopMpcError::UnknownAgent(name.to_string()))
    }

    /// Distinct nonzero evaluation points, rank + 1 per agent.
    pub fn x_values(&self) -> Vec<i64> {
        (1..=self.agents.len() as i64).collect()
    }

    /// Variables owned by the given agent, with their positions in the
    /// variable list.
    pub fn owned_variables(&self, owner: &str) -> Vec<(usize, &VariableInfo)> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.owner == owner)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_agent_problem() -> ProblemView {
        ProblemView::try_with(
            vec!["bob".into(), "alice".into()],
            vec![VariableInfo {
                name: "x".into(),
                owner: "alice".into(),
                domain_size: 2,
            }],
            vec![Candidate { values: vec![0] }, Candidate { values: vec![1] }],
        )
        .unwrap()
    }

    #[test]
    fn test_roster_is_sorted_and_ranked() {
        let problem = two_agent_problem();
        assert_eq!(problem.agents().to_vec(), vec!["alice", "bob"]);
        assert_eq!(problem.rank_of("alice").unwrap(), 0);
        assert_eq!(problem.rank_of("bob").unwrap(), 1);
        assert!(problem.rank_of("carol").is_err());
        assert_eq!(problem.x_values(), vec![1, 2]);
    }

    #[test]
    fn test_owned_variables() {
        let problem = two_agent_problem();
        assert_eq!(problem.owned_variables("alice").len(), 1);
        assert!(problem.owned_variables("bob").is_empty());
    }

    #[test]
    fn test_rejects_malformed_candidates() {
        let agents = vec!["a".into(), "b".into()];
        let variables = vec![VariableInfo {
            name: "x".into(),
            owner: "a".into(),
            domain_size: 2,
        }];
        assert!(
            ProblemView::try_with(
                agents.clone(),
                variables.clone(),
                vec![Candidate { values: vec![2] }],
            )
            .is_err()
        );
        assert!(
            ProblemView::try_with(agents, variables, vec![Candidate { values: vec![0, 1] }])
                .is_err()
        );
    }

    #[test]
    fn test_config_validation() {
        let config = ProtocolConfig {
            field_modulus: 97,
            key_bits: 128,
            key_certainty: 20,
            mode: Mode::Plain,
        };
        assert!(config.validate(4, 3).is_ok());
        assert!(config.validate(100, 3).is_err());

        let weighted = ProtocolConfig {
            field_modulus: 97,
            key_bits: 128,
            key_certainty: 20,
            mode: Mode::Weighted {
                infinite_cost: 2,
                max_total_cost: 98,
            },
        };
        assert!(weighted.validate(4, 3).is_err());
    }
}
