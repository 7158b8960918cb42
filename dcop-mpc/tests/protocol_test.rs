use dcop_mpc::engine::{Engine, Outcome};
use dcop_mpc::errors::DcopMpcError;
use dcop_mpc::field::Field;
use dcop_mpc::messages::Outbound;
use dcop_mpc::problem::{Candidate, Mode, PrivateConstraints, ProblemView, ProtocolConfig, VariableInfo};

use std::collections::{BTreeMap, VecDeque};

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

struct Closure<F: Fn(&Candidate) -> u64>(F);

impl<F: Fn(&Candidate) -> u64> PrivateConstraints for Closure<F> {
    fn evaluate(&self, candidate: &Candidate) -> u64 {
        (self.0)(candidate)
    }
}

fn config(mode: Mode) -> ProtocolConfig {
    ProtocolConfig {
        field_modulus: 97,
        key_bits: 128,
        key_certainty: 20,
        mode,
    }
}

/// Drives a fleet of engines over an in-memory FIFO loop until every agent
/// terminates. The loop stands in for the reliable, per-sender-ordered
/// delivery substrate; the iteration cap stands in for the harness
/// deadline.
fn pump(engines: &mut BTreeMap<String, Engine>) -> Result<(), DcopMpcError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut queue: VecDeque<Outbound> = VecDeque::new();
    for engine in engines.values_mut() {
        queue.extend(engine.start()?);
    }
    let mut delivered = 0usize;
    while let Some(outbound) = queue.pop_front() {
        delivered += 1;
        assert!(delivered < 200_000, "run exceeded the delivery budget");
        let engine = engines
            .get_mut(&outbound.to)
            .expect("message addressed to a known agent");
        queue.extend(engine.handle(outbound.message)?);
    }
    assert!(engines.values().all(|e| e.is_done()));
    Ok(())
}

#[allow(clippy::type_complexity)]
fn run(
    problem: &ProblemView,
    mode: Mode,
    measures: Vec<(&str, Box<dyn Fn(&Candidate) -> u64>)>,
    seed: u64,
) -> Result<BTreeMap<String, Outcome>, DcopMpcError> {
    let mut engines = BTreeMap::new();
    for (i, (agent, measure)) in measures.into_iter().enumerate() {
        let engine = Engine::try_with(
            problem.clone(),
            config(mode),
            agent,
            &Closure(measure),
            StdRng::seed_from_u64(seed + i as u64),
        )?;
        engines.insert(agent.to_string(), engine);
    }
    pump(&mut engines)?;
    Ok(engines
        .into_iter()
        .map(|(name, engine)| {
            let outcome = engine.outcome().expect("terminated run has an outcome");
            (name, outcome.clone())
        })
        .collect())
}

fn one_variable_problem(agents: &[&str], domain_size: usize) -> ProblemView {
    ProblemView::try_with(
        agents.iter().map(|a| a.to_string()).collect(),
        vec![VariableInfo {
            name: "x".into(),
            owner: agents[0].to_string(),
            domain_size,
        }],
        (0..domain_size)
            .map(|v| Candidate { values: vec![v] })
            .collect(),
    )
    .expect("well-formed problem")
}

#[test]
fn plain_two_agents_with_private_veto() -> Result<(), DcopMpcError> {
    // Public constraint allows x in {0, 1}; alice privately forbids x = 1.
    // The run must output x = 0 to alice, and only completion to bob.
    let problem = one_variable_problem(&["alice", "bob"], 2);
    let outcomes = run(
        &problem,
        Mode::Plain,
        vec![
            ("alice", Box::new(|c: &Candidate| (c.values[0] == 1) as u64)),
            ("bob", Box::new(|_: &Candidate| 0)),
        ],
        10,
    )?;
    assert_eq!(
        outcomes["alice"],
        Outcome::Solved(BTreeMap::from([("x".to_string(), 0)]))
    );
    assert_eq!(outcomes["bob"], Outcome::Solved(BTreeMap::new()));
    Ok(())
}

#[test]
fn plain_contradiction_terminates_infeasible() -> Result<(), DcopMpcError> {
    // Contradictory private unary constraints on the sole variable.
    let problem = one_variable_problem(&["alice", "bob"], 2);
    let outcomes = run(
        &problem,
        Mode::Plain,
        vec![
            ("alice", Box::new(|c: &Candidate| (c.values[0] == 1) as u64)),
            ("bob", Box::new(|c: &Candidate| (c.values[0] == 0) as u64)),
        ],
        11,
    )?;
    assert_eq!(outcomes["alice"], Outcome::Infeasible);
    assert_eq!(outcomes["bob"], Outcome::Infeasible);
    Ok(())
}

#[test]
fn plain_pick_lands_in_the_feasible_set() -> Result<(), DcopMpcError> {
    // Domain {0, 1, 2}, value 1 privately vetoed: the winner must be one
    // of the surviving candidates, whichever the secret shuffle favours.
    let problem = one_variable_problem(&["alice", "bob", "carol"], 3);
    let outcomes = run(
        &problem,
        Mode::Plain,
        vec![
            ("alice", Box::new(|_: &Candidate| 0)),
            ("bob", Box::new(|c: &Candidate| (c.values[0] == 1) as u64)),
            ("carol", Box::new(|_: &Candidate| 0)),
        ],
        12,
    )?;
    let Outcome::Solved(assignment) = &outcomes["alice"] else {
        panic!("expected a solution");
    };
    assert!(matches!(assignment["x"], 0 | 2));
    for agent in ["bob", "carol"] {
        assert_eq!(outcomes[agent], Outcome::Solved(BTreeMap::new()));
    }
    Ok(())
}

#[test]
fn plain_two_owners_agree_on_one_candidate() -> Result<(), DcopMpcError> {
    // Two variables with different owners; private constraints leave a
    // single publicly enumerated candidate standing.
    let problem = ProblemView::try_with(
        vec!["alice".into(), "bob".into()],
        vec![
            VariableInfo {
                name: "x".into(),
                owner: "alice".into(),
                domain_size: 2,
            },
            VariableInfo {
                name: "y".into(),
                owner: "bob".into(),
                domain_size: 2,
            },
        ],
        vec![
            Candidate { values: vec![0, 0] },
            Candidate { values: vec![0, 1] },
            Candidate { values: vec![1, 0] },
        ],
    )?;
    let outcomes = run(
        &problem,
        Mode::Plain,
        vec![
            (
                "alice",
                Box::new(|c: &Candidate| (c.values == [0, 0]) as u64),
            ),
            (
                "bob",
                Box::new(|c: &Candidate| (c.values == [0, 1]) as u64),
            ),
        ],
        13,
    )?;
    assert_eq!(
        outcomes["alice"],
        Outcome::Solved(BTreeMap::from([("x".to_string(), 1)]))
    );
    assert_eq!(
        outcomes["bob"],
        Outcome::Solved(BTreeMap::from([("y".to_string(), 0)]))
    );
    Ok(())
}

#[test]
fn weighted_picks_the_cheapest_candidate() -> Result<(), DcopMpcError> {
    // Totals are [1, 0]; the target-cost sweep must stop at cost 0 with
    // x = 1.
    let problem = one_variable_problem(&["alice", "bob"], 2);
    let mode = Mode::Weighted {
        infinite_cost: 2,
        max_total_cost: 4,
    };
    let outcomes = run(
        &problem,
        mode,
        vec![
            ("alice", Box::new(|c: &Candidate| (c.values[0] == 0) as u64)),
            ("bob", Box::new(|_: &Candidate| 0)),
        ],
        14,
    )?;
    assert_eq!(
        outcomes["alice"],
        Outcome::Solved(BTreeMap::from([("x".to_string(), 1)]))
    );
    Ok(())
}

#[test]
fn weighted_prefers_low_cost_over_low_index() -> Result<(), DcopMpcError> {
    // Candidate 0 costs 2, candidate 2 costs 1, candidate 1 costs 3: the
    // sweep must settle on x = 2, not the first or the forbidden one.
    let problem = one_variable_problem(&["alice", "bob"], 3);
    let mode = Mode::Weighted {
        infinite_cost: 4,
        max_total_cost: 8,
    };
    let outcomes = run(
        &problem,
        mode,
        vec![
            (
                "alice",
                Box::new(|c: &Candidate| [1u64, 2, 0][c.values[0]]),
            ),
            (
                "bob",
                Box::new(|c: &Candidate| [1u64, 1, 1][c.values[0]]),
            ),
        ],
        15,
    )?;
    assert_eq!(
        outcomes["alice"],
        Outcome::Solved(BTreeMap::from([("x".to_string(), 2)]))
    );
    Ok(())
}

#[test]
fn weighted_exhausts_every_cost_before_giving_up() -> Result<(), DcopMpcError> {
    // Contradictory unary constraints, both capped at the infinite cost:
    // every total lands above the search ceiling, so the sweep walks
    // target costs 0, 1, 2, 3 and then reports infeasibility.
    let problem = one_variable_problem(&["alice", "bob"], 2);
    let mode = Mode::Weighted {
        infinite_cost: 4,
        max_total_cost: 3,
    };
    let outcomes = run(
        &problem,
        mode,
        vec![
            (
                "alice",
                Box::new(|c: &Candidate| if c.values[0] == 1 { 9 } else { 0 }),
            ),
            (
                "bob",
                Box::new(|c: &Candidate| if c.values[0] == 0 { 9 } else { 0 }),
            ),
        ],
        16,
    )?;
    assert_eq!(outcomes["alice"], Outcome::Infeasible);
    assert_eq!(outcomes["bob"], Outcome::Infeasible);
    Ok(())
}

#[test]
fn cost_indicator_is_nonzero_only_at_the_target_cost() -> Result<(), DcopMpcError> {
    // The weighted selector's Lagrange indicator, evaluated in the clear:
    // p_i = Π_{k≠c}(C_i − k) · inv(Π_{k≠c}(c − k)) must be 1 exactly where
    // C_i = c and 0 at every other cost inside the ceiling.
    let field = Field::try_with(97)?;
    let max_cost = 6u64;
    let costs: Vec<i64> = vec![0, 1, 3, 6, 3, 2];

    for c in 0..=max_cost {
        let mut denominator = 1i64;
        for k in 0..=max_cost {
            if k != c {
                denominator = field.mul(denominator, field.sub(c as i64, k as i64));
            }
        }
        let norm = field.inv(denominator)?;

        for &cost in &costs {
            let mut numerator = 1i64;
            for k in 0..=max_cost {
                if k != c {
                    numerator = field.mul(numerator, field.sub(cost, k as i64));
                }
            }
            let indicator = field.mul(numerator, norm);
            assert_eq!(indicator, i64::from(cost == c as i64));
        }
    }
    Ok(())
}

#[test]
fn first_feasible_recurrence_matches_reference() -> Result<(), DcopMpcError> {
    // The selection circuit computes h[0] = 1, h[i] = h[i-1]·(1 - S[i-1]),
    // S[i] = S[i]·h[i]. Checked in the clear against the obvious
    // first-feasible reference for every length 1..=20.
    let field = Field::try_with(97)?;
    let mut rng = StdRng::seed_from_u64(99);

    for len in 1..=20usize {
        for _ in 0..8 {
            let pattern: Vec<i64> = (0..len).map(|_| rng.random_range(0..2)).collect();

            let mut s = pattern.clone();
            let mut h = 1i64;
            for i in 1..len {
                h = field.mul(h, field.sub(1, s[i - 1]));
                s[i] = field.mul(s[i], h);
            }

            let first = pattern.iter().position(|&f| f == 1);
            let expected: Vec<i64> = (0..len)
                .map(|i| i64::from(Some(i) == first))
                .collect();
            assert_eq!(s, expected, "pattern {:?}", pattern);
        }
    }
    Ok(())
}
