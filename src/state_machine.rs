//! The continuous-time Markov state machine.
//!
//! Transition intensities are an `N x N` matrix `Q(p)` parameterized by an
//! `L`-length control vector `p` through a power-series expansion. Both
//! `Q(p)` and the set of stopped states are pure functions of their inputs,
//! so they are memoized process-wide behind an `lru::LruCache`, sized from
//! [`StateMachineCacheConfig`], to amortize the expansion cost across many
//! identical emitters.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::config::StateMachineCacheConfig;
use crate::error::{Error, Result};
use crate::rng::RandomDraws;

pub type RateMatrix = Vec<Vec<f64>>;
pub type RateTensor = Vec<Vec<Vec<Vec<f64>>>>;

/// A state-transition event generated by a [`StateMachine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub time: f64,
    pub from_state: usize,
    pub to_state: usize,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct RatesCacheKey(Vec<u64>);

#[derive(Clone, PartialEq, Eq, Hash)]
struct StoppedCacheKey(Vec<u64>);

fn hash_matrix(bits: &mut Vec<u64>, matrix: &RateMatrix) {
    bits.push(matrix.len() as u64);
    for row in matrix {
        bits.push(row.len() as u64);
        bits.extend(row.iter().map(|v| v.to_bits()));
    }
}

fn hash_tensor(bits: &mut Vec<u64>, tensor: &RateTensor) {
    bits.push(tensor.len() as u64);
    for l in tensor {
        bits.push(l.len() as u64);
        for m in l {
            hash_matrix(bits, m);
        }
    }
}

fn rates_cache_key(control_params: &[f64], rc: &RateMatrix, rco: &RateTensor) -> RatesCacheKey {
    let mut bits = vec![control_params.len() as u64];
    bits.extend(control_params.iter().map(|v| v.to_bits()));
    hash_matrix(&mut bits, rc);
    hash_tensor(&mut bits, rco);
    RatesCacheKey(bits)
}

fn stopped_cache_key(rc: &RateMatrix, rco: &RateTensor) -> StoppedCacheKey {
    let mut bits = Vec::new();
    hash_matrix(&mut bits, rc);
    hash_tensor(&mut bits, rco);
    StoppedCacheKey(bits)
}

static RATES_CACHE: Lazy<Mutex<lru::LruCache<RatesCacheKey, RateMatrix>>> = Lazy::new(|| {
    let size = StateMachineCacheConfig::from_env().rates.max(1);
    Mutex::new(lru::LruCache::new(NonZeroUsize::new(size).unwrap()))
});

static STOPPED_CACHE: Lazy<Mutex<lru::LruCache<StoppedCacheKey, Vec<bool>>>> = Lazy::new(|| {
    let size = StateMachineCacheConfig::from_env().stopped_states.max(1);
    Mutex::new(lru::LruCache::new(NonZeroUsize::new(size).unwrap()))
});

/// Expands `Q(p) = rate_constants + sum_l sum_m (p_l)^m * rate_coefficients[l, m-1]`.
///
/// Memoized on a canonical bit-pattern key of its inputs so that many
/// identical emitters amortize the cost of the expansion.
fn compute_rates_cached(control_params: &[f64], rc: &RateMatrix, rco: &RateTensor) -> Result<RateMatrix> {
    let key = rates_cache_key(control_params, rc, rco);
    if let Some(hit) = RATES_CACHE.lock().unwrap().get(&key) {
        log::debug!("state machine rates cache hit");
        return Ok(hit.clone());
    }
    log::debug!("state machine rates cache miss");
    let rates = compute_rates(control_params, rc, rco)?;
    RATES_CACHE.lock().unwrap().put(key, rates.clone());
    Ok(rates)
}

fn compute_rates(control_params: &[f64], rc: &RateMatrix, rco: &RateTensor) -> Result<RateMatrix> {
    if rco.is_empty() {
        return Ok(rc.clone());
    }
    if control_params.len() != rco.len() {
        return Err(Error::invalid_argument(
            "the control parameters array must have the same number of elements as the first \
             dimension of the rate_coefficients array",
        ));
    }
    let n = rc.len();
    let mut q = rc.clone();
    for (l, per_order) in rco.iter().enumerate() {
        let p = control_params[l];
        for (m_idx, coefficients) in per_order.iter().enumerate() {
            let power = p.powi((m_idx + 1) as i32);
            for i in 0..n {
                for j in 0..n {
                    q[i][j] += power * coefficients[i][j];
                }
            }
        }
    }
    Ok(q)
}

/// Finds the states from which every outgoing rate is zero for every
/// control parameter value — states the machine can never leave.
fn stopped_states_cached(rc: &RateMatrix, rco: &RateTensor) -> Vec<bool> {
    let key = stopped_cache_key(rc, rco);
    if let Some(hit) = STOPPED_CACHE.lock().unwrap().get(&key) {
        log::debug!("state machine stopped-states cache hit");
        return hit.clone();
    }
    log::debug!("state machine stopped-states cache miss");
    let stopped = stopped_states(rc, rco);
    STOPPED_CACHE.lock().unwrap().put(key, stopped.clone());
    stopped
}

fn stopped_states(rc: &RateMatrix, rco: &RateTensor) -> Vec<bool> {
    let n = rc.len();
    let mut stopped = vec![true; n];
    for (from_state, row) in rc.iter().enumerate() {
        if row.iter().any(|&r| r != 0.0) {
            stopped[from_state] = false;
        }
    }
    for per_order in rco {
        for coefficients in per_order {
            for (from_state, row) in coefficients.iter().enumerate() {
                if row.iter().any(|&r| r != 0.0) {
                    stopped[from_state] = false;
                }
            }
        }
    }
    stopped
}

fn validate_tensors(rc: &RateMatrix, rco: &RateTensor) -> Result<usize> {
    let n = rc.len();
    if n == 0 {
        return Err(Error::invalid_argument("rate_constants must not be empty"));
    }
    for row in rc {
        if row.len() != n {
            return Err(Error::invalid_argument("rate_constants must be square"));
        }
        if row.iter().any(|&r| r < 0.0) {
            return Err(Error::invalid_argument("rate_constants must be non-negative"));
        }
    }
    for per_order in rco {
        for coefficients in per_order {
            if coefficients.len() != n {
                return Err(Error::invalid_argument(
                    "rate_coefficients must have N rows matching rate_constants",
                ));
            }
            for row in coefficients {
                if row.len() != n {
                    return Err(Error::invalid_argument("rate_coefficients must be square"));
                }
                if row.iter().any(|&r| r < 0.0) {
                    return Err(Error::invalid_argument(
                        "rate_coefficients must be non-negative",
                    ));
                }
            }
        }
    }
    Ok(n)
}

/// A continuous-time Markov chain with exponentially-distributed transition
/// times whose rates may depend polynomially on external control
/// parameters.
#[derive(Debug, Clone)]
pub struct StateMachine<R> {
    current_state: usize,
    rate_constants: RateMatrix,
    rate_coefficients: RateTensor,
    control_params: Vec<f64>,
    next_event: Event,
    stopped: bool,
    rng: R,
}

impl<R: RandomDraws> StateMachine<R> {
    pub fn new(
        current_state: usize,
        control_params: Vec<f64>,
        rate_constants: RateMatrix,
        rate_coefficients: RateTensor,
        mut rng: R,
    ) -> Result<Self> {
        let n = validate_tensors(&rate_constants, &rate_coefficients)?;
        if current_state >= n {
            return Err(Error::invalid_argument(
                "current_state must be in [0, N) for an N-state machine",
            ));
        }
        if !rate_coefficients.is_empty() && control_params.len() != rate_coefficients.len() {
            return Err(Error::invalid_argument(
                "the control parameters array must have the same number of elements as the first \
                 dimension of the rate_coefficients array",
            ));
        }

        let mut stopped = false;
        let next_event = compute_next_event(
            current_state,
            &control_params,
            &rate_constants,
            &rate_coefficients,
            0.0,
            &mut rng,
            &mut stopped,
        )?;

        Ok(Self {
            current_state,
            rate_constants,
            rate_coefficients,
            control_params,
            next_event,
            stopped,
            rng,
        })
    }

    pub fn num_states(&self) -> usize {
        self.rate_constants.len()
    }

    pub fn current_state(&self) -> usize {
        self.current_state
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn next_event(&self) -> Event {
        self.next_event
    }

    /// Steps the machine and collects every transition event that occurs in
    /// `[time, time + dt)`. The sole public interface for driving the machine
    /// forward.
    pub fn collect(&mut self, control_params: &[f64], time: f64, dt: f64) -> Result<Vec<Event>> {
        if self.stopped {
            return Ok(Vec::new());
        }

        self.update(control_params, time)?;

        let mut events = Vec::new();
        while self.next_event.time < time + dt {
            events.push(self.next_event);
            let t_offset = self.next_event.time;
            self.step(control_params, t_offset)?;
            if self.stopped {
                break;
            }
        }
        Ok(events)
    }

    fn step(&mut self, control_params: &[f64], t_offset: f64) -> Result<()> {
        self.current_state = self.next_event.to_state;
        self.next_event = compute_next_event(
            self.current_state,
            control_params,
            &self.rate_constants,
            &self.rate_coefficients,
            t_offset,
            &mut self.rng,
            &mut self.stopped,
        )?;
        Ok(())
    }

    /// Recomputes the pending event, without advancing state, when the
    /// control parameters have changed since the last call.
    fn update(&mut self, control_params: &[f64], t_offset: f64) -> Result<()> {
        if control_params == self.control_params.as_slice() {
            return Ok(());
        }
        self.control_params = control_params.to_vec();
        self.next_event = compute_next_event(
            self.current_state,
            control_params,
            &self.rate_constants,
            &self.rate_coefficients,
            t_offset,
            &mut self.rng,
            &mut self.stopped,
        )?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_next_event<R: RandomDraws>(
    current_state: usize,
    control_params: &[f64],
    rate_constants: &RateMatrix,
    rate_coefficients: &RateTensor,
    t_offset: f64,
    rng: &mut R,
    stopped: &mut bool,
) -> Result<Event> {
    let mask = stopped_states_cached(rate_constants, rate_coefficients);
    if mask[current_state] {
        *stopped = true;
        return Ok(Event {
            time: f64::INFINITY,
            from_state: current_state,
            to_state: current_state,
        });
    }

    let rates = compute_rates_cached(control_params, rate_constants, rate_coefficients)?;
    let row = &rates[current_state];

    let mut best_time = f64::INFINITY;
    let mut best_target = current_state;
    for (target, &rate) in row.iter().enumerate() {
        let tau = if rate > 0.0 {
            rng.exponential(rate)
        } else {
            f64::INFINITY
        };
        if tau < best_time {
            best_time = tau;
            best_target = target;
        }
    }

    Ok(Event {
        time: best_time + t_offset,
        from_state: current_state,
        to_state: best_target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::MockRandomDraws;
    use mockall::predicate::eq;

    fn two_state_rate_constants() -> RateMatrix {
        vec![vec![0.0, 1.0], vec![0.5, 0.0]]
    }

    #[test]
    fn compute_rates_with_no_coefficients_returns_constants_unchanged() {
        let rc = two_state_rate_constants();
        let result = compute_rates(&[], &rc, &[]).unwrap();
        assert_eq!(result, rc);
    }

    #[test]
    fn compute_rates_two_control_params_second_order() {
        let rc = two_state_rate_constants();
        let rco: RateTensor = vec![
            vec![
                vec![vec![0.0, 0.0], vec![2.0, 0.0]],
                vec![vec![0.0, 2.0], vec![0.5, 0.0]],
            ],
            vec![
                vec![vec![0.0, 1.0], vec![4.0, 0.0]],
                vec![vec![0.0, 2.0], vec![0.5, 0.0]],
            ],
        ];
        let result = compute_rates(&[2.0, 3.0], &rc, &rco).unwrap();
        assert_eq!(result, vec![vec![0.0, 30.0], vec![23.0, 0.0]]);
    }

    #[test]
    fn compute_rates_two_control_params_third_order() {
        let rc = two_state_rate_constants();
        let rco: RateTensor = vec![
            vec![
                vec![vec![0.0, 0.0], vec![2.0, 0.0]],
                vec![vec![0.0, 2.0], vec![0.5, 0.0]],
                vec![vec![0.0, 1.0], vec![1.0, 0.0]],
            ],
            vec![
                vec![vec![0.0, 1.0], vec![4.0, 0.0]],
                vec![vec![0.0, 2.0], vec![0.5, 0.0]],
                vec![vec![0.0, 2.0], vec![2.0, 0.0]],
            ],
        ];
        let result = compute_rates(&[2.0, 3.0], &rc, &rco).unwrap();
        assert_eq!(result, vec![vec![0.0, 92.0], vec![85.0, 0.0]]);
    }

    #[test]
    fn stopped_states_detects_all_zero_row() {
        let rc = vec![vec![0.0, 1.0], vec![0.0, 0.0]];
        let rco: RateTensor = vec![vec![
            vec![vec![0.0, 1.0], vec![0.0, 0.0]],
            vec![vec![0.0, 1.0], vec![0.0, 0.0]],
        ]];
        let mask = stopped_states(&rc, &rco);
        assert_eq!(mask, vec![false, true]);
    }

    #[test]
    fn collect_on_stopped_machine_returns_no_events() {
        let rc = vec![vec![0.0, 1.0], vec![0.0, 0.0]];
        let rco: RateTensor = vec![vec![
            vec![vec![0.0, 1.0], vec![0.0, 0.0]],
            vec![vec![0.0, 1.0], vec![0.0, 0.0]],
        ]];
        let mut rng = MockRandomDraws::new();
        rng.expect_exponential().returning(|rate| 1.0 / rate);
        let mut sm = StateMachine::new(1, vec![1.0], rc, rco, rng).unwrap();
        assert!(sm.stopped());

        let events = sm.collect(&[1.0], 0.0, 999_999.0).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn machine_stops_once_it_reaches_a_stopped_state() {
        let rc = vec![vec![0.0, 1.0], vec![0.0, 0.0]];
        let rco: RateTensor = vec![vec![
            vec![vec![0.0, 1.0], vec![0.0, 0.0]],
            vec![vec![0.0, 1.0], vec![0.0, 0.0]],
        ]];
        let mut rng = MockRandomDraws::new();
        rng.expect_exponential().returning(|rate| 1.0 / rate);
        let mut sm = StateMachine::new(0, vec![1.0], rc, rco, rng).unwrap();
        assert!(!sm.stopped());

        let events = sm.collect(&[1.0], 0.0, 1.5).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(sm.current_state(), 1);
        assert!(sm.stopped());

        let events = sm.collect(&[1.0], 1.5, 999_999.0).unwrap();
        assert!(events.is_empty());
        assert_eq!(sm.current_state(), 1);
    }

    #[test]
    fn collect_generates_expected_event_sequence() {
        // Rates at state 0: [_, 1], rate to state 1 is 1 (reciprocal 1)
        // Rates at state 1: [0.5, _], rate to state 0 is 0.5 (reciprocal 2)
        let rc = two_state_rate_constants();
        let mut rng = MockRandomDraws::new();
        rng.expect_exponential()
            .with(eq(1.0))
            .returning(|rate| 1.0 / rate);
        rng.expect_exponential()
            .with(eq(0.5))
            .returning(|rate| 1.0 / rate);
        let mut sm = StateMachine::new(0, vec![], rc, vec![], rng).unwrap();

        let events = sm.collect(&[], 0.0, 1.5).unwrap();
        // 0 -> 1 at t=1, 1 -> 0 at t=3: only the first transition falls in [0, 1.5)
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_state, 0);
        assert_eq!(events[0].to_state, 1);
        assert_eq!(events[0].time, 1.0);
    }

    #[test]
    fn current_state_out_of_range_is_rejected() {
        let rc = two_state_rate_constants();
        let rng = MockRandomDraws::new();
        assert!(StateMachine::new(5, vec![], rc, vec![], rng).is_err());
    }

    #[test]
    fn mismatched_control_params_length_is_rejected() {
        let rc = two_state_rate_constants();
        let rco: RateTensor = vec![vec![
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
        ]];
        let rng = MockRandomDraws::new();
        assert!(StateMachine::new(0, vec![1.0, 2.0], rc, rco, rng).is_err());
    }
}
