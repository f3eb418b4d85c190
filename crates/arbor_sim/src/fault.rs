//! Fault injection for exercising retries and renewal.

use arbor_core::{RemoteError, TransportError, Verb, codes};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fault applied to a single call
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Request is lost before the cluster sees it
    FailBefore(TransportError),
    /// Cluster applies the request, the response is lost
    FailAfter(TransportError),
    /// Cluster rejects the request without applying it
    Remote(RemoteError),
    /// Response is delayed
    Latency(Duration),
}

impl Fault {
    /// Connection reset before the request reaches the cluster
    #[must_use]
    pub fn reset_before() -> Self {
        Self::FailBefore(TransportError::ConnectionReset)
    }

    /// Connection reset after the cluster applied the request
    #[must_use]
    pub fn reset_after() -> Self {
        Self::FailAfter(TransportError::ConnectionReset)
    }

    /// Temporarily unavailable
    #[must_use]
    pub fn unavailable() -> Self {
        Self::Remote(RemoteError::new(codes::UNAVAILABLE, "cluster is unavailable"))
    }
}

/// Seeded random failure model
#[derive(Debug, Clone, PartialEq)]
pub struct FailureModel {
    /// Seed for deterministic randomness
    pub seed: u64,
    /// Probability of a fault per call
    pub probability: f64,
    /// Maximum number of random faults
    pub max_failures: usize,
    /// Faults to draw from
    pub kinds: Vec<Fault>,
    /// Verbs eligible for random faults; all verbs when empty
    pub verbs: Vec<Verb>,
}

impl FailureModel {
    /// Create a new failure model
    #[must_use]
    pub fn new(seed: u64, probability: f64) -> Self {
        Self {
            seed,
            probability,
            max_failures: usize::MAX,
            kinds: vec![Fault::reset_before(), Fault::reset_after(), Fault::unavailable()],
            verbs: Vec::new(),
        }
    }

    /// Set max failures
    #[must_use]
    pub fn with_max_failures(mut self, max: usize) -> Self {
        self.max_failures = max;
        self
    }

    /// Set fault kinds
    #[must_use]
    pub fn with_kinds(mut self, kinds: Vec<Fault>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Restrict random faults to `verbs`
    #[must_use]
    pub fn with_verbs(mut self, verbs: Vec<Verb>) -> Self {
        self.verbs = verbs;
        self
    }

    fn applies_to(&self, verb: Verb) -> bool {
        self.verbs.is_empty() || self.verbs.contains(&verb)
    }

    /// Check if a fault should occur
    #[must_use]
    pub fn should_fail(&self, rng: &mut ChaCha8Rng) -> bool {
        rng.r#gen::<f64>() < self.probability
    }

    /// Pick a random fault kind
    #[must_use]
    pub fn random_kind(&self, rng: &mut ChaCha8Rng) -> Option<Fault> {
        if self.kinds.is_empty() {
            return None;
        }
        Some(self.kinds[rng.gen_range(0..self.kinds.len())].clone())
    }
}

impl Default for FailureModel {
    fn default() -> Self {
        Self::new(42, 0.0)
    }
}

/// Scripted and random faults, consulted once per call
#[derive(Debug)]
pub(crate) struct FaultInjector {
    scripted: Mutex<HashMap<Verb, VecDeque<Fault>>>,
    model: FailureModel,
    rng: Mutex<ChaCha8Rng>,
    random_injected: AtomicUsize,
}

impl FaultInjector {
    pub(crate) fn new(model: FailureModel) -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(model.seed)),
            model,
            random_injected: AtomicUsize::new(0),
        }
    }

    /// Queue `fault` for the next `times` calls of `verb`
    pub(crate) fn script(&self, verb: Verb, fault: Fault, times: usize) {
        let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
        let queue = scripted.entry(verb).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    pub(crate) fn clear(&self) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Random faults injected so far
    pub(crate) fn random_injected(&self) -> usize {
        self.random_injected.load(Ordering::Relaxed)
    }

    /// Fault for the next call of `verb`, if any
    pub(crate) fn next(&self, verb: Verb) -> Option<Fault> {
        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&verb)
            .and_then(VecDeque::pop_front);
        if scripted.is_some() {
            return scripted;
        }

        if !self.model.applies_to(verb)
            || self.random_injected.load(Ordering::Relaxed) >= self.model.max_failures
        {
            return None;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if !self.model.should_fail(&mut rng) {
            return None;
        }
        let fault = self.model.random_kind(&mut rng)?;
        self.random_injected.fetch_add(1, Ordering::Relaxed);
        Some(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_faults_are_fifo_per_verb() {
        let injector = FaultInjector::new(FailureModel::default());
        injector.script(Verb::Create, Fault::reset_before(), 2);
        injector.script(Verb::Create, Fault::unavailable(), 1);

        assert_eq!(injector.next(Verb::Remove), None);
        assert_eq!(injector.next(Verb::Create), Some(Fault::reset_before()));
        assert_eq!(injector.next(Verb::Create), Some(Fault::reset_before()));
        assert_eq!(injector.next(Verb::Create), Some(Fault::unavailable()));
        assert_eq!(injector.next(Verb::Create), None);
    }

    #[test]
    fn test_same_seed_same_faults() {
        let model = FailureModel::new(7, 0.5);
        let a = FaultInjector::new(model.clone());
        let b = FaultInjector::new(model);
        let run = |injector: &FaultInjector| {
            (0..64)
                .map(|_| injector.next(Verb::InsertRows))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(&a), run(&b));
    }

    #[test]
    fn test_max_failures_and_verb_filter() {
        let model = FailureModel::new(1, 1.0)
            .with_max_failures(3)
            .with_verbs(vec![Verb::Set]);
        let injector = FaultInjector::new(model);

        assert_eq!(injector.next(Verb::Get), None);
        let faults = (0..10).filter_map(|_| injector.next(Verb::Set)).count();
        assert_eq!(faults, 3);
        assert_eq!(injector.random_injected(), 3);
    }
}
