//! Epsilon-greedy host selection over a fixed host list.
//!
//! Most picks go to the host with the best recent response times, weighted
//! randomly by `1 / weighted_average_ms`. With probability `epsilon` a pick
//! explores round-robin instead, so a host that recovered from errors is
//! found again. Response times live in a ring of buckets covering the decay
//! window; older buckets weigh linearly less than newer ones.
//!
//! A failed report marks the host dead. Dead hosts are skipped until their
//! retry time, which backs off exponentially up to a cap; when every host is
//! dead they are all revived.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const EPSILON_BUCKETS: usize = 120;
const EPSILON_DECAY: f64 = 0.90;
const MIN_EPSILON: f64 = 0.01;
const INITIAL_EPSILON: f64 = 0.3;

/// Tunables for [`HostSelector`].
#[derive(Debug, Clone)]
pub struct SelectorSettings {
    /// Window over which response times are remembered
    pub decay_window: Duration,

    /// Delay before a freshly failed host may be tried again
    pub initial_retry_delay: Duration,

    /// Upper bound for the doubling retry delay
    pub max_retry_interval: Duration,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            decay_window: Duration::from_secs(5 * 60),
            initial_retry_delay: Duration::from_secs(30),
            max_retry_interval: Duration::from_secs(900),
        }
    }
}

/// Pick metadata that must be handed back through [`HostSelector::report`].
#[derive(Debug, Clone)]
pub struct HostResponse {
    host: String,
    index: usize,
    started: Instant,
}

impl HostResponse {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Time since the pick was made
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug)]
struct HostEntry {
    dead: bool,
    next_retry: Instant,
    retry_count: u32,
    retry_delay: Duration,
    counts: [u64; EPSILON_BUCKETS],
    values_ms: [f64; EPSILON_BUCKETS],
    bucket: usize,
}

impl HostEntry {
    fn new(now: Instant, initial_retry_delay: Duration) -> Self {
        Self {
            dead: false,
            next_retry: now,
            retry_count: 0,
            retry_delay: initial_retry_delay,
            counts: [0; EPSILON_BUCKETS],
            values_ms: [0.0; EPSILON_BUCKETS],
            bucket: 0,
        }
    }

    fn can_try(&self, now: Instant) -> bool {
        !self.dead || self.next_retry < now
    }

    fn will_retry(&mut self, now: Instant, max_retry_interval: Duration) {
        self.retry_count += 1;
        self.retry_delay = (self.retry_delay * 2).min(max_retry_interval);
        self.next_retry = now + self.retry_delay;
    }

    /// Linearly weighted average response time, oldest bucket first.
    ///
    /// Empty buckets carry the last seen average forward.
    fn weighted_average_ms(&self) -> f64 {
        let mut value = 0.0;
        let mut last = 0.0;
        for i in 1..=EPSILON_BUCKETS {
            let pos = (self.bucket + i) % EPSILON_BUCKETS;
            let weight = i as f64 / EPSILON_BUCKETS as f64;
            if self.counts[pos] > 0 {
                let current = self.values_ms[pos] / self.counts[pos] as f64;
                value += current * weight;
                last = current;
            } else {
                value += last * weight;
            }
        }
        value
    }

    fn advance_bucket(&mut self) {
        self.bucket = (self.bucket + 1) % EPSILON_BUCKETS;
        self.counts[self.bucket] = 0;
        self.values_ms[self.bucket] = 0.0;
    }
}

#[derive(Debug)]
struct SelectorState {
    entries: Vec<HostEntry>,
    epsilon: f64,
    next_index: usize,
    last_decay: Instant,
}

/// Adaptive host picker for one connection pool.
#[derive(Debug)]
pub struct HostSelector {
    hosts: Vec<String>,
    settings: SelectorSettings,
    bucket_duration: Duration,
    state: Mutex<SelectorState>,
}

impl HostSelector {
    /// Create a selector over `hosts`. The list is fixed for its lifetime.
    pub fn new(hosts: Vec<String>, settings: SelectorSettings) -> Self {
        let now = Instant::now();
        let entries = hosts
            .iter()
            .map(|_| HostEntry::new(now, settings.initial_retry_delay))
            .collect();
        let bucket_duration = (settings.decay_window / EPSILON_BUCKETS as u32).max(Duration::from_millis(1));

        Self {
            hosts,
            settings,
            bucket_duration,
            state: Mutex::new(SelectorState {
                entries,
                epsilon: INITIAL_EPSILON,
                next_index: 0,
                last_decay: now,
            }),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Choose a host for the next operation.
    ///
    /// # Panics
    ///
    /// If the selector was built without hosts. Pools reject such
    /// configurations before building one.
    pub fn pick(&self) -> HostResponse {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.decay(&mut state, now);

        let index = if rand::random::<f64>() < state.epsilon {
            state.epsilon = (state.epsilon * EPSILON_DECAY).max(MIN_EPSILON);
            self.round_robin(&mut state, now)
        } else {
            self.greedy(&mut state, now)
        };

        trace!(host = %self.hosts[index], "Picked host");
        HostResponse {
            host: self.hosts[index].clone(),
            index,
            started: Instant::now(),
        }
    }

    /// Feed the outcome of an operation back into the host's score.
    pub fn report(&self, response: &HostResponse, error: Option<&dyn fmt::Display>) {
        let elapsed = response.elapsed();
        match error {
            None => self.mark_success(response.index, elapsed),
            Some(err) => {
                debug!(host = %response.host, error = %err, "Marking host failed");
                self.mark_failed(response.index);
            }
        }
    }

    fn mark_success(&self, index: usize, elapsed: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = &mut state.entries[index];
        entry.dead = false;
        let bucket = entry.bucket;
        entry.counts[bucket] += 1;
        entry.values_ms[bucket] += elapsed.as_secs_f64() * 1000.0;
    }

    fn mark_failed(&self, index: usize) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = &mut state.entries[index];
        if !entry.dead {
            entry.dead = true;
            entry.retry_count = 0;
            entry.retry_delay = self.settings.initial_retry_delay;
            entry.next_retry = now + entry.retry_delay;
        }
    }

    /// Rotate every host's bucket ring once per elapsed bucket interval.
    fn decay(&self, state: &mut SelectorState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_decay);
        let steps = (elapsed.as_nanos() / self.bucket_duration.as_nanos()) as usize;
        if steps == 0 {
            return;
        }

        for _ in 0..steps.min(EPSILON_BUCKETS) {
            for entry in state.entries.iter_mut() {
                entry.advance_bucket();
            }
        }

        if steps >= EPSILON_BUCKETS {
            state.last_decay = now;
        } else {
            state.last_decay += self.bucket_duration * steps as u32;
        }
    }

    fn greedy(&self, state: &mut SelectorState, now: Instant) -> usize {
        let candidates: Vec<(usize, f64)> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.can_try(now))
            .filter_map(|(index, entry)| {
                let average = entry.weighted_average_ms();
                (average > 0.0).then(|| (index, 1.0 / average))
            })
            .collect();

        let total: f64 = candidates.iter().map(|(_, value)| value).sum();
        if candidates.is_empty() || total <= 0.0 {
            return self.round_robin(state, now);
        }

        let pick = rand::random::<f64>();
        let mut ceiling = 0.0;
        let chosen = candidates
            .iter()
            .find(|(_, value)| {
                ceiling += value / total;
                pick <= ceiling
            })
            .or(candidates.last())
            .map(|(index, _)| *index);

        match chosen {
            Some(index) => {
                let entry = &mut state.entries[index];
                if entry.dead {
                    entry.will_retry(now, self.settings.max_retry_interval);
                }
                index
            }
            None => self.round_robin(state, now),
        }
    }

    fn round_robin(&self, state: &mut SelectorState, now: Instant) -> usize {
        let len = state.entries.len();
        for offset in 0..len {
            let index = (state.next_index + offset) % len;
            let entry = &mut state.entries[index];
            if !entry.dead {
                state.next_index = index + 1;
                return index;
            }
            if entry.next_retry < now {
                entry.will_retry(now, self.settings.max_retry_interval);
                state.next_index = index + 1;
                return index;
            }
        }

        warn!(hosts = len, "All hosts marked dead; resetting");
        for entry in state.entries.iter_mut() {
            entry.dead = false;
            entry.retry_delay = self.settings.initial_retry_delay;
        }
        let index = state.next_index % len;
        state.next_index = index + 1;
        index
    }
}
