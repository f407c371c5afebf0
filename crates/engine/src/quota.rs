//! Sliding-window admission control for the model backend.
//!
//! Four independent windows (requests/minute, requests/day,
//! tokens/minute, tokens/day), each checked against its configured
//! ceiling before any outbound call.  Token counts at admission time are
//! provisional estimates, corrected via [`RateLimiter::finalize`] once
//! the backend reports actual usage.  A call that failed before
//! consuming quota must call [`RateLimiter::cancel`] so its reservation
//! is released entirely.
//!
//! The check-admit-record sequence is one atomic unit under a single
//! mutex; a caller that fails admission sleeps holding no lock, then
//! re-acquires and rechecks.  There is no cap on admission attempts;
//! waiting ends when a window rotates.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use ia_domain::config::QuotaConfig;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);
/// Pad added to window-rotation waits so a recheck lands after expiry.
const ROTATION_PAD: Duration = Duration::from_millis(100);
/// Floor for any wait, and the flat wait for day-window exhaustion.
const MIN_WAIT: Duration = Duration::from_secs(1);
const DAY_WAIT: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct QuotaEntry {
    admitted_at: Instant,
    tokens: u64,
    tag: String,
}

/// Per-tag accounting, reported by [`RateLimiter::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagUsage {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TagUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Current occupancy of the four windows.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowUsage {
    pub requests_per_minute: u64,
    pub requests_per_day: u64,
    pub tokens_per_minute: u64,
    pub tokens_per_day: u64,
}

/// Snapshot of usage, limits, remaining headroom and per-tag breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct RateStats {
    pub usage: WindowUsage,
    pub limits: QuotaConfig,
    pub remaining: WindowUsage,
    pub breakdown: HashMap<String, TagUsage>,
}

struct GateState {
    next_id: u64,
    minute: VecDeque<u64>,
    day: VecDeque<u64>,
    entries: HashMap<u64, QuotaEntry>,
    by_tag: HashMap<String, TagUsage>,
}

impl GateState {
    fn new() -> Self {
        Self {
            next_id: 0,
            minute: VecDeque::new(),
            day: VecDeque::new(),
            entries: HashMap::new(),
            by_tag: HashMap::new(),
        }
    }

    /// Drop expired ids from the window fronts.  Day-window expiry is
    /// what finally garbage-collects an entry; cancelled ids are skipped
    /// here and filtered out of the sums below.
    fn prune(&mut self, now: Instant) {
        while let Some(&id) = self.minute.front() {
            match self.entries.get(&id) {
                Some(entry) if now.duration_since(entry.admitted_at) < MINUTE => break,
                _ => {
                    self.minute.pop_front();
                }
            }
        }
        while let Some(&id) = self.day.front() {
            match self.entries.get(&id) {
                Some(entry) if now.duration_since(entry.admitted_at) < DAY => break,
                Some(_) => {
                    self.day.pop_front();
                    self.entries.remove(&id);
                }
                None => {
                    self.day.pop_front();
                }
            }
        }
    }

    fn usage(&self) -> WindowUsage {
        let live = |ids: &VecDeque<u64>| {
            ids.iter().filter_map(|id| self.entries.get(id)).fold((0u64, 0u64), |(n, t), e| {
                (n + 1, t + e.tokens)
            })
        };
        let (rpm, tpm) = live(&self.minute);
        let (rpd, tpd) = live(&self.day);
        WindowUsage {
            requests_per_minute: rpm,
            requests_per_day: rpd,
            tokens_per_minute: tpm,
            tokens_per_day: tpd,
        }
    }

    /// Earliest instant at which the minute window loses an entry.
    fn oldest_minute_expiry(&self) -> Option<Instant> {
        self.minute
            .iter()
            .find_map(|id| self.entries.get(id))
            .map(|e| e.admitted_at + MINUTE)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RateLimiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admission gate shared by every concurrent question invocation.
///
/// Constructed once and passed by `Arc`; there is no hidden global
/// instance.
pub struct RateLimiter {
    limits: QuotaConfig,
    state: Mutex<GateState>,
}

impl RateLimiter {
    pub fn new(limits: QuotaConfig) -> Self {
        tracing::info!(
            rpm = limits.requests_per_minute,
            rpd = limits.requests_per_day,
            tpm = limits.tokens_per_minute,
            tpd = limits.tokens_per_day,
            "rate limiter initialized"
        );
        Self { limits, state: Mutex::new(GateState::new()) }
    }

    pub fn limits(&self) -> &QuotaConfig {
        &self.limits
    }

    /// Block until all four windows have headroom for a call of
    /// `estimated_tokens`, then record the reservation and return its
    /// entry id.  The caller must later `finalize` or `cancel` it.
    pub async fn admit(&self, estimated_tokens: u64, tag: &str) -> u64 {
        loop {
            let wait = {
                let mut state = self.state.lock();
                match self.try_admit(&mut state, estimated_tokens, tag) {
                    Ok(id) => return id,
                    Err(wait) => wait,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn try_admit(
        &self,
        state: &mut GateState,
        estimated_tokens: u64,
        tag: &str,
    ) -> Result<u64, Duration> {
        let now = Instant::now();
        state.prune(now);
        let usage = state.usage();

        let rpm_ok = usage.requests_per_minute < self.limits.requests_per_minute;
        let rpd_ok = usage.requests_per_day < self.limits.requests_per_day;
        let tpm_ok = usage.tokens_per_minute + estimated_tokens <= self.limits.tokens_per_minute;
        let tpd_ok = usage.tokens_per_day + estimated_tokens <= self.limits.tokens_per_day;

        if rpm_ok && rpd_ok && tpm_ok && tpd_ok {
            let id = state.next_id;
            state.next_id += 1;
            state.entries.insert(
                id,
                QuotaEntry { admitted_at: now, tokens: estimated_tokens, tag: tag.to_string() },
            );
            state.minute.push_back(id);
            state.day.push_back(id);
            state.by_tag.entry(tag.to_string()).or_default().requests += 1;

            tracing::debug!(
                tag,
                entry = id,
                rpm = usage.requests_per_minute + 1,
                tpm = usage.tokens_per_minute + estimated_tokens,
                "admission granted"
            );
            return Ok(id);
        }

        let mut reasons = Vec::new();
        let mut wait = MIN_WAIT;

        if !rpm_ok || !tpm_ok {
            if !rpm_ok {
                reasons.push(format!(
                    "rpm {}/{}",
                    usage.requests_per_minute, self.limits.requests_per_minute
                ));
            }
            if !tpm_ok {
                reasons.push(format!(
                    "tpm {}/{}",
                    usage.tokens_per_minute + estimated_tokens,
                    self.limits.tokens_per_minute
                ));
            }
            if let Some(expiry) = state.oldest_minute_expiry() {
                wait = wait.max(expiry + ROTATION_PAD - now);
            }
        }
        if !rpd_ok {
            reasons.push(format!(
                "rpd {}/{}",
                usage.requests_per_day, self.limits.requests_per_day
            ));
            wait = wait.max(DAY_WAIT);
        }
        if !tpd_ok {
            reasons.push(format!(
                "tpd {}/{}",
                usage.tokens_per_day + estimated_tokens,
                self.limits.tokens_per_day
            ));
            wait = wait.max(DAY_WAIT);
        }

        tracing::warn!(
            tag,
            reasons = %reasons.join(", "),
            wait_secs = wait.as_secs_f64(),
            "admission deferred"
        );
        Err(wait)
    }

    /// Correct a reservation with actual usage from the backend.
    pub fn finalize(&self, entry_id: u64, prompt_tokens: u64, completion_tokens: u64) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&entry_id) else {
            tracing::debug!(entry = entry_id, "finalize: entry not found");
            return;
        };
        entry.tokens = prompt_tokens + completion_tokens;
        let tag = entry.tag.clone();
        let stats = state.by_tag.entry(tag).or_default();
        stats.prompt_tokens += prompt_tokens;
        stats.completion_tokens += completion_tokens;
    }

    /// Release a reservation that was never consumed.  The entry is
    /// removed entirely rather than zeroed, since a cancelled call used
    /// no quota at all.
    pub fn cancel(&self, entry_id: u64) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.remove(&entry_id) else {
            return;
        };
        if let Some(stats) = state.by_tag.get_mut(&entry.tag) {
            stats.requests = stats.requests.saturating_sub(1);
        }
        // The window deques drop the stale id lazily during pruning.
    }

    /// Reassign a reservation to a different workload tag.
    pub fn retag(&self, entry_id: u64, new_tag: &str) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&entry_id) else {
            return;
        };
        if entry.tag == new_tag {
            return;
        }
        let old_tag = std::mem::replace(&mut entry.tag, new_tag.to_string());
        if let Some(stats) = state.by_tag.get_mut(&old_tag) {
            stats.requests = stats.requests.saturating_sub(1);
        }
        state.by_tag.entry(new_tag.to_string()).or_default().requests += 1;
    }

    /// Current usage, limits, remaining headroom and per-tag breakdown.
    pub fn stats(&self) -> RateStats {
        let mut state = self.state.lock();
        state.prune(Instant::now());
        let usage = state.usage();
        RateStats {
            usage,
            limits: self.limits,
            remaining: WindowUsage {
                requests_per_minute: self.limits.requests_per_minute.saturating_sub(usage.requests_per_minute),
                requests_per_day: self.limits.requests_per_day.saturating_sub(usage.requests_per_day),
                tokens_per_minute: self.limits.tokens_per_minute.saturating_sub(usage.tokens_per_minute),
                tokens_per_day: self.limits.tokens_per_day.saturating_sub(usage.tokens_per_day),
            },
            breakdown: state.by_tag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limits(rpm: u64, rpd: u64, tpm: u64, tpd: u64) -> QuotaConfig {
        QuotaConfig {
            requests_per_minute: rpm,
            requests_per_day: rpd,
            tokens_per_minute: tpm,
            tokens_per_day: tpd,
        }
    }

    #[tokio::test]
    async fn admits_within_limits_without_waiting() {
        let gate = RateLimiter::new(limits(5, 100, 10_000, 100_000));
        for _ in 0..5 {
            gate.admit(100, "plan").await;
        }
        let stats = gate.stats();
        assert_eq!(stats.usage.requests_per_minute, 5);
        assert_eq!(stats.usage.tokens_per_minute, 500);
        assert_eq!(stats.breakdown["plan"].requests, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn request_window_blocks_until_rotation() {
        let gate = Arc::new(RateLimiter::new(limits(1, 100, 10_000, 100_000)));
        gate.admit(10, "a").await;

        let started = Instant::now();
        let mut blocked = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit(10, "b").await })
        };

        // Still pending inside the minute window.
        tokio::time::timeout(Duration::from_millis(10), &mut blocked)
            .await
            .expect_err("second admission must not pass inside the window");

        blocked.await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(60));
        // Ceiling never exceeded: the first entry rotated out first.
        assert_eq!(gate.stats().usage.requests_per_minute, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_window_admits_exactly_one_of_two() {
        let gate = Arc::new(RateLimiter::new(limits(10, 100, 1_000, 100_000)));

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit(600, "a").await })
        };
        let second = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit(600, "b").await })
        };

        let started = Instant::now();
        first.await.unwrap();
        second.await.unwrap();
        // Only one fits per window, so the loser waited for rotation.
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(gate.stats().usage.tokens_per_minute <= 1_000);
    }

    #[tokio::test]
    async fn cancel_releases_headroom_immediately() {
        let gate = RateLimiter::new(limits(10, 100, 1_000, 100_000));
        let id = gate.admit(900, "a").await;
        gate.cancel(id);

        let stats = gate.stats();
        assert_eq!(stats.usage.tokens_per_minute, 0);
        assert_eq!(stats.usage.requests_per_minute, 0);
        assert_eq!(stats.breakdown["a"].requests, 0);

        // Fits again right away.
        gate.admit(900, "a").await;
    }

    #[tokio::test]
    async fn finalize_corrects_token_accounting() {
        let gate = RateLimiter::new(limits(10, 100, 10_000, 100_000));
        let id = gate.admit(2_000, "summary").await;
        gate.finalize(id, 120, 30);

        let stats = gate.stats();
        assert_eq!(stats.usage.tokens_per_minute, 150);
        assert_eq!(stats.breakdown["summary"].prompt_tokens, 120);
        assert_eq!(stats.breakdown["summary"].completion_tokens, 30);
        assert_eq!(stats.breakdown["summary"].total_tokens(), 150);
    }

    #[tokio::test]
    async fn retag_moves_request_counts_only() {
        let gate = RateLimiter::new(limits(10, 100, 10_000, 100_000));
        let id = gate.admit(500, "plan").await;
        gate.retag(id, "summary");

        let stats = gate.stats();
        assert_eq!(stats.breakdown["plan"].requests, 0);
        assert_eq!(stats.breakdown["summary"].requests, 1);
        assert_eq!(stats.usage.tokens_per_minute, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_admissions_never_exceed_ceilings() {
        let gate = Arc::new(RateLimiter::new(limits(5, 100, 100_000, 1_000_000)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.admit(10, &format!("t{i}")).await })
            })
            .collect();

        let started = Instant::now();
        for handle in handles {
            handle.await.unwrap();
        }
        // Eight admissions at five per minute require a rotation.
        assert!(started.elapsed() >= Duration::from_secs(60));
        let stats = gate.stats();
        assert!(stats.usage.requests_per_minute <= 5);
        assert_eq!(stats.usage.requests_per_day, 8);
    }
}
