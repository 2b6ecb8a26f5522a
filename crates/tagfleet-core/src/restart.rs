//! Restart backoff and failure-budget policy for supervised worker
//! subprocesses.
//!
//! Two independent limits bound how long a flapping worker gets retried: a
//! short window (burst of crashes in a short time) and a lifetime cap (a
//! worker that has simply crashed too many times over its whole life). Below
//! both limits, backoff grows exponentially with no jitter, capped at
//! `max_backoff_s`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts_in_window: u32,
    pub restart_window_ms: u64,
    pub max_lifetime_restarts: u32,
    pub max_backoff_s: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            max_restarts_in_window: 5,
            restart_window_ms: 300_000,
            max_lifetime_restarts: 20,
            max_backoff_s: 60,
        }
    }
}

/// Outcome of consulting the restart policy after a worker has died.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { backoff_s: u64 },
    MarkFailed { reason: String },
}

impl RestartPolicy {
    /// `restart_count` and `last_restart_wall_ms` come from the persisted
    /// restart-policy row for this component; `(0, None)` for a component
    /// that has never restarted.
    #[must_use]
    pub fn should_restart(
        &self,
        restart_count: u32,
        last_restart_wall_ms: Option<u64>,
        now_wall_ms: u64,
    ) -> RestartDecision {
        if restart_count >= self.max_lifetime_restarts {
            return RestartDecision::MarkFailed {
                reason: format!(
                    "exceeded lifetime restart limit ({} restarts)",
                    self.max_lifetime_restarts
                ),
            };
        }

        if let Some(last) = last_restart_wall_ms {
            let since_last = now_wall_ms.saturating_sub(last);
            if restart_count >= self.max_restarts_in_window && since_last < self.restart_window_ms {
                return RestartDecision::MarkFailed {
                    reason: format!(
                        "exceeded {} restarts within {}ms window",
                        self.max_restarts_in_window, self.restart_window_ms
                    ),
                };
            }
        }

        RestartDecision::Restart {
            backoff_s: calculate_backoff(restart_count, self.max_backoff_s),
        }
    }
}

/// `max(1, min(2^restart_count, max_backoff_s))`. No jitter.
#[must_use]
pub fn calculate_backoff(restart_count: u32, max_backoff_s: u64) -> u64 {
    let doubled = 2u64.saturating_pow(restart_count);
    doubled.clamp(1, max_backoff_s)
}
