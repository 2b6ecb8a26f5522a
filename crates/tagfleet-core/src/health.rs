//! Component health finite state machine owned by the Health Monitor.
//!
//! Pure, testable state machine with no IO or async dependencies. The
//! monitor's reactor loop (in `tagfleet-supervisor`) is the only caller;
//! everything here operates on explicit monotonic millisecond timestamps
//! supplied by the caller.

use serde::{Deserialize, Serialize};

/// Component status. `Failed` is terminal: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Pending,
    Healthy,
    Unhealthy,
    Recovering,
    Dead,
    Failed,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentStatus::Pending => "pending",
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Unhealthy => "unhealthy",
            ComponentStatus::Recovering => "recovering",
            ComponentStatus::Dead => "dead",
            ComponentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Policy provided by the caller at registration. Immutable for the life of
/// the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentPolicy {
    pub startup_timeout_s: u64,
    pub staleness_interval_s: u64,
    pub max_consecutive_misses: u32,
    pub min_recovery_s: u64,
    pub max_recovery_s: u64,
}

impl Default for ComponentPolicy {
    fn default() -> Self {
        Self {
            startup_timeout_s: 30,
            staleness_interval_s: 5,
            max_consecutive_misses: 3,
            min_recovery_s: 5,
            max_recovery_s: 60,
        }
    }
}

/// Context passed alongside a status-change callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub old: ComponentStatus,
    pub new: ComponentStatus,
    pub consecutive_misses: u32,
    pub recovery_deadline_ms: Option<u64>,
}

/// In-memory state for one registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentState {
    pub status: ComponentStatus,
    pub last_frame_time_ms: u64,
    pub consecutive_misses: u32,
    pub startup_deadline_ms: u64,
    pub recovery_deadline_ms: Option<u64>,
    pub policy: ComponentPolicy,
}

impl ComponentState {
    /// Register a new component: status=pending, startup deadline set from `now_ms`.
    #[must_use]
    pub fn register(now_ms: u64, policy: ComponentPolicy) -> Self {
        Self {
            status: ComponentStatus::Pending,
            last_frame_time_ms: now_ms,
            consecutive_misses: 0,
            startup_deadline_ms: now_ms + policy.startup_timeout_s * 1000,
            recovery_deadline_ms: None,
            policy,
        }
    }

    /// A `status="healthy"` frame. Any state except `Failed` resets misses
    /// and transitions to healthy; a no-op on `Failed`.
    pub fn on_healthy_frame(&mut self, now_ms: u64) -> Option<StatusChange> {
        if self.status == ComponentStatus::Failed {
            return None;
        }
        let old = self.status;
        self.status = ComponentStatus::Healthy;
        self.last_frame_time_ms = now_ms;
        self.consecutive_misses = 0;
        self.recovery_deadline_ms = None;
        (old != self.status).then_some(StatusChange {
            old,
            new: self.status,
            consecutive_misses: 0,
            recovery_deadline_ms: None,
        })
    }

    /// A `status="recovering"` frame with an optional requested window,
    /// clamped to `[min_recovery_s, max_recovery_s]` (absent ⇒ max).
    pub fn on_recovering_frame(&mut self, now_ms: u64, recover_for_s: Option<f64>) -> Option<StatusChange> {
        if self.status == ComponentStatus::Failed {
            return None;
        }
        let min = self.policy.min_recovery_s as f64;
        let max = self.policy.max_recovery_s as f64;
        let clamped = recover_for_s.map_or(max, |v| v.clamp(min, max));

        let old = self.status;
        self.status = ComponentStatus::Recovering;
        self.last_frame_time_ms = now_ms;
        let deadline = now_ms + (clamped * 1000.0) as u64;
        self.recovery_deadline_ms = Some(deadline);

        (old != self.status).then_some(StatusChange {
            old,
            new: self.status,
            consecutive_misses: self.consecutive_misses,
            recovery_deadline_ms: Some(deadline),
        })
    }

    /// EOF on the pipe: transitions to `dead` from any non-failed state.
    pub fn on_eof(&mut self) -> Option<StatusChange> {
        if self.status == ComponentStatus::Failed {
            return None;
        }
        let old = self.status;
        self.status = ComponentStatus::Dead;
        self.recovery_deadline_ms = None;
        Some(StatusChange {
            old,
            new: self.status,
            consecutive_misses: self.consecutive_misses,
            recovery_deadline_ms: None,
        })
    }

    /// Idempotent terminal transition. Called by the domain (supervisor),
    /// never by the frame/deadline paths.
    pub fn set_failed(&mut self) -> Option<StatusChange> {
        if self.status == ComponentStatus::Failed {
            return None;
        }
        let old = self.status;
        self.status = ComponentStatus::Failed;
        self.recovery_deadline_ms = None;
        Some(StatusChange {
            old,
            new: self.status,
            consecutive_misses: self.consecutive_misses,
            recovery_deadline_ms: None,
        })
    }

    /// Check startup/recovery/staleness deadlines against `now_ms`, mutating
    /// state in place. Returns a status change if one occurred.
    pub fn check_deadline(&mut self, now_ms: u64) -> Option<StatusChange> {
        match self.status {
            ComponentStatus::Dead | ComponentStatus::Failed => None,
            ComponentStatus::Pending => {
                if now_ms >= self.startup_deadline_ms {
                    let old = self.status;
                    self.status = ComponentStatus::Dead;
                    Some(StatusChange {
                        old,
                        new: self.status,
                        consecutive_misses: self.consecutive_misses,
                        recovery_deadline_ms: None,
                    })
                } else {
                    None
                }
            }
            ComponentStatus::Recovering => {
                let deadline = self.recovery_deadline_ms?;
                if now_ms >= deadline {
                    let old = self.status;
                    self.status = ComponentStatus::Dead;
                    self.recovery_deadline_ms = None;
                    Some(StatusChange {
                        old,
                        new: self.status,
                        consecutive_misses: self.consecutive_misses,
                        recovery_deadline_ms: None,
                    })
                } else {
                    None
                }
            }
            ComponentStatus::Healthy | ComponentStatus::Unhealthy => {
                let staleness_ms = self.policy.staleness_interval_s * 1000;
                if now_ms.saturating_sub(self.last_frame_time_ms) < staleness_ms {
                    return None;
                }
                self.consecutive_misses += 1;
                self.last_frame_time_ms = now_ms;

                if self.consecutive_misses >= self.policy.max_consecutive_misses {
                    let old = self.status;
                    self.status = ComponentStatus::Dead;
                    Some(StatusChange {
                        old,
                        new: self.status,
                        consecutive_misses: self.consecutive_misses,
                        recovery_deadline_ms: None,
                    })
                } else if self.status == ComponentStatus::Healthy {
                    let old = self.status;
                    self.status = ComponentStatus::Unhealthy;
                    Some(StatusChange {
                        old,
                        new: self.status,
                        consecutive_misses: self.consecutive_misses,
                        recovery_deadline_ms: None,
                    })
                } else {
                    None
                }
            }
        }
    }
}
