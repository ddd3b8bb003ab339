//! Usage governor: per-client daily quotas plus an unknown-intent circuit
//! breaker. Admission is checked before any synthesis work; intent is
//! recorded after synthesis so off-topic streaks are judged on what the
//! engine actually concluded.

mod counters;
mod identity;

pub use counters::InMemoryCounters;
pub use identity::ClientIdentity;

use crate::config::LimitsConfig;
use std::time::Duration;

/// Outcome of the pre-synthesis admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Daily message quota used up for this window.
    QuotaExhausted,
    /// The unknown-intent breaker tripped earlier and the block is live.
    Blocked,
}

impl Admission {
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    /// User-facing text returned with the 429.
    pub fn reply_text(self) -> &'static str {
        match self {
            Self::Granted => "",
            Self::QuotaExhausted => {
                "You have reached today's message limit. Please come back later."
            }
            Self::Blocked => {
                "The assistant is paused for a while after too many off-topic \
                 questions. Please try again later with a tour or visa question."
            }
        }
    }
}

pub struct UsageGovernor {
    counters: InMemoryCounters,
    limits: LimitsConfig,
}

impl UsageGovernor {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            counters: InMemoryCounters::new(),
            limits,
        }
    }

    /// Admit or reject a message before any lookup/synthesis happens. The
    /// quota counter is consumed on the spot, so concurrent requests from
    /// the same client cannot slip past the limit.
    pub fn admit(&self, identity: &ClientIdentity) -> Admission {
        let key = identity.counter_key();
        if self.counters.flag_active(&block_key(&key)) {
            return Admission::Blocked;
        }

        let quota = if identity.is_authenticated() {
            self.limits.auth_daily_quota
        } else {
            self.limits.anon_daily_quota
        };
        let used = self
            .counters
            .incr(&quota_key(&key), Duration::from_secs(self.limits.quota_window_secs));
        if used > quota {
            Admission::QuotaExhausted
        } else {
            Admission::Granted
        }
    }

    /// Record the synthesized intent. An on-topic exchange resets both the
    /// unknown streak and any live block; an off-topic one extends the
    /// streak, and hitting the limit trips a timed block.
    pub fn record_intent(&self, identity: &ClientIdentity, on_topic: bool) {
        let key = identity.counter_key();
        if on_topic {
            self.counters.clear(&streak_key(&key));
            self.counters.clear(&block_key(&key));
            return;
        }
        let streak = self.counters.incr(
            &streak_key(&key),
            Duration::from_secs(self.limits.unknown_window_secs),
        );
        if streak >= self.limits.unknown_streak_limit {
            self.counters.set_flag(
                &block_key(&key),
                Duration::from_secs(self.limits.block_secs),
            );
            self.counters.clear(&streak_key(&key));
        }
    }

    #[cfg(test)]
    fn counters(&self) -> &InMemoryCounters {
        &self.counters
    }
}

fn quota_key(key: &str) -> String {
    format!("quota:{key}")
}

fn streak_key(key: &str) -> String {
    format!("streak:{key}")
}

fn block_key(key: &str) -> String {
    format!("block:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            auth_daily_quota: 3,
            anon_daily_quota: 2,
            quota_window_secs: 3600,
            unknown_streak_limit: 3,
            unknown_window_secs: 600,
            block_secs: 120,
        }
    }

    #[test]
    fn quota_admits_up_to_the_limit() {
        let governor = UsageGovernor::new(limits());
        let user = ClientIdentity::user(1, "traveler");
        assert_eq!(governor.admit(&user), Admission::Granted);
        assert_eq!(governor.admit(&user), Admission::Granted);
        assert_eq!(governor.admit(&user), Admission::Granted);
        assert_eq!(governor.admit(&user), Admission::QuotaExhausted);
    }

    #[test]
    fn anonymous_quota_is_tighter() {
        let governor = UsageGovernor::new(limits());
        let anon = ClientIdentity::anonymous("s", "ip", "ua");
        assert_eq!(governor.admit(&anon), Admission::Granted);
        assert_eq!(governor.admit(&anon), Admission::Granted);
        assert_eq!(governor.admit(&anon), Admission::QuotaExhausted);
    }

    #[test]
    fn quotas_are_per_client() {
        let governor = UsageGovernor::new(limits());
        let a = ClientIdentity::user(1, "traveler");
        let b = ClientIdentity::user(2, "traveler");
        governor.admit(&a);
        governor.admit(&a);
        governor.admit(&a);
        assert_eq!(governor.admit(&a), Admission::QuotaExhausted);
        assert_eq!(governor.admit(&b), Admission::Granted);
    }

    #[test]
    fn unknown_streak_trips_the_block() {
        let governor = UsageGovernor::new(limits());
        let user = ClientIdentity::user(7, "traveler");
        governor.record_intent(&user, false);
        governor.record_intent(&user, false);
        assert_eq!(governor.admit(&user), Admission::Granted);
        governor.record_intent(&user, false);
        assert_eq!(governor.admit(&user), Admission::Blocked);
    }

    #[test]
    fn on_topic_resets_the_streak() {
        let governor = UsageGovernor::new(limits());
        let user = ClientIdentity::user(7, "traveler");
        governor.record_intent(&user, false);
        governor.record_intent(&user, false);
        governor.record_intent(&user, true);
        governor.record_intent(&user, false);
        governor.record_intent(&user, false);
        assert_eq!(governor.admit(&user), Admission::Granted);
    }

    #[test]
    fn on_topic_clears_a_live_block() {
        let governor = UsageGovernor::new(limits());
        let user = ClientIdentity::user(7, "traveler");
        for _ in 0..3 {
            governor.record_intent(&user, false);
        }
        assert_eq!(governor.admit(&user), Admission::Blocked);
        governor.record_intent(&user, true);
        assert_eq!(governor.admit(&user), Admission::Granted);
    }

    #[test]
    fn block_expires() {
        let governor = UsageGovernor::new(limits());
        let user = ClientIdentity::user(7, "traveler");
        for _ in 0..3 {
            governor.record_intent(&user, false);
        }
        assert_eq!(governor.admit(&user), Admission::Blocked);
        governor
            .counters()
            .force_expire(&block_key(&user.counter_key()));
        assert_eq!(governor.admit(&user), Admission::Granted);
    }

    #[test]
    fn blocked_request_does_not_consume_quota() {
        let governor = UsageGovernor::new(limits());
        let user = ClientIdentity::user(9, "traveler");
        for _ in 0..3 {
            governor.record_intent(&user, false);
        }
        governor.admit(&user);
        governor.admit(&user);
        governor
            .counters()
            .force_expire(&block_key(&user.counter_key()));
        // all three quota slots still available
        assert_eq!(governor.admit(&user), Admission::Granted);
        assert_eq!(governor.admit(&user), Admission::Granted);
        assert_eq!(governor.admit(&user), Admission::Granted);
        assert_eq!(governor.admit(&user), Admission::QuotaExhausted);
    }
}
