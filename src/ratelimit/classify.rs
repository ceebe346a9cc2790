//! Classification policy on upstream response.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// The caller's read on one upstream attempt, already normalized away from
/// provider-specific response shapes.
#[derive(Debug, Clone)]
pub enum UpstreamOutcome {
    Success,
    AuthInvalid,
    Transient { status: u16 },
    RateLimited { reset_hint: Option<DateTime<Utc>> },
    Overloaded,
    ClientError { status: u16 },
    InvalidRequestModelRouting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationAction {
    Success,
    Quarantine { until: DateTime<Utc>, reason: &'static str },
    Failover,
    FailoverWithShortBackoff { until: DateTime<Utc>, reason: &'static str },
    RateLimited { reset_at: DateTime<Utc> },
    Overloaded { until: DateTime<Utc> },
    Terminal { status: u16 },
    FallbackGroup,
}

pub struct ClassifyConfig {
    pub long_backoff: ChronoDuration,
    pub short_backoff: ChronoDuration,
    pub overload_ttl: ChronoDuration,
}

/// Classifies one upstream outcome, including the clamp on 429's reset hint
/// to `[now+1s, now+1h]`.
pub fn classify(outcome: &UpstreamOutcome, now: DateTime<Utc>, cfg: &ClassifyConfig) -> ClassificationAction {
    match outcome {
        UpstreamOutcome::Success => ClassificationAction::Success,
        UpstreamOutcome::AuthInvalid => {
            ClassificationAction::Quarantine { until: now + cfg.long_backoff, reason: "auth_invalid" }
        }
        UpstreamOutcome::Transient { .. } => ClassificationAction::Failover,
        UpstreamOutcome::RateLimited { reset_hint } => {
            let reset_at = reset_hint
                .unwrap_or(now + ChronoDuration::seconds(30))
                .clamp(now + ChronoDuration::seconds(1), now + ChronoDuration::hours(1));
            ClassificationAction::RateLimited { reset_at }
        }
        UpstreamOutcome::Overloaded => ClassificationAction::Overloaded { until: now + cfg.overload_ttl },
        UpstreamOutcome::ClientError { status } => ClassificationAction::Terminal { status: *status },
        UpstreamOutcome::InvalidRequestModelRouting => ClassificationAction::FallbackGroup,
    }
}

/// Called once `repeated_failure_threshold` transient failures have
/// accumulated on the same account within the window, escalating a run of
/// ordinary failovers into a short quarantine.
pub fn repeated_transient_action(now: DateTime<Utc>, cfg: &ClassifyConfig) -> ClassificationAction {
    ClassificationAction::FailoverWithShortBackoff {
        until: now + cfg.short_backoff,
        reason: "repeated_transient_failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ClassifyConfig {
        ClassifyConfig {
            long_backoff: ChronoDuration::seconds(1800),
            short_backoff: ChronoDuration::seconds(60),
            overload_ttl: ChronoDuration::seconds(60),
        }
    }

    #[test]
    fn rate_limit_reset_is_clamped_to_one_hour_max() {
        let now = Utc::now();
        let far_future = now + ChronoDuration::hours(5);
        let action = classify(&UpstreamOutcome::RateLimited { reset_hint: Some(far_future) }, now, &cfg());
        match action {
            ClassificationAction::RateLimited { reset_at } => {
                assert!(reset_at <= now + ChronoDuration::hours(1));
            }
            _ => panic!("expected RateLimited"),
        }
    }

    #[test]
    fn rate_limit_reset_is_clamped_to_one_second_min() {
        let now = Utc::now();
        let action = classify(&UpstreamOutcome::RateLimited { reset_hint: Some(now) }, now, &cfg());
        match action {
            ClassificationAction::RateLimited { reset_at } => {
                assert!(reset_at >= now + ChronoDuration::seconds(1));
            }
            _ => panic!("expected RateLimited"),
        }
    }

    #[test]
    fn overload_sets_configured_ttl() {
        let now = Utc::now();
        let action = classify(&UpstreamOutcome::Overloaded, now, &cfg());
        assert_eq!(action, ClassificationAction::Overloaded { until: now + ChronoDuration::seconds(60) });
    }

    #[test]
    fn success_clears_to_success_action() {
        let now = Utc::now();
        assert_eq!(classify(&UpstreamOutcome::Success, now, &cfg()), ClassificationAction::Success);
    }

    #[test]
    fn auth_invalid_is_a_long_quarantine() {
        let now = Utc::now();
        let action = classify(&UpstreamOutcome::AuthInvalid, now, &cfg());
        match action {
            ClassificationAction::Quarantine { until, .. } => assert!(until > now + ChronoDuration::minutes(10)),
            _ => panic!("expected Quarantine"),
        }
    }
}
