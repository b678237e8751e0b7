//! Adaptive FEC parameter control.
//!
//! Consumes periodic receiver state reports and recommends new `(k, r)`
//! window parameters: redundancy is raised when network loss or RTT
//! crosses its threshold, and lowered again only after a run of clean
//! reports. Recommendations are rate-limited so the encoder parameters
//! do not flap. Recommended values always satisfy `k >= 1`,
//! `1 <= r <= r_max`.

use super::FecParam;
use crate::config::TransportConfig;
use media_wire::message::StateFeedback;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// FEC parameter controller for one stream.
pub struct FecParamController {
    param: FecParam,
    r_max: u8,
    loss_raise_threshold_bp: u16,
    rtt_threshold_ms: u32,
    clean_reports_to_lower: u32,
    min_update_interval: Duration,
    /// Consecutive clean reports observed.
    clean_streak: u32,
    /// When the last recommendation was issued.
    last_update: Option<Instant>,
}

impl FecParamController {
    /// Create a controller seeded with the configured initial
    /// parameters and policy thresholds.
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            param: FecParam {
                k: config.fec_k.max(1),
                r: config.fec_r.clamp(1, config.fec_r_max.max(1)),
            },
            r_max: config.fec_r_max.max(1),
            loss_raise_threshold_bp: config.loss_raise_threshold_bp,
            rtt_threshold_ms: config.rtt_threshold_ms,
            clean_reports_to_lower: config.clean_reports_to_lower.max(1),
            min_update_interval: config.min_update_interval,
            clean_streak: 0,
            last_update: None,
        }
    }

    /// Parameters currently recommended.
    #[must_use]
    pub fn param(&self) -> FecParam {
        self.param
    }

    /// Consume one state report. Returns `Some(param)` when the policy
    /// decides a change is warranted and the rate limit allows it.
    pub fn on_state_feedback(&mut self, feedback: &StateFeedback) -> Option<FecParam> {
        let degraded = feedback.loss_network_bp > self.loss_raise_threshold_bp
            || feedback.rtt_ms > self.rtt_threshold_ms;

        let desired_r = if degraded {
            self.clean_streak = 0;
            self.param.r.saturating_add(1).min(self.r_max)
        } else {
            self.clean_streak += 1;
            if self.clean_streak >= self.clean_reports_to_lower && self.param.r > 1 {
                self.param.r - 1
            } else {
                self.param.r
            }
        };

        if desired_r == self.param.r {
            return None;
        }

        if let Some(last) = self.last_update {
            if last.elapsed() < self.min_update_interval {
                debug!(
                    target: "mt.fec.control",
                    desired_r,
                    current_r = self.param.r,
                    "Parameter change suppressed by rate limit"
                );
                return None;
            }
        }

        self.param.r = desired_r;
        self.clean_streak = 0;
        self.last_update = Some(Instant::now());

        info!(
            target: "mt.fec.control",
            k = self.param.k,
            r = self.param.r,
            loss_network_bp = feedback.loss_network_bp,
            rtt_ms = feedback.rtt_ms,
            "Recommending new FEC parameters"
        );
        Some(self.param)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> TransportConfig {
        TransportConfig::default()
    }

    fn lossy_report(loss_bp: u16, rtt_ms: u32) -> StateFeedback {
        StateFeedback {
            loss_network_bp: loss_bp,
            rtt_ms,
            ..StateFeedback::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_raises_r_on_network_loss() {
        let mut controller = FecParamController::new(&config());
        let update = controller.on_state_feedback(&lossy_report(500, 40));
        assert_eq!(update, Some(FecParam { k: 8, r: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raises_r_on_high_rtt() {
        let mut controller = FecParamController::new(&config());
        let update = controller.on_state_feedback(&lossy_report(0, 400));
        assert_eq!(update, Some(FecParam { k: 8, r: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_r_never_exceeds_ceiling_and_never_zero() {
        let mut controller = FecParamController::new(&config());
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(5)).await;
            if let Some(param) = controller.on_state_feedback(&lossy_report(800, 200)) {
                assert!(param.r >= 1);
                assert!(param.k >= 1);
            }
        }
        assert_eq!(controller.param().r, config().fec_r_max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_prevents_flapping() {
        let mut controller = FecParamController::new(&config());

        let first = controller.on_state_feedback(&lossy_report(500, 40));
        assert!(first.is_some());

        // A second degraded report inside the minimum interval is
        // suppressed even though the policy wants another raise.
        let second = controller.on_state_feedback(&lossy_report(900, 40));
        assert!(second.is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        let third = controller.on_state_feedback(&lossy_report(900, 40));
        assert_eq!(third, Some(FecParam { k: 8, r: 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowers_r_after_sustained_clean_delivery() {
        let mut controller = FecParamController::new(&config());

        // Default r = 2; three clean reports trigger a lower to 1.
        assert!(controller.on_state_feedback(&lossy_report(0, 40)).is_none());
        assert!(controller.on_state_feedback(&lossy_report(0, 40)).is_none());
        let update = controller.on_state_feedback(&lossy_report(0, 40));
        assert_eq!(update, Some(FecParam { k: 8, r: 1 }));

        // r floors at 1 no matter how clean the stream stays.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(5)).await;
            assert!(controller.on_state_feedback(&lossy_report(0, 40)).is_none());
        }
        assert_eq!(controller.param().r, 1);
    }
}
