//! ABR Controller: moves the `baseColor` target one step at a time based on how
//! long fetches take relative to the playback time they buy.

use std::collections::VecDeque;

use tracing::debug;

use crate::configs::AbrConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbrDecision {
    Upgrade,
    Hold,
    Downgrade,
}

#[derive(Debug, Clone)]
pub struct AbrController {
    config: AbrConfig,
    samples: VecDeque<f64>,
}

impl AbrController {
    pub fn new(config: AbrConfig) -> Self {
        let capacity = config.window.max(1);
        Self {
            config,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Record `fetch_secs / play_secs` for one pass that advanced geometry.
    ///
    /// Returns a decision once the window is full; the window is then cleared.
    pub fn record(&mut self, fetch_secs: f64, play_secs: f64) -> Option<AbrDecision> {
        if !self.config.enabled || !(play_secs > 0.0) {
            return None;
        }

        let ratio = fetch_secs / play_secs;
        if self.samples.len() == self.config.window {
            self.samples.pop_front();
        }
        self.samples.push_back(ratio);
        if self.samples.len() < self.config.window {
            return None;
        }

        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.samples.clear();

        let decision = self.classify(mean);
        debug!("ABR window mean {:.3} -> {:?}", mean, decision);
        Some(decision)
    }

    fn classify(&self, mean: f64) -> AbrDecision {
        if mean <= self.config.upgrade_threshold {
            AbrDecision::Upgrade
        } else if mean <= self.config.downgrade_threshold {
            AbrDecision::Hold
        } else {
            AbrDecision::Downgrade
        }
    }
}

/// Index into a throughput-sorted candidate list after `decision`. Never leaves the list.
pub fn step(decision: AbrDecision, active: usize, candidates: usize) -> usize {
    match decision {
        AbrDecision::Upgrade if active + 1 < candidates => active + 1,
        AbrDecision::Downgrade => active.saturating_sub(1),
        _ => active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AbrController {
        AbrController::new(AbrConfig::default())
    }

    fn feed(abr: &mut AbrController, ratios: &[f64]) -> Option<AbrDecision> {
        let mut last = None;
        for r in ratios {
            last = abr.record(*r, 1.0);
        }
        last
    }

    #[test]
    fn waits_for_a_full_window() {
        let mut abr = controller();
        assert_eq!(abr.record(0.1, 1.0), None);
        assert_eq!(abr.record(0.1, 1.0), None);
        assert_eq!(abr.samples().count(), 2);
    }

    #[test]
    fn fast_fetches_upgrade_exactly_one_step() {
        let mut abr = controller();
        let decision = feed(&mut abr, &[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(decision, AbrDecision::Upgrade);
        assert_eq!(step(decision, 0, 3), 1);
        assert_eq!(abr.samples().count(), 0);
    }

    #[test]
    fn slow_fetches_downgrade() {
        let mut abr = controller();
        let decision = feed(&mut abr, &[0.7, 0.8, 0.65]).unwrap();
        assert_eq!(decision, AbrDecision::Downgrade);
        assert_eq!(step(decision, 1, 3), 0);
    }

    #[test]
    fn straddling_the_band_holds() {
        let mut abr = controller();
        // Mean 0.45: inside the hysteresis band.
        let decision = feed(&mut abr, &[0.2, 0.7, 0.45]).unwrap();
        assert_eq!(decision, AbrDecision::Hold);
        assert_eq!(step(decision, 1, 3), 1);
    }

    #[test]
    fn band_edges() {
        let abr = controller();
        assert_eq!(abr.classify(0.3), AbrDecision::Upgrade);
        assert_eq!(abr.classify(0.6), AbrDecision::Hold);
        assert_eq!(abr.classify(0.600_001), AbrDecision::Downgrade);
    }

    #[test]
    fn steps_stay_in_bounds() {
        assert_eq!(step(AbrDecision::Upgrade, 2, 3), 2);
        assert_eq!(step(AbrDecision::Downgrade, 0, 3), 0);
    }

    #[test]
    fn disabled_controller_never_decides() {
        let mut abr = AbrController::new(AbrConfig {
            enabled: false,
            ..AbrConfig::default()
        });
        assert_eq!(feed(&mut abr, &[0.1, 0.1, 0.1, 0.1]), None);
    }

    #[test]
    fn ignores_passes_without_playback_covered() {
        let mut abr = controller();
        assert_eq!(abr.record(0.5, 0.0), None);
        assert_eq!(abr.samples().count(), 0);
    }
}
