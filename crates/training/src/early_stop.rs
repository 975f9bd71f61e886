use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum StopDecision {
    Improved,
    NoImprovement { bad_epochs: usize },
    Stop,
}

/// Stops after `patience` consecutive epochs whose score fails to beat the best by
/// more than `min_delta`. `patience == 0` never stops.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best: f32,
    bad_epochs: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best: f32::NEG_INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn best(&self) -> f32 {
        self.best
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }

    pub fn update(&mut self, score: f32) -> StopDecision {
        if score > self.best + self.min_delta {
            self.best = score;
            self.bad_epochs = 0;
            return StopDecision::Improved;
        }
        self.bad_epochs += 1;
        if self.patience > 0 && self.bad_epochs >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::NoImprovement {
                bad_epochs: self.bad_epochs,
            }
        }
    }
}

#[cfg(test)]
mod early_stop_tests {
    use super::*;

    #[test]
    fn stops_after_patience_bad_epochs() {
        let mut es = EarlyStopping::new(2, 0.0);
        assert_eq!(es.update(0.3), StopDecision::Improved);
        assert_eq!(
            es.update(0.3),
            StopDecision::NoImprovement { bad_epochs: 1 }
        );
        assert_eq!(es.update(0.2), StopDecision::Stop);
    }

    #[test]
    fn improvement_resets_counter() {
        let mut es = EarlyStopping::new(2, 0.0);
        es.update(0.1);
        es.update(0.05);
        assert_eq!(es.update(0.2), StopDecision::Improved);
        assert_eq!(es.bad_epochs(), 0);
        assert_eq!(
            es.update(0.2),
            StopDecision::NoImprovement { bad_epochs: 1 }
        );
    }

    #[test]
    fn min_delta_requires_a_real_gain() {
        let mut es = EarlyStopping::new(3, 0.05);
        es.update(0.5);
        assert_eq!(
            es.update(0.52),
            StopDecision::NoImprovement { bad_epochs: 1 }
        );
        assert_eq!(es.best(), 0.5);
        assert_eq!(es.update(0.6), StopDecision::Improved);
    }

    #[test]
    fn zero_patience_never_stops() {
        let mut es = EarlyStopping::new(0, 0.0);
        es.update(1.0);
        for _ in 0..10 {
            assert_ne!(es.update(0.0), StopDecision::Stop);
        }
    }
}
