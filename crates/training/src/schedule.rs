use crate::config::TrainConfig;
use std::f64::consts::PI;

/// Learning rate as a function of fractional epoch progress
/// (`epoch + iteration / iterations_per_epoch`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrSchedule {
    Constant(f64),
    /// Cosine annealing with warm restarts: the first cycle lasts `t0` epochs and
    /// each later one `t_mult` times longer than the previous.
    CosineWarmRestarts {
        base: f64,
        eta_min: f64,
        t0: f64,
        t_mult: f64,
    },
}

impl LrSchedule {
    pub fn from_config(cfg: &TrainConfig) -> Self {
        if cfg.lr_schedule {
            LrSchedule::CosineWarmRestarts {
                base: cfg.learning_rate,
                eta_min: cfg.scheduler.eta_min,
                t0: cfg.scheduler.t0,
                t_mult: cfg.scheduler.t_mult,
            }
        } else {
            LrSchedule::Constant(cfg.learning_rate)
        }
    }

    pub fn lr_at(&self, progress: f64) -> f64 {
        match *self {
            LrSchedule::Constant(lr) => lr,
            LrSchedule::CosineWarmRestarts {
                base,
                eta_min,
                t0,
                t_mult,
            } => {
                let (t_cur, t_i) = cycle_position(progress.max(0.0), t0, t_mult);
                eta_min + (base - eta_min) * (1.0 + (PI * t_cur / t_i).cos()) / 2.0
            }
        }
    }

    /// Rate for the optimizer step after iteration `step` of `epoch` has run.
    ///
    /// The schedule advances after each update, so iteration `k` trains at the
    /// rate for `epoch + (k - 1) / iters` and a restart first shows up one step late.
    pub fn lr_after_step(&self, epoch: usize, step: usize, iters: usize) -> f64 {
        self.lr_at(epoch as f64 + step as f64 / iters.max(1) as f64)
    }

    pub fn describe(&self) -> String {
        match self {
            LrSchedule::Constant(lr) => format!("constant lr={lr}"),
            LrSchedule::CosineWarmRestarts {
                base,
                eta_min,
                t0,
                t_mult,
            } => format!("cosine warm restarts base={base} eta_min={eta_min} t0={t0} t_mult={t_mult}"),
        }
    }
}

/// Position inside the current cycle and that cycle's length.
fn cycle_position(epoch: f64, t0: f64, t_mult: f64) -> (f64, f64) {
    if epoch < t0 {
        return (epoch, t0);
    }
    if t_mult <= 1.0 {
        return (epoch % t0, t0);
    }
    let n = (((epoch / t0) * (t_mult - 1.0) + 1.0).log2() / t_mult.log2()).floor();
    let t_i = t0 * t_mult.powf(n);
    let start = t0 * (t_mult.powf(n) - 1.0) / (t_mult - 1.0);
    (epoch - start, t_i)
}

#[cfg(test)]
mod schedule_tests {
    use super::*;

    fn cosine(t_mult: f64) -> LrSchedule {
        LrSchedule::CosineWarmRestarts {
            base: 1e-3,
            eta_min: 1e-5,
            t0: 2.0,
            t_mult,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn constant_ignores_progress() {
        let s = LrSchedule::Constant(0.01);
        assert_eq!(s.lr_at(0.0), 0.01);
        assert_eq!(s.lr_at(17.3), 0.01);
    }

    #[test]
    fn cosine_restarts_every_t0_epochs() {
        let s = cosine(1.0);
        assert!(close(s.lr_at(0.0), 1e-3));
        assert!(close(s.lr_at(1.0), (1e-3 + 1e-5) / 2.0));
        assert!(s.lr_at(1.99) < s.lr_at(1.0));
        assert!(close(s.lr_at(2.0), 1e-3));
        assert!(close(s.lr_at(5.0), s.lr_at(1.0)));
    }

    #[test]
    fn cosine_cycles_grow_with_t_mult() {
        let s = cosine(2.0);
        // cycles: [0, 2), [2, 6), [6, 14)
        assert!(close(s.lr_at(2.0), 1e-3));
        assert!(close(s.lr_at(4.0), (1e-3 + 1e-5) / 2.0));
        assert!(close(s.lr_at(6.0), 1e-3));
        assert!(close(s.lr_at(10.0), (1e-3 + 1e-5) / 2.0));
    }

    #[test]
    fn rate_after_step_lags_the_restart_by_one_iteration() {
        let s = cosine(1.0);
        // 4 iterations per epoch: the last step of epoch 1 sets the rate for the
        // first step of epoch 2, which still sits at the end of the old cycle.
        let first_of_epoch_2 = s.lr_after_step(1, 3, 4);
        assert!(close(first_of_epoch_2, s.lr_at(1.75)));
        assert!(first_of_epoch_2 < s.lr_at(1.0));
        assert!(close(s.lr_after_step(2, 0, 4), 1e-3));
        assert!(close(s.lr_after_step(0, 2, 0), s.lr_at(2.0)));
    }
}
