use anyhow::Result;

/// Stand-in for "no loss seen yet"; the first finite epoch loss always beats it.
pub const INITIAL_BEST_LOSS: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// The epoch beat the best loss by at least the threshold.
    Improved,
    Stalled { stale_epochs: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochOutcome {
    /// 1-based.
    pub epoch: usize,
    pub total_loss: f64,
    /// `(best - loss) / best`, against the best loss before this epoch.
    pub improvement: f64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PatienceExhausted { epoch: usize },
    EpochBudget,
}

/// One epoch of work, as seen by [`TrainingSession::drive`].
pub trait EpochRunner {
    /// Trains one epoch and returns its summed loss.
    fn run_epoch(&mut self, epoch: usize) -> Result<f64>;

    /// Called after every epoch; checkpoint here on `Verdict::Improved`.
    fn end_epoch(&mut self, outcome: &EpochOutcome) -> Result<()>;
}

/// Early-stopping bookkeeping for a single training run.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    min_improvement: f64,
    patience: usize,
    best_loss: f64,
    best_epoch: Option<usize>,
    stale_epochs: usize,
    history: Vec<f64>,
}

impl TrainingSession {
    pub fn new(min_improvement: f64, patience: usize) -> Self {
        Self {
            min_improvement,
            patience,
            best_loss: INITIAL_BEST_LOSS,
            best_epoch: None,
            stale_epochs: 0,
            history: Vec::new(),
        }
    }

    pub fn record(&mut self, total_loss: f64) -> EpochOutcome {
        self.history.push(total_loss);
        let epoch = self.history.len();
        let improvement = (self.best_loss - total_loss) / self.best_loss;

        // NaN compares false and counts as a stalled epoch
        let verdict = if improvement >= self.min_improvement {
            self.best_loss = total_loss;
            self.best_epoch = Some(epoch);
            self.stale_epochs = 0;
            Verdict::Improved
        } else {
            self.stale_epochs += 1;
            Verdict::Stalled {
                stale_epochs: self.stale_epochs,
            }
        };

        EpochOutcome {
            epoch,
            total_loss,
            improvement,
            verdict,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.stale_epochs >= self.patience
    }

    /// Runs epochs until the patience window is used up or `num_epochs`
    /// epochs have run.
    pub fn drive<R: EpochRunner>(
        &mut self,
        num_epochs: usize,
        runner: &mut R,
    ) -> Result<StopReason> {
        for epoch in self.history.len() + 1..=num_epochs {
            let total_loss = runner.run_epoch(epoch)?;
            let outcome = self.record(total_loss);
            runner.end_epoch(&outcome)?;

            if self.exhausted() {
                return Ok(StopReason::PatienceExhausted { epoch });
            }
        }
        Ok(StopReason::EpochBudget)
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stale_epochs(&self) -> usize {
        self.stale_epochs
    }

    /// Summed loss of every epoch run so far.
    pub fn history(&self) -> &[f64] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a fixed loss sequence and remembers which epoch it would have
    /// checkpointed last.
    struct Scripted {
        losses: Vec<f64>,
        checkpoint: Option<usize>,
        runs: usize,
    }

    impl Scripted {
        fn new(losses: Vec<f64>) -> Self {
            Self {
                losses,
                checkpoint: None,
                runs: 0,
            }
        }
    }

    impl EpochRunner for Scripted {
        fn run_epoch(&mut self, epoch: usize) -> Result<f64> {
            self.runs += 1;
            Ok(self.losses[epoch - 1])
        }

        fn end_epoch(&mut self, outcome: &EpochOutcome) -> Result<()> {
            if outcome.verdict == Verdict::Improved {
                self.checkpoint = Some(outcome.epoch);
            }
            Ok(())
        }
    }

    #[test]
    fn plateau_after_three_improvements_stops_at_patience() {
        let mut losses = vec![100.0, 90.0, 80.0];
        losses.extend(std::iter::repeat_n(80.0, 1000));
        let mut runner = Scripted::new(losses);
        let mut session = TrainingSession::new(1e-4, 500);

        let stop = session.drive(8000, &mut runner).unwrap();

        assert_eq!(stop, StopReason::PatienceExhausted { epoch: 3 + 500 });
        assert_eq!(runner.runs, 503);
        assert_eq!(runner.checkpoint, Some(3));
        assert_eq!(session.best_epoch(), Some(3));
        assert_eq!(session.best_loss(), 80.0);
        assert_eq!(session.history().len(), 503);
    }

    #[test]
    fn steady_improvement_runs_the_whole_budget() {
        let losses: Vec<f64> = (0..50).map(|e| 100.0 * 0.99f64.powi(e)).collect();
        let mut runner = Scripted::new(losses);
        let mut session = TrainingSession::new(1e-4, 5);

        let stop = session.drive(50, &mut runner).unwrap();

        assert_eq!(stop, StopReason::EpochBudget);
        assert_eq!(runner.checkpoint, Some(50));
        assert_eq!(session.stale_epochs(), 0);
    }

    #[test]
    fn small_gains_do_not_reset_the_counter() {
        let mut session = TrainingSession::new(1e-4, 500);
        assert_eq!(session.record(10.0).verdict, Verdict::Improved);

        // relative gain of 5e-5 is below the threshold
        let outcome = session.record(10.0 - 5e-4);
        assert_eq!(outcome.verdict, Verdict::Stalled { stale_epochs: 1 });
        assert_eq!(session.best_loss(), 10.0);

        let outcome = session.record(9.0);
        assert_eq!(outcome.verdict, Verdict::Improved);
        assert!((outcome.improvement - 0.1).abs() < 1e-12);
    }

    #[test]
    fn first_epoch_is_measured_against_the_initial_best() {
        let mut session = TrainingSession::new(1e-4, 500);
        let outcome = session.record(400.0);
        assert_eq!(outcome.epoch, 1);
        let expected = (INITIAL_BEST_LOSS - 400.0) / INITIAL_BEST_LOSS;
        assert!((outcome.improvement - expected).abs() < 1e-12);
    }

    #[test]
    fn nan_loss_counts_as_stalled() {
        let mut session = TrainingSession::new(1e-4, 2);
        session.record(5.0);
        assert_eq!(
            session.record(f64::NAN).verdict,
            Verdict::Stalled { stale_epochs: 1 }
        );
        session.record(f64::NAN);
        assert!(session.exhausted());
    }

    #[test]
    fn runner_errors_propagate() {
        struct Failing;
        impl EpochRunner for Failing {
            fn run_epoch(&mut self, _epoch: usize) -> Result<f64> {
                anyhow::bail!("device lost")
            }
            fn end_epoch(&mut self, _outcome: &EpochOutcome) -> Result<()> {
                Ok(())
            }
        }

        let mut session = TrainingSession::new(1e-4, 500);
        assert!(session.drive(10, &mut Failing).is_err());
        assert!(session.history().is_empty());
    }
}
