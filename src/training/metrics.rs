use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::session::{EpochOutcome, Verdict};

const HEADER: &str = "epoch,total_loss,improvement,train_accuracy,weight_power,drift,stale_epochs";

/// Figures reported at the end of one training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub outcome: EpochOutcome,
    /// Fraction of training samples predicted correctly, against the noisy labels.
    pub train_accuracy: f64,
    /// `sum |w|^q` of the parameters after the epoch.
    pub weight_power: f64,
    /// `sum |w - w0|^q` against the initial weights.
    pub drift: f64,
}

/// Appends one CSV row per epoch.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Starts a fresh log, replacing any file left by an earlier run.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");

        let mut f = File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        writeln!(f, "{HEADER}")?;
        tracing::debug!("Created metrics CSV '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let stale = match m.outcome.verdict {
            Verdict::Improved => 0,
            Verdict::Stalled { stale_epochs } => stale_epochs,
        };
        writeln!(
            f,
            "{},{:.6},{:.6e},{:.6},{:.6},{:.6},{}",
            m.outcome.epoch,
            m.outcome.total_loss,
            m.outcome.improvement,
            m.train_accuracy,
            m.weight_power,
            m.drift,
            stale,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, verdict: Verdict) -> EpochMetrics {
        EpochMetrics {
            outcome: EpochOutcome {
                epoch,
                total_loss: 123.5,
                improvement: 0.25,
                verdict,
            },
            train_accuracy: 0.5,
            weight_power: 2.0,
            drift: 0.125,
        }
    }

    #[test]
    fn writes_header_and_one_row_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::create(dir.path()).unwrap();
        logger.log(&metrics(1, Verdict::Improved)).unwrap();
        logger
            .log(&metrics(2, Verdict::Stalled { stale_epochs: 4 }))
            .unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("1,123.500000,"));
        assert!(lines[1].ends_with(",0"));
        assert!(lines[2].ends_with(",4"));
    }

    #[test]
    fn create_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::create(dir.path())
            .unwrap()
            .log(&metrics(1, Verdict::Improved))
            .unwrap();

        let logger = MetricsLogger::create(dir.path()).unwrap();
        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
