//! Binary classification metrics, with 1 as the positive label.
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Counts of a binary confusion matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub true_pos: usize,
    pub false_pos: usize,
    pub false_neg: usize,
    pub true_neg: usize,
}

impl Confusion {
    pub fn new(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        ensure!(
            y_true.len() == y_pred.len(),
            "{} true labels but {} predictions",
            y_true.len(),
            y_pred.len()
        );
        let mut counts = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            ensure!(t <= 1 && p <= 1, "labels must be 0 or 1");
            match (t == 1, p == 1) {
                (true, true) => counts.true_pos += 1,
                (false, true) => counts.false_pos += 1,
                (true, false) => counts.false_neg += 1,
                (false, false) => counts.true_neg += 1,
            }
        }
        Ok(counts)
    }

    pub fn total(&self) -> usize {
        self.true_pos + self.false_pos + self.false_neg + self.true_neg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl Metrics {
    /// Ill-defined ratios (no predicted or no actual positives) are reported as 0.
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        let c = Confusion::new(y_true, y_pred)?;
        ensure!(c.total() > 0, "cannot compute metrics for an empty test set");

        let precision = ratio("precision", c.true_pos, c.true_pos + c.false_pos);
        let recall = ratio("recall", c.true_pos, c.true_pos + c.false_neg);
        let f1 = ratio("f1", 2 * c.true_pos, 2 * c.true_pos + c.false_pos + c.false_neg);
        let accuracy = (c.true_pos + c.true_neg) as f64 / c.total() as f64;
        event!(Level::DEBUG, "confusion matrix: {:?}", c);
        Ok(Self {
            precision,
            recall,
            f1,
            accuracy,
        })
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result {
        fn inner(this: &Metrics, path: &Path) -> Result {
            let mut writer = csv::Writer::from_writer(crate::create_output(path)?);
            writer.serialize(this)?;
            writer.flush()?;
            Ok(())
        }
        let path = path.as_ref();
        inner(self, path).with_context(|| format!("writing metrics to \"{}\"", path.display()))
    }

    pub fn term_table(&self) -> term_data_table::Table {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Metric"))
                .with_cell(Cell::from("Value")),
        );
        for (name, value) in [
            ("Precision", self.precision),
            ("Recall", self.recall),
            ("F1 Score", self.f1),
            ("Accuracy", self.accuracy),
        ] {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(name))
                    .with_cell(Cell::from(format!("{:.4}", value))),
            );
        }
        table
    }
}

fn ratio(name: &str, num: usize, denom: usize) -> f64 {
    if denom == 0 {
        event!(
            Level::WARN,
            "{} is ill-defined and being set to 0.0 due to no relevant samples",
            name
        );
        0.
    } else {
        num as f64 / denom as f64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scores() {
        let y_true = [1, 1, 0, 0, 1, 0];
        let y_pred = [1, 0, 0, 1, 1, 0];
        let m = Metrics::compute(&y_true, &y_pred).unwrap();
        assert!((m.precision - 2. / 3.).abs() < 1e-12);
        assert!((m.recall - 2. / 3.).abs() < 1e-12);
        assert!((m.f1 - 2. / 3.).abs() < 1e-12);
        assert!((m.accuracy - 4. / 6.).abs() < 1e-12);
    }

    #[test]
    fn zero_division() {
        // nothing predicted positive
        let m = Metrics::compute(&[1, 0, 0], &[0, 0, 0]).unwrap();
        assert_eq!(m.precision, 0.);
        assert_eq!(m.recall, 0.);
        assert_eq!(m.f1, 0.);
        assert!((m.accuracy - 2. / 3.).abs() < 1e-12);

        // no positives at all
        let m = Metrics::compute(&[0, 0], &[0, 0]).unwrap();
        assert_eq!(m.f1, 0.);
        assert_eq!(m.accuracy, 1.);

        assert!(Metrics::compute(&[], &[]).is_err());
        assert!(Metrics::compute(&[1], &[1, 0]).is_err());
    }

    #[test]
    fn csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let m = Metrics::compute(&[1, 0, 1, 1], &[1, 0, 0, 1]).unwrap();
        m.save_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("precision,recall,f1,accuracy\n"));
        let again: Metrics = csv::Reader::from_path(&path)
            .unwrap()
            .deserialize()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(again, m);
    }
}
