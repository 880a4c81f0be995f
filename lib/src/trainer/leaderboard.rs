//! Ranked evaluation results.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::metrics::RegressionMetrics;

/// One evaluated model on the held-out split.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub model: String,
    pub metrics: RegressionMetrics,
    /// Whether the entry predicts every target and can therefore be deployed.
    /// Per-target audit rows are listed but never selected.
    pub selectable: bool,
}

impl LeaderboardEntry {
    pub fn new(model: impl Into<String>, metrics: RegressionMetrics) -> Self {
        Self {
            model: model.into(),
            metrics,
            selectable: true,
        }
    }

    /// An entry that scores a single target only.
    pub fn per_target(model: impl Into<String>, metrics: RegressionMetrics) -> Self {
        Self {
            selectable: false,
            ..Self::new(model, metrics)
        }
    }

    fn sort_key(&self) -> f64 {
        if self.metrics.r2.is_nan() {
            f64::NEG_INFINITY
        } else {
            self.metrics.r2
        }
    }
}

/// Flat row of the persisted table.
#[derive(Debug, Serialize, Deserialize)]
struct LeaderboardRow {
    #[serde(rename = "Model")]
    model: String,
    #[serde(rename = "MAE")]
    mae: f64,
    #[serde(rename = "RMSE")]
    rmse: f64,
    #[serde(rename = "R2")]
    r2: f64,
}

/// Candidates in evaluation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LeaderboardEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, model: &str) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| e.model == model)
    }

    /// The selectable entry with the strictly greatest R²; on ties the one
    /// inserted first wins. A NaN R² never wins.
    pub fn best(&self) -> Option<&LeaderboardEntry> {
        self.entries
            .iter()
            .filter(|e| e.selectable)
            .fold(None, |best: Option<&LeaderboardEntry>, e| match best {
                Some(b) if e.sort_key() <= b.sort_key() => Some(b),
                _ => Some(e),
            })
    }

    /// All entries by R² descending; equal scores keep insertion order.
    pub fn sorted(&self) -> Vec<&LeaderboardEntry> {
        let mut sorted: Vec<&LeaderboardEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            b.sort_key()
                .partial_cmp(&a.sort_key())
                .unwrap_or(Ordering::Equal)
        });
        sorted
    }

    /// Write the sorted table with columns `Model,MAE,RMSE,R2`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for entry in self.sorted() {
            writer.serialize(LeaderboardRow {
                model: entry.model.clone(),
                mae: entry.metrics.mae,
                rmse: entry.metrics.rmse,
                r2: entry.metrics.r2,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_csv(file)
    }

    /// Read a persisted table back for display.
    ///
    /// The file does not record which rows were per-target, so every row comes
    /// back selectable and MSE is recomputed from RMSE.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut board = Leaderboard::new();
        for row in reader.deserialize() {
            let row: LeaderboardRow = row?;
            board.push(LeaderboardEntry::new(
                row.model,
                RegressionMetrics {
                    mae: row.mae,
                    mse: row.rmse * row.rmse,
                    rmse: row.rmse,
                    r2: row.r2,
                },
            ));
        }
        Ok(board)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::read_csv(file)
    }
}

impl Extend<LeaderboardEntry> for Leaderboard {
    fn extend<T: IntoIterator<Item = LeaderboardEntry>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

impl fmt::Display for Leaderboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .entries
            .iter()
            .map(|e| e.model.len())
            .max()
            .unwrap_or(5)
            .max(5);
        writeln!(
            f,
            "{:<width$}  {:>10}  {:>10}  {:>8}",
            "Model",
            "MAE",
            "RMSE",
            "R2",
            width = width
        )?;
        for entry in self.sorted() {
            writeln!(
                f,
                "{:<width$}  {:>10.4}  {:>10.4}  {:>8.4}",
                entry.model,
                entry.metrics.mae,
                entry.metrics.rmse,
                entry.metrics.r2,
                width = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, r2: f64) -> LeaderboardEntry {
        LeaderboardEntry::new(name, RegressionMetrics::new(1.0, 4.0, r2))
    }

    #[test]
    fn test_best_strict_max_first_wins_ties() {
        let mut board = Leaderboard::new();
        board.extend([entry("A", 0.5), entry("B", 0.8), entry("C", 0.8)]);
        assert_eq!(board.best().unwrap().model, "B");
    }

    #[test]
    fn test_best_skips_per_target_and_nan() {
        let mut board = Leaderboard::new();
        board.push(entry("A", 0.6));
        board.push(entry("N", f64::NAN));
        board.push(LeaderboardEntry::per_target(
            "rf_Recommended_Protein",
            RegressionMetrics::new(1.0, 1.0, 0.99),
        ));
        assert_eq!(board.best().unwrap().model, "A");
        assert!(Leaderboard::new().best().is_none());
    }

    #[test]
    fn test_sorted_is_stable_descending() {
        let mut board = Leaderboard::new();
        board.extend([entry("A", 0.5), entry("B", 0.8), entry("C", 0.8), entry("D", 0.9)]);
        let names: Vec<&str> = board.sorted().iter().map(|e| e.model.as_str()).collect();
        assert_eq!(names, vec!["D", "B", "C", "A"]);
    }

    #[test]
    fn test_csv_roundtrip_keeps_order_and_values() {
        let mut board = Leaderboard::new();
        board.extend([entry("A", 0.5), entry("B", 0.8)]);
        let mut buf = Vec::new();
        board.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Model,MAE,RMSE,R2\n"));
        assert!(text.lines().nth(1).unwrap().starts_with("B,"));

        let back = Leaderboard::read_csv(buf.as_slice()).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.entries()[0].model, "B");
        assert_eq!(back.entries()[0].metrics.rmse, 2.0);
    }

    #[test]
    fn test_display_lists_every_row() {
        let mut board = Leaderboard::new();
        board.extend([entry("BaselineMedian", 0.1), entry("RandomForest", 0.7)]);
        let text = board.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("RandomForest"));
    }
}
