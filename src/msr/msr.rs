use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

use crate::error::Result;
use crate::math::matrix::{PlainMatrix, Selection};

/// Mean-squared residues of a matrix. Lengths exclude any shard padding.
#[derive(Clone, Debug, PartialEq)]
pub struct ResidueStatistics {
    pub global_msr: f64,
    pub row_msr: Vec<f64>,
    pub col_msr: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeanStatistics {
    pub data_mean: f64,
    pub row_means: Vec<f64>,
    pub col_means: Vec<f64>,
}

impl ResidueStatistics {
    /// Largest absolute difference to `other` over every entry; `None` if the shapes differ.
    pub fn max_abs_diff(&self, other: &ResidueStatistics) -> Option<f64> {
        max_abs_diff(
            self.global_msr,
            &self.row_msr,
            &self.col_msr,
            other.global_msr,
            &other.row_msr,
            &other.col_msr,
        )
    }
}

impl MeanStatistics {
    pub fn max_abs_diff(&self, other: &MeanStatistics) -> Option<f64> {
        max_abs_diff(
            self.data_mean,
            &self.row_means,
            &self.col_means,
            other.data_mean,
            &other.row_means,
            &other.col_means,
        )
    }
}

fn max_abs_diff(
    a: f64,
    a_rows: &[f64],
    a_cols: &[f64],
    b: f64,
    b_rows: &[f64],
    b_cols: &[f64],
) -> Option<f64> {
    if a_rows.len() != b_rows.len() || a_cols.len() != b_cols.len() {
        return None;
    }
    let rows = a_rows.iter().zip(b_rows.iter());
    let cols = a_cols.iter().zip(b_cols.iter());
    Some(
        rows.chain(cols)
            .map(|(x, y)| (x - y).abs())
            .fold((a - b).abs(), f64::max),
    )
}

///
/// The residue oracle consumed by a biclustering search. Each round the search hands over the
/// full data matrix and its current bicluster, and gets back the statistics of the submatrix.
///
pub trait ResidueSignal {
    fn residue_statistics(
        &self,
        data: &PlainMatrix,
        selection: &Selection,
    ) -> Result<ResidueStatistics>;
}

#[derive(Debug)]
struct Stat<T> {
    name: &'static str,
    value: T,
}

/// Named measurements in the order they were recorded, e.g. per-stage durations.
#[derive(Debug)]
pub struct Stats<T> {
    stats: Vec<Stat<T>>,
}

impl<T: Copy> Stats<T> {
    pub fn new() -> Self {
        Self { stats: Vec::new() }
    }

    pub fn add(&mut self, name: &'static str, value: T) {
        self.stats.push(Stat { name, value });
    }

    pub fn as_vec(&self) -> Vec<(&'static str, T)> {
        self.stats.iter().map(|s| (s.name, s.value)).collect()
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.stats.iter().find(|s| s.name == name).map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

impl<T: Copy> Default for Stats<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats<Duration> {
    pub fn total(&self) -> Duration {
        self.stats
            .iter()
            .fold(Duration::new(0, 0), |acc, x| acc + x.value)
    }
}

impl<T: Debug> Display for Stats<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, stat) in self.stats.iter().enumerate() {
            write!(f, "{}: {:?}", stat.name, stat.value)?;
            if i < self.stats.len() - 1 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
