//! Plaintext reference computation of the same statistics, for cross-checking the encrypted
//! engine. Nothing on the encrypted path calls into this module.

use crate::error::{MsrError, Result};
use crate::math::matrix::{PlainMatrix, Selection};
use crate::math::utils::{checked_distance, left_rotation};
use crate::msr::msr::{MeanStatistics, ResidueSignal, ResidueStatistics};

/// Tiles `m` twice along each axis, so every cyclic window of `m` is a contiguous block.
pub fn enlarge(m: &PlainMatrix) -> PlainMatrix {
    PlainMatrix::from_fn(2 * m.rows(), 2 * m.cols(), |r, c| {
        m[(r % m.rows(), c % m.cols())]
    })
}

/// The first `rows * cols` values of `values` as a matrix.
pub fn reshape(values: &[f64], rows: usize, cols: usize) -> Result<PlainMatrix> {
    let len = rows * cols;
    if values.len() < len {
        return Err(MsrError::ShapeMismatch {
            expected: format!("at least {len} values for {rows}x{cols}"),
            actual: format!("{} values", values.len()),
        });
    }
    PlainMatrix::from_flat(rows, cols, values[..len].to_vec())
}

///
/// Cyclic shift matching a ciphertext rotation: entry `i` of the result is entry `i + by` of
/// `values`. The distance must be an integer with `|by| < values.len()`.
///
pub fn array_shift(values: &[f64], by: f64) -> Result<Vec<f64>> {
    let by = checked_distance(by, values.len())?;
    let shift = left_rotation(by, values.len())?;
    let mut out = values[shift..].to_vec();
    out.extend_from_slice(&values[..shift]);
    Ok(out)
}

/// Plaintext counterpart of the rotate-and-add reductions.
pub fn shift_accumulate(values: &[f64], step: usize, terms: usize) -> Result<Vec<f64>> {
    let mut acc = values.to_vec();
    let mut shifted = values.to_vec();
    for _ in 1..terms {
        shifted = array_shift(&shifted, step as f64)?;
        for (a, s) in acc.iter_mut().zip(shifted.iter()) {
            *a += s;
        }
    }
    Ok(acc)
}

pub fn row_means(m: &PlainMatrix) -> Vec<f64> {
    (0..m.rows())
        .map(|r| m.row(r).iter().sum::<f64>() / m.cols() as f64)
        .collect()
}

pub fn col_means(m: &PlainMatrix) -> Vec<f64> {
    let mut sums = vec![0_f64; m.cols()];
    for r in 0..m.rows() {
        sums.iter_mut().zip(m.row(r)).for_each(|(s, v)| *s += v);
    }
    sums.into_iter().map(|s| s / m.rows() as f64).collect()
}

pub fn data_mean(m: &PlainMatrix) -> f64 {
    m.as_slice().iter().sum::<f64>() / m.as_slice().len() as f64
}

/// `a_ij - a_iJ - a_Ij + a_IJ` for every entry.
pub fn residues(m: &PlainMatrix) -> PlainMatrix {
    let rm = row_means(m);
    let cm = col_means(m);
    let dm = data_mean(m);
    PlainMatrix::from_fn(m.rows(), m.cols(), |r, c| m[(r, c)] - rm[r] - cm[c] + dm)
}

fn check_nonempty(m: &PlainMatrix) -> Result<()> {
    if m.is_empty() {
        return Err(MsrError::EmptyInput {
            rows: m.rows(),
            cols: m.cols(),
        });
    }
    Ok(())
}

pub fn reference_means(m: &PlainMatrix) -> Result<MeanStatistics> {
    check_nonempty(m)?;
    Ok(MeanStatistics {
        data_mean: data_mean(m),
        row_means: row_means(m),
        col_means: col_means(m),
    })
}

pub fn reference_statistics(m: &PlainMatrix) -> Result<ResidueStatistics> {
    check_nonempty(m)?;
    let res = residues(m);
    let squared = PlainMatrix::from_fn(m.rows(), m.cols(), |r, c| res[(r, c)].powi(2));
    Ok(ResidueStatistics {
        global_msr: data_mean(&squared),
        row_msr: row_means(&squared),
        col_msr: col_means(&squared),
    })
}

/// Unencrypted residue oracle.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainReference;

impl ResidueSignal for PlainReference {
    fn residue_statistics(
        &self,
        data: &PlainMatrix,
        selection: &Selection,
    ) -> Result<ResidueStatistics> {
        reference_statistics(&data.select(selection)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn small() -> PlainMatrix {
        PlainMatrix::from_rows(&[[1_f64, 2_f64], [3_f64, 4_f64]]).unwrap()
    }

    #[test]
    fn test_enlarge() {
        let big = enlarge(&small());
        assert_eq!(big.rows(), 4);
        assert_eq!(big.cols(), 4);
        assert_eq!(big.row(3), &[3_f64, 4_f64, 3_f64, 4_f64]);
    }

    #[test]
    fn test_reshape() {
        let m = reshape(&[1_f64, 2_f64, 3_f64, 4_f64, 0_f64], 2, 2).unwrap();
        assert_eq!(m, small());
        assert!(matches!(
            reshape(&[1_f64], 2, 2),
            Err(MsrError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_array_shift() {
        let v = [1_f64, 2_f64, 3_f64, 4_f64];
        assert_eq!(
            array_shift(&v, 1.0).unwrap(),
            vec![2_f64, 3_f64, 4_f64, 1_f64]
        );
        assert_eq!(
            array_shift(&v, -1.0).unwrap(),
            vec![4_f64, 1_f64, 2_f64, 3_f64]
        );
        assert_eq!(array_shift(&v, 0.0).unwrap(), v.to_vec());
        assert!(matches!(
            array_shift(&v, 4.0),
            Err(MsrError::TypeOrRange { .. })
        ));
        assert!(matches!(
            array_shift(&v, 0.5),
            Err(MsrError::TypeOrRange { .. })
        ));
    }

    #[test]
    fn test_small_statistics() {
        let m = small();
        let means = reference_means(&m).unwrap();
        assert_eq!(means.data_mean, 2.5);
        assert_eq!(means.row_means, vec![1.5, 3.5]);
        assert_eq!(means.col_means, vec![2_f64, 3_f64]);
        // Row and column effects explain [[1, 2], [3, 4]] completely.
        assert_eq!(residues(&m).as_slice(), &[0_f64; 4]);
        assert_eq!(reference_statistics(&m).unwrap().global_msr, 0_f64);

        let m = PlainMatrix::from_rows(&[[1_f64, 2_f64], [3_f64, 5_f64]]).unwrap();
        assert_eq!(residues(&m).as_slice(), &[0.25, -0.25, -0.25, 0.25]);
        let stats = reference_statistics(&m).unwrap();
        assert_eq!(stats.global_msr, 0.0625);
        assert_eq!(stats.row_msr, vec![0.0625, 0.0625]);
        assert_eq!(stats.col_msr, vec![0.0625, 0.0625]);
    }

    #[test]
    fn test_empty() {
        assert!(matches!(
            reference_statistics(&PlainMatrix::zero(0, 3)),
            Err(MsrError::EmptyInput { rows: 0, cols: 3 })
        ));
    }

    #[test]
    fn test_plain_reference_selection() {
        let m = PlainMatrix::from_fn(3, 3, |r, c| (r * 3 + c) as f64);
        let sel = Selection::from_masks(&[true, false, true], &[true, true, false]);
        let stats = PlainReference.residue_statistics(&m, &sel).unwrap();
        // [[0, 1], [6, 7]] is additive, so every residue vanishes.
        assert_eq!(stats.row_msr, vec![0_f64, 0_f64]);
        assert_eq!(stats.global_msr, 0_f64);
    }

    proptest! {
        #[test]
        fn test_shift_accumulate_row_sums(
            rows in 1_usize..5,
            cols in 1_usize..5,
            seed in prop::collection::vec(-10_f64..10_f64, 25),
        ) {
            let m = PlainMatrix::from_fn(rows, cols, |r, c| seed[r * 5 + c]);
            let mut padded = m.as_slice().to_vec();
            padded.resize(32, 0_f64);
            let sums = shift_accumulate(&padded, 1, cols).unwrap();
            for (r, mean) in row_means(&m).into_iter().enumerate() {
                prop_assert!((sums[r * cols] / cols as f64 - mean).abs() < 1e-9);
            }
        }

        #[test]
        fn test_residues_center(
            rows in 1_usize..6,
            cols in 1_usize..6,
            seed in prop::collection::vec(-100_f64..100_f64, 36),
        ) {
            let m = PlainMatrix::from_fn(rows, cols, |r, c| seed[r * 6 + c]);
            let res = residues(&m);
            for mean in row_means(&res).into_iter().chain(col_means(&res)) {
                prop_assert!(mean.abs() < 1e-9);
            }
        }
    }
}
