use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Zero-mean, unit-variance feature scaling.
///
/// Also records the observed range of every feature so inference inputs can be
/// clamped to what the model saw in training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let width = rows
            .first()
            .map(Vec::len)
            .ok_or_else(|| ForecastError::training("cannot fit scaler on zero rows"))?;
        if rows.iter().any(|r| r.len() != width) {
            return Err(ForecastError::training("ragged feature matrix"));
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; width];
        let mut mins = vec![f64::INFINITY; width];
        let mut maxs = vec![f64::NEG_INFINITY; width];
        for row in rows {
            for (j, v) in row.iter().enumerate() {
                means[j] += v / n;
                mins[j] = mins[j].min(*v);
                maxs[j] = maxs[j].max(*v);
            }
        }
        let stds = (0..width)
            .map(|j| {
                let var = rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                var.sqrt()
            })
            .collect();

        Ok(Self {
            means,
            stds,
            mins,
            maxs,
        })
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.width() {
            return Err(ForecastError::prediction(format!(
                "Standardization parameter count mismatch: expected {}, got {}",
                self.width(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(self.stds.iter()))
            .map(|(f, (mean, std))| {
                if std.abs() < 1e-10 {
                    0.0 // constant feature
                } else {
                    (f - mean) / std
                }
            })
            .collect())
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    /// Clamp each input to its training range, then standardize.
    pub fn transform_clamped(&self, row: &[f64]) -> Result<Vec<f64>> {
        let clamped: Vec<f64> = row
            .iter()
            .enumerate()
            .map(|(j, v)| match (self.mins.get(j), self.maxs.get(j)) {
                (Some(lo), Some(hi)) if lo <= hi => v.clamp(*lo, *hi),
                _ => *v,
            })
            .collect();
        self.transform_row(&clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizes_columns() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.means, vec![2.0, 5.0]);
        assert_eq!(scaler.stds, vec![1.0, 0.0]);

        let scaled = scaler.transform(&rows).unwrap();
        assert_eq!(scaled[0], vec![-1.0, 0.0]);
        assert_eq!(scaled[1], vec![1.0, 0.0]);
    }

    #[test]
    fn test_clamps_to_training_range() {
        let scaler = StandardScaler::fit(&[vec![0.0], vec![10.0]]).unwrap();
        assert_eq!(
            scaler.transform_clamped(&[100.0]).unwrap(),
            scaler.transform_row(&[10.0]).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(StandardScaler::fit(&[]).is_err());
        assert!(StandardScaler::fit(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        let scaler = StandardScaler::fit(&[vec![1.0, 2.0]]).unwrap();
        assert!(scaler.transform_row(&[1.0]).is_err());
    }
}
