//! Closed-form least squares and ridge solvers, plus polynomial feature expansion.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Fitted linear predictor `intercept + weights · x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCoefficients {
    pub intercept: f64,
    pub weights: Vec<f64>,
    /// L2 penalty used in the fit; 0 for ordinary least squares.
    pub alpha: f64,
}

impl LinearCoefficients {
    pub fn predict_row(&self, x: &[f64]) -> f64 {
        self.intercept + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }
}

/// Fit `y ~ x` with an unpenalized intercept and L2 penalty `alpha` on the weights.
///
/// `alpha == 0` solves ordinary least squares through the SVD, which also
/// covers rank-deficient designs. Otherwise the centered normal equations
/// `(XᵀX + αI) w = Xᵀy` are solved by Cholesky.
pub fn fit_ridge(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<LinearCoefficients> {
    let n = y.len();
    if n == 0 {
        return Err(ForecastError::training("no rows to fit"));
    }
    if x.len() != n {
        return Err(ForecastError::training(format!(
            "Feature and target count mismatch: {} rows, {} targets",
            x.len(),
            n
        )));
    }
    let p = x[0].len();
    if x.iter().any(|r| r.len() != p) {
        return Err(ForecastError::training("ragged feature matrix"));
    }
    if alpha < 0.0 || !alpha.is_finite() {
        return Err(ForecastError::training(format!("invalid ridge alpha {alpha}")));
    }

    let y_mean = y.iter().sum::<f64>() / n as f64;
    let x_means: Vec<f64> = (0..p)
        .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n as f64)
        .collect();
    if p == 0 {
        return Ok(LinearCoefficients {
            intercept: y_mean,
            weights: Vec::new(),
            alpha,
        });
    }

    let xc = DMatrix::from_fn(n, p, |i, j| x[i][j] - x_means[j]);
    let yc = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

    let w = if alpha > 0.0 {
        let mut gram = xc.transpose() * &xc;
        for i in 0..p {
            gram[(i, i)] += alpha;
        }
        let rhs = xc.transpose() * &yc;
        match gram.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => least_squares(gram, rhs)?,
        }
    } else {
        least_squares(xc, yc)?
    };

    let weights: Vec<f64> = w.iter().copied().collect();
    if weights.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::training("solver produced non-finite coefficients"));
    }
    let intercept = y_mean - weights.iter().zip(&x_means).map(|(w, m)| w * m).sum::<f64>();

    Ok(LinearCoefficients {
        intercept,
        weights,
        alpha,
    })
}

fn least_squares(a: DMatrix<f64>, b: DVector<f64>) -> Result<DVector<f64>> {
    a.svd(true, true)
        .solve(&b, 1e-10)
        .map_err(|e| ForecastError::training(format!("least squares failed: {e}")))
}

/// All monomials of degree 1 through `degree` over `n_inputs` variables,
/// ordered by degree then lexicographically. No bias column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialExpansion {
    pub n_inputs: usize,
    pub degree: usize,
    /// Each term is the multiset of input indices multiplied together.
    terms: Vec<Vec<usize>>,
}

impl PolynomialExpansion {
    pub fn new(n_inputs: usize, degree: usize) -> Self {
        let terms = (1..=degree.max(1))
            .flat_map(|d| (0..n_inputs).combinations_with_replacement(d))
            .collect();
        Self {
            n_inputs,
            degree: degree.max(1),
            terms,
        }
    }

    pub fn n_outputs(&self) -> usize {
        self.terms.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        self.terms
            .iter()
            .map(|t| t.iter().map(|j| row.get(*j).copied().unwrap_or(0.0)).product())
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    /// Readable term names such as `base_price * stock_level^2`.
    pub fn term_names<S: AsRef<str>>(&self, inputs: &[S]) -> Vec<String> {
        self.terms
            .iter()
            .map(|t| {
                t.iter()
                    .dedup_with_count()
                    .map(|(count, j)| {
                        let name = inputs.get(*j).map_or("?", |s| s.as_ref());
                        if count == 1 {
                            name.to_string()
                        } else {
                            format!("{name}^{count}")
                        }
                    })
                    .join(" * ")
            })
            .collect()
    }
}
