// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Statistic evaluated over a centered rolling window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingStat {
    Mean,
    Median,
    Max,
    Min,
    Std,
    Skew,
    Kurt,
}

impl RollingStat {
    pub const ALL: [RollingStat; 7] = [
        RollingStat::Mean,
        RollingStat::Median,
        RollingStat::Max,
        RollingStat::Min,
        RollingStat::Std,
        RollingStat::Skew,
        RollingStat::Kurt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Max => "max",
            Self::Min => "min",
            Self::Std => "std",
            Self::Skew => "skew",
            Self::Kurt => "kurt",
        }
    }

    /// Statistic over the non-NaN values of one window.
    fn eval(self, window: &mut Vec<f64>) -> f64 {
        let n = window.len();
        if n == 0 {
            return f64::NAN;
        }
        let nf = n as f64;
        match self {
            Self::Mean => window.iter().sum::<f64>() / nf,
            Self::Max => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => window.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Median => {
                window.sort_by(|a, b| a.total_cmp(b));
                let mid = n / 2;
                if n % 2 == 1 {
                    window[mid]
                } else {
                    (window[mid - 1] + window[mid]) * 0.5
                }
            }
            Self::Std => {
                if n < 2 {
                    return f64::NAN;
                }
                let mean = window.iter().sum::<f64>() / nf;
                let ss: f64 = window.iter().map(|v| (v - mean) * (v - mean)).sum();
                (ss / (nf - 1.0)).sqrt()
            }
            Self::Skew => {
                if n < 3 {
                    return f64::NAN;
                }
                let (m2, m3, _) = central_moments(window);
                if m2 <= f64::EPSILON {
                    return 0.0;
                }
                let g1 = m3 / m2.powf(1.5);
                g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0)
            }
            Self::Kurt => {
                if n < 4 {
                    return f64::NAN;
                }
                let (m2, _, m4) = central_moments(window);
                if m2 <= f64::EPSILON {
                    return 0.0;
                }
                let g2 = m4 / (m2 * m2) - 3.0;
                ((nf + 1.0) * g2 + 6.0) * (nf - 1.0) / ((nf - 2.0) * (nf - 3.0))
            }
        }
    }
}

/// Biased second, third and fourth central moments.
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let nf = values.len() as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / nf, m3 / nf, m4 / nf)
}

/// Centered rolling statistic, skipping NaN; windows shrink at the edges.
///
/// Row `t` covers `[t - w/2, t - w/2 + w)`.
pub fn rolling(values: &[f64], window: usize, stat: RollingStat) -> Vec<f64> {
    let n = values.len();
    let window = window.max(1);
    let left = window / 2;
    let mut scratch = Vec::with_capacity(window);
    (0..n)
        .map(|t| {
            let start = t.saturating_sub(left);
            let end = (t + window - left).min(n);
            scratch.clear();
            scratch.extend(values[start..end].iter().copied().filter(|v| !v.is_nan()));
            stat.eval(&mut scratch)
        })
        .collect()
}

/// First difference; the first row is zero.
pub fn diff(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for (i, v) in values.iter().enumerate() {
        out.push(if i == 0 { 0.0 } else { v - values[i - 1] });
    }
    out
}

/// Quadratic Savitzky-Golay smoothing with an odd window; edges repeat the
/// boundary value.
pub fn savgol(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || window < 3 {
        return values.to_vec();
    }
    let m = (window / 2) as i64;
    let mf = m as f64;
    let norm = (2.0 * mf + 1.0) * (2.0 * mf - 1.0) * (2.0 * mf + 3.0);
    let coeffs: Vec<f64> = (-m..=m)
        .map(|j| {
            let jf = j as f64;
            (3.0 * (3.0 * mf * mf + 3.0 * mf - 1.0) - 15.0 * jf * jf) / norm
        })
        .collect();
    let last = n as i64 - 1;
    (0..n as i64)
        .map(|t| {
            coeffs
                .iter()
                .zip(-m..=m)
                .map(|(c, j)| c * values[(t + j).clamp(0, last) as usize])
                .sum()
        })
        .collect()
}
