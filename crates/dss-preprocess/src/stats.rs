// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub(crate) fn collect_valid(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

pub(crate) fn median_of_slice(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) * 0.5)
    }
}

pub(crate) fn mean_ignore_nan(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        if value.is_nan() {
            continue;
        }
        sum += *value;
        count += 1;
    }
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

pub(crate) fn median_ignore_nan(values: &[f64]) -> f64 {
    median_of_slice(&collect_valid(values)).unwrap_or(f64::NAN)
}

/// Population variance, skipping NaN.
pub(crate) fn variance_ignore_nan(values: &[f64]) -> f64 {
    let mean = mean_ignore_nan(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    mean_ignore_nan(
        &values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .collect::<Vec<_>>(),
    )
}
