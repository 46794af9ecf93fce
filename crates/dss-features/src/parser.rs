// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Feature names as literal operation chains.
//!
//! A name has the form `f_<base>[_<op>]*`. The base is every token before
//! the first token that parses as an operation; the operations are applied
//! left to right. Supported operations:
//!
//! - `absdiff`: absolute first difference
//! - `diff`: first difference
//! - `clip<b>`: clamp to `[-b, b]`
//! - `mean<w>`, `median<w>`, `max<w>`, `min<w>`, `std<w>`, `skew<w>`,
//!   `kurt<w>`: centered rolling statistic over `w` rows
//! - `savgol<w>`: quadratic Savitzky-Golay smoothing, odd `w >= 3`
//!
//! For example `f_enmo_absdiff_clip2_median36` takes the absolute difference
//! of `enmo`, clips it to `[-2, 2]` and then applies a 36-row rolling median.

use crate::rolling::{RollingStat, diff, rolling, savgol};
use dss_core::{DssError, DssResult, EventRecord, Series, TableStage};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const FEATURE_PREFIX: &str = "f_";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeatureOp {
    AbsDiff,
    Diff,
    Clip(f64),
    Rolling { stat: RollingStat, window: usize },
    Savgol(usize),
}

impl FeatureOp {
    /// Parses one op token; `Ok(None)` means the token is not an operation.
    fn parse_token(token: &str) -> Result<Option<Self>, String> {
        match token {
            "absdiff" => return Ok(Some(Self::AbsDiff)),
            "diff" => return Ok(Some(Self::Diff)),
            _ => {}
        }

        if let Some(raw) = token.strip_prefix("clip")
            && starts_numeric(raw)
        {
            let bound: f64 = raw
                .parse()
                .map_err(|_| format!("invalid clip bound '{raw}'"))?;
            if !bound.is_finite() || bound <= 0.0 {
                return Err(format!("clip bound must be finite and > 0, got {raw}"));
            }
            return Ok(Some(Self::Clip(bound)));
        }

        if let Some(raw) = token.strip_prefix("savgol")
            && starts_numeric(raw)
        {
            let window = parse_window(raw)?;
            if window < 3 || window % 2 == 0 {
                return Err(format!("savgol window must be odd and >= 3, got {window}"));
            }
            return Ok(Some(Self::Savgol(window)));
        }

        for stat in RollingStat::ALL {
            if let Some(raw) = token.strip_prefix(stat.as_str())
                && starts_numeric(raw)
            {
                let window = parse_window(raw)?;
                return Ok(Some(Self::Rolling { stat, window }));
            }
        }

        Ok(None)
    }

    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        match *self {
            Self::AbsDiff => diff(values).into_iter().map(f64::abs).collect(),
            Self::Diff => diff(values),
            Self::Clip(bound) => values.iter().map(|v| v.clamp(-bound, bound)).collect(),
            Self::Rolling { stat, window } => rolling(values, window, stat),
            Self::Savgol(window) => savgol(values, window),
        }
    }
}

impl fmt::Display for FeatureOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbsDiff => f.write_str("absdiff"),
            Self::Diff => f.write_str("diff"),
            Self::Clip(bound) => write!(f, "clip{bound}"),
            Self::Rolling { stat, window } => write!(f, "{}{window}", stat.as_str()),
            Self::Savgol(window) => write!(f, "savgol{window}"),
        }
    }
}

fn starts_numeric(raw: &str) -> bool {
    raw.chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn parse_window(raw: &str) -> Result<usize, String> {
    let window: usize = raw
        .parse()
        .map_err(|_| format!("invalid window '{raw}'; expected a positive integer"))?;
    if window == 0 {
        return Err("window must be >= 1".to_string());
    }
    Ok(window)
}

/// One parsed feature name.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureExpr {
    pub name: String,
    pub base: String,
    pub ops: Vec<FeatureOp>,
}

impl FeatureExpr {
    pub fn parse(name: &str) -> Result<Self, String> {
        let body = name
            .strip_prefix(FEATURE_PREFIX)
            .ok_or_else(|| format!("feature '{name}' must start with '{FEATURE_PREFIX}'"))?;
        let tokens: Vec<&str> = body.split('_').collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(format!("feature '{name}' has an empty token"));
        }

        let mut base_len = tokens.len();
        let mut ops = Vec::new();
        for (idx, token) in tokens.iter().enumerate() {
            match FeatureOp::parse_token(token).map_err(|msg| format!("feature '{name}': {msg}"))? {
                Some(op) => {
                    if ops.is_empty() {
                        base_len = idx;
                    }
                    ops.push(op);
                }
                None if !ops.is_empty() => {
                    return Err(format!(
                        "feature '{name}': unknown operation '{token}' after the base"
                    ));
                }
                None => {}
            }
        }

        if base_len == 0 {
            return Err(format!("feature '{name}' has no base signal"));
        }
        Ok(Self {
            name: name.to_string(),
            base: tokens[..base_len].join("_"),
            ops,
        })
    }

    /// Resolves the base as a raw column, falling back to `f_<base>`.
    pub fn base_column<'s>(&self, series: &'s Series) -> DssResult<&'s [f64]> {
        if let Some(values) = series.column(&self.base) {
            return Ok(values);
        }
        series.require_column(&format!("{FEATURE_PREFIX}{}", self.base))
    }

    pub fn evaluate(&self, series: &Series) -> DssResult<Vec<f64>> {
        let mut values = self.base_column(series)?.to_vec();
        for op in &self.ops {
            values = op.apply(&values);
        }
        Ok(values)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParserParams {
    pub feature_names: Vec<String>,
}

/// Appends one column per requested feature name.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureParser {
    exprs: Vec<FeatureExpr>,
}

impl FeatureParser {
    /// Parses every name up front; grammar errors name the offending entry.
    pub fn new(params: ParserParams) -> DssResult<Self> {
        if params.feature_names.is_empty() {
            return Err(DssError::config("feature_names", "must be non-empty"));
        }
        let exprs = params
            .feature_names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                FeatureExpr::parse(name)
                    .map_err(|msg| DssError::config(format!("feature_names[{idx}]"), msg))
            })
            .collect::<DssResult<Vec<_>>>()?;
        Ok(Self { exprs })
    }

    pub fn exprs(&self) -> &[FeatureExpr] {
        &self.exprs
    }
}

impl TableStage for FeatureParser {
    fn kind(&self) -> &'static str {
        "parser"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "feature_names": self.exprs.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        // Later names may build on earlier outputs, so columns are written in order.
        for expr in &self.exprs {
            let values = expr.evaluate(&series)?;
            series.set_column(expr.name.clone(), values)?;
        }
        debug!(
            series_id = series.id(),
            features = self.exprs.len(),
            "parsed features appended"
        );
        Ok(Some(series))
    }
}
