// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Feature stages. Each stage appends `f_*` columns to every series and
//! never removes one, so feature stages commute with each other.

pub mod calendar;
pub mod parser;
pub mod rolling;
pub mod sun;

pub use calendar::{TimeFeature, TimeStage};
pub use parser::{FEATURE_PREFIX, FeatureExpr, FeatureOp, FeatureParser, ParserParams};
pub use rolling::{RollingStat, diff, rolling, savgol};
pub use sun::{SolarPosition, SunFeature, SunStage, solar_position};
