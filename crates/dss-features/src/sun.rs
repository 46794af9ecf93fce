// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use dss_core::{DssError, DssResult, EventRecord, Series, TableStage};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;
const J2000_JULIAN_DAY: f64 = 2_451_545.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunFeature {
    Azimuth,
    Altitude,
}

impl SunFeature {
    pub fn column_name(self) -> &'static str {
        match self {
            Self::Azimuth => "f_sun_azimuth",
            Self::Altitude => "f_sun_altitude",
        }
    }
}

fn default_sun_features() -> Vec<SunFeature> {
    vec![SunFeature::Azimuth, SunFeature::Altitude]
}

/// Solar azimuth and altitude at the recording location, per row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SunStage {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_sun_features")]
    pub sun_features: Vec<SunFeature>,
}

impl SunStage {
    pub fn validate(&self) -> DssResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(DssError::config(
                "latitude",
                format!("must be within [-90, 90], got {}", self.latitude),
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(DssError::config(
                "longitude",
                format!("must be within [-180, 180], got {}", self.longitude),
            ));
        }
        if self.sun_features.is_empty() {
            return Err(DssError::config("sun_features", "must be non-empty"));
        }
        Ok(())
    }
}

impl TableStage for SunStage {
    fn kind(&self) -> &'static str {
        "sun"
    }

    fn params(&self) -> serde_json::Value {
        let mut features = self.sun_features.clone();
        features.sort();
        features.dedup();
        serde_json::json!({
            "latitude": self.latitude,
            "longitude": self.longitude,
            "sun_features": features,
        })
    }

    fn transform_series(
        &self,
        mut series: Series,
        _events: &[EventRecord],
    ) -> DssResult<Option<Series>> {
        let positions: Vec<SolarPosition> = series
            .timestamps()
            .iter()
            .map(|&ts| solar_position(ts, self.latitude, self.longitude))
            .collect();
        for feature in &self.sun_features {
            let values = positions
                .iter()
                .map(|p| match feature {
                    SunFeature::Azimuth => p.azimuth,
                    SunFeature::Altitude => p.altitude,
                })
                .collect();
            series.set_column(feature.column_name(), values)?;
        }
        Ok(Some(series))
    }
}

/// Geometric solar position in degrees; azimuth is clockwise from north.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolarPosition {
    pub azimuth: f64,
    pub altitude: f64,
}

/// NOAA solar position for a UTC unix timestamp (no refraction correction).
pub fn solar_position(timestamp: i64, latitude: f64, longitude: f64) -> SolarPosition {
    let ts = timestamp as f64;
    let julian_day = ts / SECONDS_PER_DAY + UNIX_EPOCH_JULIAN_DAY;
    let t = (julian_day - J2000_JULIAN_DAY) / 36_525.0;

    let mean_long = (280.46646 + t * (36_000.76983 + t * 0.000_303_2)).rem_euclid(360.0);
    let mean_anom = 357.52911 + t * (35_999.05029 - 0.000_153_7 * t);
    let ecc = 0.016_708_634 - t * (0.000_042_037 + 0.000_000_126_7 * t);

    let m = mean_anom.to_radians();
    let center = m.sin() * (1.914_602 - t * (0.004_817 + 0.000_014 * t))
        + (2.0 * m).sin() * (0.019_993 - 0.000_101 * t)
        + (3.0 * m).sin() * 0.000_289;
    let true_long = mean_long + center;
    let omega = (125.04 - 1_934.136 * t).to_radians();
    let apparent_long = true_long - 0.005_69 - 0.004_78 * omega.sin();

    let mean_obliquity =
        23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.000_59 - t * 0.001_813))) / 60.0) / 60.0;
    let obliquity = (mean_obliquity + 0.002_56 * omega.cos()).to_radians();
    let declination = (obliquity.sin() * apparent_long.to_radians().sin()).asin();

    let y = (obliquity / 2.0).tan().powi(2);
    let l0 = mean_long.to_radians();
    let eq_of_time = 4.0
        * (y * (2.0 * l0).sin() - 2.0 * ecc * m.sin()
            + 4.0 * ecc * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * ecc * ecc * (2.0 * m).sin())
        .to_degrees();

    let minutes = ts.rem_euclid(SECONDS_PER_DAY) / 60.0;
    let true_solar_time = (minutes + eq_of_time + 4.0 * longitude).rem_euclid(1_440.0);
    let hour_angle = true_solar_time / 4.0 - 180.0;

    let lat = latitude.to_radians();
    let cos_zenith = (lat.sin() * declination.sin()
        + lat.cos() * declination.cos() * hour_angle.to_radians().cos())
    .clamp(-1.0, 1.0);
    let zenith = cos_zenith.acos();
    let altitude = 90.0 - zenith.to_degrees();

    let denom = lat.cos() * zenith.sin();
    let azimuth = if denom.abs() < 1e-12 {
        180.0
    } else {
        let cos_az = ((lat.sin() * zenith.cos() - declination.sin()) / denom).clamp(-1.0, 1.0);
        let angle = cos_az.acos().to_degrees();
        if hour_angle > 0.0 {
            (angle + 180.0).rem_euclid(360.0)
        } else {
            (540.0 - angle).rem_euclid(360.0)
        }
    };

    SolarPosition { azimuth, altitude }
}
