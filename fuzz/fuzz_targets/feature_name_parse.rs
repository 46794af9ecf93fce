// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use dss_core::{Series, TableStage};
use dss_features::{FeatureExpr, FeatureParser, ParserParams};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;

const ROWS: usize = 32;

fn series() -> Series {
    let columns = BTreeMap::from([
        ("anglez".to_string(), (0..ROWS).map(|i| (i as f64 * 0.7).sin() * 40.0).collect()),
        ("enmo".to_string(), (0..ROWS).map(|i| (i % 5) as f64 * 0.01).collect()),
    ]);
    Series::new(
        "fuzz",
        (0..ROWS as u64).collect(),
        (0..ROWS as i64).map(|i| 1_534_285_805 + 5 * i).collect(),
        0,
        columns,
    )
    .expect("fuzz series must be valid")
}

fuzz_target!(|data: &[u8]| {
    let Ok(name) = std::str::from_utf8(data) else {
        return;
    };
    if name.len() > 256 {
        return;
    }
    let Ok(expr) = FeatureExpr::parse(name) else {
        return;
    };
    assert_eq!(expr.name, name);
    assert!(!expr.base.is_empty());

    let Ok(parser) = FeatureParser::new(ParserParams {
        feature_names: vec![name.to_string()],
    }) else {
        return;
    };
    if let Ok(Some(out)) = parser.transform_series(series(), &[]) {
        let column = out.column(name).expect("parsed feature must be appended");
        assert_eq!(column.len(), ROWS);
    }
});
