// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dss_bench::night;
use dss_core::TableStage;
use dss_features::{FeatureParser, ParserParams, RollingStat, rolling, savgol};

fn bench_rolling_stats(c: &mut Criterion) {
    let series = night("bench", 17_280).expect("bench series should be valid");
    let values = series.column("anglez").expect("anglez column should exist").to_vec();
    let mut group = c.benchmark_group("rolling_17280");
    for stat in [RollingStat::Mean, RollingStat::Median, RollingStat::Std, RollingStat::Kurt] {
        for window in [12usize, 60, 360] {
            group.bench_with_input(
                BenchmarkId::new(stat.as_str(), window),
                &window,
                |b, &window| b.iter(|| rolling(black_box(&values), window, stat)),
            );
        }
    }
    group.bench_function("savgol_61", |b| b.iter(|| savgol(black_box(&values), 61)));
    group.finish();
}

fn bench_feature_parser(c: &mut Criterion) {
    let series = night("bench", 17_280).expect("bench series should be valid");
    let parser = FeatureParser::new(ParserParams {
        feature_names: vec![
            "f_anglez_absdiff_median60".into(),
            "f_enmo_clip1_mean36_savgol11".into(),
            "f_anglez_std12".into(),
            "f_enmo_max360".into(),
        ],
    })
    .expect("parser should build");

    c.bench_function("feature_parser_4_features_17280", |b| {
        b.iter(|| {
            parser
                .transform_series(black_box(series.clone()), &[])
                .expect("parser should succeed")
        })
    });
}

criterion_group!(benches, bench_rolling_stats, bench_feature_parser);
criterion_main!(benches);
