//! Performance benchmarks for the merge/diff engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use devtwin_core::{props, DeviceTwin, PropertyMap, PropertyValue, TwinConfig};
use std::hint::black_box;

/// `width` top-level keys, each holding a three-level nested map
fn wide_tree(width: usize, seed: i64) -> PropertyMap {
    (0..width)
        .map(|i| {
            let value = props! {
                "sensor" => props! {
                    "reading" => props! { "value" => seed + i as i64, "unit" => "C" },
                    "enabled" => true,
                },
                "label" => format!("device-{i}"),
            };
            (format!("key{i}"), PropertyValue::from(value))
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for width in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("noop", width), &width, |b, &width| {
            let mut twin = DeviceTwin::new();
            let tree = wide_tree(width, 0);
            twin.update_reported_property(&tree).ok();
            b.iter(|| twin.update_reported_property(black_box(&tree)))
        });

        group.bench_with_input(BenchmarkId::new("change_all", width), &width, |b, &width| {
            let mut twin = DeviceTwin::new();
            let trees = [wide_tree(width, 0), wide_tree(width, 1)];
            let mut flip = 0;
            b.iter(|| {
                flip ^= 1;
                twin.update_reported_property(black_box(&trees[flip]))
            })
        });

        group.bench_with_input(BenchmarkId::new("with_metadata", width), &width, |b, &width| {
            let mut twin = DeviceTwin::with_config(TwinConfig {
                metadata: true,
                ..TwinConfig::default()
            });
            let trees = [wide_tree(width, 0), wide_tree(width, 1)];
            let mut flip = 0;
            b.iter(|| {
                flip ^= 1;
                twin.update_desired_property(black_box(&trees[flip]))
            })
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let mut source = DeviceTwin::with_config(TwinConfig {
        metadata: true,
        tags: true,
        ..TwinConfig::default()
    });
    source.update_desired_property(&wide_tree(100, 0)).ok();
    source.update_reported_property(&wide_tree(100, 1)).ok();
    let json = source.to_json().unwrap_or_default();

    group.bench_function("to_json", |b| b.iter(|| black_box(&source).to_json()));

    group.bench_function("update_twin_json", |b| {
        b.iter(|| {
            let mut twin = DeviceTwin::with_config(TwinConfig {
                metadata: true,
                tags: true,
                ..TwinConfig::default()
            });
            twin.update_twin_json(black_box(&json))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_codec);
criterion_main!(benches);
