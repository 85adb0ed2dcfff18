use std::collections::BTreeSet;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use citygml_tools::lod_filter::{self, LodFilterMode, LodFilterOptions};
use citygml_tools::model::{
    Appearance, Feature, Geometry, GeometryHeader, LinearRingGeom, MultiSurfaceGeom, PolygonGeom,
    SurfaceData, Target, X3DMaterial,
};
use citygml_tools::reproject::{ReprojectOptions, Reprojector};

fn synthetic_building(n: usize) -> Feature {
    let mut building = Feature::new(format!("b{n}"), "Building");
    for lod in 1..=2u8 {
        let surface_id = format!("b{n}_g{lod}");
        building.geometries.push((
            format!("lod{lod}MultiSurface"),
            lod,
            Geometry::MultiSurface(MultiSurfaceGeom {
                header: GeometryHeader {
                    id: None,
                    srs_name: if lod == 1 { Some("EPSG:25832".into()) } else { None },
                },
                surface_members: vec![PolygonGeom {
                    header: GeometryHeader {
                        id: Some(surface_id.clone()),
                        srs_name: None,
                    },
                    exterior: LinearRingGeom {
                        header: GeometryHeader::default(),
                        points: vec![
                            [691000.0 + n as f64, 5336000.0, 0.0],
                            [691010.0 + n as f64, 5336000.0, 0.0],
                            [691010.0 + n as f64, 5336010.0, 0.0],
                            [691000.0 + n as f64, 5336000.0, 0.0],
                        ],
                    },
                    interiors: vec![],
                }],
            }),
        ));
        if lod == 2 {
            building.local_appearances.push(Appearance {
                id: format!("a{n}"),
                theme: "visual".into(),
                surface_data: vec![SurfaceData::X3DMaterial(X3DMaterial {
                    id: format!("m{n}"),
                    diffuse_color: [0.8, 0.8, 0.8],
                    targets: vec![Target::new(format!("#{surface_id}"))],
                })],
            });
        }
    }
    building
}

fn synthetic_batch(count: usize) -> Vec<Feature> {
    (0..count).map(synthetic_building).collect()
}

fn bench_filter_lods(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_lods_remove_lod2");
    for &size in &[100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("buildings", size), &size, |b, &size| {
            b.iter_batched(
                || synthetic_batch(size),
                |mut batch| {
                    let opts = LodFilterOptions {
                        lods: BTreeSet::from([2]),
                        mode: LodFilterMode::Remove,
                        keep_empty_objects: true,
                        update_extents: false,
                    };
                    let mut global = Vec::new();
                    let mut groups = Vec::new();
                    let stats = lod_filter::apply(&mut batch, &mut global, &mut groups, &opts);
                    black_box(stats);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_reproject(c: &mut Criterion) {
    let mut group = c.benchmark_group("reproject_batch");
    for &size in &[100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("buildings", size), &size, |b, &size| {
            let reprojector = Reprojector::new(ReprojectOptions {
                target_crs: "EPSG:25832".into(),
                source_swap_xy: false,
                keep_height_values: true,
                fallback_srs: Some("EPSG:25832".into()),
            });
            b.iter_batched(
                || synthetic_batch(size),
                |mut batch| {
                    // A same-CRS reprojection still exercises the per-point walk and
                    // the transform cache's lookup path without depending on a PROJ
                    // database being installed wherever this benchmark runs.
                    let mut appearances = Vec::new();
                    let _ = reprojector.apply(&mut batch, &mut appearances);
                    black_box(&batch);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_filter_lods, bench_reproject);
criterion_main!(benches);
