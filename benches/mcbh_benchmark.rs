use criterion::{black_box, criterion_group, criterion_main, Criterion};
use h2matrix::{mcbh, Admissibility, ClusterTree, PointKernel, Problem};

extern crate blas_src;
extern crate lapack_src;

fn points(n: usize) -> Vec<f64> {
    (0..2 * n)
        .map(|i| {
            let t = (i / 2) as f64 / n as f64 * std::f64::consts::TAU;
            if i % 2 == 0 {
                t.cos()
            } else {
                t.sin()
            }
        })
        .collect()
}

pub fn construction_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    group.sample_size(10);

    for n in [512, 2048] {
        let pts = points(n);
        let kernel = PointKernel::regularised_inverse_distance(&pts, &pts, 2).unwrap();
        let tree = ClusterTree::from_points(&pts, 2, 32).unwrap();
        let problem = Problem::symmetric(kernel, tree, Admissibility::default()).unwrap();

        group.bench_function(format!("MCBH of {n}x{n} matrix"), |b| {
            b.iter(|| black_box(mcbh(&problem, 1e-6, 1, false).unwrap()))
        });
        group.bench_function(format!("MCBH and recompression of {n}x{n} matrix"), |b| {
            b.iter(|| {
                let mut h2 = mcbh(&problem, 1e-6, 1, false).unwrap();
                h2.svdcompress(1e-6).unwrap();
                black_box(h2)
            })
        });
    }
    group.finish();
}

pub fn matvec_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("matvec");
    group.sample_size(20);

    for n in [512, 2048] {
        let pts = points(n);
        let kernel = PointKernel::regularised_inverse_distance(&pts, &pts, 2).unwrap();
        let tree = ClusterTree::from_points(&pts, 2, 32).unwrap();
        let problem = Problem::symmetric(kernel, tree, Admissibility::default()).unwrap();
        let x = vec![1.0; n];

        let mut h2 = mcbh(&problem, 1e-6, 1, false).unwrap();
        group.bench_function(format!("Product with stored blocks ({n})"), |b| {
            b.iter(|| black_box(h2.dot(&x).unwrap()))
        });
        h2.mcbh(true).unwrap();
        group.bench_function(format!("Product with blocks on the fly ({n})"), |b| {
            b.iter(|| black_box(h2.dot(&x).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, construction_benchmark, matvec_benchmark);
criterion_main!(benches);
