use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use kinfit::{Candidate, FitterConfig, MomentumRefitter, Vec4};
use rayon::ThreadPoolBuilder;

const BS_MASS: f64 = 5366.3;
const DS_MASS: f64 = 1968.49;
const DS_STAR_MASS: f64 = 2112.34;
const PI_MASS: f64 = 139.57018;

fn momentum(mass: f64, m1: f64, m2: f64) -> f64 {
    ((mass * mass - (m1 + m2).powi(2)) * (mass * mass - (m1 - m2).powi(2))).sqrt() / (2.0 * mass)
}

/// Decay `parent` isotropically into particles of masses `m1` and `m2`.
fn decay(rng: &mut fastrand::Rng, parent: Vec4, m1: f64, m2: f64) -> [Vec4; 2] {
    let p = momentum(parent.m(), m1, m2);
    let cos_theta = rng.f64() * 2.0 - 1.0;
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    let phi = rng.f64() * std::f64::consts::TAU;
    let u = [sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta];
    let u = u.map(|c| p * c);
    let beta = parent.beta();
    [
        Vec4::from_momentum(u[0], u[1], u[2], m1).boost(&beta),
        Vec4::from_momentum(-u[0], -u[1], -u[2], m2).boost(&beta),
    ]
}

fn single_precision(p4: Vec4) -> [f64; 4] {
    <[f64; 4]>::from(p4).map(|c| c as f32 as f64)
}

/// $`B_s \to D_s^{(*)} \pi`$ candidates, with $`D_s^* \to D_s \gamma`$ and an unmeasured photon
/// when `with_missing` is set.
fn candidates(n: usize, with_missing: bool) -> Vec<Candidate> {
    let mut rng = fastrand::Rng::with_seed(0x6b1f);
    (0..n)
        .map(|_| {
            let pz = 2e4 + rng.f64() * 2e5;
            let bs = Vec4::from_momentum(0.0, 0.0, pz, BS_MASS);
            let (ds, pi, missing) = if with_missing {
                let [ds_star, pi] = decay(&mut rng, bs, DS_STAR_MASS, PI_MASS);
                let [ds, _] = decay(&mut rng, ds_star, DS_MASS, 0.0);
                (ds, pi, Some([0.0; 4]))
            } else {
                let [ds, pi] = decay(&mut rng, bs, DS_MASS, PI_MASS);
                (ds, pi, None)
            };
            Candidate {
                mother: single_precision(bs),
                daughter1: single_precision(ds),
                daughter2: single_precision(pi),
                missing,
            }
        })
        .collect()
}

fn refit_benchmark(c: &mut Criterion) {
    let config = FitterConfig::new(BS_MASS, DS_MASS, PI_MASS);
    let three_body = MomentumRefitter::new(config.clone()).unwrap();
    let four_body_config = config.with_starred(DS_STAR_MASS).with_missing(0.0);
    let four_body = MomentumRefitter::new(four_body_config).unwrap();

    let mut group = c.benchmark_group("Single Candidate");
    for (name, fitter, with_missing) in [
        ("three-body", &three_body, false),
        ("four-body", &four_body, true),
    ] {
        let inputs = candidates(256, with_missing);
        let mut index = 0;
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    index = (index + 1) % inputs.len();
                    inputs[index]
                },
                |mut candidate| black_box(fitter.fit_candidate(&mut candidate)),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();

    let mut group = c.benchmark_group("Batch Refit Performance");
    let n_threads: Vec<usize> = (0..)
        .map(|x| 1 << x)
        .take_while(|&p| p <= num_cpus::get())
        .collect();
    let inputs = candidates(10_000, false);
    for threads in n_threads {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &_threads| {
                b.iter_batched(
                    || inputs.clone(),
                    |mut batch| pool.install(|| black_box(three_body.fit_batch(&mut batch))),
                    BatchSize::LargeInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = refit_benchmark
}
criterion_main!(benches);
