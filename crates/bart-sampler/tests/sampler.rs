//! End-to-end sampler scenarios.

use bart_core::Real;
use bart_math::distributions::normal_cdf;
use bart_math::rng::MersenneTwister;
use bart_sampler::{
    load_from_file, save_to_file, BartFit, Control, Data, Model, VariableType,
};

/// y = 0.5 x₀ + ε with a pure-noise second column.
fn signal_data(n: usize, noise: Real, seed: u64) -> Data {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = MersenneTwister::new(seed);
    let x0: Vec<Real> = (0..n).map(|_| rng.next_real() * 10.0).collect();
    let x1: Vec<Real> = (0..n).map(|_| rng.next_real() * 10.0).collect();
    let y: Vec<Real> = (0..n)
        .map(|i| 0.5 * x0[i] + noise * rng.next_normal())
        .collect();
    Data::new(
        y,
        [x0, x1].concat(),
        vec![VariableType::Ordinal, VariableType::Ordinal],
        vec![100, 100],
        2.0 * noise,
    )
    .unwrap()
}

#[test]
fn deterministic_tiny_fit_recovers_noise_and_signal() {
    let noise = 0.2;
    let data = signal_data(100, noise, 7);
    let control = Control {
        num_trees: 10,
        num_burn_in: 100,
        num_samples: 5,
        rng_seed: 42,
        ..Control::default()
    };
    let mut fit = BartFit::new(control, Model::default(), data).unwrap();
    let results = fit.run_sampler();

    for &sigma in &results.sigma_samples {
        assert!(sigma > 0.0 && sigma < 3.0 * noise, "sigma {sigma} off scale");
    }
    // The signal variable is split far more often than the noise one
    let total_count = |j: usize| -> u32 {
        (0..results.num_samples)
            .map(|s| results.variable_count(j, s))
            .sum()
    };
    assert!(
        total_count(0) > total_count(1),
        "signal column under-used: {} vs {}",
        total_count(0),
        total_count(1)
    );
}

#[test]
fn binary_fit_separates_separable_classes() {
    let n = 60;
    let mut rng = MersenneTwister::new(31);
    // Two well-separated clusters on x0, noise on x1/x2
    let x0: Vec<Real> = (0..n)
        .map(|i| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            sign * (0.5 + 1.5 * rng.next_real())
        })
        .collect();
    let x1: Vec<Real> = (0..n).map(|_| rng.next_real()).collect();
    let x2: Vec<Real> = (0..n).map(|_| rng.next_real()).collect();
    let y: Vec<Real> = x0.iter().map(|&v| if v > 0.0 { 1.0 } else { 0.0 }).collect();
    let data = Data::new(
        y.clone(),
        [x0, x1, x2].concat(),
        vec![
            VariableType::Ordinal,
            VariableType::Ordinal,
            VariableType::Ordinal,
        ],
        vec![100, 100, 100],
        1.0,
    )
    .unwrap();
    let control = Control {
        response_is_binary: true,
        num_trees: 5,
        num_burn_in: 100,
        num_samples: 100,
        rng_seed: 37,
        ..Control::default()
    };
    let mut fit = BartFit::new(control, Model::default(), data).unwrap();
    let results = fit.run_sampler();

    for i in 0..n {
        let probability: Real = results
            .training_row(i)
            .iter()
            .map(|&f| normal_cdf(f))
            .sum::<Real>()
            / results.num_samples as Real;
        assert_eq!(
            probability > 0.5,
            y[i] > 0.0,
            "observation {i} misclassified (p = {probability})"
        );
    }
}

#[test]
fn rejected_predictor_swap_leaves_the_chain_unchanged() {
    let data = signal_data(30, 0.2, 11);
    let control = Control {
        num_trees: 3,
        num_burn_in: 30,
        num_samples: 5,
        rng_seed: 13,
        ..Control::default()
    };
    let mut touched = BartFit::new(control.clone(), Model::default(), data.clone()).unwrap();
    let mut witness = BartFit::new(control, Model::default(), data).unwrap();
    touched.run_sampler();
    witness.run_sampler();

    // A constant replacement column supports no cut points at all
    let outcome = touched.set_predictor(0, &vec![4.0; 30]);
    assert!(outcome.is_err(), "shrinking the cut set must fail");

    // The failed update consumed nothing: both chains continue in step
    let a = touched.run_sampler_for(0, 1);
    let b = witness.run_sampler_for(0, 1);
    assert_eq!(a.sigma_samples, b.sigma_samples);
    assert_eq!(a.training_samples, b.training_samples);
}

#[test]
fn adversarial_predictor_swap_either_rolls_back_or_stays_consistent() {
    let data = signal_data(30, 0.2, 17);
    let control = Control {
        num_trees: 3,
        num_burn_in: 30,
        num_samples: 5,
        rng_seed: 19,
        ..Control::default()
    };
    let mut touched = BartFit::new(control.clone(), Model::default(), data.clone()).unwrap();
    let mut witness = BartFit::new(control, Model::default(), data.clone()).unwrap();
    touched.run_sampler();
    witness.run_sampler();

    // Anti-correlate the signal column with itself; deep interactions
    // with the noise column may empty a leaf
    let flipped: Vec<Real> = (0..30).map(|i| 10.0 - data.column(0)[i]).collect();
    match touched.set_predictor(0, &flipped).unwrap() {
        true => {
            // Accepted: the update re-routed the partition; chain runs on
            let r = touched.run_sampler_for(0, 2);
            assert!(r.sigma_samples.iter().all(|&s| s > 0.0));
        }
        false => {
            // Rejected: pre-call state must be fully restored
            let a = touched.run_sampler_for(0, 1);
            let b = witness.run_sampler_for(0, 1);
            assert_eq!(a.sigma_samples, b.sigma_samples);
            assert_eq!(a.training_samples, b.training_samples);
        }
    }
}

#[test]
fn save_load_matches_an_uninterrupted_chain() {
    let make = || {
        let data = signal_data(40, 0.25, 23);
        let control = Control {
            num_trees: 4,
            num_burn_in: 20,
            num_samples: 10,
            rng_seed: 29,
            ..Control::default()
        };
        BartFit::new(control, Model::default(), data).unwrap()
    };
    let path = std::env::temp_dir().join(format!(
        "bart-equivalence-{}.state",
        std::process::id()
    ));

    // Interrupted chain: 10 samples, save, load, 10 more
    let mut first_half = make();
    first_half.run_sampler_for(20, 10);
    assert!(save_to_file(&first_half, &path));
    let mut resumed = load_from_file(&path).unwrap();
    let second_half = resumed.run_sampler_for(0, 10);
    std::fs::remove_file(&path).unwrap();

    // Uninterrupted chain: 20 samples in one go
    let mut straight = make();
    let all = straight.run_sampler_for(20, 20);

    for s in 0..10 {
        assert_eq!(all.sigma_samples[10 + s], second_half.sigma_samples[s]);
        for i in 0..40 {
            assert_eq!(
                all.training_sample(i, 10 + s),
                second_half.training_sample(i, s)
            );
        }
        for j in 0..2 {
            assert_eq!(
                all.variable_count(j, 10 + s),
                second_half.variable_count(j, s)
            );
        }
    }
}

#[test]
fn empty_test_set_allocates_no_test_buffers() {
    let data = signal_data(30, 0.2, 41);
    let control = Control {
        num_trees: 4,
        num_burn_in: 10,
        num_samples: 3,
        rng_seed: 43,
        ..Control::default()
    };
    let mut fit = BartFit::new(control, Model::default(), data).unwrap();
    let results = fit.run_sampler();
    assert_eq!(results.num_test_observations, 0);
    assert!(results.test_samples.is_empty());
    assert_eq!(results.training_samples.len(), 30 * 3);
}

#[test]
fn doubled_weights_match_duplicated_observations() {
    let n = 40;
    let noise = 0.3;
    let base = signal_data(n, noise, 47);

    // Weighted fit: every weight doubled
    let weighted = base.clone().with_weights(vec![2.0; n]).unwrap();
    let control = Control {
        num_trees: 5,
        num_burn_in: 100,
        num_samples: 50,
        rng_seed: 53,
        ..Control::default()
    };
    let mut weighted_fit = BartFit::new(control.clone(), Model::default(), weighted).unwrap();
    let weighted_results = weighted_fit.run_sampler();

    // Duplicated fit: every observation twice
    let mut x_dup = Vec::with_capacity(2 * n * 2);
    for j in 0..2 {
        for &v in base.column(j) {
            x_dup.push(v);
            x_dup.push(v);
        }
    }
    let mut y_dup = Vec::with_capacity(2 * n);
    for &v in base.y() {
        y_dup.push(v);
        y_dup.push(v);
    }
    let duplicated = Data::new(
        y_dup,
        x_dup,
        vec![VariableType::Ordinal, VariableType::Ordinal],
        vec![100, 100],
        2.0 * noise,
    )
    .unwrap();
    let mut duplicated_fit = BartFit::new(control, Model::default(), duplicated).unwrap();
    let duplicated_results = duplicated_fit.run_sampler();

    // The two posteriors agree on the residual standard deviation
    let mean = |r: &[Real]| r.iter().sum::<Real>() / r.len() as Real;
    let mw = mean(&weighted_results.sigma_samples);
    let md = mean(&duplicated_results.sigma_samples);
    let ratio = mw / md;
    assert!(
        (0.6..=1.6).contains(&ratio),
        "sigma posteriors diverge: weighted {mw}, duplicated {md}"
    );
}

#[test]
fn test_predictions_follow_the_training_signal() {
    let n = 80;
    let data = signal_data(n, 0.2, 59);
    // Probe the fitted surface at x0 = 2 and x0 = 8
    let x_test = vec![2.0, 5.0, 8.0, 5.0];
    let data = data.with_test_predictors(x_test, 2).unwrap();
    let control = Control {
        num_trees: 10,
        num_burn_in: 100,
        num_samples: 20,
        rng_seed: 61,
        ..Control::default()
    };
    let mut fit = BartFit::new(control, Model::default(), data).unwrap();
    let results = fit.run_sampler();

    let mean = |i: usize| -> Real {
        results.test_row(i).iter().sum::<Real>() / results.num_samples as Real
    };
    // True surface: 0.5 x0, so 1.0 and 4.0
    assert!((mean(0) - 1.0).abs() < 0.8, "f(2) ≈ {}", mean(0));
    assert!((mean(1) - 4.0).abs() < 0.8, "f(8) ≈ {}", mean(1));
    assert!(mean(1) - mean(0) > 1.0, "fitted surface lost the slope");
}
