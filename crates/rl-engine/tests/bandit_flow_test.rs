//! End-to-end feedback loops: bandify drives a policy on a labelled batch
//! and the policy learns the labels from bandit feedback alone.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cbandit_core::types::{ActionFeatures, Actions, Contexts, Labels};
    use cbandit_rl_engine::{
        AdfUcbPolicy, Bandify, EpsilonGreedy, Explore, LinUcbPolicy, Observer, Policy,
        SafePolicy, ThompsonPolicy,
    };
    use ndarray::{array, Array1};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn design() -> Contexts {
        array![
            [1.0, 2.0, 3.0, 3.0, -2.0, -1.0],
            [2.0, 3.0, 1.0, -1.0, -3.0, -2.0],
            [-1.0, -2.0, -1.0, 1.0, 3.0, 1.0],
            [-1.0, -2.0, 1.0, 1.0, 3.0, 1.0]
        ]
    }

    fn labels() -> Labels {
        array![2, 1, 0, 3]
    }

    #[test]
    fn test_linear_ucb_learns_from_random_actions() {
        let x = design();
        let y = labels();
        let mut policy = LinUcbPolicy::new(4, 6, 1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(42);

        assert_eq!(policy.draw(&x, &mut rng).unwrap(), array![0, 0, 0, 0]);

        let log_p = Array1::zeros(4);
        for _ in 0..100 {
            let actions: Actions = (0..4).map(|_| rng.gen_range(0..4)).collect();
            let rewards = Array1::from_iter(
                actions
                    .iter()
                    .zip(y.iter())
                    .map(|(a, l)| if a == l { 1.0 } else { 0.0 }),
            );
            policy.observe(&x, &actions, &log_p, &rewards).unwrap();
        }

        assert_eq!(policy.draw(&x, &mut rng).unwrap(), y);
    }

    #[test]
    fn test_linear_ucb_bandify_loop() {
        let x = design();
        let y = labels();
        let mut bandify = Bandify::new(LinUcbPolicy::new(4, 6, 1.0, 1.0));
        bandify.update_policy(bandify.policy());
        let mut rng = StdRng::seed_from_u64(42);

        assert_eq!(bandify.policy().draw(&x, &mut rng).unwrap(), array![0, 0, 0, 0]);
        for _ in 0..100 {
            bandify.step(&x, &y, &mut rng).unwrap();
        }
        assert_eq!(bandify.policy().draw(&x, &mut rng).unwrap(), y);
    }

    #[test]
    fn test_thompson_bandify_loop() {
        let x = design();
        let y = labels();
        let mut bandify = Bandify::new(ThompsonPolicy::new(4, 6, 1.0, 1.0));
        bandify.update_policy(bandify.policy());
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let feedback = bandify.step(&x, &y, &mut rng).unwrap();
            assert!(feedback.log_propensities.iter().all(|lp| *lp <= 1e-12));
        }
        let policy = bandify.policy();
        assert_eq!(Policy::max(&policy, &x).unwrap(), y);

        let probabilities = policy.lock().argmax_probabilities(&x).unwrap();
        for row in probabilities.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_adf_ucb_bandify_loop() {
        let x: ActionFeatures = array![
            [[2.0, 1.0, 3.0], [-2.0, 4.0, -1.0]],
            [[-3.0, 0.0, -1.0], [1.0, 0.0, 1.0]],
            [[-1.0, 0.01, -1.0], [0.1, 2.0, 2.0]]
        ];
        let y = array![0, 1, 1];
        let mut bandify = Bandify::new(AdfUcbPolicy::new(3, 1.0, 1.0));
        bandify.update_policy(bandify.policy());
        let mut rng = StdRng::seed_from_u64(42);

        assert_eq!(bandify.policy().draw(&x, &mut rng).unwrap(), array![1, 0, 1]);
        for _ in 0..100 {
            bandify.step(&x, &y, &mut rng).unwrap();
        }
        assert_eq!(bandify.policy().draw(&x, &mut rng).unwrap(), y);
        assert_eq!(Policy::max(&bandify.policy(), &x).unwrap(), y);
    }

    #[test]
    fn test_safe_policy_switches_to_trained_policy() {
        let x = design();
        let y = labels();

        let learner = Arc::new(Mutex::new(LinUcbPolicy::new(4, 6, 1.0, 1.0)));
        let safe = Explore::new(LinUcbPolicy::new(4, 6, 1.0, 1.0));
        let candidate = EpsilonGreedy::new(learner.clone(), 0.1).unwrap();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let safe_policy = SafePolicy::chernoff_hoeffding(safe, candidate, 0.99, None)
            .unwrap()
            .with_metrics(move |report| sink.lock().push(report.clone()));

        let mut bandify = Bandify::new(safe_policy);
        bandify.update_policy(learner.clone());
        bandify.update_policy(bandify.policy());
        let mut rng = StdRng::seed_from_u64(42);

        let mut switched_at = None;
        for step in 0..60 {
            let feedback = bandify.step(&x, &y, &mut rng).unwrap();
            if switched_at.is_none() {
                assert!(feedback
                    .log_propensities
                    .iter()
                    .all(|lp| (lp - 0.25f64.ln()).abs() < 1e-12));
            }
            if switched_at.is_none() && bandify.policy().lock().using_new() {
                switched_at = Some(step);
            }
        }

        // More than 100 rows are required, i.e. 26 batches of 4.
        assert_eq!(switched_at, Some(25));
        assert_eq!(Policy::max(&bandify.policy(), &x).unwrap(), y);

        let reports = reports.lock();
        assert_eq!(reports.len(), 60);
        assert!(reports.windows(2).all(|w| w[1].new_b >= w[0].new_b));
        assert!(reports.iter().skip(25).all(|r| r.using_new));
        assert!(reports.iter().take(25).all(|r| !r.using_new));
    }
}
