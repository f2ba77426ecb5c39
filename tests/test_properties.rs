mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use labsim::config::{CollectionOrder, SupplyItem};
use labsim::engine::quiz::AnswerKeyEntry;
use labsim::engine::{
    CollectOutcome, QuizAnswerKey, QuizEvaluator, QuizSubmission, ScoreTier, SupplyGate,
    TierPolicy, TrialBarrier, TrialId,
};
use labsim::outcome::{OhmsLaw, OutcomeModel, TrialInput, TrialOutcome};
use labsim::store::memory::InMemoryProgressStore;

use common::{load_fixture, session};

fn items(n: usize) -> Vec<SupplyItem> {
    (0..n)
        .map(|i| SupplyItem {
            id: format!("s{i}"),
            label: format!("Supply {i}"),
            required: true,
        })
        .collect()
}

fn key(n: usize) -> QuizAnswerKey {
    QuizAnswerKey(
        (0..n)
            .map(|i| AnswerKeyEntry {
                question_id: format!("q{i}"),
                correct_option_id: "right".into(),
            })
            .collect(),
    )
}

proptest! {
    #[test]
    fn supply_gate_fires_exactly_once(n in 1usize..8, picks in prop::collection::vec(0usize..8, 0..40)) {
        let mut gate = SupplyGate::new(items(n), CollectionOrder::Any);
        let mut fired = 0;
        let mut seen = HashSet::new();
        for pick in picks.into_iter().filter(|p| *p < n) {
            seen.insert(pick);
            if gate.collect(&format!("s{pick}")).unwrap() == CollectOutcome::AllCollected {
                fired += 1;
            }
        }
        prop_assert_eq!(fired, usize::from(seen.len() == n));
        prop_assert_eq!(gate.is_complete(), seen.len() == n);
        prop_assert_eq!(gate.missing().len(), n - seen.len());
    }

    #[test]
    fn barrier_opens_on_last_distinct_trial(n in 1usize..8, reports in prop::collection::vec(0usize..8, 0..40)) {
        let mut barrier = TrialBarrier::new((0..n).map(|i| TrialId::new(format!("t{i}"))));
        let mut seen = HashSet::new();
        let mut opened = 0;
        for r in reports.into_iter().filter(|r| *r < n) {
            seen.insert(r);
            let id = TrialId::new(format!("t{r}"));
            if barrier.submit(&id, TrialOutcome::classified("done")).unwrap() {
                opened += 1;
            }
            prop_assert_eq!(barrier.completed(), seen.len());
            prop_assert_eq!(barrier.is_open(), seen.len() == n);
        }
        prop_assert_eq!(opened, usize::from(seen.len() == n));
    }

    #[test]
    fn every_score_maps_to_one_tier(total in 1usize..30, correct_seed in 0usize..30) {
        let correct = correct_seed % (total + 1);
        let submission = (0..total).fold(QuizSubmission::new(), |sub, i| {
            sub.answer(format!("q{i}"), if i < correct { "right" } else { "wrong" })
        });
        let verdict = QuizEvaluator::default().evaluate(&submission, &key(total)).unwrap();
        prop_assert_eq!(verdict.correct, correct);
        prop_assert_eq!(verdict.total, total);
        prop_assert_eq!(verdict.tier == ScoreTier::A, correct == total);
        prop_assert_eq!(verdict.score, TierPolicy::default().score(verdict.tier));
        if correct < total && correct * 2 >= total && correct > 0 {
            prop_assert_eq!(verdict.tier, ScoreTier::B);
        }
        if correct * 2 < total || correct == 0 {
            prop_assert_eq!(verdict.tier, ScoreTier::C);
        }
    }

    #[test]
    fn ohms_law_is_pure(voltage in 0.0f64..240.0, resistance in 0.1f64..10_000.0) {
        let model: Arc<dyn OutcomeModel> = Arc::new(OhmsLaw::default());
        let input = TrialInput::new().with("voltage", voltage).with("resistance", resistance);
        prop_assert!(model.validate(&input).is_ok());
        let first = model.evaluate(&input);
        let second = model.evaluate(&input);
        prop_assert_eq!(&first, &second);
        let current = first.numeric_factor.unwrap();
        prop_assert!((current - voltage / resistance).abs() <= 0.0005 + 1e-9);
    }

    #[test]
    fn cancelled_retry_yields_the_same_outcome(voltage in 0.0f64..24.0, resistance in 0.5f64..100.0, cut in 1u64..2000) {
        let lab = load_fixture("ohms_law.yaml");
        let expected = lab.model.evaluate(&TrialInput::new().with("voltage", voltage).with("resistance", resistance));
        let (mut ctrl, clock) = session(lab, Arc::new(InMemoryProgressStore::new()));
        ctrl.start().unwrap();
        for id in ["battery", "resistor", "ammeter"] {
            ctrl.collect(id).unwrap();
        }
        ctrl.proceed_to_setup().unwrap();
        let input = TrialInput::new().with("voltage", voltage).with("resistance", resistance);
        ctrl.select_input("r1", input).unwrap();
        ctrl.begin_trials().unwrap();

        ctrl.start_trial("r1", None).unwrap();
        ctrl.drive(&clock, Duration::from_millis(cut));
        prop_assert!(ctrl.cancel_trial("r1").unwrap());
        ctrl.start_trial("r1", None).unwrap();
        ctrl.drive(&clock, Duration::from_secs(2));

        let outcome = ctrl.trial("r1").unwrap().record().outcome.clone();
        prop_assert_eq!(outcome, Some(expected));
    }
}
