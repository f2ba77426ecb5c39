//! Quiz evaluation.
//!
//! Scoring is a pure function of the submission and the answer key; it has
//! no side effects and never touches the session.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Correct answer for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKeyEntry {
    /// Question id
    #[serde(rename = "id")]
    pub question_id: String,
    /// Id of the correct option
    #[serde(rename = "correct")]
    pub correct_option_id: String,
}

/// Ordered answer key of a lab's quiz.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuizAnswerKey(pub Vec<AnswerKeyEntry>);

impl QuizAnswerKey {
    /// Number of questions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the key has no questions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the entries in question order.
    pub fn iter(&self) -> std::slice::Iter<'_, AnswerKeyEntry> {
        self.0.iter()
    }
}

/// One slot of a submission. `chosen == None` means unanswered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswer {
    /// Question id
    pub question_id: String,
    /// Chosen option id
    #[serde(default)]
    pub chosen: Option<String>,
}

/// The learner's answers, in question order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuizSubmission(pub Vec<QuizAnswer>);

impl QuizSubmission {
    /// Creates an empty submission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the submission with one more answered slot.
    #[must_use]
    pub fn answer(mut self, question_id: impl Into<String>, chosen: impl Into<String>) -> Self {
        self.0.push(QuizAnswer {
            question_id: question_id.into(),
            chosen: Some(chosen.into()),
        });
        self
    }

    /// Returns the submission with one more unanswered slot.
    #[must_use]
    pub fn skip(mut self, question_id: impl Into<String>) -> Self {
        self.0.push(QuizAnswer {
            question_id: question_id.into(),
            chosen: None,
        });
        self
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the submission has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Score band of an evaluated submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreTier {
    /// All questions correct
    A,
    /// Partial credit
    B,
    /// Below the partial-credit threshold
    C,
}

impl ScoreTier {
    /// Lower-case label for metrics and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
        }
    }

    /// Feedback class shown to the learner for this tier.
    #[must_use]
    pub const fn feedback(self) -> FeedbackClass {
        match self {
            Self::A => FeedbackClass::Celebratory,
            Self::B => FeedbackClass::EncouragingWithCorrection,
            Self::C => FeedbackClass::RemedialReteach,
        }
    }

    /// Whether this tier ends the lab.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::A)
    }
}

impl std::fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        })
    }
}

/// Kind of feedback narrated after a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackClass {
    /// Perfect score
    Celebratory,
    /// Partial credit, with the right answers explained
    EncouragingWithCorrection,
    /// Low score, concepts re-taught before retrying
    RemedialReteach,
}

/// Maps a correct count to a tier and a 0..=100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// Minimum correct answers for tier B; `None` means half the questions,
    /// rounded up
    pub partial_credit_min: Option<usize>,
    /// Scores for tiers A, B, C
    pub scores: [u8; 3],
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            partial_credit_min: None,
            scores: [100, 75, 50],
        }
    }
}

impl TierPolicy {
    /// Tier for `correct` out of `total`.
    #[must_use]
    pub fn tier(&self, correct: usize, total: usize) -> ScoreTier {
        let threshold = self.partial_credit_min.unwrap_or(total.div_ceil(2));
        if total > 0 && correct == total {
            ScoreTier::A
        } else if correct >= threshold.max(1) {
            ScoreTier::B
        } else {
            ScoreTier::C
        }
    }

    /// Score awarded for a tier.
    #[must_use]
    pub const fn score(&self, tier: ScoreTier) -> u8 {
        match tier {
            ScoreTier::A => self.scores[0],
            ScoreTier::B => self.scores[1],
            ScoreTier::C => self.scores[2],
        }
    }
}

/// Result of evaluating one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizVerdict {
    /// Correct answers
    pub correct: usize,
    /// Questions in the key
    pub total: usize,
    /// Score band
    pub tier: ScoreTier,
    /// Score in 0..=100
    pub score: u8,
    /// Per-question correctness, in key order
    pub per_question: Vec<bool>,
}

impl QuizVerdict {
    /// Feedback class for this verdict.
    #[must_use]
    pub const fn feedback(&self) -> FeedbackClass {
        self.tier.feedback()
    }
}

/// Scores submissions against an answer key.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuizEvaluator {
    policy: TierPolicy,
}

impl QuizEvaluator {
    /// Creates an evaluator using `policy`.
    #[must_use]
    pub const fn new(policy: TierPolicy) -> Self {
        Self { policy }
    }

    /// Evaluates a submission.
    ///
    /// Slot `i` of the submission must answer question `i` of the key.
    ///
    /// # Errors
    ///
    /// `IncompleteSubmission` when the submission has the wrong number of
    /// slots, a slot names a different question, or a slot is unanswered.
    pub fn evaluate(
        &self,
        submission: &QuizSubmission,
        key: &QuizAnswerKey,
    ) -> Result<QuizVerdict, EngineError> {
        let answered = submission
            .0
            .iter()
            .zip(key.iter())
            .filter(|(answer, entry)| {
                answer.question_id == entry.question_id
                    && answer.chosen.as_deref().is_some_and(|c| !c.is_empty())
            })
            .count();
        if submission.len() != key.len() || answered != key.len() {
            return Err(EngineError::IncompleteSubmission {
                answered,
                expected: key.len(),
            });
        }

        let per_question: Vec<bool> = submission
            .0
            .iter()
            .zip(key.iter())
            .map(|(answer, entry)| answer.chosen.as_deref() == Some(entry.correct_option_id.as_str()))
            .collect();
        let correct = per_question.iter().filter(|ok| **ok).count();
        let total = key.len();
        let tier = self.policy.tier(correct, total);

        Ok(QuizVerdict {
            correct,
            total,
            tier,
            score: self.policy.score(tier),
            per_question,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> QuizAnswerKey {
        QuizAnswerKey(
            [("q1", "b"), ("q2", "a"), ("q3", "c")]
                .into_iter()
                .map(|(q, c)| AnswerKeyEntry {
                    question_id: q.into(),
                    correct_option_id: c.into(),
                })
                .collect(),
        )
    }

    fn submit(choices: [&str; 3]) -> QuizSubmission {
        ["q1", "q2", "q3"]
            .into_iter()
            .zip(choices)
            .fold(QuizSubmission::new(), |sub, (q, c)| sub.answer(q, c))
    }

    #[test]
    fn perfect_score_is_tier_a() {
        let verdict = QuizEvaluator::default().evaluate(&submit(["b", "a", "c"]), &key()).unwrap();
        assert_eq!(verdict.correct, 3);
        assert_eq!(verdict.tier, ScoreTier::A);
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.feedback(), FeedbackClass::Celebratory);
        assert!(verdict.tier.is_terminal());
    }

    #[test]
    fn two_of_three_is_tier_b() {
        let verdict = QuizEvaluator::default().evaluate(&submit(["b", "a", "a"]), &key()).unwrap();
        assert_eq!(verdict.correct, 2);
        assert_eq!(verdict.tier, ScoreTier::B);
        assert_eq!(verdict.score, 75);
        assert_eq!(verdict.per_question, vec![true, true, false]);
        assert_eq!(verdict.feedback(), FeedbackClass::EncouragingWithCorrection);
    }

    #[test]
    fn one_of_three_is_tier_c() {
        let verdict = QuizEvaluator::default().evaluate(&submit(["b", "c", "a"]), &key()).unwrap();
        assert_eq!(verdict.tier, ScoreTier::C);
        assert_eq!(verdict.score, 50);
        assert_eq!(verdict.feedback(), FeedbackClass::RemedialReteach);
    }

    #[test]
    fn zero_correct_is_tier_c() {
        let verdict = QuizEvaluator::default().evaluate(&submit(["a", "b", "a"]), &key()).unwrap();
        assert_eq!(verdict.correct, 0);
        assert_eq!(verdict.tier, ScoreTier::C);
    }

    #[test]
    fn missing_answer_is_incomplete() {
        let sub = QuizSubmission::new().answer("q1", "b").skip("q2").answer("q3", "c");
        let err = QuizEvaluator::default().evaluate(&sub, &key()).unwrap_err();
        assert_eq!(
            err,
            EngineError::IncompleteSubmission {
                answered: 2,
                expected: 3
            }
        );
    }

    #[test]
    fn short_submission_is_incomplete() {
        let sub = QuizSubmission::new().answer("q1", "b");
        let err = QuizEvaluator::default().evaluate(&sub, &key()).unwrap_err();
        assert!(matches!(err, EngineError::IncompleteSubmission { answered: 1, expected: 3 }));
    }

    #[test]
    fn misaligned_slot_is_incomplete() {
        let sub = QuizSubmission::new().answer("q1", "b").answer("q3", "c").answer("q2", "a");
        assert!(QuizEvaluator::default().evaluate(&sub, &key()).is_err());
    }

    #[test]
    fn even_length_threshold_rounds_up() {
        let policy = TierPolicy::default();
        assert_eq!(policy.tier(2, 4), ScoreTier::B);
        assert_eq!(policy.tier(1, 4), ScoreTier::C);
        assert_eq!(policy.tier(3, 5), ScoreTier::B);
        assert_eq!(policy.tier(2, 5), ScoreTier::C);
    }

    #[test]
    fn explicit_partial_credit_threshold() {
        let policy = TierPolicy {
            partial_credit_min: Some(3),
            scores: [100, 80, 40],
        };
        assert_eq!(policy.tier(2, 4), ScoreTier::C);
        assert_eq!(policy.tier(3, 4), ScoreTier::B);
        assert_eq!(policy.score(ScoreTier::B), 80);
    }

    #[test]
    fn evaluation_is_pure() {
        let evaluator = QuizEvaluator::default();
        let sub = submit(["b", "a", "a"]);
        let first = evaluator.evaluate(&sub, &key()).unwrap();
        let second = evaluator.evaluate(&sub, &key()).unwrap();
        assert_eq!(first, second);
    }
}
