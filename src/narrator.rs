//! Outbound narration.
//!
//! Every phase transition produces exactly one [`NarratorMessage`] on the
//! narrator channel. The channel is fire-and-forget: a dropped receiver or a
//! slow consumer never affects the session.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::engine::quiz::ScoreTier;
use crate::engine::state::Phase;

/// Narrator avatar mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    /// Friendly default
    Happy,
    /// Teaching a concept
    Explaining,
    /// Learner needs help
    Concerned,
    /// Success
    Celebrating,
    /// Waiting on something
    Thinking,
}

/// Suggested follow-up the presentation layer can render as a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickAction {
    /// Button label
    pub label: String,
    /// Action identifier sent back when pressed
    pub action: String,
}

/// One message to the narrator channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarratorMessage {
    /// Rendered text
    pub text: String,
    /// Avatar mood
    pub emotion: Emotion,
    /// Suggested follow-ups
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quick_actions: Vec<QuickAction>,
}

/// A configurable narration line before placeholder rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationLine {
    /// Text with `{lab}`-style placeholders
    pub text: String,
    /// Mood; falls back to the line's default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    /// Suggested follow-ups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_actions: Vec<QuickAction>,
}

impl NarrationLine {
    fn new(text: &str, emotion: Emotion) -> Self {
        Self {
            text: text.to_owned(),
            emotion: Some(emotion),
            quick_actions: Vec::new(),
        }
    }

    fn action(mut self, label: &str, action: &str) -> Self {
        self.quick_actions.push(QuickAction {
            label: label.to_owned(),
            action: action.to_owned(),
        });
        self
    }
}

/// Feedback lines per score tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackLines {
    /// Perfect score
    pub tier_a: NarrationLine,
    /// Partial credit
    pub tier_b: NarrationLine,
    /// Low score
    pub tier_c: NarrationLine,
}

impl Default for FeedbackLines {
    fn default() -> Self {
        Self {
            tier_a: NarrationLine::new(
                "Perfect! {correct} out of {total} correct. You earned {xp} XP!",
                Emotion::Celebrating,
            ),
            tier_b: NarrationLine::new(
                "Good effort! {correct} out of {total} correct. Let's look at the one you missed.",
                Emotion::Happy,
            )
            .action("Try again", "retry_quiz"),
            tier_c: NarrationLine::new(
                "Let's review the key ideas together and give it another go.",
                Emotion::Concerned,
            )
            .action("Review results", "review")
            .action("Try again", "retry_quiz"),
        }
    }
}

/// Narration for every transition of a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationScript {
    /// Entering `Intro` (used on reset when `restart` is absent)
    pub intro: NarrationLine,
    /// Entering `CollectSupplies`
    pub collect_supplies: NarrationLine,
    /// Entering `Setup`
    pub setup: NarrationLine,
    /// Entering `Running`
    pub running: NarrationLine,
    /// Entering `Result`
    pub result: NarrationLine,
    /// Entering `Quiz` from `Result`
    pub quiz: NarrationLine,
    /// After each evaluated submission
    pub feedback: FeedbackLines,
    /// Reset back to `Intro`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<NarrationLine>,
}

impl Default for NarrationScript {
    fn default() -> Self {
        Self {
            intro: NarrationLine::new("Welcome to {lab}! Let's get started.", Emotion::Happy),
            collect_supplies: NarrationLine::new(
                "First, let's collect everything we need.",
                Emotion::Explaining,
            ),
            setup: NarrationLine::new(
                "We have all our supplies. Now set up the experiment.",
                Emotion::Happy,
            ),
            running: NarrationLine::new(
                "The experiment is running. Watch closely!",
                Emotion::Thinking,
            ),
            result: NarrationLine::new(
                "Here are the results. What do you notice?",
                Emotion::Explaining,
            )
            .action("Take the quiz", "open_quiz"),
            quiz: NarrationLine::new("Time for a quick quiz!", Emotion::Happy),
            feedback: FeedbackLines::default(),
            restart: Some(NarrationLine::new(
                "Let's start {lab} again from the beginning.",
                Emotion::Happy,
            )),
        }
    }
}

impl NarrationScript {
    fn phase_line(&self, phase: Phase) -> &NarrationLine {
        match phase {
            Phase::Intro => &self.intro,
            Phase::CollectSupplies => &self.collect_supplies,
            Phase::Setup => &self.setup,
            Phase::Running => &self.running,
            Phase::Result => &self.result,
            Phase::Quiz => &self.quiz,
            Phase::Complete => &self.feedback.tier_a,
        }
    }

    fn feedback_line(&self, tier: ScoreTier) -> &NarrationLine {
        match tier {
            ScoreTier::A => &self.feedback.tier_a,
            ScoreTier::B => &self.feedback.tier_b,
            ScoreTier::C => &self.feedback.tier_c,
        }
    }
}

/// Values substituted into narration placeholders.
#[derive(Debug, Clone, Default)]
pub struct NarrationContext {
    /// Lab title, `{lab}`
    pub lab: String,
    /// Correct answers, `{correct}`
    pub correct: usize,
    /// Questions, `{total}`
    pub total: usize,
    /// Score, `{score}`
    pub score: u8,
    /// XP awarded by the latest grant, `{xp}`
    pub xp: u32,
    /// Quiz attempt number, `{attempt}`
    pub attempt: u32,
}

impl NarrationContext {
    fn render(&self, template: &str) -> String {
        template
            .replace("{lab}", &self.lab)
            .replace("{correct}", &self.correct.to_string())
            .replace("{total}", &self.total.to_string())
            .replace("{score}", &self.score.to_string())
            .replace("{xp}", &self.xp.to_string())
            .replace("{attempt}", &self.attempt.to_string())
    }
}

/// Default mood for tier feedback when the line does not set one.
#[must_use]
pub const fn emotion_for_tier(tier: ScoreTier) -> Emotion {
    match tier {
        ScoreTier::A => Emotion::Celebrating,
        ScoreTier::B => Emotion::Happy,
        ScoreTier::C => Emotion::Concerned,
    }
}

/// Renders narration lines and sends them to the narrator channel.
#[derive(Debug, Clone, Default)]
pub struct Narrator {
    script: NarrationScript,
    tx: Option<mpsc::UnboundedSender<NarratorMessage>>,
}

impl Narrator {
    /// Creates a narrator that renders `script` but sends nowhere.
    #[must_use]
    pub const fn new(script: NarrationScript) -> Self {
        Self { script, tx: None }
    }

    /// Attaches the outbound channel.
    #[must_use]
    pub fn with_channel(mut self, tx: mpsc::UnboundedSender<NarratorMessage>) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Narrates entering `phase`.
    pub fn phase_entered(&self, phase: Phase, ctx: &NarrationContext) -> NarratorMessage {
        self.emit(self.script.phase_line(phase), Emotion::Happy, ctx)
    }

    /// Narrates quiz feedback for `tier`.
    pub fn feedback(&self, tier: ScoreTier, ctx: &NarrationContext) -> NarratorMessage {
        self.emit(self.script.feedback_line(tier), emotion_for_tier(tier), ctx)
    }

    /// Narrates a reset.
    pub fn restart(&self, ctx: &NarrationContext) -> NarratorMessage {
        let line = self.script.restart.as_ref().unwrap_or(&self.script.intro);
        self.emit(line, Emotion::Happy, ctx)
    }

    fn emit(&self, line: &NarrationLine, fallback: Emotion, ctx: &NarrationContext) -> NarratorMessage {
        let message = NarratorMessage {
            text: ctx.render(&line.text),
            emotion: line.emotion.unwrap_or(fallback),
            quick_actions: line.quick_actions.clone(),
        };
        if let Some(tx) = &self.tx {
            if tx.send(message.clone()).is_err() {
                trace!("narrator channel closed");
            }
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NarrationContext {
        NarrationContext {
            lab: "Rusting of Iron".into(),
            correct: 2,
            total: 3,
            score: 75,
            xp: 75,
            attempt: 1,
        }
    }

    #[test]
    fn placeholders_are_rendered() {
        let narrator = Narrator::default();
        let msg = narrator.feedback(ScoreTier::B, &ctx());
        assert!(msg.text.contains("2 out of 3"));
        assert_eq!(msg.emotion, Emotion::Happy);
        assert_eq!(msg.quick_actions[0].action, "retry_quiz");

        let msg = narrator.phase_entered(Phase::Intro, &ctx());
        assert_eq!(msg.text, "Welcome to Rusting of Iron! Let's get started.");
    }

    #[test]
    fn tier_emotions() {
        let narrator = Narrator::default();
        assert_eq!(narrator.feedback(ScoreTier::A, &ctx()).emotion, Emotion::Celebrating);
        assert_eq!(narrator.feedback(ScoreTier::C, &ctx()).emotion, Emotion::Concerned);
    }

    #[test]
    fn missing_emotion_falls_back_per_tier() {
        let mut script = NarrationScript::default();
        script.feedback.tier_c = NarrationLine {
            text: "Attempt {attempt}: try again".into(),
            emotion: None,
            quick_actions: vec![],
        };
        let msg = Narrator::new(script).feedback(ScoreTier::C, &ctx());
        assert_eq!(msg.text, "Attempt 1: try again");
        assert_eq!(msg.emotion, Emotion::Concerned);
    }

    #[test]
    fn messages_reach_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let narrator = Narrator::default().with_channel(tx);
        narrator.phase_entered(Phase::Setup, &ctx());
        narrator.restart(&ctx());
        assert!(rx.try_recv().unwrap().text.contains("set up"));
        assert!(rx.try_recv().unwrap().text.contains("again from the beginning"));
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let narrator = Narrator::default().with_channel(tx);
        let msg = narrator.phase_entered(Phase::Quiz, &ctx());
        assert_eq!(msg.emotion, Emotion::Happy);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let script: NarrationScript =
            serde_yaml::from_str("setup:\n  text: Fill the tubes\n  emotion: explaining\n").unwrap();
        assert_eq!(script.setup.text, "Fill the tubes");
        assert_eq!(script.setup.emotion, Some(Emotion::Explaining));
        assert_eq!(script.quiz, NarrationScript::default().quiz);
    }
}
