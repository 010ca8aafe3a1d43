//! Sources of apology messages. Every lockout asks for a new one, and a source is expected to
//! hand out a different string each time it is asked.

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, warn};

use crate::classifier::{model::VisionModel, prompt::apology_prompt};

const MAX_CHALLENGE_LENGTH: usize = 160;

const TEMPLATES: &[&str] = &[
    "I {adverb} apologize for slacking off, I will get back to {task} now.",
    "I am {adverb} sorry for {distraction} instead of {task}.",
    "I {adverb} regret {distraction}, and I promise to focus on {task}.",
    "Forgive me for {distraction}, I will {adverb} commit to {task} from now on.",
    "I let myself down by {distraction}, and I am returning to {task} right away.",
    "Sorry for {distraction}, I {adverb} want to make progress on {task} today.",
    "I {adverb} apologize for wasting time, {task} deserves my full attention.",
    "I was caught {distraction} and I am {adverb} sorry, back to {task} it is.",
];

const ADVERBS: &[&str] = &[
    "sincerely",
    "truly",
    "deeply",
    "genuinely",
    "humbly",
    "honestly",
];

const DISTRACTIONS: &[&str] = &[
    "slacking off",
    "browsing the internet",
    "getting distracted",
    "procrastinating",
    "wandering off",
    "scrolling aimlessly",
    "wasting precious time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChallengeKind {
    /// Built locally from apology templates.
    Template,
    /// Written by the vision model, falling back to templates.
    Model,
}

#[async_trait]
pub trait ChallengeSource: Send {
    async fn next_challenge(&mut self, task: &str) -> String;
}

pub struct TemplateChallenges {
    rng: StdRng,
    previous: Option<String>,
}

impl TemplateChallenges {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            previous: None,
        }
    }

    fn pick(&mut self, pool: &[&'static str]) -> &'static str {
        pool.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn generate(&mut self, task: &str) -> String {
        let task = keyboard_text(task).unwrap_or_else(|| task.trim().to_string());
        loop {
            let challenge = self
                .pick(TEMPLATES)
                .replace("{adverb}", self.pick(ADVERBS))
                .replace("{distraction}", self.pick(DISTRACTIONS))
                .replace("{task}", &task);
            if self.previous.as_deref() != Some(challenge.as_str()) {
                self.previous = Some(challenge.clone());
                return challenge;
            }
        }
    }
}

impl Default for TemplateChallenges {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChallengeSource for TemplateChallenges {
    async fn next_challenge(&mut self, task: &str) -> String {
        self.generate(task)
    }
}

/// Asks the model for a message, the way a real apology would be written. Anything that can't be
/// typed comfortably on a keyboard is replaced with a template message.
pub struct ModelChallenges {
    model: Arc<dyn VisionModel>,
    fallback: TemplateChallenges,
    previous: Option<String>,
}

impl ModelChallenges {
    pub fn new(model: Arc<dyn VisionModel>, fallback: TemplateChallenges) -> Self {
        Self {
            model,
            fallback,
            previous: None,
        }
    }
}

#[async_trait]
impl ChallengeSource for ModelChallenges {
    async fn next_challenge(&mut self, task: &str) -> String {
        let generated = match self.model.generate_text(&apology_prompt(task)).await {
            Ok(text) => normalize_challenge(&text),
            Err(e) => {
                warn!("Couldn't generate an apology, using a template {e}");
                None
            }
        };

        match generated {
            Some(challenge) if self.previous.as_ref() != Some(&challenge) => {
                debug!("Generated message: {challenge}");
                self.previous = Some(challenge.clone());
                challenge
            }
            _ => self.fallback.next_challenge(task).await,
        }
    }
}

/// Swaps typographic punctuation for its keyboard form and collapses whitespace. Returns None when
/// characters outside printable ASCII remain, since the lock screen can't take them as input.
pub fn keyboard_text(text: &str) -> Option<String> {
    let text = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            c => c,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    text.chars()
        .all(|c| (' '..='~').contains(&c))
        .then_some(text)
}

/// Cleans up model output so that what is displayed is exactly what has to be typed. Returns None
/// for text that is empty, too long, or can't be typed.
pub fn normalize_challenge(text: &str) -> Option<String> {
    let text = keyboard_text(text)?;
    let text = text.trim_matches(|c| c == '"' || c == '\'').trim();
    if text.is_empty() || text.chars().count() > MAX_CHALLENGE_LENGTH {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use rand::{rngs::StdRng, SeedableRng};

    use crate::classifier::{model::MockVisionModel, ClassifyError};

    use super::{
        keyboard_text, normalize_challenge, ChallengeSource, ModelChallenges, TemplateChallenges,
    };

    #[tokio::test]
    async fn templates_mention_the_task_and_never_repeat_back_to_back() {
        let mut source = TemplateChallenges::with_rng(StdRng::seed_from_u64(7));
        let mut previous = String::new();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let challenge = source.next_challenge("  writing my thesis ").await;
            assert!(challenge.contains("writing my thesis"), "{challenge}");
            assert!(!challenge.contains('{'));
            assert_ne!(challenge, previous);
            seen.insert(challenge.clone());
            previous = challenge;
        }
        assert!(seen.len() > 50);
    }

    #[test]
    fn model_output_is_cleaned_up() {
        assert_eq!(
            normalize_challenge("  \u{201c}I\u{2019}m sorry \u{2014} back to work.\u{201d}\n"),
            Some("I'm sorry - back to work.".into())
        );
        assert_eq!(
            normalize_challenge("\"I am sorry,\n   I will focus.\""),
            Some("I am sorry, I will focus.".into())
        );
    }

    #[test]
    fn untypeable_output_is_rejected() {
        assert_eq!(normalize_challenge("   "), None);
        assert_eq!(normalize_challenge("Je suis d\u{e9}sol\u{e9}"), None);
        assert_eq!(normalize_challenge(&"sorry ".repeat(40)), None);
    }

    #[tokio::test]
    async fn typographic_quotes_in_the_task_become_typeable() {
        let mut source = TemplateChallenges::with_rng(StdRng::seed_from_u64(3));
        for _ in 0..20 {
            let challenge = source.next_challenge("writing Bob\u{2019}s thesis").await;
            assert!(challenge.contains("writing Bob's thesis"), "{challenge}");
            assert_eq!(keyboard_text(&challenge), Some(challenge.clone()));
        }
    }

    #[test]
    fn keyboard_text_rejects_what_cant_be_typed() {
        assert_eq!(
            keyboard_text(" fixing  the \u{201c}login\u{201d} bug "),
            Some("fixing the \"login\" bug".into())
        );
        assert_eq!(keyboard_text("\u{5199}\u{8bba}\u{6587}"), None);
        assert_eq!(keyboard_text("caf\u{e9} menu"), None);
    }

    #[tokio::test]
    async fn model_messages_are_used() {
        let mut model = MockVisionModel::new();
        model
            .expect_generate_text()
            .withf(|prompt| prompt.contains("'writing my thesis'"))
            .returning(|_| Ok("\"I'm sorry, back to my thesis.\"".into()));

        let mut source = ModelChallenges::new(Arc::new(model), TemplateChallenges::new());
        assert_eq!(
            source.next_challenge("writing my thesis").await,
            "I'm sorry, back to my thesis."
        );
    }

    #[tokio::test]
    async fn model_failures_fall_back_to_templates() {
        let mut model = MockVisionModel::new();
        let mut replies = vec![
            Err(ClassifyError::ModelUnavailable("offline".into())),
            Ok("I'm sorry.".into()),
            Ok("I'm sorry.".into()),
        ]
        .into_iter();
        model
            .expect_generate_text()
            .times(3)
            .returning(move |_| replies.next().unwrap());

        let mut source = ModelChallenges::new(Arc::new(model), TemplateChallenges::new());
        let first = source.next_challenge("writing my thesis").await;
        assert!(first.contains("writing my thesis"));
        assert_eq!(source.next_challenge("writing my thesis").await, "I'm sorry.");
        let repeated = source.next_challenge("writing my thesis").await;
        assert_ne!(repeated, "I'm sorry.");
    }
}
