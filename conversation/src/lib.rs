//! Per-conversation accumulated state and the slot-filling controller that
//! drives it turn over turn (SPEC_FULL §4.7).

mod facts;
mod state;

pub use facts::{Fingerprint, Gender, PatientFacts};
pub use state::SlotFillState;

use chrono::{DateTime, Utc};
use common::error::AppError;
use generator::Generator;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of one call to `Conversation::advance`.
#[derive(Debug, Clone)]
pub enum ControllerOutcome {
    /// Validator returned `{score:false}`; `follow_up` names the missing
    /// fields and the turn ends here.
    Collecting { follow_up: String },
    /// Validator returned `{score:true}`; the pipeline should proceed to
    /// retrieval/generation using `fingerprint`.
    Ready { fingerprint: Fingerprint },
}

/// Owned by the outer session store in the full system (out of scope
/// here); this in-process struct gives the pipeline and the thin CLI
/// entrypoint something concrete to mutate turn over turn.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub history: Vec<Turn>,
    pub accumulated_facts: PatientFacts,
    pub current_info_text: String,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the slot-filler, merges its output into `accumulated_facts`,
    /// re-derives `current_info_text`, then validates. On completeness the
    /// Fingerprint is returned and `current_info_text` is cleared; on
    /// incompleteness a follow-up listing the missing fields is returned
    /// and `current_info_text` is left populated for the next turn.
    pub async fn advance(
        &mut self,
        user_message: &str,
        generator: &Generator,
    ) -> Result<ControllerOutcome, AppError> {
        self.history.push(Turn {
            role: Role::User,
            content: user_message.to_string(),
            timestamp: Utc::now(),
        });

        let slot_fill_block = generator
            .retrieve_patient_info(user_message, &self.current_info_text)
            .await?;
        self.accumulated_facts.merge(PatientFacts::parse_block(&slot_fill_block));
        self.current_info_text = self.accumulated_facts.render_block();

        let complete = generator.validate(&self.current_info_text).await?;
        info!(complete, "slot-filling validation result");

        if complete {
            let fingerprint = Fingerprint::from(&self.accumulated_facts);
            self.current_info_text.clear();
            Ok(ControllerOutcome::Ready { fingerprint })
        } else {
            let missing = self.accumulated_facts.missing_fields().join(", ");
            Ok(ControllerOutcome::Collecting {
                follow_up: format!("I still need a bit more information: {missing}. Could you share that?"),
            })
        }
    }

    pub fn record_assistant_turn(&mut self, content: &str) {
        self.history.push(Turn {
            role: Role::Assistant,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use generator::StubLlmClient;
    use std::sync::Arc;

    fn generator(responses: Vec<&str>) -> Generator {
        Generator::new(Arc::new(StubLlmClient::new(responses.into_iter().map(String::from).collect())))
    }

    #[tokio::test]
    async fn incomplete_turn_asks_for_missing_fields() {
        let generator = generator(vec![
            "Age: 78\nGender: female\nMedications: \nMedical Conditions: ",
            r#"{"score": false}"#,
        ]);
        let mut conversation = Conversation::new();
        let outcome = conversation.advance("Age: 78, Gender: female", &generator).await.unwrap();
        match outcome {
            ControllerOutcome::Collecting { follow_up } => {
                assert!(follow_up.contains("Medications"));
                assert!(follow_up.contains("Medical Conditions"));
            }
            ControllerOutcome::Ready { .. } => panic!("expected Collecting"),
        }
        assert!(!conversation.current_info_text.is_empty());
    }

    #[tokio::test]
    async fn complete_turn_yields_fingerprint_and_clears_info_text() {
        let generator = generator(vec![
            "Age: 78\nGender: female\nMedications: Tolterodine\nMedical Conditions: glaucoma",
            r#"{"score": true}"#,
        ]);
        let mut conversation = Conversation::new();
        let outcome = conversation
            .advance("Age 78 female on Tolterodine for glaucoma", &generator)
            .await
            .unwrap();
        match outcome {
            ControllerOutcome::Ready { fingerprint } => {
                assert_eq!(
                    fingerprint.as_str(),
                    "Age:78, Gender:female, Medications:Tolterodine, Conditions:glaucoma"
                );
            }
            ControllerOutcome::Collecting { .. } => panic!("expected Ready"),
        }
        assert!(conversation.current_info_text.is_empty());
    }

    #[tokio::test]
    async fn facts_accumulate_across_two_turns() {
        let generator = generator(vec![
            "Age: 78\nGender: female\nMedications: \nMedical Conditions: ",
            r#"{"score": false}"#,
            "Age: \nGender: \nMedications: Tolterodine\nMedical Conditions: glaucoma",
            r#"{"score": true}"#,
        ]);
        let mut conversation = Conversation::new();
        conversation.advance("Age: 78, Gender: female", &generator).await.unwrap();
        let outcome = conversation.advance("Tolterodine for glaucoma", &generator).await.unwrap();
        assert!(matches!(outcome, ControllerOutcome::Ready { .. }));
        assert_eq!(conversation.accumulated_facts.age, Some(78));
    }
}
