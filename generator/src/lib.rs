//! LLM invocation wrapper: fixed system prompts per use, plus the
//! validator's JSON-object binding (SPEC_FULL §4.7/§4.9).

mod client;

pub use client::{LlmClient, OpenAiLlmClient, StubLlmClient};

use std::sync::Arc;

use common::error::AppError;
use serde::Deserialize;
use tracing::warn;

const ANSWER_SYSTEM_PROMPT: &str = "You are a clinical deprescribing assistant. Given a patient \
profile and supporting clinical context, give a grounded, cautious recommendation. If the \
supplied context does not cover the patient's situation, say so explicitly and answer from \
general clinical knowledge with an appropriate caveat. Never fabricate a specific source.";

const SLOT_FILL_SYSTEM_PROMPT: &str = "Extract patient facts from the conversation so far. \
Output exactly four lines, in this order, with nothing else:\nAge: <value or empty>\nGender: \
<value or empty>\nMedications: <comma-separated or empty>\nMedical Conditions: <comma-separated \
or empty>\nCarry forward any fact already known unless the user explicitly changes it.";

const VALIDATOR_SYSTEM_PROMPT: &str = "You judge whether a patient-facts block is complete: age \
present, gender one of male/female, at least one medication, at least one condition. Respond \
with a JSON object of exactly one key, \"score\", whose value is the boolean true or false. No \
other keys, no prose.";

const REPHRASE_SYSTEM_PROMPT: &str = "Rewrite the following patient-facts query into a single, \
information-dense retrieval query optimised for similarity search over clinical deprescribing \
literature. Respond with the rewritten query only.";

const MULTI_QUERY_SYSTEM_PROMPT: &str = "Identify every medication and every medical condition \
named in the input. Respond with a JSON object of exactly two keys, \"medications\" and \
\"conditions\", each an array of short strings as they were named.";

const WARNING_SYSTEM_PROMPT: &str = "Write a short, polite refusal for a message that violated \
input safety policy. Do not mention which specific policy or keyword was matched. Invite the \
user to rephrase their question about their medications or conditions.";

#[derive(Debug, Deserialize)]
struct ValidatorResponse {
    score: bool,
}

/// Terms extracted from a query for the `multi_query` retrieval strategy.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MultiQueryTerms {
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// Thin façade over an `LlmClient` binding each prompt used by the pipeline
/// to a fixed system message.
pub struct Generator {
    llm: Arc<dyn LlmClient>,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Final grounded answer, given the canonical fingerprint and the
    /// assembled retrieval context (or the pipeline's empty-context
    /// sentinel).
    pub async fn answer(&self, fingerprint: &str, augmentation: &str) -> Result<String, AppError> {
        let user = format!("Patient profile:\n{fingerprint}\n\nContext:\n{augmentation}");
        self.llm.complete(ANSWER_SYSTEM_PROMPT, &user).await
    }

    /// Returns the raw four-line `Age:`/`Gender:`/`Medications:`/`Medical
    /// Conditions:` block; the caller parses it into `PatientFacts`.
    pub async fn retrieve_patient_info(
        &self,
        user_message: &str,
        current_info_text: &str,
    ) -> Result<String, AppError> {
        let user = format!("Known so far:\n{current_info_text}\n\nLatest message:\n{user_message}");
        self.llm.complete(SLOT_FILL_SYSTEM_PROMPT, &user).await
    }

    /// `{"score": bool}`, strictly parsed; any parse failure or unexpected
    /// shape is retried once, then treated as `false`.
    pub async fn validate(&self, current_info_text: &str) -> Result<bool, AppError> {
        for attempt in 0..2 {
            let raw = self
                .llm
                .complete_json(VALIDATOR_SYSTEM_PROMPT, current_info_text)
                .await?;
            match serde_json::from_str::<ValidatorResponse>(&raw) {
                Ok(parsed) => return Ok(parsed.score),
                Err(err) => warn!(attempt, %err, "validator returned malformed JSON"),
            }
        }
        Ok(false)
    }

    /// A single optimised rewrite of `query` for similarity retrieval.
    pub async fn rephrase(&self, query: &str) -> Result<String, AppError> {
        self.llm.complete(REPHRASE_SYSTEM_PROMPT, query).await
    }

    /// Medications and conditions named in `query`, for the `multi_query`
    /// strategy's fixed-form sub-question generation.
    pub async fn multi_query_terms(&self, query: &str) -> Result<MultiQueryTerms, AppError> {
        for attempt in 0..2 {
            let raw = self.llm.complete_json(MULTI_QUERY_SYSTEM_PROMPT, query).await?;
            match serde_json::from_str::<MultiQueryTerms>(&raw) {
                Ok(parsed) => return Ok(parsed),
                Err(err) => warn!(attempt, %err, "multi-query term extraction returned malformed JSON"),
            }
        }
        Ok(MultiQueryTerms::default())
    }

    /// Policy-citing refusal for a non-injection guard violation. Never
    /// mentions which keyword or category matched.
    pub async fn warning(&self) -> Result<String, AppError> {
        self.llm
            .complete(WARNING_SYSTEM_PROMPT, "Generate the refusal message.")
            .await
    }
}
