use std::collections::BTreeSet;
use std::fmt;

/// Patient's stated gender. `Unknown` is the starting value and also what
/// an unparseable slot-fill answer leaves it at — it never counts as
/// "complete".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Unknown => write!(f, "unknown"),
        }
    }
}

impl Gender {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "male" | "m" => Gender::Male,
            "female" | "f" => Gender::Female,
            _ => Gender::Unknown,
        }
    }
}

/// Accumulated patient state, built up across turns by the slot-filling
/// controller. Monotonic: a slot already filled stays filled unless the
/// user explicitly overwrites it — silence never clears a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientFacts {
    pub age: Option<u32>,
    pub gender: Gender,
    pub medications: BTreeSet<String>,
    pub conditions: BTreeSet<String>,
}

impl PatientFacts {
    pub fn is_complete(&self) -> bool {
        self.age.is_some()
            && self.gender != Gender::Unknown
            && !self.medications.is_empty()
            && !self.conditions.is_empty()
    }

    /// Names of the facts still missing, in the canonical field order —
    /// used to phrase the follow-up prompt.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.age.is_none() {
            missing.push("Age");
        }
        if self.gender == Gender::Unknown {
            missing.push("Gender");
        }
        if self.medications.is_empty() {
            missing.push("Medications");
        }
        if self.conditions.is_empty() {
            missing.push("Medical Conditions");
        }
        missing
    }

    /// Overlays `update` onto `self`: any non-empty field in `update`
    /// replaces the corresponding field in `self`; empty/absent fields in
    /// `update` leave `self` untouched.
    pub fn merge(&mut self, update: PatientFacts) {
        if update.age.is_some() {
            self.age = update.age;
        }
        if update.gender != Gender::Unknown {
            self.gender = update.gender;
        }
        if !update.medications.is_empty() {
            self.medications = update.medications;
        }
        if !update.conditions.is_empty() {
            self.conditions = update.conditions;
        }
    }

    /// Parses the slot-filler's four-line `Age:`/`Gender:`/`Medications:`/
    /// `Medical Conditions:` block. Unrecognised lines are ignored; a
    /// missing or empty field parses to the type's empty value.
    pub fn parse_block(block: &str) -> Self {
        let mut facts = PatientFacts::default();
        for line in block.lines() {
            let Some((label, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match label.trim() {
                "Age" => facts.age = value.parse::<u32>().ok(),
                "Gender" => facts.gender = Gender::parse(value),
                "Medications" => {
                    facts.medications = split_terms(value);
                }
                "Medical Conditions" => {
                    facts.conditions = split_terms(value);
                }
                _ => {}
            }
        }
        facts
    }

    /// Renders the canonical four-line block, so the prompt sent to the
    /// slot-filler is always derived from the structured facts rather than
    /// independently mutated.
    pub fn render_block(&self) -> String {
        format!(
            "Age: {}\nGender: {}\nMedications: {}\nMedical Conditions: {}",
            self.age.map(|a| a.to_string()).unwrap_or_default(),
            if self.gender == Gender::Unknown { String::new() } else { self.gender.to_string() },
            join_sorted(&self.medications),
            join_sorted(&self.conditions),
        )
    }
}

fn split_terms(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(|term| term.trim().to_string())
        .filter(|term| !term.is_empty())
        .collect()
}

fn join_sorted(terms: &BTreeSet<String>) -> String {
    terms.iter().cloned().collect::<Vec<_>>().join(";")
}

/// Canonical cache key and retrieval query, derived from `PatientFacts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&PatientFacts> for Fingerprint {
    fn from(facts: &PatientFacts) -> Self {
        Fingerprint(format!(
            "Age:{}, Gender:{}, Medications:{}, Conditions:{}",
            facts.age.map(|a| a.to_string()).unwrap_or_default(),
            facts.gender,
            join_sorted(&facts.medications),
            join_sorted(&facts.conditions),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_facts_report_missing_fields() {
        let mut facts = PatientFacts::default();
        facts.age = Some(78);
        facts.gender = Gender::Female;
        assert!(!facts.is_complete());
        assert_eq!(facts.missing_fields(), vec!["Medications", "Medical Conditions"]);
    }

    #[test]
    fn merge_is_additive_and_monotonic() {
        let mut facts = PatientFacts::default();
        facts.merge(PatientFacts::parse_block("Age: 78\nGender: female\nMedications: \nMedical Conditions: "));
        assert_eq!(facts.age, Some(78));
        assert!(!facts.is_complete());

        facts.merge(PatientFacts::parse_block(
            "Age: \nGender: \nMedications: Tolterodine\nMedical Conditions: glaucoma",
        ));
        assert!(facts.is_complete());
        assert_eq!(facts.age, Some(78));
    }

    #[test]
    fn merge_does_not_clear_a_filled_slot_on_silence() {
        let mut facts = PatientFacts::default();
        facts.merge(PatientFacts::parse_block("Age: 78\nGender: female\nMedications: Aspirin\nMedical Conditions: glaucoma"));
        facts.merge(PatientFacts::parse_block("Age: \nGender: \nMedications: \nMedical Conditions: "));
        assert_eq!(facts.age, Some(78));
        assert!(facts.medications.contains("Aspirin"));
    }

    #[test]
    fn fingerprint_is_canonical_and_sorted() {
        let mut facts = PatientFacts::default();
        facts.merge(PatientFacts::parse_block(
            "Age: 78\nGender: female\nMedications: Tolterodine, Ciprofloxacin\nMedical Conditions: dementia, glaucoma",
        ));
        let fingerprint = Fingerprint::from(&facts);
        assert_eq!(
            fingerprint.as_str(),
            "Age:78, Gender:female, Medications:Ciprofloxacin;Tolterodine, Conditions:dementia;glaucoma"
        );
    }
}
