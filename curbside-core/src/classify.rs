//! Deterministic severity classification of incident reports.
//!
//! No LLM needed: the image-analysis text is matched against a fixed rule
//! table, first match wins. Safety rules are checked before routine rules.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CurbsideError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Immediate hazard; scheduled without calendar restriction.
    Safety,
    /// Business hours only.
    Routine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    GlassRepair,
    SnowIceClearing,
    DebrisRemoval,
    GraffitiRemoval,
    Repair,
    Cleaning,
    Inspection,
}

impl WorkKind {
    /// Crew time estimate in minutes.
    pub fn estimated_minutes(self) -> i64 {
        match self {
            Self::GlassRepair => 120,
            Self::SnowIceClearing => 120,
            Self::DebrisRemoval => 120,
            Self::GraffitiRemoval => 180,
            Self::Repair => 120,
            Self::Cleaning => 60,
            Self::Inspection => 60,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::GlassRepair => "broken glass repair",
            Self::SnowIceClearing => "snow and ice clearing",
            Self::DebrisRemoval => "debris removal",
            Self::GraffitiRemoval => "graffiti removal",
            Self::Repair => "repair",
            Self::Cleaning => "cleaning",
            Self::Inspection => "inspection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub severity: Severity,
    pub work: WorkKind,
    /// Text that triggered the rule, if any.
    pub indicator: Option<String>,
}

struct Rule {
    severity: Severity,
    work: WorkKind,
    pattern: &'static str,
}

const RULES: &[Rule] = &[
    // --- Safety ---
    Rule {
        severity: Severity::Safety,
        work: WorkKind::GlassRepair,
        pattern: r"\b(broken|shattered|cracked|smashed)\s+(glass|window|panel|pane)s?\b|\bglass\s+(shards?|fragments?)\b|\bshattered\b",
    },
    Rule {
        severity: Severity::Safety,
        work: WorkKind::SnowIceClearing,
        pattern: r"\b(ice|icy|black ice|heavy snow|snow drifts?|snow accumulation|snow-covered|frozen)\b",
    },
    Rule {
        severity: Severity::Safety,
        work: WorkKind::DebrisRemoval,
        pattern: r"\b(major|large|heavy|significant|hazardous)\s+debris\b|\bfallen\s+(tree|branch|branches|limb)\b",
    },
    // --- Routine ---
    Rule {
        severity: Severity::Routine,
        work: WorkKind::GraffitiRemoval,
        pattern: r"\b(graffiti|tagging|spray[- ]paint(ed)?|vandali[sz]ed)\b",
    },
    Rule {
        severity: Severity::Routine,
        work: WorkKind::Repair,
        pattern: r"\b(damaged|damage|broken|bent|loose|missing)\b",
    },
    Rule {
        severity: Severity::Routine,
        work: WorkKind::Cleaning,
        pattern: r"\b(litter|leaves|trash|garbage|dirty|debris|cleanliness|overflowing|stain(ed|s)?)\b",
    },
];

const NEGATION: &str = r"\b(no|not|without|free of|absence of|nor|never)\b";
const CLAUSE_BREAK: &str = r"[.!?;\n]+";
/// A negation does not reach across these ("no injuries, but broken glass").
const SCOPE_BREAK: &str = r",|\b(but|and|however|although|though|yet|while)\b";
/// Words before a match that a negation may sit in.
const NEGATION_WINDOW: usize = 5;

/// Compiled rule table. Build once and reuse.
pub struct Classifier {
    rules: Vec<(Severity, WorkKind, Regex)>,
    negation: Regex,
    clause: Regex,
    scope: Regex,
}

impl Classifier {
    pub fn new() -> Result<Self, CurbsideError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| CurbsideError::InvalidInput(format!("bad classifier pattern: {e}")))
        };
        let mut rules = Vec::with_capacity(RULES.len());
        for r in RULES {
            rules.push((r.severity, r.work, compile(r.pattern)?));
        }
        Ok(Self {
            rules,
            negation: compile(NEGATION)?,
            clause: compile(CLAUSE_BREAK)?,
            scope: compile(SCOPE_BREAK)?,
        })
    }

    /// Whether the text right before a match negates it: a cue within the
    /// last few words, after the last comma or conjunction.
    fn negated(&self, prefix: &str) -> bool {
        let scope = self
            .scope
            .find_iter(prefix)
            .last()
            .map_or(prefix, |m| &prefix[m.end()..]);
        let words: Vec<&str> = scope.split_whitespace().collect();
        let window = words[words.len().saturating_sub(NEGATION_WINDOW)..].join(" ");
        self.negation.is_match(&window)
    }

    /// A match counts unless it is negated ("no visible graffiti", "not broken").
    fn find_unnegated(&self, re: &Regex, clause: &str) -> Option<String> {
        re.find_iter(clause)
            .find(|m| !self.negated(&clause[..m.start()]))
            .map(|m| m.as_str().to_string())
    }

    /// Classify an image-analysis description.
    pub fn classify(&self, description: &str) -> Classification {
        let text = description.to_lowercase();
        let clauses: Vec<&str> = self
            .clause
            .split(&text)
            .filter(|s| !s.trim().is_empty())
            .collect();

        for (severity, work, re) in &self.rules {
            for clause in &clauses {
                if let Some(hit) = self.find_unnegated(re, clause) {
                    return Classification {
                        severity: *severity,
                        work: *work,
                        indicator: Some(hit),
                    };
                }
            }
        }

        Classification {
            severity: Severity::Routine,
            work: WorkKind::Inspection,
            indicator: None,
        }
    }

    /// Classify from the description, or from the image file name when the
    /// report has no text yet (`MA-02-broken-glass.jpg`).
    pub fn classify_report(&self, description: &str, image_object_name: &str) -> Classification {
        if !description.trim().is_empty() {
            return self.classify(description);
        }
        let stem = image_object_name
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(image_object_name);
        self.classify(&stem.replace(['-', '_'], " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        Classifier::new().unwrap().classify(text)
    }

    fn classify_report(text: &str, image: &str) -> Classification {
        Classifier::new().unwrap().classify_report(text, image)
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(Classifier::new().unwrap().rules.len(), RULES.len());
    }

    #[test]
    fn broken_glass_is_safety() {
        let c = classify("Broken glass near entrance");
        assert_eq!(c.severity, Severity::Safety);
        assert_eq!(c.work, WorkKind::GlassRepair);
        assert_eq!(c.indicator.as_deref(), Some("broken glass"));
    }

    #[test]
    fn ice_and_heavy_snow_are_safety() {
        assert_eq!(classify("Icy sidewalk in front of the shelter").work, WorkKind::SnowIceClearing);
        assert_eq!(classify("Heavy snow blocks the bench.").severity, Severity::Safety);
    }

    #[test]
    fn major_debris_is_safety_but_plain_debris_is_routine() {
        let major = classify("A fallen tree branch and major debris across the curb");
        assert_eq!(major.severity, Severity::Safety);
        assert_eq!(major.work, WorkKind::DebrisRemoval);

        let minor = classify("Some debris near the trash can");
        assert_eq!(minor.severity, Severity::Routine);
        assert_eq!(minor.work, WorkKind::Cleaning);
    }

    #[test]
    fn leaves_and_litter_is_routine_cleaning() {
        let c = classify("Leaves and litter on bench");
        assert_eq!(c.severity, Severity::Routine);
        assert_eq!(c.work, WorkKind::Cleaning);
        assert_eq!(c.work.estimated_minutes(), 60);
    }

    #[test]
    fn graffiti_takes_three_hours() {
        let c = classify("The shelter wall is covered in graffiti");
        assert_eq!(c.work, WorkKind::GraffitiRemoval);
        assert_eq!(c.work.estimated_minutes(), 180);
        assert_eq!(WorkKind::GlassRepair.estimated_minutes(), 120);
    }

    /// Regression: analysis text that explicitly rules hazards out.
    #[test]
    fn negated_indicators_do_not_trigger() {
        let report = "The bus stop appears to have a bench, a trash can, and a bus stop sign. \
            The bench has some wear and tear, and there are leaves on the ground around the bench, \
            indicating a need for cleaning. There is no visible graffiti or damage to the bus stop \
            amenities. There are no obvious safety hazards.";
        let c = classify(report);
        assert_eq!(c.severity, Severity::Routine);
        assert_eq!(c.work, WorkKind::Cleaning);

        assert_eq!(classify("The glass panel is not broken; no ice present.").work, WorkKind::Inspection);
    }

    #[test]
    fn negation_does_not_cross_a_conjunction_or_comma() {
        let c = classify("No injuries reported, but broken glass covers the bench");
        assert_eq!(c.severity, Severity::Safety);
        assert_eq!(c.work, WorkKind::GlassRepair);

        let c = classify("Not much litter, ice on the platform edge");
        assert_eq!(c.work, WorkKind::SnowIceClearing);

        let c = classify("There was never any graffiti here but the panel is damaged");
        assert_eq!(c.work, WorkKind::Repair);
    }

    #[test]
    fn negation_reaches_only_a_few_words_back() {
        assert_eq!(classify("No sign of any broken glass").work, WorkKind::Inspection);
        let c = classify(
            "Not a problem for the crew last week who reported seeing shattered panels today",
        );
        assert_eq!(c.severity, Severity::Safety);
    }

    #[test]
    fn negation_only_applies_before_the_match() {
        // "no" appears after the match in the same clause.
        let c = classify("Shattered panel, no one injured");
        assert_eq!(c.severity, Severity::Safety);
    }

    #[test]
    fn empty_text_is_routine_inspection() {
        let c = classify("");
        assert_eq!(c.severity, Severity::Routine);
        assert_eq!(c.work, WorkKind::Inspection);
        assert!(c.indicator.is_none());
    }

    #[test]
    fn falls_back_to_image_name() {
        let c = classify_report("", "MA-02-broken-glass.jpg");
        assert_eq!(c.work, WorkKind::GlassRepair);

        let c = classify_report("", "MC-02-dirty-damaged.jpg");
        assert_eq!(c.severity, Severity::Routine);
        assert_eq!(c.work, WorkKind::Repair);

        // Description wins when present.
        let c = classify_report("litter on the bench", "MA-02-broken-glass.jpg");
        assert_eq!(c.work, WorkKind::Cleaning);
    }
}
