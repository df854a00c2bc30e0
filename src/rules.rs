//! Declarative guideline rules and the additive-penalty validator.
//!
//! A draft starts at 100. Every applicable rule is evaluated on every call;
//! a violated or unmet rule subtracts its weight exactly once, and the total
//! is clamped to `[0, 100]`. Rules that cannot be evaluated (for example a
//! data-anchor pattern that does not compile) fail closed: they count as
//! violated and are reported as internal errors.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What a rule checks. Closed set; new kinds are added here, not as
/// callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleCheck {
    /// The phrase must not appear. Matching is case-insensitive and
    /// anchored on word boundaries; with `stem` only the leading boundary
    /// is required, so "leverage" also catches "leveraged".
    ForbiddenPhrase {
        phrase: String,
        #[serde(default)]
        stem: bool,
    },
    /// At least one of the phrases must appear (case-insensitive).
    RequiredPhrase { any_of: Vec<String> },
    /// The regex must match somewhere in drafts of at least
    /// `min_draft_chars` characters.
    RequiredDataAnchor {
        pattern: String,
        #[serde(default)]
        min_draft_chars: usize,
    },
    /// A double-quoted passage of at least `min_chars` characters.
    RequiredQuote {
        #[serde(default = "default_quote_chars")]
        min_chars: usize,
    },
}

fn default_quote_chars() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineRule {
    pub id: String,
    #[serde(flatten)]
    pub check: RuleCheck,
    pub weight: f64,
    #[serde(default)]
    pub remediation: String,
    /// Section names this rule applies to; `None` means every section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<String>>,
}

impl GuidelineRule {
    pub fn applies_to(&self, section: &str) -> bool {
        match &self.sections {
            None => true,
            Some(names) => names.iter().any(|n| n.eq_ignore_ascii_case(section)),
        }
    }

    pub fn category(&self) -> Option<RequirementCategory> {
        match self.check {
            RuleCheck::ForbiddenPhrase { .. } => None,
            RuleCheck::RequiredPhrase { .. } => Some(RequirementCategory::Phrase),
            RuleCheck::RequiredDataAnchor { .. } => {
                Some(RequirementCategory::DataAnchor)
            }
            RuleCheck::RequiredQuote { .. } => Some(RequirementCategory::Quote),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementCategory {
    Phrase,
    DataAnchor,
    Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    ForbiddenPhrase,
    MissingPhrase,
    MissingDataAnchor,
    MissingQuote,
    ValidationInternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub kind: ViolationKind,
    pub penalty: f64,
    /// How often a forbidden phrase occurred; 0 for unmet requirements.
    pub occurrences: usize,
    pub detail: String,
    pub remediation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    #[serde(rename = "D/F")]
    DF,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            Grade::APlus
        } else if score >= 90.0 {
            Grade::A
        } else if score >= 85.0 {
            Grade::BPlus
        } else if score >= 80.0 {
            Grade::B
        } else if score >= 70.0 {
            Grade::C
        } else {
            Grade::DF
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::APlus => "A+ (excellent)",
            Grade::A => "A (minor tweaks needed)",
            Grade::BPlus => "B+ (some revisions needed)",
            Grade::B => "B (needs improvement)",
            Grade::C => "C (significant revisions needed)",
            Grade::DF => "D/F (does not match the house voice)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub score: f64,
    pub grade: Grade,
    pub violations: Vec<Violation>,
    pub unmet_categories: Vec<RequirementCategory>,
}

impl ValidationReport {
    pub fn has_internal_errors(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.kind == ViolationKind::ValidationInternalError)
    }
}

enum Matcher {
    Pattern(Regex),
    AnyOf(Vec<String>),
}

struct CompiledRule {
    rule: GuidelineRule,
    matcher: Result<Matcher, String>,
}

/// An immutable, pre-compiled rule set.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<GuidelineRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let matcher = compile(&rule.check);
                if let Err(reason) = &matcher {
                    warn!(
                        rule = %rule.id,
                        reason = %reason,
                        "guideline rule cannot be evaluated; it will always fail"
                    );
                }
                CompiledRule { rule, matcher }
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that apply to `section`, in declaration order.
    pub fn applicable<'a>(
        &'a self,
        section: &'a str,
    ) -> impl Iterator<Item = &'a GuidelineRule> + 'a {
        self.rules
            .iter()
            .map(|c| &c.rule)
            .filter(move |r| r.applies_to(section))
    }

    /// Score `draft` against every rule that applies to `section`.
    pub fn validate(&self, draft: &str, section: &str) -> ValidationReport {
        let mut score = 100.0;
        let mut violations = Vec::new();
        let mut unmet = BTreeSet::new();

        for compiled in self.rules.iter().filter(|c| c.rule.applies_to(section)) {
            let Some(violation) = evaluate(compiled, draft) else {
                continue;
            };
            if let Some(category) = compiled.rule.category() {
                unmet.insert(category);
            }
            score -= violation.penalty;
            violations.push(violation);
        }

        let score = clamp_score(score);
        ValidationReport {
            score,
            grade: Grade::from_score(score),
            violations,
            unmet_categories: unmet.into_iter().collect(),
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 100.0) }
}

fn compile(check: &RuleCheck) -> Result<Matcher, String> {
    match check {
        RuleCheck::ForbiddenPhrase { phrase, stem } => {
            let phrase = phrase.trim();
            if phrase.is_empty() {
                return Err("forbidden phrase is empty".to_string());
            }
            let starts_word = phrase.chars().next().is_some_and(is_word_char);
            let ends_word = phrase.chars().last().is_some_and(is_word_char);
            let pattern = format!(
                "(?i){}{}{}",
                if starts_word { r"\b" } else { "" },
                regex::escape(phrase),
                if ends_word && !stem { r"\b" } else { "" },
            );
            Regex::new(&pattern)
                .map(Matcher::Pattern)
                .map_err(|e| e.to_string())
        }
        RuleCheck::RequiredPhrase { any_of } => {
            let phrases: Vec<String> = any_of
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
            if phrases.is_empty() {
                return Err("required phrase rule lists no phrases".to_string());
            }
            Ok(Matcher::AnyOf(phrases))
        }
        RuleCheck::RequiredDataAnchor { pattern, .. } => Regex::new(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| e.to_string()),
        RuleCheck::RequiredQuote { min_chars } => {
            let pattern = format!(
                "\"[^\"\\n]{{{min_chars},}}\"|\u{201c}[^\u{201d}\\n]{{{min_chars},}}\u{201d}"
            );
            Regex::new(&pattern)
                .map(Matcher::Pattern)
                .map_err(|e| e.to_string())
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn evaluate(compiled: &CompiledRule, draft: &str) -> Option<Violation> {
    let rule = &compiled.rule;
    let matcher = match &compiled.matcher {
        Ok(matcher) => matcher,
        Err(reason) => {
            return Some(Violation {
                rule_id: rule.id.clone(),
                kind: ViolationKind::ValidationInternalError,
                penalty: rule.weight,
                occurrences: 0,
                detail: format!("rule could not be evaluated: {reason}"),
                remediation: rule.remediation.clone(),
            });
        }
    };

    let violation = |kind, occurrences, detail: String| Violation {
        rule_id: rule.id.clone(),
        kind,
        penalty: rule.weight,
        occurrences,
        detail,
        remediation: rule.remediation.clone(),
    };

    match (&rule.check, matcher) {
        (RuleCheck::ForbiddenPhrase { phrase, .. }, Matcher::Pattern(re)) => {
            let count = re.find_iter(draft).count();
            (count > 0).then(|| {
                violation(
                    ViolationKind::ForbiddenPhrase,
                    count,
                    format!("forbidden phrase \"{phrase}\" used {count} time(s)"),
                )
            })
        }
        (RuleCheck::RequiredPhrase { .. }, Matcher::AnyOf(phrases)) => {
            let lower = draft.to_lowercase();
            (!phrases.iter().any(|p| lower.contains(p.as_str()))).then(|| {
                violation(
                    ViolationKind::MissingPhrase,
                    0,
                    format!("none of the required phrases present: {}", phrases.join(", ")),
                )
            })
        }
        (
            RuleCheck::RequiredDataAnchor {
                min_draft_chars, ..
            },
            Matcher::Pattern(re),
        ) => {
            let long_enough = draft.chars().count() >= *min_draft_chars;
            (long_enough && !re.is_match(draft)).then(|| {
                violation(
                    ViolationKind::MissingDataAnchor,
                    0,
                    "no specific figure, percentage or count found".to_string(),
                )
            })
        }
        (RuleCheck::RequiredQuote { min_chars }, Matcher::Pattern(re)) => {
            (!re.is_match(draft)).then(|| {
                violation(
                    ViolationKind::MissingQuote,
                    0,
                    format!("no quoted passage of at least {min_chars} characters"),
                )
            })
        }
        _ => Some(violation(
            ViolationKind::ValidationInternalError,
            0,
            "rule matcher does not fit its kind".to_string(),
        )),
    }
}

const BUZZWORDS: &[(&str, &str)] = &[
    ("catalyze", ""),
    ("leverage", "Replace with 'use' or 'build on'."),
    ("optimize", ""),
    ("seamless", ""),
    ("robust", "Only keep with specifics, e.g. 'robust alumni network of 400'."),
    ("state-of-the-art", ""),
    ("cutting-edge", ""),
    ("innovative", "Show what is new with a concrete example instead."),
    ("transformative", "Describe the concrete outcome instead."),
    ("groundbreaking", ""),
    ("revolutionary", ""),
    ("at the heart of what we do", ""),
    ("at the core of our mission", ""),
    ("bridge to empowerment", ""),
    ("pathway that challenges", ""),
    ("challenge and change", ""),
    ("deeply rooted in", ""),
    ("far more than", ""),
    ("the chasm between", ""),
    ("ensure", "Replace with 'we will' or 'participants gain'."),
    ("facilitate", ""),
    ("enhance", ""),
    ("utilize", "Replace with 'use'."),
    ("implement", ""),
    ("strategic deployment", ""),
    ("carefully crafted", ""),
    ("testament to", ""),
    ("commitment to excellence", ""),
    ("proven track record", ""),
    ("we are proud to", ""),
    ("we are excited to", ""),
    ("we are committed to", ""),
    ("we are dedicated to", ""),
    ("we are deeply committed", ""),
    ("we recognize", ""),
    ("we understand that", ""),
    ("we believe in the power", ""),
    ("transformative movement", ""),
    ("driven by a mission to", ""),
    ("catalyze significant positive change", ""),
    ("generated", "Never describe how the text was produced."),
    ("ai-generated", "Never describe how the text was produced."),
    ("created by ai", "Never describe how the text was produced."),
    ("this application was", "Never describe how the text was produced."),
    ("this proposal was", "Never describe how the text was produced."),
];

const VAGUE_WORDS: &[&str] = &[
    "many",
    "significant",
    "numerous",
    "various",
    "substantial",
    "considerable",
];

/// Matches percentages, dollar amounts, "60+" style counts and numbers of
/// people.
pub const DEFAULT_DATA_ANCHOR: &str = r"(?i)\d+(\.\d+)?%|\$\s?\d[\d,]*|\b\d[\d,]*\+|\b\d[\d,]* (participants|entrepreneurs|residents|students|youth|adults|people|members|families|businesses)\b";

/// The built-in guideline set used when the settings file defines none.
pub fn default_guidelines() -> Vec<GuidelineRule> {
    let mut rules = Vec::new();

    for (phrase, remediation) in BUZZWORDS {
        rules.push(GuidelineRule {
            id: format!("buzzword:{}", slug(phrase)),
            check: RuleCheck::ForbiddenPhrase {
                phrase: phrase.to_string(),
                stem: !phrase.contains(' '),
            },
            weight: 5.0,
            remediation: if remediation.is_empty() {
                "Remove it and say plainly what happens.".to_string()
            } else {
                remediation.to_string()
            },
            sections: None,
        });
    }

    for word in VAGUE_WORDS {
        rules.push(GuidelineRule {
            id: format!("vague:{word}"),
            check: RuleCheck::ForbiddenPhrase {
                phrase: word.to_string(),
                stem: false,
            },
            weight: 3.0,
            remediation: "Replace with a specific number or data point.".into(),
            sections: None,
        });
    }

    rules.push(GuidelineRule {
        id: "terminology:underserved".into(),
        check: RuleCheck::ForbiddenPhrase {
            phrase: "underserved".into(),
            stem: false,
        },
        weight: 10.0,
        remediation: "Say 'underestimated communities' instead.".into(),
        sections: None,
    });

    rules.push(GuidelineRule {
        id: "required:co-design".into(),
        check: RuleCheck::RequiredPhrase {
            any_of: vec![
                "co-design".into(),
                "co-created".into(),
                "designed with".into(),
                "designed in partnership".into(),
                "tenant leaders".into(),
            ],
        },
        weight: 10.0,
        remediation: "Describe who the program was co-designed with, e.g. \
                      'co-designed with residents and tenant leaders'."
            .into(),
        sections: Some(vec!["Methodology".into(), "Project Description".into()]),
    });

    rules.push(GuidelineRule {
        id: "required:data-anchor".into(),
        check: RuleCheck::RequiredDataAnchor {
            pattern: DEFAULT_DATA_ANCHOR.into(),
            min_draft_chars: 200,
        },
        weight: 10.0,
        remediation: "Add specific metrics: percentages, participant counts or \
                      dollar amounts."
            .into(),
        sections: None,
    });

    rules.push(GuidelineRule {
        id: "required:participant-quote".into(),
        check: RuleCheck::RequiredQuote { min_chars: 20 },
        weight: 10.0,
        remediation: "Quote a participant in their own words.".into(),
        sections: Some(vec!["Need Statement".into(), "Evaluation Plan".into()]),
    });

    rules
}

fn slug(phrase: &str) -> String {
    phrase
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn forbidden(id: &str, phrase: &str, weight: f64) -> GuidelineRule {
        GuidelineRule {
            id: id.into(),
            check: RuleCheck::ForbiddenPhrase {
                phrase: phrase.into(),
                stem: false,
            },
            weight,
            remediation: String::new(),
            sections: None,
        }
    }

    fn anchor(pattern: &str, weight: f64) -> GuidelineRule {
        GuidelineRule {
            id: "anchor".into(),
            check: RuleCheck::RequiredDataAnchor {
                pattern: pattern.into(),
                min_draft_chars: 0,
            },
            weight,
            remediation: "add a number".into(),
            sections: None,
        }
    }

    #[test]
    fn forbidden_phrase_and_missing_anchor_scores_75() {
        let rules = RuleSet::new(vec![
            forbidden("stakeholders", "stakeholders", 15.0),
            anchor(r"\d+%", 10.0),
        ]);
        let report = rules.validate(
            "We convene stakeholders across the borough every month.",
            "Need Statement",
        );

        assert_eq!(report.score, 75.0);
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.unmet_categories, vec![RequirementCategory::DataAnchor]);
        assert_eq!(report.grade, Grade::C);
    }

    #[test]
    fn forbidden_weight_is_applied_once_per_rule() {
        let rules = RuleSet::new(vec![forbidden("s", "stakeholders", 15.0)]);
        let report =
            rules.validate("Stakeholders, stakeholders, STAKEHOLDERS.", "Any");

        assert_eq!(report.score, 85.0);
        assert_eq!(report.violations[0].occurrences, 3);
    }

    #[test]
    fn forbidden_phrase_respects_word_boundaries() {
        let rules = RuleSet::new(vec![forbidden("many", "many", 3.0)]);
        assert_eq!(rules.validate("Our company grew.", "x").score, 100.0);
        assert_eq!(rules.validate("Many people came.", "x").score, 97.0);
    }

    #[test]
    fn stem_match_catches_inflections() {
        let rules = RuleSet::new(vec![GuidelineRule {
            check: RuleCheck::ForbiddenPhrase {
                phrase: "leverage".into(),
                stem: true,
            },
            ..forbidden("leverage", "", 5.0)
        }]);
        assert_eq!(rules.validate("We leveraged local data.", "x").score, 95.0);
        assert_eq!(rules.validate("No such word here.", "x").score, 100.0);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let rules = RuleSet::new(vec![
            forbidden("a", "alpha", 60.0),
            forbidden("b", "beta", 60.0),
        ]);
        let report = rules.validate("alpha beta", "x");
        assert_eq!(report.score, 0.0);
        assert_eq!(report.violations.len(), 2);
    }

    #[test]
    fn every_rule_is_checked() {
        let rules = RuleSet::new(vec![
            forbidden("a", "alpha", 1.0),
            forbidden("b", "beta", 2.0),
            forbidden("c", "gamma", 4.0),
        ]);
        let report = rules.validate("alpha and gamma", "x");
        let ids: Vec<_> = report.violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(report.score, 95.0);
    }

    #[test]
    fn section_scoped_rules_are_skipped_elsewhere() {
        let rule = GuidelineRule {
            id: "codesign".into(),
            check: RuleCheck::RequiredPhrase {
                any_of: vec!["co-design".into()],
            },
            weight: 10.0,
            remediation: String::new(),
            sections: Some(vec!["Methodology".into()]),
        };
        let rules = RuleSet::new(vec![rule]);

        assert_eq!(rules.validate("plain text", "methodology").score, 90.0);
        assert_eq!(rules.validate("plain text", "Budget Narrative").score, 100.0);
        assert_eq!(
            rules.validate("It was Co-Designed with tenants", "Methodology").score,
            100.0
        );
    }

    #[test]
    fn invalid_pattern_fails_closed() {
        let rules = RuleSet::new(vec![anchor("(unclosed", 10.0)]);
        let report = rules.validate("We served 40% more families.", "x");

        assert_eq!(report.score, 90.0);
        assert!(report.has_internal_errors());
        assert_eq!(
            report.violations[0].kind,
            ViolationKind::ValidationInternalError
        );
        assert_eq!(report.unmet_categories, vec![RequirementCategory::DataAnchor]);
    }

    #[test]
    fn empty_required_phrase_list_fails_closed() {
        let rules = RuleSet::new(vec![GuidelineRule {
            id: "empty".into(),
            check: RuleCheck::RequiredPhrase { any_of: vec![] },
            weight: 7.0,
            remediation: String::new(),
            sections: None,
        }]);
        let report = rules.validate("anything", "x");
        assert_eq!(report.score, 93.0);
        assert!(report.has_internal_errors());
    }

    #[test]
    fn quote_requirement_accepts_straight_and_curly_quotes() {
        let rules = RuleSet::new(vec![GuidelineRule {
            id: "quote".into(),
            check: RuleCheck::RequiredQuote { min_chars: 10 },
            weight: 10.0,
            remediation: String::new(),
            sections: None,
        }]);
        assert_eq!(
            rules.validate("She said \"this changed my whole year\".", "x").score,
            100.0
        );
        assert_eq!(
            rules
                .validate("She said \u{201c}this changed my year\u{201d}.", "x")
                .score,
            100.0
        );
        assert_eq!(rules.validate("She said \"ok\".", "x").score, 90.0);
    }

    #[test]
    fn data_anchor_min_length_gate() {
        let rules = RuleSet::new(vec![GuidelineRule {
            check: RuleCheck::RequiredDataAnchor {
                pattern: DEFAULT_DATA_ANCHOR.into(),
                min_draft_chars: 50,
            },
            ..anchor("", 10.0)
        }]);
        assert_eq!(rules.validate("Short text.", "x").score, 100.0);
        let long = "We worked closely with neighbors over the course of the year to grow.";
        assert_eq!(rules.validate(long, "x").score, 90.0);
        let with_data = format!("{long} 60+ signed up.");
        assert_eq!(rules.validate(&with_data, "x").score, 100.0);
    }

    #[test]
    fn default_anchor_recognizes_common_figures() {
        let re = Regex::new(DEFAULT_DATA_ANCHOR).unwrap();
        for text in [
            "95% were women of color",
            "average income of $27,000",
            "60+ signups",
            "30 entrepreneurs completed",
            "400,000 residents",
        ] {
            assert!(re.is_match(text), "{text}");
        }
        assert!(!re.is_match("a number of people"));
    }

    #[test]
    fn default_guidelines_penalize_buzzword_heavy_text() {
        let rules = RuleSet::new(default_guidelines());
        let bad = "At our organization, we are driven by a mission to challenge and change the systemic barriers that have long hindered opportunities. We leverage our innovative platform to catalyze significant positive change for underserved communities. Many participants have benefited from our robust programming.";
        let report = rules.validate(bad, "Executive Summary");

        assert!(report.score < 70.0, "score was {}", report.score);
        assert!(report.violations.iter().any(|v| v.rule_id == "terminology:underserved"));
        assert!(report.unmet_categories.contains(&RequirementCategory::DataAnchor));
    }

    #[test]
    fn default_guidelines_accept_concrete_text() {
        let rules = RuleSet::new(default_guidelines());
        let good = "For thousands of New Yorkers living in public housing, entrepreneurship is one of the few viable paths to income and ownership. Less than 1% of residents report business revenue. Through our six-month accelerator, co-designed with residents and tenant leaders, we create pathways to economic empowerment. At our pilot, 60+ residents signed up in the first week.";
        let report = rules.validate(good, "Executive Summary");

        assert_eq!(report.score, 100.0, "{:?}", report.violations);
        assert_eq!(report.grade, Grade::APlus);
    }

    #[test]
    fn default_rule_ids_are_unique() {
        let rules = default_guidelines();
        let ids: BTreeSet<_> = rules.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct File {
            rules: Vec<GuidelineRule>,
        }
        let file: File = toml::from_str(
            r#"
            [[rules]]
            id = "stakeholders"
            kind = "forbidden-phrase"
            phrase = "stakeholders"
            weight = 15
            remediation = "Name the people."

            [[rules]]
            id = "quote"
            kind = "required-quote"
            weight = 10.0
            sections = ["Need Statement"]
            "#,
        )
        .unwrap();

        assert_eq!(file.rules.len(), 2);
        assert_eq!(file.rules[0].weight, 15.0);
        assert_eq!(
            file.rules[1].check,
            RuleCheck::RequiredQuote { min_chars: 20 }
        );
    }

    #[test]
    fn grades_follow_thresholds() {
        assert_eq!(Grade::from_score(95.0), Grade::APlus);
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(85.0), Grade::BPlus);
        assert_eq!(Grade::from_score(80.0), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::C);
        assert_eq!(Grade::from_score(69.9), Grade::DF);
    }

    proptest! {
        #[test]
        fn validation_is_deterministic_and_bounded(draft in "[ -~]{0,300}") {
            let rules = RuleSet::new(default_guidelines());
            let first = rules.validate(&draft, "Methodology");
            let second = rules.validate(&draft, "Methodology");
            prop_assert_eq!(&first, &second);
            prop_assert!((0.0..=100.0).contains(&first.score));
        }
    }
}
