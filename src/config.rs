//! Settings file (`grantforge.toml`).
//!
//! Every table is optional; anything missing falls back to the built-in
//! defaults. Settings are validated once on load and are immutable
//! afterwards; components receive them explicitly.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    collection::{Collection, default_collections},
    data_dir::DataDir,
    error::{Error, Result},
    provider::RetryConfig,
    rules::{GuidelineRule, default_guidelines},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub organization: Organization,
    pub collections: Vec<Collection>,
    pub sections: Vec<SectionSettings>,
    pub rules: Vec<GuidelineRule>,
    pub provider: ProviderSettings,
    pub timeouts: Timeouts,
    pub job: JobDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            organization: Organization::default(),
            collections: default_collections(),
            sections: default_sections(),
            rules: default_guidelines(),
            provider: ProviderSettings::default(),
            timeouts: Timeouts::default(),
            job: JobDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Organization {
    pub name: String,
    pub mission: String,
    pub programs: Vec<String>,
    pub beneficiaries: String,
}

impl Default for Organization {
    fn default() -> Self {
        Self {
            name: "Cambio Labs".to_string(),
            mission: "Cambio Labs empowers underestimated BIPOC youth and adults \
                      through technology education, workforce development, and \
                      entrepreneurship programs."
                .to_string(),
            programs: vec![
                "Journey Platform (gamified learning platform)".to_string(),
                "StartUp NYCHA (business accelerator for public housing residents)"
                    .to_string(),
                "Cambio Solar (green workforce development)".to_string(),
                "Cambio Coding & AI".to_string(),
            ],
            beneficiaries: "Low-income BIPOC youth and adults, public housing \
                            residents, and underrepresented communities in tech \
                            and entrepreneurship."
                .to_string(),
        }
    }
}

/// Per-section retrieval and acceptance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionSettings {
    pub name: String,
    pub instructions: String,
    /// Collection id to relative priority. Missing ids use the collection's
    /// default weight; a weight of 0 excludes the collection.
    pub weights: BTreeMap<String, f32>,
    pub per_collection_cap: usize,
    pub max_context_tokens: usize,
    /// Word-set Jaccard similarity at or above which two chunks are
    /// considered duplicates.
    pub dedup_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
}

impl Default for SectionSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            instructions: String::new(),
            weights: BTreeMap::new(),
            per_collection_cap: 5,
            max_context_tokens: 1500,
            dedup_threshold: 0.85,
            acceptance_threshold: None,
            max_attempts: None,
        }
    }
}

impl SectionSettings {
    /// Settings used for a section name that is not configured.
    pub fn fallback(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instructions: format!(
                "Write the {name} section based on the examples provided."
            ),
            ..Self::default()
        }
    }

    /// Effective weight of `collection` for this section.
    pub fn weight_for(&self, collection: &Collection) -> f32 {
        self.weights
            .get(&collection.id)
            .copied()
            .unwrap_or(collection.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Inline key; takes precedence over `api_key_env`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub completion_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryConfig,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            completion_model: "gpt-4-turbo-preview".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub retrieval_ms: u64,
    pub embedding_ms: u64,
    pub generation_ms: u64,
    pub job_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            retrieval_ms: 5_000,
            embedding_ms: 15_000,
            generation_ms: 120_000,
            job_secs: 900,
        }
    }
}

impl Timeouts {
    pub fn retrieval(&self) -> Duration {
        Duration::from_millis(self.retrieval_ms)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }

    pub fn job(&self) -> Duration {
        Duration::from_secs(self.job_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub acceptance_threshold: f64,
    pub max_attempts: usize,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            acceptance_threshold: 85.0,
            max_attempts: 3,
        }
    }
}

impl Settings {
    /// Load settings from, in order of priority:
    /// 1. An explicit path (from --config); it must exist
    /// 2. The GRANTFORGE_CONFIG environment variable; it must exist
    /// 3. `grantforge.toml` in the data directory, if present
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>, data_dir: &DataDir) -> Result<Self> {
        let required = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("GRANTFORGE_CONFIG").map(PathBuf::from));

        let path = match required {
            Some(path) if !path.is_file() => {
                return Err(Error::NotFound {
                    kind: "settings file",
                    name: path.display().to_string(),
                });
            }
            Some(path) => path,
            None => {
                let path = data_dir.settings_file();
                if !path.is_file() {
                    debug!("no settings file, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        debug!(path = %path.display(), "loading settings");
        let text = std::fs::read_to_string(&path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for c in &self.collections {
            if c.id.trim().is_empty() {
                return Err(config_err("collection id must not be empty"));
            }
            if !ids.insert(c.id.as_str()) {
                return Err(config_err(format!("duplicate collection id '{}'", c.id)));
            }
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(config_err(format!(
                    "collection '{}' has invalid weight {}",
                    c.id, c.weight
                )));
            }
            if c.top_k == 0 {
                return Err(config_err(format!(
                    "collection '{}' must retrieve at least one chunk",
                    c.id
                )));
            }
        }

        let mut names = BTreeSet::new();
        for s in &self.sections {
            if s.name.trim().is_empty() {
                return Err(config_err("section name must not be empty"));
            }
            if !names.insert(s.name.to_lowercase()) {
                return Err(config_err(format!("duplicate section '{}'", s.name)));
            }
            for (id, weight) in &s.weights {
                if !ids.contains(id.as_str()) {
                    return Err(config_err(format!(
                        "section '{}' weights unknown collection '{id}'",
                        s.name
                    )));
                }
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(config_err(format!(
                        "section '{}' has invalid weight {weight} for '{id}'",
                        s.name
                    )));
                }
            }
            if !(s.dedup_threshold > 0.0 && s.dedup_threshold <= 1.0) {
                return Err(config_err(format!(
                    "section '{}' dedup_threshold must be in (0, 1]",
                    s.name
                )));
            }
            if let Some(t) = s.acceptance_threshold {
                check_threshold(t)?;
            }
            if s.max_attempts == Some(0) {
                return Err(config_err(format!(
                    "section '{}' max_attempts must be at least 1",
                    s.name
                )));
            }
        }

        let mut rule_ids = BTreeSet::new();
        for r in &self.rules {
            if !rule_ids.insert(r.id.as_str()) {
                return Err(config_err(format!("duplicate rule id '{}'", r.id)));
            }
            if !r.weight.is_finite() || r.weight < 0.0 {
                return Err(config_err(format!(
                    "rule '{}' has invalid weight {}",
                    r.id, r.weight
                )));
            }
        }

        check_threshold(self.job.acceptance_threshold)?;
        if self.job.max_attempts == 0 {
            return Err(config_err("job.max_attempts must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(config_err("provider.temperature must be in [0, 2]"));
        }

        Ok(())
    }

    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.id == id)
    }

    /// Settings for `name` (case-insensitive), or a generic fallback.
    pub fn section(&self, name: &str) -> SectionSettings {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| SectionSettings::fallback(name))
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }
}

pub(crate) fn check_threshold(threshold: f64) -> Result<()> {
    if (0.0..=100.0).contains(&threshold) {
        Ok(())
    } else {
        Err(config_err(format!(
            "acceptance threshold {threshold} must be in [0, 100]"
        )))
    }
}

fn config_err(message: impl Into<String>) -> Error {
    Error::Config(message.into())
}

fn section(
    name: &str,
    instructions: &str,
    weights: &[(&str, f32)],
) -> SectionSettings {
    SectionSettings {
        name: name.to_string(),
        instructions: instructions.trim().to_string(),
        weights: weights
            .iter()
            .map(|(id, w)| (id.to_string(), *w))
            .collect(),
        ..SectionSettings::default()
    }
}

/// The six sections of a standard application, with the retrieval mix
/// each one needs. Participant quotes feed the need statement and
/// evaluation plan; co-design examples feed methodology and project
/// description.
pub fn default_sections() -> Vec<SectionSettings> {
    vec![
        section(
            "Executive Summary",
            r#"
Write 250-300 words introducing the organization, the problem, our solution and its impact.
Open with the mission in our own words. State the problem with concrete data. Name specific programs.
Report actual pilot results. Close on the outcome for the community.
Confident and clear; every sentence adds new information.
"#,
            &[("participant_voices", 0.0), ("codesign_examples", 0.0)],
        ),
        section(
            "Need Statement",
            r#"
Write 300-400 words on the problem facing the people we serve.
Open with a specific, grounded problem statement. Give systemic context with data.
Connect it to our community. Use only statistics that appear in the examples.
Close with why this matters and why we are positioned to help. Informed, not preachy.
"#,
            &[("participant_voices", 0.8), ("codesign_examples", 0.0)],
        ),
        section(
            "Project Description",
            r#"
Write 350-450 words describing what we will actually do.
Name specific programs, say who they were co-designed with, list concrete activities,
who participates and what they gain (skills, certifications, network, funding).
Concrete and specific; explain it like you have run it before.
"#,
            &[("participant_voices", 0.0), ("codesign_examples", 0.9)],
        ),
        section(
            "Methodology",
            r#"
Write 300-400 words explaining how we will run the program step by step.
Cover recruitment, the co-design process, curriculum, timeline and phases,
named partners and staffing. Flow from recruitment to activities to outcomes.
Write as a practitioner who knows exactly how this works.
"#,
            &[("participant_voices", 0.0), ("codesign_examples", 1.0)],
        ),
        section(
            "Evaluation Plan",
            r#"
Write 250-350 words on how we will measure success.
Include quantitative metrics, qualitative feedback, data collection methods,
past results taken only from the examples, and how the data will improve the program.
Thoughtful and realistic.
"#,
            &[
                ("participant_voices", 0.9),
                ("codesign_examples", 0.0),
                ("data_metrics", 1.0),
            ],
        ),
        section(
            "Budget Narrative",
            r#"
Write 200-300 words explaining where the money goes and why.
Cover staff, program costs, materials and participant support, each tied to an activity.
Transparent; show stewardship.
"#,
            &[
                ("participant_voices", 0.0),
                ("codesign_examples", 0.0),
                ("data_metrics", 1.0),
            ],
        ),
    ]
}
