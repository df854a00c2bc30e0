use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    chunk_id::ChunkId,
    error::{Error, Result},
};

/// Semantic role of a collection. The set is closed: every configured
/// collection maps onto exactly one of these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionRole {
    FullContent,
    VoicePhrase,
    DataMetric,
    ParticipantVoice,
    CoDesignExample,
    ProgramDescription,
}

impl CollectionRole {
    pub const ALL: [CollectionRole; 6] = [
        CollectionRole::FullContent,
        CollectionRole::VoicePhrase,
        CollectionRole::DataMetric,
        CollectionRole::ParticipantVoice,
        CollectionRole::CoDesignExample,
        CollectionRole::ProgramDescription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionRole::FullContent => "full-content",
            CollectionRole::VoicePhrase => "voice-phrase",
            CollectionRole::DataMetric => "data-metric",
            CollectionRole::ParticipantVoice => "participant-voice",
            CollectionRole::CoDesignExample => "co-design-example",
            CollectionRole::ProgramDescription => "program-description",
        }
    }

    /// Query template used when a collection does not configure its own.
    /// `{section}` and `{requirement}` are substituted by the router.
    pub fn default_query_template(&self) -> &'static str {
        match self {
            CollectionRole::FullContent => "{section}: {requirement}",
            CollectionRole::VoicePhrase => {
                "{section} in our own voice: {requirement}"
            }
            CollectionRole::DataMetric => {
                "{section} statistics, percentages, participant numbers, dollar amounts, measured outcomes: {requirement}"
            }
            CollectionRole::ParticipantVoice => {
                "first-person participant testimony and quotes about {section}: {requirement}"
            }
            CollectionRole::CoDesignExample => {
                "co-designed with residents and community partners, {section}: {requirement}"
            }
            CollectionRole::ProgramDescription => {
                "program details and activities for {section}: {requirement}"
            }
        }
    }

    /// Heading used when the role's hits are framed inside a prompt.
    pub fn prompt_heading(&self) -> &'static str {
        match self {
            CollectionRole::FullContent => {
                "SIMILAR PAST CONTENT (for structure and detail)"
            }
            CollectionRole::VoicePhrase => {
                "AUTHENTIC PHRASES (follow these patterns)"
            }
            CollectionRole::DataMetric => {
                "SPECIFIC DATA POINTS (use these exact numbers)"
            }
            CollectionRole::ParticipantVoice => {
                "PARTICIPANT VOICES (consider quoting)"
            }
            CollectionRole::CoDesignExample => {
                "CO-DESIGN LANGUAGE (include similar phrasing)"
            }
            CollectionRole::ProgramDescription => {
                "PROGRAM DESCRIPTIONS (for accurate details)"
            }
        }
    }
}

impl std::fmt::Display for CollectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured, immutable collection definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub role: CollectionRole,
    /// Relative priority used when a section does not override it.
    pub weight: f32,
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_template: Option<String>,
    /// Hits carrying this tag get a small similarity bonus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_tag: Option<String>,
}

impl Collection {
    pub fn new(id: &str, role: CollectionRole, weight: f32, top_k: usize) -> Self {
        Self {
            id: id.to_string(),
            role,
            weight,
            top_k,
            query_template: None,
            prefer_tag: None,
        }
    }

    pub fn query_template(&self) -> &str {
        self.query_template
            .as_deref()
            .unwrap_or_else(|| self.role.default_query_template())
    }
}

/// A stored chunk body. Its embedding lives in a separate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub collection: String,
    pub text: String,
    /// Source document the chunk was cut from.
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// One line of a chunk import file, as produced by the ingestion pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkRecord {
    /// Collection to import into; may be overridden on the command line.
    #[serde(default)]
    pub collection: Option<String>,
    /// Record key, unique within its collection.
    pub key: String,
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    /// Parse a JSON Lines document. Blank lines are ignored; the first
    /// malformed line fails the whole parse.
    pub fn parse_jsonl(text: &str) -> Result<Vec<ChunkRecord>> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::Config(format!("chunk record on line {}: {e}", i + 1))
                })
            })
            .collect()
    }
}

/// A scored chunk from one collection's similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    pub score: f32,
    pub collection: String,
}

/// The six collections of a fresh install, with the original top-K sizes.
pub fn default_collections() -> Vec<Collection> {
    let mut data = Collection::new("data_metrics", CollectionRole::DataMetric, 1.0, 3);
    data.prefer_tag = Some("data-bearing".to_string());

    vec![
        Collection::new("full_content", CollectionRole::FullContent, 1.0, 3),
        Collection::new("voice_phrases", CollectionRole::VoicePhrase, 0.9, 5),
        data,
        Collection::new(
            "participant_voices",
            CollectionRole::ParticipantVoice,
            0.6,
            2,
        ),
        Collection::new(
            "codesign_examples",
            CollectionRole::CoDesignExample,
            0.6,
            2,
        ),
        Collection::new(
            "program_descriptions",
            CollectionRole::ProgramDescription,
            0.7,
            3,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_jsonl_records() {
        let text = r#"{"collection":"voice_phrases","key":"a","text":"We center residents.","tags":["voice"],"embedding":[0.1,0.2]}

{"key":"b","text":"60+ signups","embedding":[1.0,0.0]}
"#;
        let records = ChunkRecord::parse_jsonl(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].collection.as_deref(), Some("voice_phrases"));
        assert_eq!(records[1].collection, None);
        assert_eq!(records[1].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn malformed_jsonl_reports_line() {
        let text = "{\"key\":\"a\",\"text\":\"t\",\"embedding\":[1.0]}\nnot json\n";
        let err = ChunkRecord::parse_jsonl(text).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn roles_round_trip_through_serde_names() {
        for role in CollectionRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn defaults_cover_every_role_once() {
        let collections = default_collections();
        assert_eq!(collections.len(), CollectionRole::ALL.len());
        for role in CollectionRole::ALL {
            assert_eq!(
                collections.iter().filter(|c| c.role == role).count(),
                1,
                "role {role}"
            );
        }
    }

    #[test]
    fn custom_template_overrides_role_default() {
        let mut c = Collection::new("x", CollectionRole::DataMetric, 1.0, 3);
        assert!(c.query_template().contains("statistics"));
        c.query_template = Some("{requirement}".into());
        assert_eq!(c.query_template(), "{requirement}");
    }

    #[test]
    fn tags_match_case_insensitively() {
        let chunk = Chunk {
            id: ChunkId::new("c", "k"),
            collection: "c".into(),
            text: "t".into(),
            source: "s".into(),
            tags: vec!["Data-Bearing".into()],
            metadata: BTreeMap::new(),
        };
        assert!(chunk.has_tag("data-bearing"));
        assert!(!chunk.has_tag("quote"));
    }
}
