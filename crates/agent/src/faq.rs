use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use rebook_core::config::FaqConfig;

use crate::extractor::{normalize_text, tokenize};

const BUILTIN_KNOWLEDGE_BASE: &str = include_str!("../../../config/faq.toml");

pub const DIRECT_ANSWER_THRESHOLD: f64 = 0.7;
pub const CONTEXT_ANSWER_THRESHOLD: f64 = 0.3;
pub const RELATED_ENTRY_THRESHOLD: f64 = 0.2;
const MAX_MATCHES: usize = 3;

pub const NOTHING_FOUND: &str =
    "Sorry, I could not find anything related to your question in our FAQ.";
const CONTACT_FOOTER: &str =
    "If this does not answer your question, please call our hotline 1900 6484 for direct support.";

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "am", "be", "i", "my", "me", "we", "you", "your", "do",
    "does", "can", "could", "what", "which", "when", "how", "to", "of", "for", "in", "on",
    "at", "and", "or", "it", "this", "that", "with", "about", "there",
];

#[derive(Debug, Error)]
pub enum FaqError {
    #[error("could not read knowledge base `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse knowledge base `{path}`: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("faq lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait FaqLookup: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String, FaqError>;
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
struct KnowledgeBaseFile {
    #[serde(default)]
    entries: Vec<FaqEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaqMatch {
    pub index: usize,
    pub score: f64,
}

/// Question/answer pairs ranked by bag-of-words cosine similarity against the question.
#[derive(Clone, Debug)]
pub struct KnowledgeBase {
    entries: Vec<FaqEntry>,
    vectors: Vec<BTreeMap<String, f64>>,
}

impl KnowledgeBase {
    pub fn new(entries: Vec<FaqEntry>) -> Self {
        let vectors = entries.iter().map(|entry| term_vector(&entry.question)).collect();
        Self { entries, vectors }
    }

    pub fn builtin() -> Result<Self, FaqError> {
        Self::parse(BUILTIN_KNOWLEDGE_BASE, Path::new("<builtin>"))
    }

    pub fn load(path: &Path) -> Result<Self, FaqError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| FaqError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&contents, path)
    }

    pub fn from_config(config: &FaqConfig) -> Result<Self, FaqError> {
        match &config.knowledge_base_path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, FaqError> {
        let file: KnowledgeBaseFile = toml::from_str(contents)
            .map_err(|source| FaqError::Parse { path: path.to_path_buf(), source })?;
        Ok(Self::new(file.entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&FaqEntry> {
        self.entries.get(index)
    }

    /// Best matches first; ties keep file order. Entries with no shared word are left out.
    pub fn search(&self, query: &str, limit: usize) -> Vec<FaqMatch> {
        let query_vector = term_vector(query);
        let mut matches: Vec<FaqMatch> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| FaqMatch { index, score: cosine(&query_vector, vector) })
            .filter(|candidate| candidate.score > 0.0)
            .collect();
        matches.sort_by(|left, right| right.score.total_cmp(&left.score));
        matches.truncate(limit);
        matches
    }

    pub fn respond(&self, query: &str) -> String {
        let matches = self.search(query, MAX_MATCHES);
        let Some(best) = matches.first() else {
            return NOTHING_FOUND.to_string();
        };
        debug!(best_index = best.index, best_score = best.score, "faq lookup ranked");

        if best.score >= DIRECT_ANSWER_THRESHOLD {
            return self.entries[best.index].answer.clone();
        }

        if best.score >= CONTEXT_ANSWER_THRESHOLD {
            let lead = &self.entries[best.index];
            let mut reply = format!("**{}**\n\n{}\n\n", lead.question, lead.answer);
            for related in matches.iter().skip(1) {
                if related.score >= RELATED_ENTRY_THRESHOLD {
                    let entry = &self.entries[related.index];
                    reply.push_str(&format!("**{}**\n{}\n\n", entry.question, entry.answer));
                }
            }
            reply.push_str(CONTACT_FOOTER);
            return reply;
        }

        let related: Vec<&FaqMatch> =
            matches.iter().filter(|candidate| candidate.score >= RELATED_ENTRY_THRESHOLD).collect();
        if related.is_empty() {
            return NOTHING_FOUND.to_string();
        }

        let mut reply =
            String::from("Based on your question, I found some related information:\n\n");
        for (position, candidate) in related.iter().enumerate() {
            let entry = &self.entries[candidate.index];
            reply.push_str(&format!(
                "{}. **{}**\n{}\n\n",
                position + 1,
                entry.question,
                entry.answer
            ));
        }
        reply.push_str(CONTACT_FOOTER);
        reply
    }
}

#[async_trait]
impl FaqLookup for KnowledgeBase {
    async fn answer(&self, question: &str) -> Result<String, FaqError> {
        Ok(self.respond(question))
    }
}

fn term_vector(text: &str) -> BTreeMap<String, f64> {
    let mut vector = BTreeMap::new();
    for token in tokenize(&normalize_text(text)) {
        if STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        *vector.entry(token).or_insert(0.0) += 1.0;
    }
    vector
}

fn cosine(left: &BTreeMap<String, f64>, right: &BTreeMap<String, f64>) -> f64 {
    let dot: f64 = left
        .iter()
        .filter_map(|(term, weight)| right.get(term).map(|other| weight * other))
        .sum();
    let norm = |vector: &BTreeMap<String, f64>| vector.values().map(|w| w * w).sum::<f64>().sqrt();
    let denominator = norm(left) * norm(right);
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}
