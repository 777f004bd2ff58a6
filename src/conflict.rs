//! Contradiction detection across a result set.
//!
//! Each invocation runs a fixed pipeline:
//!
//! 1. **Gather** every unordered document pair.
//! 2. **Gate** pairs with missing, short, or identical text.
//! 3. **Scan** aligned sentences for lexical indicators (mismatched numbers,
//!    dates, or versions, one-sided negation, opposing terms).
//! 4. **Score** and categorize each pair from its indicators.
//! 5. **Tier** by confidence and cap at `max_pairs_total`.
//! 6. **Validate** the top `max_llm_pairs` with an optional
//!    [`ConflictValidator`], concurrently, under one wall-clock deadline.
//! 7. **Aggregate** into a [`ConflictAnalysis`].
//!
//! Validation never drops a pair or fails the call. A pair whose validation
//! times out, errors, or is declined keeps its lexical confidence.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::{Document, DocumentRef};
use crate::validation::{ConflictValidator, ValidationRequest, ValidationVerdict};

/// Default minimum text length, in characters, for a document to be scanned.
pub const DEFAULT_MIN_TEXT_LENGTH: usize = 20;

/// Sentences must share at least this Jaccard overlap to be compared.
const ALIGNMENT_THRESHOLD: f64 = 0.5;

const MAX_INDICATORS_PER_PAIR: usize = 10;

/// Upper bound on the validation deadline, in seconds.
pub const MAX_VALIDATION_TIMEOUT_S: f64 = 3600.0;

/// Limits for one detection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictBudget {
    pub use_llm: bool,
    pub max_llm_pairs: usize,
    pub overall_timeout_s: f64,
    pub max_pairs_total: usize,
    pub text_window_chars: usize,
    pub max_concurrency: usize,
}

impl Default for ConflictBudget {
    fn default() -> Self {
        Self {
            use_llm: false,
            max_llm_pairs: 5,
            overall_timeout_s: 30.0,
            max_pairs_total: 50,
            text_window_chars: 2000,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    NumericMismatch,
    DateMismatch,
    VersionMismatch,
    Negation,
    OpposingTerms,
    Unclassified,
}

impl IndicatorKind {
    /// Contribution of one indicator of this kind to pair confidence.
    pub fn weight(&self) -> f64 {
        match self {
            IndicatorKind::NumericMismatch => 0.45,
            IndicatorKind::DateMismatch => 0.4,
            IndicatorKind::VersionMismatch => 0.4,
            IndicatorKind::Negation => 0.35,
            IndicatorKind::OpposingTerms => 0.3,
            IndicatorKind::Unclassified => 0.2,
        }
    }
}

/// One piece of lexical evidence that two documents disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictIndicator {
    pub kind: IndicatorKind,
    pub description: String,
    pub statement_a: String,
    pub statement_b: String,
    /// The aligned sentences read as instructions.
    pub procedural: bool,
}

impl fmt::Display for ConflictIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    Numeric,
    Temporal,
    Version,
    Procedural,
    Factual,
    General,
}

impl ConflictCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCategory::Numeric => "numeric",
            ConflictCategory::Temporal => "temporal",
            ConflictCategory::Version => "version",
            ConflictCategory::Procedural => "procedural",
            ConflictCategory::Factual => "factual",
            ConflictCategory::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "numeric" => Some(ConflictCategory::Numeric),
            "temporal" => Some(ConflictCategory::Temporal),
            "version" => Some(ConflictCategory::Version),
            "procedural" => Some(ConflictCategory::Procedural),
            "factual" => Some(ConflictCategory::Factual),
            "general" => Some(ConflictCategory::General),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictPair {
    pub document_a: DocumentRef,
    pub document_b: DocumentRef,
    pub category: ConflictCategory,
    pub confidence: f64,
    pub lexical_confidence: f64,
    pub indicators: Vec<String>,
    /// Aligned sentence pairs behind the indicators.
    pub statements: Vec<(String, String)>,
    pub validation: Option<ValidationVerdict>,
    pub resolution_suggestion: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictStats {
    pub documents: usize,
    pub pairs_considered: usize,
    pub pairs_gated: usize,
    pub candidates: usize,
    pub candidates_dropped_by_cap: usize,
    pub validations_requested: usize,
    pub validations_completed: usize,
    pub validation_timed_out: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictAnalysis {
    pub conflicting_pairs: Vec<ConflictPair>,
    pub category_counts: BTreeMap<String, usize>,
    pub stats: ConflictStats,
}

pub struct ConflictDetector {
    min_text_length: usize,
    validator: Option<Arc<dyn ConflictValidator>>,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self {
            min_text_length: DEFAULT_MIN_TEXT_LENGTH,
            validator: None,
        }
    }

    pub fn with_min_text_length(mut self, min: usize) -> Self {
        self.min_text_length = min;
        self
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn ConflictValidator>>) -> Self {
        self.validator = validator;
        self
    }

    /// Whether a pair has enough distinct text to be worth scanning.
    pub fn should_analyze_for_conflicts(&self, a: &Document, b: &Document) -> bool {
        let (ta, tb) = (a.text().trim(), b.text().trim());
        if ta.is_empty() || tb.is_empty() {
            return false;
        }
        if ta.chars().count() < self.min_text_length || tb.chars().count() < self.min_text_length {
            return false;
        }
        ta != tb
    }

    pub async fn detect_conflicts(&self, documents: &[Document], budget: &ConflictBudget) -> ConflictAnalysis {
        let started = Instant::now();
        let mut stats = ConflictStats {
            documents: documents.len(),
            ..Default::default()
        };

        let mut candidates: Vec<Candidate> = Vec::new();
        for i in 0..documents.len() {
            for j in (i + 1)..documents.len() {
                stats.pairs_considered += 1;
                let (a, b) = (&documents[i], &documents[j]);
                if !self.should_analyze_for_conflicts(a, b) {
                    stats.pairs_gated += 1;
                    continue;
                }
                let indicators = find_contradiction_patterns(a.text(), b.text());
                if indicators.is_empty() {
                    continue;
                }
                candidates.push(Candidate {
                    a: i,
                    b: j,
                    confidence: calculate_conflict_confidence(&indicators),
                    indicators,
                });
            }
        }
        stats.candidates = candidates.len();

        // Stable: equal confidences keep pair order.
        candidates.sort_by(|x, y| {
            y.confidence
                .partial_cmp(&x.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if candidates.len() > budget.max_pairs_total {
            stats.candidates_dropped_by_cap = candidates.len() - budget.max_pairs_total;
            candidates.truncate(budget.max_pairs_total);
        }
        tracing::debug!(
            considered = stats.pairs_considered,
            gated = stats.pairs_gated,
            kept = candidates.len(),
            "lexical conflict scan complete"
        );

        let mut verdicts: Vec<Option<ValidationVerdict>> = vec![None; candidates.len()];
        if let Some(validator) = self.validator.as_ref().filter(|_| budget.use_llm) {
            let requests: Vec<(usize, ValidationRequest)> = candidates
                .iter()
                .take(budget.max_llm_pairs)
                .enumerate()
                .map(|(tier, c)| (tier, validation_request(documents, c, budget.text_window_chars)))
                .collect();
            stats.validations_requested = requests.len();
            if !requests.is_empty() {
                let (completed, timed_out) = validate_batch(validator.clone(), requests, budget).await;
                stats.validations_completed = completed.len();
                stats.validation_timed_out = timed_out;
                for (tier, verdict) in completed {
                    verdicts[tier] = Some(verdict);
                }
            }
        }

        let mut pairs: Vec<ConflictPair> = candidates
            .into_iter()
            .zip(verdicts)
            .map(|(c, verdict)| build_pair(documents, c, verdict))
            .collect();
        pairs.sort_by(|x, y| {
            y.confidence
                .partial_cmp(&x.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut category_counts = BTreeMap::new();
        for pair in &pairs {
            *category_counts.entry(pair.category.as_str().to_string()).or_insert(0) += 1;
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        ConflictAnalysis {
            conflicting_pairs: pairs,
            category_counts,
            stats,
        }
    }
}

struct Candidate {
    a: usize,
    b: usize,
    confidence: f64,
    indicators: Vec<ConflictIndicator>,
}

fn validation_request(documents: &[Document], c: &Candidate, window: usize) -> ValidationRequest {
    let (a, b) = (&documents[c.a], &documents[c.b]);
    ValidationRequest {
        title_a: a.title.clone(),
        title_b: b.title.clone(),
        text_a: truncate_chars(a.text(), window),
        text_b: truncate_chars(b.text(), window),
        context: c
            .indicators
            .iter()
            .map(|i| i.description.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Run validations concurrently, bounded by `max_concurrency` and one
/// deadline for the whole batch. Returns completed verdicts keyed by tier
/// index and whether the deadline cut the batch short.
async fn validate_batch(
    validator: Arc<dyn ConflictValidator>,
    requests: Vec<(usize, ValidationRequest)>,
    budget: &ConflictBudget,
) -> (Vec<(usize, ValidationVerdict)>, bool) {
    let secs = if budget.overall_timeout_s > MAX_VALIDATION_TIMEOUT_S {
        MAX_VALIDATION_TIMEOUT_S
    } else {
        budget.overall_timeout_s
    };
    let timeout = match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => d,
        _ => {
            tracing::warn!(timeout = budget.overall_timeout_s, "invalid validation timeout, skipping validation");
            return (Vec::new(), false);
        }
    };
    let Some(deadline) = tokio::time::Instant::now().checked_add(timeout) else {
        tracing::warn!(timeout = budget.overall_timeout_s, "validation deadline out of range, skipping validation");
        return (Vec::new(), false);
    };
    let semaphore = Arc::new(Semaphore::new(budget.max_concurrency.max(1)));

    let mut set = JoinSet::new();
    for (tier, request) in requests {
        let validator = validator.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            match validator.validate(&request).await {
                Ok(Some(verdict)) => Some((tier, verdict)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(%e, validator = validator.name(), "conflict validation failed");
                    None
                }
            }
        });
    }

    let mut completed = Vec::new();
    let mut timed_out = false;
    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok(Some(result)))) => completed.push(result),
            Ok(Some(Ok(None))) => {}
            Ok(Some(Err(e))) => tracing::warn!(%e, "validation task failed"),
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    outstanding = set.len(),
                    timeout_s = budget.overall_timeout_s,
                    "validation deadline reached, keeping lexical confidence"
                );
                set.abort_all();
                timed_out = true;
                break;
            }
        }
    }
    (completed, timed_out)
}

fn build_pair(documents: &[Document], c: Candidate, verdict: Option<ValidationVerdict>) -> ConflictPair {
    let (a, b) = (&documents[c.a], &documents[c.b]);
    let mut category = categorize_conflict(&c.indicators);
    let mut confidence = c.confidence;

    if let Some(v) = &verdict {
        if v.is_conflict {
            confidence = 0.4 * c.confidence + 0.6 * v.confidence;
            if let Some(cat) = v.category.as_deref().and_then(ConflictCategory::parse) {
                category = cat;
            }
        } else {
            confidence = c.confidence * 0.3;
        }
    }

    let mut statements: Vec<(String, String)> = Vec::new();
    for ind in &c.indicators {
        let pair = (ind.statement_a.clone(), ind.statement_b.clone());
        if !statements.contains(&pair) {
            statements.push(pair);
        }
    }

    ConflictPair {
        document_a: DocumentRef::from(a),
        document_b: DocumentRef::from(b),
        category,
        confidence: confidence.clamp(0.0, 1.0),
        lexical_confidence: c.confidence,
        indicators: c.indicators.iter().map(|i| i.description.clone()).collect(),
        statements,
        validation: verdict,
        resolution_suggestion: resolution_suggestion(category, a, b),
    }
}

fn resolution_suggestion(category: ConflictCategory, a: &Document, b: &Document) -> String {
    let newer = match (a.updated_at, b.updated_at) {
        (Some(x), Some(y)) if x > y => Some((a, b)),
        (Some(x), Some(y)) if y > x => Some((b, a)),
        _ => None,
    };
    let base = match category {
        ConflictCategory::Numeric => "Confirm the correct value and update the outdated figure",
        ConflictCategory::Temporal => "Check which date is current and correct the other document",
        ConflictCategory::Version => "Align both documents on the currently supported version",
        ConflictCategory::Procedural => "Reconcile the conflicting instructions into a single procedure",
        ConflictCategory::Factual => "Verify the statement against the source of truth and fix the inaccurate document",
        ConflictCategory::General => "Review both documents for consistency",
    };
    match newer {
        Some((new, old)) => format!("{}. '{}' was updated more recently than '{}'.", base, new.title, old.title),
        None => format!("{}.", base),
    }
}

/// Map indicator shapes to a category. Empty or unrecognized sets are
/// `general`.
pub fn categorize_conflict(indicators: &[ConflictIndicator]) -> ConflictCategory {
    let has = |kind: IndicatorKind| indicators.iter().any(|i| i.kind == kind);
    if has(IndicatorKind::VersionMismatch) {
        ConflictCategory::Version
    } else if has(IndicatorKind::DateMismatch) {
        ConflictCategory::Temporal
    } else if has(IndicatorKind::NumericMismatch) {
        ConflictCategory::Numeric
    } else if indicators
        .iter()
        .any(|i| matches!(i.kind, IndicatorKind::Negation | IndicatorKind::OpposingTerms))
    {
        if indicators.iter().any(|i| i.procedural) {
            ConflictCategory::Procedural
        } else {
            ConflictCategory::Factual
        }
    } else {
        ConflictCategory::General
    }
}

/// `1 − Π(1 − wᵢ)` over indicator weights: `0.0` for none, rising toward
/// `1.0` with each additional indicator.
pub fn calculate_conflict_confidence(indicators: &[ConflictIndicator]) -> f64 {
    if indicators.is_empty() {
        return 0.0;
    }
    let keep: f64 = indicators
        .iter()
        .map(|i| 1.0 - i.kind.weight().clamp(0.0, 1.0))
        .product();
    (1.0 - keep).clamp(0.0, 1.0)
}

struct Patterns {
    sentence_split: Regex,
    version: Regex,
    date: Regex,
    number: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        sentence_split: Regex::new(r"[.!?]+(?:\s+|$)|\n+").expect("valid regex"),
        version: Regex::new(r"(?i)\bv(\d+(?:\.\d+)*)\b|\b(\d+\.\d+\.\d+(?:\.\d+)*)\b|\bversion\s+(\d+(?:\.\d+)*)\b")
            .expect("valid regex"),
        date: Regex::new(
            r"(?i)\b\d{4}-\d{2}-\d{2}\b|\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?\b",
        )
        .expect("valid regex"),
        number: Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(%|[a-z]+)?").expect("valid regex"),
    })
}

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "cannot", "can't", "don't", "doesn't", "isn't", "aren't", "won't",
    "shouldn't", "mustn't", "without", "nor", "none",
];

const OPPOSING_TERMS: &[(&str, &str)] = &[
    ("enable", "disable"),
    ("enabled", "disabled"),
    ("allow", "deny"),
    ("allowed", "denied"),
    ("required", "optional"),
    ("mandatory", "optional"),
    ("always", "never"),
    ("increase", "decrease"),
    ("true", "false"),
    ("supported", "unsupported"),
    ("deprecated", "recommended"),
    ("synchronous", "asynchronous"),
    ("sync", "async"),
    ("public", "private"),
    ("before", "after"),
    ("include", "exclude"),
    ("accept", "reject"),
];

const PROCEDURAL_WORDS: &[&str] = &[
    "must", "should", "run", "install", "configure", "set", "use", "click", "deploy", "step",
    "enable", "disable", "restart", "create", "delete", "update", "upgrade",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "the", "this", "that", "to", "was", "with",
];

fn sentences(text: &str) -> Vec<&str> {
    patterns()
        .sentence_split
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

/// Tokens used to align sentences: alphabetic, with stop words, negations,
/// and opposing terms removed, so that the words that differ in a
/// contradiction do not prevent alignment.
fn alignment_tokens(sentence: &str) -> BTreeSet<String> {
    sentence
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.to_lowercase())
        .filter(|t| {
            t.len() > 1
                && t.chars().all(|c| c.is_alphabetic() || c == '\'')
                && !STOP_WORDS.contains(&t.as_str())
                && !NEGATIONS.contains(&t.as_str())
                && !OPPOSING_TERMS.iter().any(|(x, y)| t == x || t == y)
        })
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    a.intersection(b).count() as f64 / a.union(b).count() as f64
}

fn word_set(sentence: &str) -> BTreeSet<String> {
    sentence
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn has_negation(words: &BTreeSet<String>) -> bool {
    words.iter().any(|w| NEGATIONS.contains(&w.as_str()) || w.ends_with("n't"))
}

fn is_procedural(words: &BTreeSet<String>) -> bool {
    words.iter().any(|w| PROCEDURAL_WORDS.contains(&w.as_str()))
}

fn versions(sentence: &str) -> BTreeSet<String> {
    patterns()
        .version
        .captures_iter(sentence)
        .filter_map(|c| c.iter().skip(1).flatten().next().map(|m| m.as_str().to_string()))
        .collect()
}

fn dates(sentence: &str) -> BTreeSet<String> {
    patterns()
        .date
        .find_iter(sentence)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Numbers (with their unit word, when one follows) outside any date or
/// version mention.
fn quantities(sentence: &str) -> Vec<String> {
    let p = patterns();
    let stripped = p.version.replace_all(sentence, " ");
    let stripped = p.date.replace_all(&stripped, " ");
    let mut found: Vec<String> = p
        .number
        .captures_iter(&stripped)
        .map(|c| {
            let value = c.get(1).map(|m| m.as_str()).unwrap_or_default();
            match c.get(2) {
                Some(unit) => format!("{} {}", value, unit.as_str().to_lowercase()),
                None => value.to_string(),
            }
        })
        .collect();
    found.sort();
    found
}

fn shorten(sentence: &str) -> String {
    const MAX: usize = 200;
    if sentence.chars().count() <= MAX {
        sentence.to_string()
    } else {
        let cut: String = sentence.chars().take(MAX - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Extract lexical contradiction indicators between two texts.
///
/// Sentences are paired when their content words overlap enough, then the
/// pairs are checked for differing versions, dates, and quantities, for
/// negation present on only one side, and for opposing terms.
pub fn find_contradiction_patterns(text_a: &str, text_b: &str) -> Vec<ConflictIndicator> {
    let sa = sentences(text_a);
    let sb = sentences(text_b);
    let tokens_b: Vec<BTreeSet<String>> = sb.iter().map(|s| alignment_tokens(s)).collect();

    let mut indicators: Vec<ConflictIndicator> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for a in &sa {
        let ta = alignment_tokens(a);
        if ta.is_empty() {
            continue;
        }
        for (b, tb) in sb.iter().zip(&tokens_b) {
            if a.eq_ignore_ascii_case(b) || jaccard(&ta, tb) < ALIGNMENT_THRESHOLD {
                continue;
            }
            for (kind, description) in compare_sentences(a, b) {
                if indicators.len() >= MAX_INDICATORS_PER_PAIR {
                    return indicators;
                }
                if !seen.insert(description.clone()) {
                    continue;
                }
                let words = word_set(a).into_iter().chain(word_set(b)).collect();
                indicators.push(ConflictIndicator {
                    kind,
                    description,
                    statement_a: shorten(a),
                    statement_b: shorten(b),
                    procedural: is_procedural(&words),
                });
            }
        }
    }
    indicators
}

fn compare_sentences(a: &str, b: &str) -> Vec<(IndicatorKind, String)> {
    let mut found = Vec::new();

    let (va, vb) = (versions(a), versions(b));
    if !va.is_empty() && !vb.is_empty() && va != vb {
        found.push((
            IndicatorKind::VersionMismatch,
            format!("version {} vs {}", join(&va), join(&vb)),
        ));
    }

    let (da, db) = (dates(a), dates(b));
    if !da.is_empty() && !db.is_empty() && da != db {
        found.push((IndicatorKind::DateMismatch, format!("date {} vs {}", join(&da), join(&db))));
    }

    let (qa, qb) = (quantities(a), quantities(b));
    if !qa.is_empty() && !qb.is_empty() && qa != qb {
        found.push((
            IndicatorKind::NumericMismatch,
            format!("{} vs {}", qa.join(", "), qb.join(", ")),
        ));
    }

    let (wa, wb) = (word_set(a), word_set(b));
    if has_negation(&wa) != has_negation(&wb) {
        let (neg, pos) = if has_negation(&wa) { (a, b) } else { (b, a) };
        found.push((
            IndicatorKind::Negation,
            format!("negated: \"{}\" vs \"{}\"", shorten(neg), shorten(pos)),
        ));
    }

    for (x, y) in OPPOSING_TERMS {
        let forward = wa.contains(*x) && wb.contains(*y) && !wa.contains(*y) && !wb.contains(*x);
        let backward = wa.contains(*y) && wb.contains(*x) && !wa.contains(*x) && !wb.contains(*y);
        if forward || backward {
            let (left, right) = if forward { (x, y) } else { (y, x) };
            found.push((IndicatorKind::OpposingTerms, format!("'{}' vs '{}'", left, right)));
        }
    }

    found
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, format!("Doc {}", id), "confluence").with_text(text)
    }

    fn indicator(kind: IndicatorKind) -> ConflictIndicator {
        ConflictIndicator {
            kind,
            description: format!("{:?}", kind),
            statement_a: String::new(),
            statement_b: String::new(),
            procedural: false,
        }
    }

    struct CountingValidator {
        calls: AtomicUsize,
        verdict: Option<ValidationVerdict>,
        delay: Duration,
    }

    impl CountingValidator {
        fn new(verdict: Option<ValidationVerdict>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                verdict,
                delay,
            })
        }
    }

    #[async_trait]
    impl ConflictValidator for CountingValidator {
        fn name(&self) -> &str {
            "counting"
        }

        async fn validate(&self, _request: &ValidationRequest) -> anyhow::Result<Option<ValidationVerdict>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.verdict.clone())
        }
    }

    fn confirm(confidence: f64) -> Option<ValidationVerdict> {
        Some(ValidationVerdict {
            is_conflict: true,
            confidence,
            category: None,
            explanation: Some("contradiction".into()),
        })
    }

    /// Five documents that all disagree on the token lifetime.
    fn many_conflicts() -> Vec<Document> {
        [24, 4, 12, 8, 48]
            .iter()
            .enumerate()
            .map(|(i, h)| doc(&i.to_string(), &format!("Token expires in {} hours.", h)))
            .collect()
    }

    #[tokio::test]
    async fn test_numeric_scenario() {
        let docs = vec![doc("a", "Token expires in 24 hours"), doc("b", "Token expires in 4 hours")];
        let analysis = ConflictDetector::new()
            .detect_conflicts(&docs, &ConflictBudget::default())
            .await;
        assert_eq!(analysis.conflicting_pairs.len(), 1);
        let pair = &analysis.conflicting_pairs[0];
        assert_eq!(pair.category, ConflictCategory::Numeric);
        assert!(pair.confidence > 0.0);
        assert_eq!(pair.indicators, vec!["24 hours vs 4 hours".to_string()]);
        assert_eq!(analysis.category_counts.get("numeric"), Some(&1));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let analysis = ConflictDetector::new()
            .detect_conflicts(&[], &ConflictBudget::default())
            .await;
        assert!(analysis.conflicting_pairs.is_empty());
        assert!(analysis.category_counts.is_empty());
    }

    #[tokio::test]
    async fn test_identical_texts_never_conflict() {
        let text = "Token expires in 24 hours and cannot be refreshed";
        let docs = vec![doc("a", text), doc("b", text)];
        let analysis = ConflictDetector::new()
            .detect_conflicts(&docs, &ConflictBudget::default())
            .await;
        assert!(analysis.conflicting_pairs.is_empty());
        assert_eq!(analysis.stats.pairs_gated, 1);
    }

    #[test]
    fn test_gating() {
        let detector = ConflictDetector::new();
        let long = doc("a", "Token expires in 24 hours");
        assert!(!detector.should_analyze_for_conflicts(&long, &Document::new("b", "B", "jira")));
        assert!(!detector.should_analyze_for_conflicts(&long, &doc("c", "   ")));
        assert!(!detector.should_analyze_for_conflicts(&long, &doc("d", "4 hours")));
        assert!(detector.should_analyze_for_conflicts(&long, &doc("e", "Token expires in 4 hours")));
        assert!(ConflictDetector::new()
            .with_min_text_length(5)
            .should_analyze_for_conflicts(&long, &doc("d", "4 hours")));
    }

    #[test]
    fn test_unaligned_sentences_produce_nothing() {
        let found = find_contradiction_patterns("The cache holds 10 entries.", "Deploys happen 3 times a week.");
        assert!(found.is_empty());
    }

    #[test]
    fn test_negation_and_opposing_terms() {
        let found = find_contradiction_patterns(
            "You should enable caching for the API gateway.",
            "You should not disable caching for the API gateway.",
        );
        let kinds: Vec<IndicatorKind> = found.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IndicatorKind::Negation));
        assert!(kinds.contains(&IndicatorKind::OpposingTerms));
        assert_eq!(categorize_conflict(&found), ConflictCategory::Procedural);
    }

    #[test]
    fn test_version_and_date_mismatch() {
        let versions = find_contradiction_patterns(
            "The client requires version 2.1 of the SDK.",
            "The client requires version 3.0 of the SDK.",
        );
        assert_eq!(categorize_conflict(&versions), ConflictCategory::Version);
        assert!(versions.iter().all(|i| i.kind != IndicatorKind::NumericMismatch));

        let dates = find_contradiction_patterns(
            "The migration window closes on 2024-03-01 for all tenants.",
            "The migration window closes on 2024-04-15 for all tenants.",
        );
        assert_eq!(categorize_conflict(&dates), ConflictCategory::Temporal);
    }

    #[test]
    fn test_categorize_defaults_to_general() {
        assert_eq!(categorize_conflict(&[]), ConflictCategory::General);
        assert_eq!(
            categorize_conflict(&[indicator(IndicatorKind::Unclassified)]),
            ConflictCategory::General
        );
        assert_eq!(
            categorize_conflict(&[indicator(IndicatorKind::Negation)]),
            ConflictCategory::Factual
        );
    }

    #[test]
    fn test_confidence_monotonic_and_bounded() {
        assert_eq!(calculate_conflict_confidence(&[]), 0.0);
        let one = calculate_conflict_confidence(&[indicator(IndicatorKind::Negation)]);
        let two = calculate_conflict_confidence(&[
            indicator(IndicatorKind::Negation),
            indicator(IndicatorKind::NumericMismatch),
        ]);
        assert!(one > 0.0);
        assert!(two > one);
        let many: Vec<ConflictIndicator> = (0..50).map(|_| indicator(IndicatorKind::NumericMismatch)).collect();
        assert!(calculate_conflict_confidence(&many) <= 1.0);
    }

    #[tokio::test]
    async fn test_max_pairs_total_respected() {
        let budget = ConflictBudget {
            max_pairs_total: 3,
            ..Default::default()
        };
        let analysis = ConflictDetector::new().detect_conflicts(&many_conflicts(), &budget).await;
        assert_eq!(analysis.conflicting_pairs.len(), 3);
        assert_eq!(analysis.stats.candidates, 10);
        assert_eq!(analysis.stats.candidates_dropped_by_cap, 7);
    }

    #[tokio::test]
    async fn test_max_llm_pairs_respected() {
        let validator = CountingValidator::new(confirm(0.9), Duration::from_millis(1));
        let detector = ConflictDetector::new().with_validator(Some(validator.clone()));
        let budget = ConflictBudget {
            use_llm: true,
            max_llm_pairs: 2,
            ..Default::default()
        };
        let analysis = detector.detect_conflicts(&many_conflicts(), &budget).await;
        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(analysis.stats.validations_completed, 2);
        assert_eq!(
            analysis.conflicting_pairs.iter().filter(|p| p.validation.is_some()).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_use_llm_false_makes_no_calls() {
        let validator = CountingValidator::new(confirm(0.9), Duration::from_millis(1));
        let detector = ConflictDetector::new().with_validator(Some(validator.clone()));
        detector
            .detect_conflicts(&many_conflicts(), &ConflictBudget::default())
            .await;
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_keeps_lexical_confidence() {
        let validator = CountingValidator::new(confirm(1.0), Duration::from_secs(30));
        let detector = ConflictDetector::new().with_validator(Some(validator));
        let budget = ConflictBudget {
            use_llm: true,
            overall_timeout_s: 0.2,
            ..Default::default()
        };
        let started = Instant::now();
        let analysis = detector.detect_conflicts(&many_conflicts(), &budget).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(analysis.stats.validation_timed_out);
        assert_eq!(analysis.conflicting_pairs.len(), 10);
        for pair in &analysis.conflicting_pairs {
            assert!(pair.validation.is_none());
            assert_eq!(pair.confidence, pair.lexical_confidence);
        }
    }

    #[tokio::test]
    async fn test_huge_timeout_is_clamped() {
        let docs = vec![doc("a", "Token expires in 24 hours"), doc("b", "Token expires in 4 hours")];
        let detector = ConflictDetector::new()
            .with_validator(Some(CountingValidator::new(confirm(1.0), Duration::ZERO)));
        for timeout in [1e19, f64::MAX] {
            let budget = ConflictBudget {
                use_llm: true,
                overall_timeout_s: timeout,
                ..Default::default()
            };
            let analysis = detector.detect_conflicts(&docs, &budget).await;
            assert_eq!(analysis.conflicting_pairs.len(), 1);
            assert!(analysis.conflicting_pairs[0].validation.is_some());
            assert!(!analysis.stats.validation_timed_out);
        }
    }

    #[tokio::test]
    async fn test_verdicts_blend_confidence() {
        let docs = vec![doc("a", "Token expires in 24 hours"), doc("b", "Token expires in 4 hours")];
        let budget = ConflictBudget {
            use_llm: true,
            ..Default::default()
        };

        let confirming = ConflictDetector::new()
            .with_validator(Some(CountingValidator::new(confirm(1.0), Duration::ZERO)))
            .detect_conflicts(&docs, &budget)
            .await;
        let pair = &confirming.conflicting_pairs[0];
        let expected = 0.4 * pair.lexical_confidence + 0.6;
        assert!((pair.confidence - expected).abs() < 1e-9);

        let rejecting_verdict = Some(ValidationVerdict {
            is_conflict: false,
            confidence: 0.9,
            category: None,
            explanation: None,
        });
        let rejecting = ConflictDetector::new()
            .with_validator(Some(CountingValidator::new(rejecting_verdict, Duration::ZERO)))
            .detect_conflicts(&docs, &budget)
            .await;
        let pair = &rejecting.conflicting_pairs[0];
        assert!((pair.confidence - pair.lexical_confidence * 0.3).abs() < 1e-9);
        assert_eq!(rejecting.conflicting_pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_declined_validation_keeps_pair() {
        let docs = vec![doc("a", "Token expires in 24 hours"), doc("b", "Token expires in 4 hours")];
        let budget = ConflictBudget {
            use_llm: true,
            ..Default::default()
        };
        let analysis = ConflictDetector::new()
            .with_validator(Some(CountingValidator::new(None, Duration::ZERO)))
            .detect_conflicts(&docs, &budget)
            .await;
        assert_eq!(analysis.conflicting_pairs.len(), 1);
        assert!(analysis.conflicting_pairs[0].validation.is_none());
    }

    #[test]
    fn test_resolution_prefers_newer_document() {
        let mut a = doc("a", "x");
        let mut b = doc("b", "y");
        a.updated_at = chrono::DateTime::from_timestamp(1_700_000_000, 0);
        b.updated_at = chrono::DateTime::from_timestamp(1_600_000_000, 0);
        let s = resolution_suggestion(ConflictCategory::Numeric, &a, &b);
        assert!(s.contains("'Doc a' was updated more recently than 'Doc b'"));
    }
}
