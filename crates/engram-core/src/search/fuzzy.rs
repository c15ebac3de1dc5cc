//! Fuzzy matching and query expansion
//!
//! Rewrites queries before lexical search: acronym expansion, typo
//! correction, and Levenshtein-based fuzzy acronym lookup. Disabled
//! entirely when `ENABLE_FUZZY_MATCH` is off, in which case
//! [`expand_query`] is the identity.

use std::collections::HashSet;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum edit distance for fuzzy acronym matches.
pub const MAX_EDIT_DISTANCE: usize = 2;

/// Terms shorter than this are never fuzzy-matched.
pub const MIN_FUZZY_TERM_LENGTH: usize = 3;

/// Curated acronym expansions. Lookup is case-insensitive.
pub const ACRONYM_MAP: &[(&str, &[&str])] = &[
    ("api", &["application programming interface"]),
    ("ann", &["approximate nearest neighbor"]),
    ("ast", &["abstract syntax tree"]),
    ("auth", &["authentication", "authorization"]),
    ("bm25", &["best match 25", "okapi ranking"]),
    ("cd", &["continuous deployment"]),
    ("ci", &["continuous integration"]),
    ("cli", &["command line interface"]),
    ("cors", &["cross origin resource sharing"]),
    ("crdt", &["conflict-free replicated data type"]),
    ("crud", &["create read update delete"]),
    ("csrf", &["cross site request forgery"]),
    ("db", &["database"]),
    ("dto", &["data transfer object"]),
    ("e2e", &["end to end"]),
    ("fsrs", &["free spaced repetition scheduler"]),
    ("fts", &["full text search"]),
    ("gc", &["garbage collection"]),
    ("grpc", &["grpc remote procedure call"]),
    ("hnsw", &["hierarchical navigable small world"]),
    ("http", &["hypertext transfer protocol"]),
    ("jwt", &["json web token"]),
    ("llm", &["large language model"]),
    ("lru", &["least recently used"]),
    ("mcp", &["model context protocol"]),
    ("orm", &["object relational mapping"]),
    ("pe", &["prediction error"]),
    ("rag", &["retrieval augmented generation"]),
    ("rbac", &["role based access control"]),
    ("rpc", &["remote procedure call"]),
    ("rrf", &["reciprocal rank fusion"]),
    ("sql", &["structured query language"]),
    ("ssr", &["server side rendering"]),
    ("tdd", &["test driven development"]),
    ("ttl", &["time to live"]),
    ("ui", &["user interface"]),
    ("ux", &["user experience"]),
    ("wal", &["write ahead log"]),
    ("xss", &["cross site scripting"]),
];

/// Canonical forms for common misspellings.
pub const COMMON_TYPOS: &[(&str, &str)] = &[
    ("teh", "the"),
    ("recieve", "receive"),
    ("seperate", "separate"),
    ("definately", "definitely"),
    ("occured", "occurred"),
    ("databse", "database"),
    ("datbase", "database"),
    ("qeury", "query"),
    ("querry", "query"),
    ("funciton", "function"),
    ("fucntion", "function"),
    ("retreive", "retrieve"),
    ("seach", "search"),
    ("serach", "search"),
    ("memroy", "memory"),
    ("memmory", "memory"),
    ("emebdding", "embedding"),
    ("embeding", "embedding"),
    ("similiarity", "similarity"),
    ("similarty", "similarity"),
    ("defualt", "default"),
    ("cofig", "config"),
    ("confg", "config"),
    ("authetication", "authentication"),
    ("migratoin", "migration"),
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in",
    "into", "is", "it", "no", "not", "of", "on", "or", "such", "that", "the",
    "their", "then", "there", "these", "they", "this", "to", "was", "will",
    "with", "how", "what", "when", "where", "why",
];

// ============================================================================
// LEVENSHTEIN
// ============================================================================

/// Case-insensitive Levenshtein edit distance.
///
/// Symmetric in its arguments; empty inputs cost the other side's length.
/// Returns `usize::MAX` early when the length difference alone already
/// exceeds `max_distance`.
pub fn levenshtein(a: &str, b: &str, max_distance: Option<usize>) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    if let Some(max) = max_distance {
        if a.len().abs_diff(b.len()) > max {
            return usize::MAX;
        }
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

// ============================================================================
// ACRONYMS & TYPOS
// ============================================================================

/// Exact acronym lookup. Unknown terms return an empty list.
pub fn acronym_expansions(term: &str) -> Vec<String> {
    let lower = term.to_lowercase();
    ACRONYM_MAP
        .iter()
        .find(|(key, _)| *key == lower)
        .map(|(_, expansions)| expansions.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

/// A fuzzy acronym hit: the matched key, its distance, and expansions.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub term: String,
    pub matched: String,
    pub distance: usize,
    pub expansions: Vec<String>,
}

/// Expansions of acronyms within edit distance `max_edit` of `term`.
///
/// Short terms and stop words are excluded outright.
pub fn find_fuzzy_acronym(term: &str, max_edit: usize) -> Vec<FuzzyMatch> {
    let lower = term.to_lowercase();
    if lower.len() < MIN_FUZZY_TERM_LENGTH || STOP_WORDS.contains(&lower.as_str()) {
        return vec![];
    }

    let mut matches = Vec::new();
    for (key, expansions) in ACRONYM_MAP {
        let distance = levenshtein(&lower, key, Some(max_edit));
        if distance <= max_edit {
            matches.push(FuzzyMatch {
                term: term.to_string(),
                matched: key.to_string(),
                distance,
                expansions: expansions.iter().map(|s| s.to_string()).collect(),
            });
        }
    }
    matches.sort_by_key(|m| m.distance);
    matches
}

/// Canonical form of a misspelled word, or `None` when unknown.
pub fn correct_typo(word: &str) -> Option<&'static str> {
    let lower = word.to_lowercase();
    COMMON_TYPOS
        .iter()
        .find(|(typo, _)| *typo == lower)
        .map(|(_, fix)| *fix)
}

// ============================================================================
// QUERY EXPANSION
// ============================================================================

/// Options for [`expand_query`].
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub include_acronyms: bool,
    pub include_fuzzy: bool,
    /// Mirror of the `ENABLE_FUZZY_MATCH` flag; disabled → identity.
    pub enabled: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            include_acronyms: true,
            include_fuzzy: true,
            enabled: true,
        }
    }
}

/// Result of query expansion.
#[derive(Debug, Clone)]
pub struct QueryExpansion {
    pub original: String,
    /// Original query plus deduplicated expansions, space-joined.
    pub expanded: String,
    pub expansions: Vec<String>,
    pub acronyms_found: Vec<String>,
    pub fuzzy_matches: Vec<FuzzyMatch>,
}

impl QueryExpansion {
    fn identity(query: &str) -> Self {
        Self {
            original: query.to_string(),
            expanded: query.to_string(),
            expansions: vec![],
            acronyms_found: vec![],
            fuzzy_matches: vec![],
        }
    }
}

/// Rewrite a query with typo fixes, acronym expansions, and fuzzy matches.
pub fn expand_query(query: &str, opts: &ExpandOptions) -> QueryExpansion {
    if !opts.enabled || query.trim().is_empty() {
        return QueryExpansion::identity(query);
    }

    let mut expansions: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut acronyms_found = Vec::new();
    let mut fuzzy_matches = Vec::new();

    for term in query.split_whitespace() {
        let term = term.trim_matches(|c: char| !c.is_alphanumeric());
        if term.is_empty() {
            continue;
        }

        if let Some(fix) = correct_typo(term) {
            if seen.insert(fix.to_string()) {
                expansions.push(fix.to_string());
            }
        }

        if opts.include_acronyms {
            let found = acronym_expansions(term);
            if !found.is_empty() {
                acronyms_found.push(term.to_lowercase());
                for expansion in found {
                    if seen.insert(expansion.clone()) {
                        expansions.push(expansion);
                    }
                }
                // Exact hit; no need to fuzz this term.
                continue;
            }
        }

        if opts.include_fuzzy {
            for m in find_fuzzy_acronym(term, MAX_EDIT_DISTANCE) {
                if m.distance == 0 {
                    continue;
                }
                for expansion in &m.expansions {
                    if seen.insert(expansion.clone()) {
                        expansions.push(expansion.clone());
                    }
                }
                fuzzy_matches.push(m);
            }
        }
    }

    let expanded = if expansions.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query, expansions.join(" "))
    };

    QueryExpansion {
        original: query.to_string(),
        expanded,
        expansions,
        acronyms_found,
        fuzzy_matches,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_symmetry_and_identity() {
        assert_eq!(levenshtein("kitten", "sitting", None), 3);
        assert_eq!(
            levenshtein("kitten", "sitting", None),
            levenshtein("sitting", "kitten", None)
        );
        assert_eq!(levenshtein("same", "same", None), 0);
        assert_eq!(levenshtein("", "abc", None), 3);
        assert_eq!(levenshtein("abc", "", None), 3);
        assert_eq!(levenshtein("", "", None), 0);
    }

    #[test]
    fn levenshtein_is_case_insensitive() {
        assert_eq!(levenshtein("FSRS", "fsrs", None), 0);
    }

    #[test]
    fn levenshtein_early_exit_on_length_gap() {
        assert_eq!(levenshtein("ab", "abcdefgh", Some(2)), usize::MAX);
    }

    #[test]
    fn acronym_map_is_curated() {
        assert!(ACRONYM_MAP.len() >= 30);
        assert_eq!(
            acronym_expansions("RRF"),
            vec!["reciprocal rank fusion".to_string()]
        );
        assert!(acronym_expansions("zzz").is_empty());
    }

    #[test]
    fn fuzzy_acronym_respects_thresholds() {
        // "fsr" is 1 edit from "fsrs"
        let matches = find_fuzzy_acronym("fsr", MAX_EDIT_DISTANCE);
        assert!(matches.iter().any(|m| m.matched == "fsrs"));

        // Too short
        assert!(find_fuzzy_acronym("ab", MAX_EDIT_DISTANCE).is_empty());
        // Stop word
        assert!(find_fuzzy_acronym("the", MAX_EDIT_DISTANCE).is_empty());
    }

    #[test]
    fn typo_correction() {
        assert_eq!(correct_typo("databse"), Some("database"));
        assert_eq!(correct_typo("DATABSE"), Some("database"));
        assert_eq!(correct_typo("flawless"), None);
    }

    #[test]
    fn expand_query_dedupes_and_tracks_sources() {
        let result = expand_query("rrf databse rrf", &ExpandOptions::default());
        assert_eq!(result.original, "rrf databse rrf");
        assert!(result.expanded.contains("reciprocal rank fusion"));
        assert!(result.expanded.contains("database"));
        assert_eq!(result.acronyms_found, vec!["rrf".to_string(), "rrf".to_string()]);
        // "reciprocal rank fusion" appears once despite two rrf terms
        assert_eq!(
            result
                .expansions
                .iter()
                .filter(|e| e.as_str() == "reciprocal rank fusion")
                .count(),
            1
        );
    }

    #[test]
    fn expand_query_disabled_is_identity() {
        let opts = ExpandOptions {
            enabled: false,
            ..Default::default()
        };
        let result = expand_query("rrf databse", &opts);
        assert_eq!(result.expanded, "rrf databse");
        assert!(result.expansions.is_empty());
        assert!(result.acronyms_found.is_empty());
    }

    #[test]
    fn expand_query_honors_include_flags() {
        let opts = ExpandOptions {
            include_acronyms: false,
            include_fuzzy: false,
            enabled: true,
        };
        let result = expand_query("rrf fsr", &opts);
        assert!(result.acronyms_found.is_empty());
        assert!(result.fuzzy_matches.is_empty());
    }
}
