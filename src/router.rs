//! Query classifier
//!
//! Pure (no I/O beyond the cheap healthy/circuit predicates it is handed),
//! so it is exhaustively unit-testable.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{QueryOptions, SelectionResult, SourceId};

/// Default source bundle when no keyword rule fires.
pub const DEFAULT_FALLBACK_BUNDLE: &[SourceId] = &[SourceId::VectorCache, SourceId::Web];

struct KeywordRule {
    pattern: Lazy<Regex>,
    source: SourceId,
}

/// Case-insensitive trigger-phrase rules. Their order is the tie-break
/// used when the selection is later truncated to `max_sources`.
static RULES: &[KeywordRule] = &[
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"\b[A-Z]{2,}-\d+\b").unwrap()), source: SourceId::Jira },
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"(?i)confluence|\bwiki\b|\bdoc(s|umentation)?\b").unwrap()), source: SourceId::Confluence },
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"(?i)\bslack\b|\bchannel\b|#\S+").unwrap()), source: SourceId::Slack },
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"(?i)\bgithub\b|\bpull request\b|\bpr\b|\bissue\b|\brepo\b").unwrap()), source: SourceId::Github },
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"(?i)\bnotion\b").unwrap()), source: SourceId::Notion },
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"(?i)\blinear\b").unwrap()), source: SourceId::Linear },
    KeywordRule { pattern: Lazy::new(|| Regex::new(r"(?i)\bfigma\b|\bdesign\b").unwrap()), source: SourceId::Figma },
];

/// Per-source availability, supplied by the caller (Core/Orchestrator own
/// the live circuit-breaker and healthy-probe state; Router stays pure).
pub trait SourceAvailability {
    fn is_healthy(&self, source: SourceId) -> bool;
    fn is_circuit_open(&self, source: SourceId) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// Classify `query_text` into an ordered [`SelectionResult`]
    pub fn select(&self, query_text: &str, options: &QueryOptions, availability: &dyn SourceAvailability) -> SelectionResult {
        let mut matched: Vec<SourceId> = Vec::new();
        for rule in RULES {
            if rule.pattern.is_match(query_text) && !matched.contains(&rule.source) {
                matched.push(rule.source);
            }
        }

        let rule_fired = !matched.is_empty();
        if !rule_fired {
            matched.extend_from_slice(DEFAULT_FALLBACK_BUNDLE);
        }

        let is_allowed = |id: SourceId| -> bool {
            options.enabled_sources.contains(&id) && availability.is_healthy(id) && !availability.is_circuit_open(id)
        };

        let mut sources: Vec<SourceId> = matched.into_iter().filter(|id| is_allowed(*id)).collect();

        if !sources.is_empty() && !sources.contains(&SourceId::VectorCache) && is_allowed(SourceId::VectorCache) {
            sources.insert(0, SourceId::VectorCache);
        }

        sources.truncate(options.max_sources);

        SelectionResult { sources, confidence: if rule_fired { 1.0 } else { 0.5 } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct AllHealthy;
    impl SourceAvailability for AllHealthy {
        fn is_healthy(&self, _source: SourceId) -> bool {
            true
        }
        fn is_circuit_open(&self, _source: SourceId) -> bool {
            false
        }
    }

    struct OnlyListedHealthy(Vec<SourceId>);
    impl SourceAvailability for OnlyListedHealthy {
        fn is_healthy(&self, source: SourceId) -> bool {
            self.0.contains(&source)
        }
        fn is_circuit_open(&self, _source: SourceId) -> bool {
            false
        }
    }

    fn options(enabled: &[SourceId]) -> QueryOptions {
        QueryOptions { enabled_sources: enabled.iter().copied().collect::<HashSet<_>>(), ..QueryOptions::default() }
    }

    #[test]
    fn jira_ticket_key_routes_to_jira_and_vector_cache() {
        let router = Router::new();
        let opts = options(&[SourceId::Jira, SourceId::VectorCache, SourceId::Web]);
        let result = router.select("What is the status of CTT-21761?", &opts, &AllHealthy);
        assert_eq!(result.sources, vec![SourceId::VectorCache, SourceId::Jira]);
    }

    #[test]
    fn no_match_falls_back_to_default_bundle() {
        let router = Router::new();
        let opts = options(&[SourceId::VectorCache, SourceId::Web]);
        let result = router.select("what's the weather like", &opts, &AllHealthy);
        assert_eq!(result.sources, vec![SourceId::VectorCache, SourceId::Web]);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn disabled_source_is_dropped() {
        let router = Router::new();
        let opts = options(&[SourceId::VectorCache]); // jira not enabled
        let result = router.select("CTT-21761 status", &opts, &AllHealthy);
        assert!(!result.sources.contains(&SourceId::Jira));
    }

    #[test]
    fn circuit_open_source_is_dropped() {
        struct JiraOpen;
        impl SourceAvailability for JiraOpen {
            fn is_healthy(&self, _source: SourceId) -> bool {
                true
            }
            fn is_circuit_open(&self, source: SourceId) -> bool {
                source == SourceId::Jira
            }
        }
        let router = Router::new();
        let opts = options(&[SourceId::Jira, SourceId::VectorCache]);
        let result = router.select("CTT-1 bug", &opts, &JiraOpen);
        assert!(!result.sources.contains(&SourceId::Jira));
    }

    #[test]
    fn unhealthy_source_is_dropped() {
        let router = Router::new();
        let opts = options(&[SourceId::Jira, SourceId::VectorCache]);
        let result = router.select("CTT-1 bug", &opts, &OnlyListedHealthy(vec![SourceId::VectorCache]));
        assert!(!result.sources.contains(&SourceId::Jira));
    }

    #[test]
    fn cap_truncates_preserving_rule_order() {
        let router = Router::new();
        let mut opts = options(&[SourceId::Jira, SourceId::Confluence, SourceId::Slack, SourceId::VectorCache]);
        opts.max_sources = 2;
        let result = router.select("jira CTT-1 confluence wiki slack channel", &opts, &AllHealthy);
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[0], SourceId::VectorCache);
    }

    #[test]
    fn is_pure_same_input_same_output() {
        let router = Router::new();
        let opts = options(&[SourceId::Jira, SourceId::VectorCache, SourceId::Web]);
        let a = router.select("CTT-99", &opts, &AllHealthy);
        let b = router.select("CTT-99", &opts, &AllHealthy);
        assert_eq!(a.sources, b.sources);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn empty_selection_does_not_prepend_vector_cache() {
        let router = Router::new();
        let opts = options(&[SourceId::Jira]); // no default bundle members enabled, jira doesn't match
        let result = router.select("unrelated text with no triggers", &opts, &AllHealthy);
        assert!(result.sources.is_empty());
    }
}
