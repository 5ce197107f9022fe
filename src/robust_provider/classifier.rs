use std::{fmt::Display, sync::Arc};

/// Message fragments that mark a node error as permanent by default.
///
/// Matching is case-insensitive and by substring.
pub const DEFAULT_PERMANENT_ERRORS: &[&str] = &[
    "method not found",
    "hash is not currently canonical",
    "unable to complete request at this time",
    "503 service unavailable",
    "trace_block is not available",
    "invalid host",
    "receipt was empty",
];

/// Decides whether a failed attempt is worth retrying.
///
/// The pattern set is fixed once built and shared between clones, so every copy of a
/// [`RobustProvider`](super::RobustProvider) classifies the same way. Use
/// [`ErrorClassifier::with_pattern`] or the builder to tune it per deployment.
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    patterns: Arc<[String]>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PERMANENT_ERRORS.iter().copied())
    }
}

impl ErrorClassifier {
    /// Creates a classifier from the given message fragments.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns: patterns.into() }
    }

    /// A classifier that never treats an error as permanent.
    #[must_use]
    pub fn empty() -> Self {
        Self { patterns: Arc::from(Vec::new()) }
    }

    /// Returns a copy extended with one more fragment.
    #[must_use]
    pub fn with_pattern(&self, pattern: impl AsRef<str>) -> Self {
        Self::new(self.patterns.iter().map(String::as_str).chain([pattern.as_ref()]))
    }

    #[must_use]
    pub fn is_permanent(&self, err: &impl Display) -> bool {
        let message = err.to_string().to_lowercase();
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_matches_case_insensitively() {
        let classifier = ErrorClassifier::default();
        assert!(classifier.is_permanent(&"server returned: Method Not Found"));
        assert!(classifier.is_permanent(&"HTTP 503 Service Unavailable"));
        assert!(!classifier.is_permanent(&"request timeout"));
    }

    #[test]
    fn extended_classifier_keeps_defaults() {
        let classifier = ErrorClassifier::default().with_pattern("Execution Reverted");
        assert!(classifier.is_permanent(&"execution reverted: nope"));
        assert!(classifier.is_permanent(&"invalid host"));
        assert_eq!(classifier.patterns().len(), DEFAULT_PERMANENT_ERRORS.len() + 1);
    }

    #[test]
    fn empty_classifier_never_matches() {
        assert!(!ErrorClassifier::empty().is_permanent(&"method not found"));
    }
}
