//! Endpoint eligibility for outbound instrumentation.

use correlation::corr_warn;
use regex::Regex;

/// How an [`EndpointFilter`]'s pattern set is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// Only endpoints matching a pattern are instrumented.
    Allow,
    /// Endpoints matching a pattern are not instrumented; everything else
    /// is.
    Deny,
}

/// Decides whether an outbound target is eligible for context propagation.
///
/// Patterns are anchored regular expressions evaluated against the target
/// endpoint. A pattern that fails to compile poisons the filter, which then
/// rejects every endpoint: a misconfigured filter must never instrument
/// traffic it was asked to exclude, and must never throw into the request
/// path.
///
/// # Examples
///
/// ```
/// use correlation_http::{EndpointFilter, FilterMode};
///
/// let filter = EndpointFilter::new(["api\\.internal\\..*"], FilterMode::Allow);
/// assert!(filter.validate("api.internal.example"));
/// assert!(!filter.validate("api.external.com"));
/// ```
#[derive(Debug, Clone)]
pub struct EndpointFilter {
    patterns: Vec<Regex>,
    mode: FilterMode,
    poisoned: bool,
}

impl Default for EndpointFilter {
    /// An empty deny list: everything is instrumented.
    fn default() -> Self {
        EndpointFilter::allow_all()
    }
}

impl EndpointFilter {
    /// Compiles a pattern set.
    ///
    /// Each pattern is anchored (`^(?:pattern)$`) before compilation.
    pub fn new<I, S>(patterns: I, mode: FilterMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        let mut poisoned = false;
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(regex) => compiled.push(regex),
                Err(error) => {
                    corr_warn!(
                        name: "EndpointFilter.InvalidPattern",
                        pattern = pattern.to_string(),
                        error = error.to_string()
                    );
                    poisoned = true;
                }
            }
        }
        EndpointFilter {
            patterns: compiled,
            mode,
            poisoned,
        }
    }

    /// A filter that instruments every endpoint: an empty deny list.
    pub fn allow_all() -> Self {
        EndpointFilter::new(std::iter::empty::<&str>(), FilterMode::Deny)
    }

    /// Whether `endpoint` is eligible for instrumentation.
    pub fn validate(&self, endpoint: &str) -> bool {
        if self.poisoned {
            return false;
        }
        let matched = self
            .patterns
            .iter()
            .any(|pattern| pattern.is_match(endpoint));
        match self.mode {
            FilterMode::Allow => matched,
            FilterMode::Deny => !matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_mode_admits_only_matches() {
        let filter = EndpointFilter::new(["api\\.internal\\..*"], FilterMode::Allow);
        assert!(filter.validate("api.internal.example"));
        assert!(!filter.validate("api.external.com"));
    }

    #[test]
    fn deny_mode_rejects_matches_and_admits_the_rest() {
        let filter = EndpointFilter::new(["api\\.internal\\..*"], FilterMode::Deny);
        assert!(!filter.validate("api.internal.example"));
        assert!(filter.validate("api.external.com"));
    }

    #[test]
    fn patterns_are_anchored() {
        let filter = EndpointFilter::new(["internal"], FilterMode::Allow);
        assert!(filter.validate("internal"));
        assert!(!filter.validate("api.internal.example"));
    }

    #[test]
    fn empty_allow_list_admits_nothing() {
        let filter = EndpointFilter::new(std::iter::empty::<&str>(), FilterMode::Allow);
        assert!(!filter.validate("api.internal.example"));
    }

    #[test]
    fn default_admits_everything() {
        let filter = EndpointFilter::default();
        assert!(filter.validate("api.internal.example"));
    }

    #[test]
    fn malformed_pattern_fails_closed() {
        let filter = EndpointFilter::new(["api\\.internal\\..*", "(["], FilterMode::Deny);
        assert!(!filter.validate("api.internal.example"));
        assert!(!filter.validate("api.external.com"));
    }
}
