//! Name filters for registry enumeration.

use regex::Regex;

/// Matches process server names.
#[derive(Debug, Clone, Default)]
pub enum NameFilter {
    /// Matches every name.
    #[default]
    Any,
    /// Matches no name.
    Nothing,
    /// Matches one exact name.
    Exact(String),
    /// Matches names the regex finds a match in.
    Pattern(Regex),
    /// Matches names any of the inner filters match.
    AnyOf(Vec<NameFilter>),
}

impl NameFilter {
    pub fn exact(name: impl Into<String>) -> Self {
        Self::Exact(name.into())
    }

    /// Build a pattern filter.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Nothing => false,
            Self::Exact(expected) => expected == name,
            Self::Pattern(re) => re.is_match(name),
            Self::AnyOf(filters) => filters.iter().any(|f| f.matches(name)),
        }
    }
}

impl From<&str> for NameFilter {
    fn from(name: &str) -> Self {
        Self::Exact(name.to_owned())
    }
}

impl From<Regex> for NameFilter {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_kinds() {
        assert!(NameFilter::Any.matches("anything"));
        assert!(!NameFilter::Nothing.matches("anything"));
        assert!(NameFilter::from("local").matches("local"));
        assert!(!NameFilter::from("local").matches("local-sim"));

        let sim = NameFilter::pattern("-sim$").unwrap();
        assert!(sim.matches("local-sim"));
        assert!(!sim.matches("local"));

        let either = NameFilter::AnyOf(vec![NameFilter::exact("a"), NameFilter::exact("b")]);
        assert!(either.matches("b"));
        assert!(!either.matches("c"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(NameFilter::pattern("(unclosed").is_err());
    }
}
