//! Class filter configuration.
//!
//! Filters decide which classes the transformer touches. A pattern is an
//! internal-form class name (`com/example/Foo`) or a prefix ending in `*`
//! (`com/example/*`). Dotted names are accepted and normalized. Exclude
//! patterns win over includes; with no include patterns nothing matches.

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

/// Classes the toolkit itself defines in the target VM. Instrumenting the
/// probe would recurse from inside the probe.
const BUILTIN_EXCLUDES: &[&str] = &["jvmmon/"];

impl FilterConfig {
    /// Builds a config from include and exclude pattern lists, validating
    /// every pattern eagerly so a bad filter never reaches the transformer.
    pub fn new<I, S>(includes: I, excludes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let includes = includes
            .into_iter()
            .map(|p| Pattern::parse(p.as_ref()))
            .collect::<Result<_, _>>()?;
        let excludes = excludes
            .into_iter()
            .map(|p| Pattern::parse(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { includes, excludes })
    }

    /// True when `class_name` (internal form) should be instrumented.
    pub fn matches(&self, class_name: &str) -> bool {
        if BUILTIN_EXCLUDES.iter().any(|p| class_name.starts_with(p)) {
            return false;
        }
        if self.excludes.iter().any(|p| p.matches(class_name)) {
            return false;
        }
        self.includes.iter().any(|p| p.matches(class_name))
    }
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ConfigError::PatternWhitespace(raw.to_string()));
        }
        let normalized = raw.replace('.', "/");
        Ok(match normalized.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Exact(normalized),
        })
    }

    fn matches(&self, class_name: &str) -> bool {
        match self {
            Pattern::Exact(name) => class_name == name,
            Pattern::Prefix(prefix) => class_name.starts_with(prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_exact_matching() {
        let f = FilterConfig::new(vec!["com/example/*", "org/Single"], vec![]).unwrap();
        assert!(f.matches("com/example/Foo"));
        assert!(f.matches("com/example/sub/Bar"));
        assert!(f.matches("org/Single"));
        assert!(!f.matches("org/Single$Inner"));
        assert!(!f.matches("com/other/Foo"));
    }

    #[test]
    fn dotted_patterns_are_normalized() {
        let f = FilterConfig::new(vec!["com.example.*"], vec![]).unwrap();
        assert!(f.matches("com/example/Foo"));
    }

    #[test]
    fn excludes_win() {
        let f = FilterConfig::new(vec!["com/*"], vec!["com/example/generated/*"]).unwrap();
        assert!(f.matches("com/example/Foo"));
        assert!(!f.matches("com/example/generated/Proxy"));
    }

    #[test]
    fn own_runtime_is_never_matched() {
        let f = FilterConfig::new(vec!["*"], vec![]).unwrap();
        assert!(f.matches("com/example/Foo"));
        assert!(!f.matches("jvmmon/runtime/Probe"));
    }

    #[test]
    fn bad_patterns_are_rejected() {
        assert_eq!(
            FilterConfig::new(vec![""], vec![]).unwrap_err(),
            ConfigError::EmptyPattern
        );
        assert!(matches!(
            FilterConfig::new(vec!["com/exa mple/*"], vec![]).unwrap_err(),
            ConfigError::PatternWhitespace(_)
        ));
    }

    #[test]
    fn empty_includes_match_nothing() {
        let f = FilterConfig::default();
        assert!(!f.matches("com/example/Foo"));
    }
}
