//! Tag naming: prefixes, experiment names and the `exp_<name><ts>` scheme.

use std::fmt;
use std::str::FromStr;

use super::error::ValidationError;

/// Prefix used when none is configured.
pub const DEFAULT_TAG_PREFIX: &str = "experiments/";

/// Marker placed before the experiment name in every tag.
pub const EXPERIMENT_MARKER: &str = "exp_";

const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// Reason a string cannot appear in a git ref name, if any.
fn ref_text_problem(text: &str) -> Option<&'static str> {
    if text.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Some("contains whitespace or control characters");
    }
    if text.contains(FORBIDDEN_CHARS) {
        return Some("contains one of ~ ^ : ? * [ \\");
    }
    if text.contains("..") {
        return Some("contains '..'");
    }
    if text.contains("@{") {
        return Some("contains '@{'");
    }
    None
}

/// Check that `name` can be embedded in an experiment tag.
pub fn validate_experiment_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let invalid = |reason| ValidationError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.contains('/') {
        return Err(invalid("contains '/'"));
    }
    match ref_text_problem(name) {
        Some(reason) => Err(invalid(reason)),
        None => Ok(()),
    }
}

/// Tag namespace for experiments; always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagPrefix(String);

impl TagPrefix {
    /// Validate `raw` and append the trailing `/` if missing.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyPrefix);
        }
        let invalid = |reason| ValidationError::InvalidPrefix {
            prefix: raw.to_string(),
            reason,
        };
        for component in trimmed.split('/') {
            if component.is_empty() {
                return Err(invalid("contains an empty path component"));
            }
            if component.starts_with('.') {
                return Err(invalid("a component starts with '.'"));
            }
            if component.ends_with(".lock") {
                return Err(invalid("a component ends with '.lock'"));
            }
        }
        if let Some(reason) = ref_text_problem(trimmed) {
            return Err(invalid(reason));
        }
        Ok(TagPrefix(format!("{trimmed}/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<prefix>exp_<name><timestamp>`
    pub fn tag_name(&self, experiment_name: &str, timestamp: i64) -> String {
        format!("{}{EXPERIMENT_MARKER}{experiment_name}{timestamp}", self.0)
    }

    /// Full tag name for `name`, which may already carry the prefix.
    pub fn qualify(&self, name: &str) -> String {
        if name.starts_with(&self.0) {
            name.to_string()
        } else {
            format!("{}{name}", self.0)
        }
    }

    /// The part of `tag` after the prefix, if `tag` is under it.
    pub fn strip<'a>(&self, tag: &'a str) -> Option<&'a str> {
        tag.strip_prefix(self.0.as_str())
    }
}

impl Default for TagPrefix {
    fn default() -> Self {
        TagPrefix(DEFAULT_TAG_PREFIX.to_string())
    }
}

impl FromStr for TagPrefix {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagPrefix::new(s)
    }
}

impl fmt::Display for TagPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The final path component of a tag, e.g. `exp_lr1700000000`.
pub fn experiment_id(tag: &str) -> &str {
    tag.rsplit('/').next().unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_gets_trailing_slash() {
        assert_eq!(TagPrefix::new("runs").unwrap().as_str(), "runs/");
        assert_eq!(TagPrefix::new("runs/").unwrap().as_str(), "runs/");
        assert_eq!(TagPrefix::new("team/runs").unwrap().as_str(), "team/runs/");
    }

    #[test]
    fn default_prefix_is_experiments() {
        assert_eq!(TagPrefix::default().as_str(), "experiments/");
    }

    #[test]
    fn empty_prefix_rejected() {
        assert!(matches!(
            TagPrefix::new(""),
            Err(ValidationError::EmptyPrefix)
        ));
        assert!(matches!(
            TagPrefix::new("/"),
            Err(ValidationError::EmptyPrefix)
        ));
    }

    #[test]
    fn malformed_prefixes_rejected() {
        for bad in ["a//b", ".hidden", "x.lock", "has space", "a..b", "q?"] {
            assert!(TagPrefix::new(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn tag_name_follows_scheme() {
        let prefix = TagPrefix::default();
        assert_eq!(
            prefix.tag_name("unittest", 1_700_000_000),
            "experiments/exp_unittest1700000000"
        );
    }

    #[test]
    fn qualify_and_strip() {
        let prefix = TagPrefix::default();
        assert_eq!(prefix.qualify("exp_a1"), "experiments/exp_a1");
        assert_eq!(prefix.qualify("experiments/exp_a1"), "experiments/exp_a1");
        assert_eq!(prefix.strip("experiments/exp_a1"), Some("exp_a1"));
        assert_eq!(prefix.strip("v1.0"), None);
    }

    #[test]
    fn experiment_names_are_checked() {
        assert!(validate_experiment_name("resnet-50_lr0.1").is_ok());
        assert!(matches!(
            validate_experiment_name(""),
            Err(ValidationError::EmptyName)
        ));
        for bad in ["a/b", "two words", "x..y", "what?", "a~1", "at@{0}"] {
            assert!(validate_experiment_name(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn experiment_id_is_last_component() {
        assert_eq!(experiment_id("experiments/exp_a1"), "exp_a1");
        assert_eq!(experiment_id("exp_a1"), "exp_a1");
    }
}
