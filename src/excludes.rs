//! Prefix based exclude patterns for backup and upload

use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of path prefixes to skip
///
/// Matching is a plain byte-wise prefix test. Callers normalize patterns and
/// candidates the same way before comparing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Excludes {
    patterns: Vec<String>,
}

impl Excludes {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn push(&mut self, pattern: impl Into<String>) {
        self.patterns.push(pattern.into());
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Rewrite every pattern in place, e.g. to clean remote paths
    pub fn normalize_with<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String,
    {
        for pattern in &mut self.patterns {
            *pattern = f(pattern);
        }
    }

    /// Check whether `path` starts with any of the patterns
    pub fn contains(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl From<Vec<String>> for Excludes {
    fn from(patterns: Vec<String>) -> Self {
        Self::new(patterns)
    }
}

impl fmt::Display for Excludes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.patterns.join(","))
    }
}
