// src/repository/filter.rs

//! Whitelist/blacklist evaluation over package records
//!
//! A [`FilterRule`] is a list of attribute/pattern pairs that must all match
//! (AND). A list of rules matches a record when any one rule does (OR).
//!
//! ```text
//! whitelist:            # maximal desired set (empty = everything)
//!   - name: numpy
//!     version: "1.11.*"
//! blacklist:            # always removed from the desired set
//!   - license: GPL*
//! ```

use glob::Pattern;
use std::collections::BTreeSet;
use std::fmt;

use super::metadata::{PackageMap, PackageRecord};
use crate::error::{Error, Result};

/// How one attribute value is matched
#[derive(Debug, Clone)]
pub enum MatchKind {
    /// `"*"`: any present value
    Any,
    /// Literal string equality
    Exact(String),
    /// Shell-style wildcard such as `1.11.*` or `py3?_0`
    Glob(Pattern),
}

impl MatchKind {
    /// Classify a pattern string from configuration
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(Self::Any);
        }
        if !pattern.contains(['*', '?', '[']) {
            return Ok(Self::Exact(pattern.to_string()));
        }
        Pattern::new(pattern)
            .map(Self::Glob)
            .map_err(|e| Error::ConfigError(format!("Invalid pattern '{}': {}", pattern, e)))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
            Self::Glob(pattern) => pattern.matches(value),
        }
    }
}

impl PartialEq for MatchKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) => true,
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Glob(a), Self::Glob(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for MatchKind {}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(value) => write!(f, "{}", value),
            Self::Glob(pattern) => write!(f, "{}", pattern.as_str()),
        }
    }
}

/// A set of attribute constraints that must all hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    constraints: Vec<(String, MatchKind)>,
}

impl FilterRule {
    /// Build a rule from attribute/pattern pairs
    ///
    /// A rule with no attributes would silently match everything, so it is
    /// rejected as a configuration error, as is an empty attribute name.
    pub fn new<I, K, P>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: AsRef<str>,
    {
        let mut constraints = Vec::new();
        for (key, pattern) in pairs {
            let key = key.into();
            if key.trim().is_empty() {
                return Err(Error::ConfigError(
                    "Filter rule has an empty attribute name".to_string(),
                ));
            }
            constraints.push((key, MatchKind::parse(pattern.as_ref())?));
        }

        if constraints.is_empty() {
            return Err(Error::ConfigError(
                "Filter rule must constrain at least one attribute".to_string(),
            ));
        }

        Ok(Self { constraints })
    }

    /// Shorthand for a rule on the package name only
    pub fn name(pattern: &str) -> Result<Self> {
        Self::new([("name", pattern)])
    }

    pub fn constraints(&self) -> &[(String, MatchKind)] {
        &self.constraints
    }

    /// Whether every constrained attribute of `record` matches
    pub fn matches(&self, record: &PackageRecord) -> bool {
        self.constraints.iter().all(|(key, kind)| {
            record
                .attribute(key)
                .is_some_and(|value| kind.matches(&value))
        })
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|(key, kind)| format!("{}={}", key, kind))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Ordered whitelist and blacklist rule sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageFilters {
    pub whitelist: Vec<FilterRule>,
    pub blacklist: Vec<FilterRule>,
}

impl PackageFilters {
    pub fn new(whitelist: Vec<FilterRule>, blacklist: Vec<FilterRule>) -> Self {
        Self { whitelist, blacklist }
    }

    pub fn desired(&self, packages: &PackageMap) -> BTreeSet<String> {
        apply_filters(packages, &self.whitelist, &self.blacklist)
    }

    pub fn blacklisted(&self, packages: &PackageMap) -> BTreeSet<String> {
        blacklisted(packages, &self.blacklist)
    }
}

/// The subset of `packages` whose records match `rule`
pub fn match_packages(packages: &PackageMap, rule: &FilterRule) -> PackageMap {
    packages
        .iter()
        .filter(|(_, record)| rule.matches(record))
        .map(|(file_name, record)| (file_name.clone(), record.clone()))
        .collect()
}

/// File names matched by any rule in `rules`
fn matched_by_any(packages: &PackageMap, rules: &[FilterRule]) -> BTreeSet<String> {
    packages
        .iter()
        .filter(|(_, record)| rules.iter().any(|rule| rule.matches(record)))
        .map(|(file_name, _)| file_name.clone())
        .collect()
}

/// File names matched by the blacklist
pub fn blacklisted(packages: &PackageMap, blacklist: &[FilterRule]) -> BTreeSet<String> {
    matched_by_any(packages, blacklist)
}

/// Compute the desired set: whitelist (or everything) minus blacklist
pub fn apply_filters(
    packages: &PackageMap,
    whitelist: &[FilterRule],
    blacklist: &[FilterRule],
) -> BTreeSet<String> {
    let candidates = if whitelist.is_empty() {
        packages.keys().cloned().collect()
    } else {
        matched_by_any(packages, whitelist)
    };

    let excluded = blacklisted(packages, blacklist);
    candidates.difference(&excluded).cloned().collect()
}
