//! The work item capability the engine is generic over, and skip rules.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::stats::RunStats;
use crate::util::compile_static_regex;

static SKIP_RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^([A-Za-z][A-Za-z0-9_]*)(?:-(\d+))?$"));

/// One discoverable unit of the resource tree.
///
/// Implementors are immutable value records: expansion never mutates the
/// item, it only reports newly discovered children through [`Discovery`].
/// The engine never branches on a concrete type; everything it needs goes
/// through this trait.
#[async_trait]
pub trait WorkItem: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Collaborator state handed to every expansion (HTTP session, storage).
    type Context: Send + Sync;

    /// Fault raised by an expansion.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable category name, e.g. `"Course"`.
    fn type_tag(&self) -> &'static str;

    /// Counter group shown in the live status line. Defaults to the type tag.
    fn stats_group(&self) -> &'static str {
        self.type_tag()
    }

    /// Identity, unique within [`type_tag`](Self::type_tag).
    fn identity(&self) -> i64;

    /// Globally unique identity string, `"{type}-{id}"`.
    fn id_string(&self) -> String {
        format!("{}-{}", self.type_tag(), self.identity())
    }

    /// Fetches this item's content and reports every child it finds.
    ///
    /// Items without children return `Ok(())` without pushing anything.
    async fn expand(
        &self,
        cx: &Self::Context,
        found: &mut Discovery<'_, Self>,
    ) -> Result<(), Self::Error>;

    /// Flattened attributes for `meta.json`.
    fn attributes(&self) -> Map<String, Value>;

    /// Directory for this item, relative to the run's data directory.
    fn storage_location(&self) -> PathBuf;
}

/// Sink that collects the children of one expansion.
///
/// Each child seen for the first time in the run is counted towards its
/// group's total as soon as it is pushed, so the status line stays live
/// during a long expansion. Children already known to the run are dropped.
pub struct Discovery<'a, T> {
    children: Vec<T>,
    seen: &'a mut HashSet<String>,
    stats: &'a RunStats,
}

impl<'a, T: WorkItem> Discovery<'a, T> {
    pub(crate) fn new(seen: &'a mut HashSet<String>, stats: &'a RunStats) -> Self {
        Self {
            children: Vec::new(),
            seen,
            stats,
        }
    }

    /// Reports a child. Returns `false` if it was already known.
    pub fn push(&mut self, child: T) -> bool {
        if !self.seen.insert(child.id_string()) {
            return false;
        }
        self.stats.mark_total(child.stats_group());
        self.children.push(child);
        true
    }

    /// Number of new children reported so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns true if no new child was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn into_children(self) -> Vec<T> {
        self.children
    }
}

/// Invalid `--ignore` syntax.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkipRuleError {
    /// Not `Type` or `Type-<id>`.
    #[error("invalid skip rule '{0}': expected TYPE or TYPE-ID")]
    Syntax(String),

    /// Well-formed, but names a type that does not exist.
    #[error("invalid skip rule '{rule}': unknown type '{type_tag}' (valid types: {valid})")]
    UnknownType {
        /// The rule as given.
        rule: String,
        /// The unknown type part.
        type_tag: String,
        /// Comma separated list of valid types.
        valid: String,
    },
}

/// Exclusion of a whole type or of exactly one item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SkipRule {
    /// Skip every item of this type.
    Type(String),
    /// Skip the item with this identity string.
    Item {
        /// Type tag.
        type_tag: String,
        /// Identity within the type.
        id: i64,
    },
}

impl SkipRule {
    /// Parses a rule and checks its type against `known_types`.
    ///
    /// # Errors
    ///
    /// Returns [`SkipRuleError`] for malformed rules or unknown types.
    pub fn parse_known(raw: &str, known_types: &[&str]) -> Result<Self, SkipRuleError> {
        let rule: Self = raw.parse()?;
        let type_tag = rule.type_tag();
        if known_types.contains(&type_tag) {
            Ok(rule)
        } else {
            Err(SkipRuleError::UnknownType {
                rule: raw.to_string(),
                type_tag: type_tag.to_string(),
                valid: known_types.join(", "),
            })
        }
    }

    /// The type part of the rule.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Type(type_tag) | Self::Item { type_tag, .. } => type_tag,
        }
    }

    /// Returns true if `item` is excluded by this rule.
    pub fn matches<T: WorkItem>(&self, item: &T) -> bool {
        match self {
            Self::Type(type_tag) => type_tag == item.type_tag(),
            Self::Item { type_tag, id } => type_tag == item.type_tag() && *id == item.identity(),
        }
    }
}

impl FromStr for SkipRule {
    type Err = SkipRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syntax = || SkipRuleError::Syntax(s.to_string());
        let caps = SKIP_RULE_RE.captures(s).ok_or_else(syntax)?;
        let type_tag = caps[1].to_string();
        match caps.get(2) {
            None => Ok(Self::Type(type_tag)),
            Some(id) => {
                let id = id.as_str().parse().map_err(|_| syntax())?;
                Ok(Self::Item { type_tag, id })
            }
        }
    }
}

impl TryFrom<String> for SkipRule {
    type Error = SkipRuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SkipRule> for String {
    fn from(rule: SkipRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for SkipRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(type_tag) => write!(f, "{type_tag}"),
            Self::Item { type_tag, id } => write!(f, "{type_tag}-{id}"),
        }
    }
}

/// A set of skip rules, kept sorted so checkpoints serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipRules(BTreeSet<SkipRule>);

impl SkipRules {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    pub fn insert(&mut self, rule: SkipRule) {
        self.0.insert(rule);
    }

    /// Adds every rule of `other`.
    pub fn extend(&mut self, other: SkipRules) {
        self.0.extend(other.0);
    }

    /// Returns the first rule excluding `item`, if any.
    pub fn find_match<T: WorkItem>(&self, item: &T) -> Option<&SkipRule> {
        self.0.iter().find(|rule| rule.matches(item))
    }

    /// Iterates the rules in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &SkipRule> {
        self.0.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<SkipRule> for SkipRules {
    fn from_iter<I: IntoIterator<Item = SkipRule>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_type() {
        assert_eq!(
            "Video".parse::<SkipRule>().unwrap(),
            SkipRule::Type("Video".to_string())
        );
    }

    #[test]
    fn test_parse_identity() {
        assert_eq!(
            "Course-74".parse::<SkipRule>().unwrap(),
            SkipRule::Item {
                type_tag: "Course".to_string(),
                id: 74
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["", "Course-", "-74", "Course-7a", "Course 74", "Course-74-1"] {
            assert_eq!(
                raw.parse::<SkipRule>(),
                Err(SkipRuleError::Syntax(raw.to_string())),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_known_rejects_unknown_type() {
        let err = SkipRule::parse_known("Lecture-3", &["Course", "Video"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Lecture"), "{msg}");
        assert!(msg.contains("Course, Video"), "{msg}");
    }

    #[test]
    fn test_display_round_trips_through_string() {
        for raw in ["Attachment", "Attachment-2261"] {
            let rule: SkipRule = raw.parse().unwrap();
            assert_eq!(String::from(rule), raw);
        }
    }

    #[test]
    fn test_skip_rules_serialize_sorted() {
        let rules: SkipRules = ["Video", "Course-9", "Attachment"]
            .iter()
            .map(|r| r.parse().unwrap())
            .collect();
        let json = serde_json::to_string(&rules).unwrap();
        assert_eq!(json, r#"["Attachment","Video","Course-9"]"#);
        let back: SkipRules = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn test_skip_rules_deserialize_rejects_garbage() {
        let result = serde_json::from_str::<SkipRules>(r#"["Course-x"]"#);
        assert!(result.is_err());
    }
}
