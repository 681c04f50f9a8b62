//! Configuration override matching.
//!
//! An [`Override`] is a config patch guarded by a criteria block. Criteria
//! are parsed from JSON objects into a recursive [`Criterion`] tree once, at
//! config load; evaluation is then a pure function of the tree, the caller's
//! [`MatchParams`] and an optional plugin-supplied `extra` predicate.
//!
//! ```text
//! { "level": ">=50", "any": [ { "channel": "1" }, { "role": ["a", "b"] } ],
//!   "config": { "can_ban": true } }
//!
//!        Criteria [ Level[>=50], Any[ Criteria[Channel{1}], Criteria[Role{a,b}] ] ]
//! ```
//!
//! Matching is fail-closed: a block with no criteria, an unrecognized key, a
//! malformed value or a missing match parameter never matches.

mod level;

pub use level::{LevelOp, LevelRange};

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigValidationError;

// =============================================================================
// Match parameters
// =============================================================================

/// Facts about the current request that criteria are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    pub level: Option<i64>,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub category_id: Option<String>,
    pub thread_id: Option<String>,
    pub member_roles: Option<Vec<String>>,
    /// Free-form data for plugin-specific `extra` predicates.
    #[serde(default)]
    pub extra: Value,
}

/// Evaluates the value of an `extra` criterion.
pub type ExtraPredicate = Arc<dyn Fn(&Value, &MatchParams) -> bool + Send + Sync>;

// =============================================================================
// Criteria
// =============================================================================

/// One key of a criteria block.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// Every range must hold for `MatchParams::level`.
    Level(Vec<LevelRange>),
    /// `channel_id` equals any listed id.
    Channel(Vec<String>),
    /// `category_id` equals any listed id.
    Category(Vec<String>),
    /// `thread_id` equals any listed id.
    Thread(Vec<String>),
    /// `member_roles` contains every listed id.
    Role(Vec<String>),
    /// `user_id` equals any listed id.
    User(Vec<String>),
    /// Delegated to the plugin's extra predicate.
    Extra(Value),
    All(Vec<Criteria>),
    Any(Vec<Criteria>),
    Not(Box<Criteria>),
    /// Unknown key or malformed value. Never matches.
    Unrecognized(String),
}

/// A criteria block: every criterion must match, and there must be at least one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria(pub Vec<Criterion>);

impl Criteria {
    /// Parses a criteria object. Keys named in `skip` are ignored.
    pub fn from_map(map: &Map<String, Value>, skip: &[&str]) -> Self {
        let criteria = map
            .iter()
            .filter(|(key, _)| !skip.contains(&key.as_str()))
            .map(|(key, value)| parse_criterion(key, value))
            .collect();
        Self(criteria)
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map, &[]),
            _ => Self(vec![Criterion::Unrecognized("<non-object>".into())]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn parse_criterion(key: &str, value: &Value) -> Criterion {
    let parsed = match key {
        "level" => parse_levels(value).map(Criterion::Level),
        "channel" => parse_ids(value).map(Criterion::Channel),
        "category" => parse_ids(value).map(Criterion::Category),
        "thread" => parse_ids(value).map(Criterion::Thread),
        "role" => parse_ids(value).map(Criterion::Role),
        "user" => parse_ids(value).map(Criterion::User),
        "extra" => Some(Criterion::Extra(value.clone())),
        "all" => parse_blocks(value).map(Criterion::All),
        "any" => parse_blocks(value).map(Criterion::Any),
        "not" => match value {
            Value::Object(_) => Some(Criterion::Not(Box::new(Criteria::from_value(value)))),
            _ => None,
        },
        _ => None,
    };
    parsed.unwrap_or_else(|| Criterion::Unrecognized(key.to_string()))
}

fn parse_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_ids(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(parse_id).collect(),
        single => parse_id(single).map(|id| vec![id]),
    }
}

fn parse_level(value: &Value) -> Option<LevelRange> {
    match value {
        Value::Number(n) => n.as_i64().map(LevelRange::at_least),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_levels(value: &Value) -> Option<Vec<LevelRange>> {
    match value {
        Value::Array(items) => items.iter().map(parse_level).collect(),
        single => parse_level(single).map(|range| vec![range]),
    }
}

fn parse_blocks(value: &Value) -> Option<Vec<Criteria>> {
    match value {
        Value::Array(items) => Some(items.iter().map(Criteria::from_value).collect()),
        _ => None,
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluates a criteria block against `params`.
pub fn evaluate(criteria: &Criteria, params: &MatchParams, extra: Option<&ExtraPredicate>) -> bool {
    !criteria.is_empty()
        && criteria
            .0
            .iter()
            .all(|criterion| evaluate_criterion(criterion, params, extra))
}

fn any_equals(ids: &[String], actual: Option<&String>) -> bool {
    actual.is_some_and(|actual| ids.iter().any(|id| id == actual))
}

fn evaluate_criterion(
    criterion: &Criterion,
    params: &MatchParams,
    extra: Option<&ExtraPredicate>,
) -> bool {
    match criterion {
        Criterion::Level(ranges) => match params.level {
            Some(level) => !ranges.is_empty() && ranges.iter().all(|r| r.matches(level)),
            None => false,
        },
        Criterion::Channel(ids) => any_equals(ids, params.channel_id.as_ref()),
        Criterion::Category(ids) => any_equals(ids, params.category_id.as_ref()),
        Criterion::Thread(ids) => any_equals(ids, params.thread_id.as_ref()),
        Criterion::User(ids) => any_equals(ids, params.user_id.as_ref()),
        Criterion::Role(ids) => match &params.member_roles {
            Some(roles) => !ids.is_empty() && ids.iter().all(|id| roles.contains(id)),
            None => false,
        },
        Criterion::Extra(value) => extra.is_some_and(|predicate| predicate(value, params)),
        Criterion::All(blocks) => {
            !blocks.is_empty() && blocks.iter().all(|b| evaluate(b, params, extra))
        }
        Criterion::Any(blocks) => blocks.iter().any(|b| evaluate(b, params, extra)),
        Criterion::Not(block) => !evaluate(block, params, extra),
        Criterion::Unrecognized(_) => false,
    }
}

// =============================================================================
// Overrides
// =============================================================================

/// A config patch applied when its criteria match.
#[derive(Clone, PartialEq)]
pub struct Override {
    pub criteria: Criteria,
    pub config: Value,
}

impl Override {
    pub fn new(criteria: Criteria, config: Value) -> Self {
        Self { criteria, config }
    }

    /// Parses `{ <criteria keys>..., "config": { ... } }`.
    pub fn from_value(value: Value) -> Result<Self, ConfigValidationError> {
        match value {
            Value::Object(mut map) => {
                let config = map.remove("config").unwrap_or_else(|| Value::Object(Map::new()));
                Ok(Self {
                    criteria: Criteria::from_map(&map, &[]),
                    config,
                })
            }
            other => Err(ConfigValidationError::new(format!(
                "override must be an object, got {other}"
            ))),
        }
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Override")
            .field("criteria", &self.criteria.0)
            .field("config", &self.config)
            .finish()
    }
}

impl<'de> Deserialize<'de> for Override {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Override::from_value(value).map_err(de::Error::custom)
    }
}

/// Deep-merges `patch` into `target`.
///
/// Objects merge key by key; every other value (including arrays) replaces.
pub fn merge_config(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_config(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Applies every matching override to `base`, in order.
pub fn get_matching_config(
    base: &Value,
    overrides: &[Override],
    params: &MatchParams,
    extra: Option<&ExtraPredicate>,
) -> Value {
    let mut config = base.clone();
    for item in overrides {
        if evaluate(&item.criteria, params, extra) {
            merge_config(&mut config, &item.config);
        }
    }
    config
}
