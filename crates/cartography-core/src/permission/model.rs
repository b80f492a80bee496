//! Policy statement models.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::clause::Clause;
use crate::error::{CartographyError, CartographyResult};

/// Effect of a policy statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    Allow,
    /// Takes precedence over any Allow.
    Deny,
}

impl Effect {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }
}

impl<'de> Deserialize<'de> for Effect {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Effect::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown effect '{}'", raw)))
    }
}

/// A single statement as stored on an `AWSPolicyStatement` node.
///
/// Keys are lower case (`effect`, `action`, `notaction`, `resource`,
/// `notresource`). Clause fields accept either a string or a list of strings.
/// Unknown properties such as `id` or `lastupdated` are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyStatement {
    pub effect: Effect,

    #[serde(default, deserialize_with = "one_or_many")]
    pub action: Option<Vec<Clause>>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub notaction: Option<Vec<Clause>>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub resource: Option<Vec<Clause>>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub notresource: Option<Vec<Clause>>,
}

impl PolicyStatement {
    /// Create a statement with no clauses.
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            action: None,
            notaction: None,
            resource: None,
            notresource: None,
        }
    }

    /// Build a statement from a node's property map.
    pub fn from_properties(properties: serde_json::Value) -> CartographyResult<Self> {
        serde_json::from_value(properties)
            .map_err(|e| CartographyError::InvalidStatement(e.to_string()))
    }

    pub fn with_action(mut self, patterns: &[&str]) -> CartographyResult<Self> {
        self.action = Some(compile_all(patterns)?);
        Ok(self)
    }

    pub fn with_notaction(mut self, patterns: &[&str]) -> CartographyResult<Self> {
        self.notaction = Some(compile_all(patterns)?);
        Ok(self)
    }

    pub fn with_resource(mut self, patterns: &[&str]) -> CartographyResult<Self> {
        self.resource = Some(compile_all(patterns)?);
        Ok(self)
    }

    pub fn with_notresource(mut self, patterns: &[&str]) -> CartographyResult<Self> {
        self.notresource = Some(compile_all(patterns)?);
        Ok(self)
    }
}

fn compile_all(patterns: &[&str]) -> CartographyResult<Vec<Clause>> {
    patterns.iter().map(|p| Clause::compile(p)).collect()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<Clause>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let raw = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    };

    raw.iter()
        .map(|p| Clause::compile(p).map_err(serde::de::Error::custom))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Statements of every policy attached to a principal, keyed by policy id.
pub type Policies = BTreeMap<String, Vec<PolicyStatement>>;

/// Policies of every principal in an account, keyed by principal ARN.
pub type Principals = BTreeMap<String, Policies>;

/// Outcome of evaluating one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// An Allow statement grants one of the permissions.
    Allowed,
    /// Nothing matched. Other policies may still grant access.
    NotAllowed,
    /// A Deny statement matched. No other policy can override this.
    ExplicitDeny,
}

/// A principal granted access to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalMapping {
    pub principal_arn: String,
    pub resource_arn: String,
}
