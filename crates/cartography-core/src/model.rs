//! Declarative node and relationship schemas.
//!
//! A `NodeSchema` describes how a list of property maps becomes nodes in the
//! graph: the label, which map key feeds which node property, and which other
//! nodes to link to. Ingestion, cleanup and index queries are generated from
//! it (see `querybuilder` and `cleanupbuilder`).
//!
//! Example: the schema below loads `(:S3Bucket)<-[:RESOURCE]-(:AWSAccount)`.
//!
//! ```
//! use cartography_core::model::{LinkDirection, NodeSchema, PropertyRef, RelSchema, TargetNodeMatcher};
//!
//! let account = RelSchema::new(
//!     "RESOURCE",
//!     "AWSAccount",
//!     LinkDirection::Inward,
//!     TargetNodeMatcher::new().with("id", PropertyRef::kwarg("AWS_ID")),
//! );
//! let schema = NodeSchema::builder("S3Bucket")
//!     .property("id", PropertyRef::new("Name"))
//!     .property("arn", PropertyRef::new("Arn"))
//!     .property("lastupdated", PropertyRef::kwarg("lastupdated"))
//!     .sub_resource(account)
//!     .build()
//!     .unwrap();
//! assert_eq!(schema.label(), "S3Bucket");
//! ```

use std::fmt;

use crate::error::{CartographyError, CartographyResult};
use crate::util::validate_identifier;

/// A property on a node or relationship.
///
/// The value comes either from the key `name` of the item being loaded
/// (`item.<name>`), or from a query parameter shared by the whole batch
/// (`$<name>`), such as the update tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    pub name: String,
    pub set_in_kwargs: bool,
}

impl PropertyRef {
    /// Read the value from each item.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            set_in_kwargs: false,
        }
    }

    /// Read the value from a query parameter.
    pub fn kwarg(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            set_in_kwargs: true,
        }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.set_in_kwargs {
            write!(f, "${}", self.name)
        } else {
            write!(f, "item.{}", self.name)
        }
    }
}

/// Direction of a relationship relative to the schema's node.
///
/// `Inward` draws `(node)<-[:REL]-(target)`, `Outward` draws
/// `(node)-[:REL]->(target)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Inward,
    Outward,
}

/// Keys used to find the node at the other end of a relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetNodeMatcher {
    keys: Vec<(String, PropertyRef)>,
}

impl TargetNodeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: PropertyRef) -> Self {
        self.keys.push((key.into(), value));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyRef)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Render as a Cypher map body, e.g. `id: $AWS_ID, name: item.name`.
    pub fn to_cypher(&self) -> String {
        self.keys
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A relationship from the schema's node to existing nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelSchema {
    pub rel_label: String,
    pub target_node_label: String,
    pub direction: LinkDirection,
    pub target_node_matcher: TargetNodeMatcher,
    pub properties: Vec<(String, PropertyRef)>,
}

impl RelSchema {
    pub fn new(
        rel_label: impl Into<String>,
        target_node_label: impl Into<String>,
        direction: LinkDirection,
        target_node_matcher: TargetNodeMatcher,
    ) -> Self {
        Self {
            rel_label: rel_label.into(),
            target_node_label: target_node_label.into(),
            direction,
            target_node_matcher,
            properties: vec![("lastupdated".to_string(), PropertyRef::kwarg("lastupdated"))],
        }
    }

    /// Add or replace a relationship property.
    pub fn with_property(mut self, name: impl Into<String>, value: PropertyRef) -> Self {
        let name = name.into();
        self.properties.retain(|(n, _)| *n != name);
        self.properties.push((name, value));
        self
    }

    fn validate(&self) -> CartographyResult<()> {
        validate_identifier(&self.rel_label)?;
        validate_identifier(&self.target_node_label)?;
        if self.target_node_matcher.is_empty() {
            return Err(CartographyError::schema(format!(
                "relationship '{}' to '{}' has an empty target node matcher",
                self.rel_label, self.target_node_label
            )));
        }
        for (key, _) in self.target_node_matcher.iter() {
            validate_identifier(key)?;
        }
        for (name, _) in &self.properties {
            validate_identifier(name)?;
        }
        Ok(())
    }
}

/// A node type and the relationships drawn while loading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSchema {
    label: String,
    properties: Vec<(String, PropertyRef)>,
    sub_resource_relationship: Option<RelSchema>,
    other_relationships: Vec<RelSchema>,
    extra_labels: Vec<String>,
}

impl NodeSchema {
    pub fn builder(label: impl Into<String>) -> NodeSchemaBuilder {
        NodeSchemaBuilder {
            label: label.into(),
            properties: Vec::new(),
            sub_resource_relationship: None,
            other_relationships: Vec::new(),
            extra_labels: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn properties(&self) -> &[(String, PropertyRef)] {
        &self.properties
    }

    /// The `id` property reference. Always present after `build()`.
    pub fn id_ref(&self) -> Option<&PropertyRef> {
        self.properties.iter().find(|(n, _)| n == "id").map(|(_, r)| r)
    }

    /// The tenant-like node that owns this node, e.g. an AWSAccount.
    /// Cleanup is scoped to it.
    pub fn sub_resource_relationship(&self) -> Option<&RelSchema> {
        self.sub_resource_relationship.as_ref()
    }

    pub fn other_relationships(&self) -> &[RelSchema] {
        &self.other_relationships
    }

    pub fn extra_labels(&self) -> &[String] {
        &self.extra_labels
    }

    /// Sub resource relationship first, then the others.
    pub fn all_relationships(&self) -> impl Iterator<Item = &RelSchema> {
        self.sub_resource_relationship
            .iter()
            .chain(self.other_relationships.iter())
    }

    /// Whether `rel` is one of this schema's relationships.
    pub fn has_relationship(&self, rel: &RelSchema) -> bool {
        self.all_relationships().any(|r| r == rel)
    }
}

/// Builder for `NodeSchema`.
pub struct NodeSchemaBuilder {
    label: String,
    properties: Vec<(String, PropertyRef)>,
    sub_resource_relationship: Option<RelSchema>,
    other_relationships: Vec<RelSchema>,
    extra_labels: Vec<String>,
}

impl NodeSchemaBuilder {
    pub fn property(mut self, name: impl Into<String>, value: PropertyRef) -> Self {
        let name = name.into();
        self.properties.retain(|(n, _)| *n != name);
        self.properties.push((name, value));
        self
    }

    pub fn sub_resource(mut self, rel: RelSchema) -> Self {
        self.sub_resource_relationship = Some(rel);
        self
    }

    pub fn other_relationship(mut self, rel: RelSchema) -> Self {
        self.other_relationships.push(rel);
        self
    }

    pub fn extra_label(mut self, label: impl Into<String>) -> Self {
        self.extra_labels.push(label.into());
        self
    }

    /// Validate and build the schema.
    ///
    /// Every node needs an `id` and a `lastupdated` property, and every label,
    /// relationship type and property name must be a plain identifier.
    pub fn build(self) -> CartographyResult<NodeSchema> {
        validate_identifier(&self.label)?;
        for label in &self.extra_labels {
            validate_identifier(label)?;
        }
        for (name, _) in &self.properties {
            validate_identifier(name)?;
        }
        for required in ["id", "lastupdated"] {
            if !self.properties.iter().any(|(n, _)| n == required) {
                return Err(CartographyError::schema(format!(
                    "node schema '{}' is missing the required '{}' property",
                    self.label, required
                )));
            }
        }
        for rel in self
            .sub_resource_relationship
            .iter()
            .chain(self.other_relationships.iter())
        {
            rel.validate()?;
        }

        Ok(NodeSchema {
            label: self.label,
            properties: self.properties,
            sub_resource_relationship: self.sub_resource_relationship,
            other_relationships: self.other_relationships,
            extra_labels: self.extra_labels,
        })
    }
}
