//! Resource scopes restricting which resources a role assignment applies to.
//!
//! A scope is stored as a JSON object. Each key is one rule; the scope accepts a
//! resource only when every rule does. Keys without a rule of their own are kept
//! as [`ScopeRule::Unknown`] and accept everything, so older readers never reject
//! scopes written by newer code.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::resource::Resource;

pub const RESOURCE_TYPES: &str = "resource_types";
pub const OWNER_DEPARTMENT: &str = "owner_department";

#[derive(Debug, Clone, PartialEq)]
pub enum ScopeRule {
    /// Only resources whose type id (string form) is listed.
    ResourceTypes(BTreeSet<String>),
    /// Recognized but not enforced yet.
    OwnerDepartment(Value),
    Unknown { key: String, value: Value },
}

impl ScopeRule {
    fn key(&self) -> &str {
        match self {
            ScopeRule::ResourceTypes(_) => RESOURCE_TYPES,
            ScopeRule::OwnerDepartment(_) => OWNER_DEPARTMENT,
            ScopeRule::Unknown { key, .. } => key,
        }
    }

    fn value(&self) -> Value {
        match self {
            ScopeRule::ResourceTypes(ids) => {
                Value::Array(ids.iter().cloned().map(Value::String).collect())
            }
            ScopeRule::OwnerDepartment(value) => value.clone(),
            ScopeRule::Unknown { value, .. } => value.clone(),
        }
    }

    fn accepts(&self, resource: &Resource) -> bool {
        match self {
            ScopeRule::ResourceTypes(allowed) => {
                allowed.contains(&resource.resource_type_id.to_string())
            }
            ScopeRule::OwnerDepartment(_) => true,
            ScopeRule::Unknown { key, .. } => {
                tracing::trace!(scope_key = %key, "unrecognized scope key accepted");
                true
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ResourceScope {
    rules: Vec<ScopeRule>,
}

impl ResourceScope {
    /// A scope that accepts every resource.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn resource_types<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            rules: vec![ScopeRule::ResourceTypes(
                ids.into_iter().map(|id| id.to_string()).collect(),
            )],
        }
    }

    pub fn with_rule(mut self, rule: ScopeRule) -> Self {
        self.rules.retain(|existing| existing.key() != rule.key());
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ScopeRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn accepts(&self, resource: &Resource) -> bool {
        self.rules.iter().all(|rule| rule.accepts(resource))
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .rules
            .iter()
            .map(|rule| (rule.key().to_string(), rule.value()))
            .collect();
        Value::Object(map)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("invalid scope JSON: {e}"))?;
        Self::try_from(value)
    }
}

impl TryFrom<Value> for ResourceScope {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => return Err(format!("resource scope must be a JSON object, got {other}")),
        };

        let mut rules = Vec::with_capacity(map.len());
        for (key, value) in map {
            let rule = match key.as_str() {
                RESOURCE_TYPES => {
                    let items = value
                        .as_array()
                        .ok_or_else(|| "resource_types must be a list of ids".to_string())?;
                    let ids = items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| "resource_types entries must be strings".to_string())
                        })
                        .collect::<Result<BTreeSet<_>, _>>()?;
                    ScopeRule::ResourceTypes(ids)
                }
                OWNER_DEPARTMENT => ScopeRule::OwnerDepartment(value),
                _ => ScopeRule::Unknown { key, value },
            };
            rules.push(rule);
        }

        Ok(Self { rules })
    }
}

impl From<ResourceScope> for Value {
    fn from(scope: ResourceScope) -> Self {
        scope.to_json()
    }
}
