//! Condition sets attached to role grants and direct grants.
//!
//! Every recognized kind is currently a placeholder that always holds. Unknown
//! kinds hold as well. Add enforcement by giving a kind its own arm in
//! [`Condition::is_satisfied`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::user::User;

pub const TIME_RESTRICTION: &str = "time_restriction";
pub const DEPARTMENT: &str = "department";

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    TimeRestriction(Value),
    Department(Value),
    Unknown { kind: String, params: Value },
}

impl Condition {
    fn kind(&self) -> &str {
        match self {
            Condition::TimeRestriction(_) => TIME_RESTRICTION,
            Condition::Department(_) => DEPARTMENT,
            Condition::Unknown { kind, .. } => kind,
        }
    }

    fn params(&self) -> &Value {
        match self {
            Condition::TimeRestriction(params) | Condition::Department(params) => params,
            Condition::Unknown { params, .. } => params,
        }
    }

    fn is_satisfied(&self, user: &User) -> bool {
        match self {
            Condition::TimeRestriction(_) | Condition::Department(_) => true,
            Condition::Unknown { kind, .. } => {
                tracing::trace!(user_id = %user.id, condition = %kind, "unrecognized condition treated as satisfied");
                true
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.retain(|c| c.kind() != condition.kind());
        self.conditions.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn evaluate(&self, user: &User) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        self.conditions.iter().all(|c| c.is_satisfied(user))
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .conditions
            .iter()
            .map(|c| (c.kind().to_string(), c.params().clone()))
            .collect();
        Value::Object(map)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("invalid conditions JSON: {e}"))?;
        Self::try_from(value)
    }
}

impl TryFrom<Value> for ConditionSet {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => return Err(format!("conditions must be a JSON object, got {other}")),
        };

        let conditions = map
            .into_iter()
            .map(|(kind, params)| match kind.as_str() {
                TIME_RESTRICTION => Condition::TimeRestriction(params),
                DEPARTMENT => Condition::Department(params),
                _ => Condition::Unknown { kind, params },
            })
            .collect();

        Ok(Self { conditions })
    }
}

impl From<ConditionSet> for Value {
    fn from(set: ConditionSet) -> Self {
        set.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "ivan@example.com".to_string(),
            first_name: "Ivan".to_string(),
            last_name: "Petrov".to_string(),
            patronymic: String::new(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    #[test]
    fn empty_set_holds() {
        assert!(ConditionSet::empty().evaluate(&user()));
        assert!(ConditionSet::try_from(json!({})).unwrap().evaluate(&user()));
    }

    #[test]
    fn placeholder_kinds_hold() {
        let set = ConditionSet::try_from(json!({
            "time_restriction": { "from": "09:00", "to": "18:00" },
            "department": "finance"
        }))
        .unwrap();

        assert_eq!(set.conditions().len(), 2);
        assert!(set
            .conditions()
            .iter()
            .any(|c| matches!(c, Condition::TimeRestriction(_))));
        assert!(set.evaluate(&user()));
    }

    #[test]
    fn unknown_kinds_hold() {
        let set = ConditionSet::try_from(json!({ "ip_range": "10.0.0.0/8" })).unwrap();
        assert!(set.evaluate(&user()));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(ConditionSet::try_from(json!("department")).is_err());
        assert!(ConditionSet::from_json_str("not json").is_err());
    }
}
