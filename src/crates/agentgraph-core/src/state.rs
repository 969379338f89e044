//! State schema and merge policies.
//!
//! Graph state is a JSON object whose shape is declared up front by a
//! [`StateSchema`]. Every field carries a [`MergePolicy`] that decides how a
//! node's partial update folds into the current value. Updates are validated
//! against the schema as a whole before any field is written, so a rejected
//! update never leaves the state partially merged.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::StateError;

/// How a field absorbs values from a partial update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// The update value overwrites the current value.
    Replace,
    /// The update value is appended to the current array. A non-array update
    /// value is appended as a single element.
    Append,
}

/// Declaration of a single state field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub policy: MergePolicy,
    pub default: Value,
}

impl FieldSpec {
    pub fn new(policy: MergePolicy) -> Self {
        let default = match policy {
            MergePolicy::Replace => Value::Null,
            MergePolicy::Append => Value::Array(Vec::new()),
        };
        Self { policy, default }
    }

    pub fn with_default(policy: MergePolicy, default: Value) -> Self {
        Self { policy, default }
    }
}

/// A closed map of field declarations. Updates touching undeclared fields
/// are rejected.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: HashMap<String, FieldSpec>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field with the given merge policy.
    pub fn field(mut self, name: impl Into<String>, policy: MergePolicy) -> Self {
        self.fields.insert(name.into(), FieldSpec::new(policy));
        self
    }

    /// Declares a field with an explicit default value.
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        policy: MergePolicy,
        default: Value,
    ) -> Self {
        self.fields
            .insert(name.into(), FieldSpec::with_default(policy, default));
        self
    }

    /// Declares the conventional append-only `messages` field.
    pub fn with_messages(self) -> Self {
        self.field("messages", MergePolicy::Append)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn policy(&self, name: &str) -> Option<MergePolicy> {
        self.fields.get(name).map(|spec| spec.policy)
    }

    /// True when the update writes at least one append-policy field.
    pub fn touches_append(&self, update: &Value) -> bool {
        update
            .as_object()
            .map(|map| {
                map.keys()
                    .any(|key| self.policy(key) == Some(MergePolicy::Append))
            })
            .unwrap_or(false)
    }

    /// Builds the initial state: every declared field at its default, then
    /// the caller's input merged on top.
    pub fn initial(&self, input: Value) -> Result<Value, StateError> {
        let mut map = Map::new();
        for (name, spec) in &self.fields {
            map.insert(name.clone(), spec.default.clone());
        }
        self.apply(Value::Object(map), input)
    }

    /// Folds a partial update into the current state.
    ///
    /// Validation is complete before any field is written: an unknown field
    /// or a malformed update rejects the whole update.
    pub fn apply(&self, current: Value, update: Value) -> Result<Value, StateError> {
        let update = match update {
            Value::Null => return Ok(current),
            Value::Object(map) => map,
            other => {
                return Err(StateError::SchemaViolation(format!(
                    "update must be a JSON object, got {other}"
                )))
            }
        };
        for key in update.keys() {
            if !self.fields.contains_key(key) {
                return Err(StateError::SchemaViolation(format!(
                    "unknown field '{key}'"
                )));
            }
        }
        let mut state = match current {
            Value::Object(map) => map,
            other => {
                return Err(StateError::InvalidState(format!(
                    "state must be a JSON object, got {other}"
                )))
            }
        };
        for (key, incoming) in update {
            match self.fields[&key].policy {
                MergePolicy::Replace => {
                    state.insert(key, incoming);
                }
                MergePolicy::Append => {
                    let slot = state
                        .entry(key.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    let items = slot.as_array_mut().ok_or_else(|| {
                        StateError::InvalidState(format!("append field '{key}' is not an array"))
                    })?;
                    match incoming {
                        Value::Array(values) => items.extend(values),
                        single => items.push(single),
                    }
                }
            }
        }
        Ok(Value::Object(state))
    }

    /// Composes two updates into one equivalent update.
    ///
    /// Applying the result equals applying `first` then `second`. Used to
    /// fold the updates of a parallel step into a single atomic merge.
    pub fn merge_updates(&self, first: Value, second: Value) -> Result<Value, StateError> {
        let first = match first {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(StateError::SchemaViolation(format!(
                    "update must be a JSON object, got {other}"
                )))
            }
        };
        let second = match second {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(StateError::SchemaViolation(format!(
                    "update must be a JSON object, got {other}"
                )))
            }
        };
        let mut merged = first;
        for (key, incoming) in second {
            let policy = self
                .fields
                .get(&key)
                .map(|spec| spec.policy)
                .ok_or_else(|| StateError::SchemaViolation(format!("unknown field '{key}'")))?;
            match (merged.get_mut(&key), policy) {
                (Some(slot), MergePolicy::Append) => {
                    let mut items = match slot.take() {
                        Value::Array(values) => values,
                        single => vec![single],
                    };
                    match incoming {
                        Value::Array(values) => items.extend(values),
                        single => items.push(single),
                    }
                    *slot = Value::Array(items);
                }
                _ => {
                    merged.insert(key, incoming);
                }
            }
        }
        Ok(Value::Object(merged))
    }
}
