use super::{Callback, CallbackBase};
use crate::constraint::ConstraintSet;
use crate::descriptor::Binding;
use crate::policy::Policy;
use crate::types::Keyed;
use crate::value::{Key, Value};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Group name selecting every validation group.
pub const ANY_GROUP: &str = "*";

/// Structured validation errors keyed by property path.
///
/// Paths use dots and indexers (`address.city`, `lines[2].sku`); each
/// segment except the last addresses a nested outcome.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationOutcome {
    errors: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    nested: BTreeMap<String, ValidationOutcome>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split(['.', '[', ']'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

impl ValidationOutcome {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.nested.is_empty()
    }

    /// Properties with errors at this level.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        let mut fields: Vec<&str> = self
            .errors
            .keys()
            .chain(self.nested.keys())
            .map(String::as_str)
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields.into_iter()
    }

    /// Record `message` against `path`.
    pub fn add_error(&mut self, path: &str, message: impl Into<String>) {
        let parts = segments(path);
        self.add_at(&parts, message.into());
    }

    fn add_at(&mut self, parts: &[&str], message: String) {
        match parts {
            [] => self.errors.entry(String::new()).or_default().push(message),
            [field] => self.errors.entry((*field).to_string()).or_default().push(message),
            [field, rest @ ..] => self
                .nested
                .entry((*field).to_string())
                .or_default()
                .add_at(rest, message),
        }
    }

    /// Nested outcome at `path`, if any errors were recorded below it.
    #[must_use]
    pub fn path(&self, path: &str) -> Option<&ValidationOutcome> {
        let mut current = self;
        for part in segments(path) {
            current = current.nested.get(part)?;
        }
        Some(current)
    }

    /// Messages recorded directly at `path`.
    #[must_use]
    pub fn field_errors(&self, path: &str) -> Vec<&str> {
        let parts = segments(path);
        let Some((last, parents)) = parts.split_last() else {
            return Vec::new();
        };
        let mut current = self;
        for part in parents {
            match current.nested.get(*part) {
                Some(child) => current = child,
                None => return Vec::new(),
            }
        }
        current
            .errors
            .get(*last)
            .map(|messages| messages.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Fold another outcome into this one.
    pub fn merge(&mut self, other: &ValidationOutcome) {
        for (field, messages) in &other.errors {
            self.errors
                .entry(field.clone())
                .or_default()
                .extend(messages.iter().cloned());
        }
        for (field, child) in &other.nested {
            self.nested.entry(field.clone()).or_default().merge(child);
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{field}: ")?;
            let mut first = true;
            for message in self.errors.get(field).into_iter().flatten() {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(message)?;
                first = false;
            }
            if let Some(child) = self.nested.get(field) {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "({child})")?;
            }
        }
        Ok(())
    }
}

/// Validate a value against every matching `Validates` binding.
///
/// Bindings tagged with groups only run when the callback requests one of
/// those groups (or [`ANY_GROUP`]); untagged bindings always run.
pub struct Validates {
    source: Value,
    groups: Vec<Arc<str>>,
    outcome: Mutex<ValidationOutcome>,
    constraints: ConstraintSet,
    base: CallbackBase,
}

impl Validates {
    #[must_use]
    pub fn new(source: Value) -> Self {
        Self {
            source,
            groups: Vec::new(),
            outcome: Mutex::new(ValidationOutcome::new()),
            constraints: ConstraintSet::new(),
            base: CallbackBase::new(),
        }
    }

    pub fn of<T: ?Sized + Keyed>(target: Arc<T>) -> Self {
        Self::new(T::into_value(target))
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn target(&self) -> &Value {
        &self.source
    }

    #[must_use]
    pub fn groups(&self) -> &[Arc<str>] {
        &self.groups
    }

    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| &**g == group)
    }

    pub fn add_error(&self, path: &str, message: impl Into<String>) {
        self.outcome.lock().add_error(path, message);
    }

    /// Snapshot of the errors recorded so far.
    #[must_use]
    pub fn outcome(&self) -> ValidationOutcome {
        self.outcome.lock().clone()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.outcome.lock().is_valid()
    }
}

impl Callback for Validates {
    fn policy(&self) -> &'static Policy {
        Policy::validates()
    }

    fn key(&self) -> Key {
        Key::Type(self.source.type_key())
    }

    fn source(&self) -> Option<&Value> {
        Some(&self.source)
    }

    fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CallbackBase {
        &mut self.base
    }

    fn matches_binding(&self, binding: &Binding) -> bool {
        let required = binding.metadata().groups();
        if required.is_empty() {
            return true;
        }
        if required.iter().any(|g| &**g == ANY_GROUP) {
            return true;
        }
        self.groups
            .iter()
            .any(|g| &**g == ANY_GROUP || required.contains(g))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths_build_child_outcomes() {
        let mut outcome = ValidationOutcome::new();
        outcome.add_error("name", "required");
        outcome.add_error("address.city", "required");
        outcome.add_error("lines[2].sku", "unknown");
        assert!(!outcome.is_valid());
        assert_eq!(outcome.field_errors("name"), vec!["required"]);
        assert_eq!(outcome.field_errors("address.city"), vec!["required"]);
        assert!(outcome.path("lines[2]").is_some());
        assert_eq!(
            outcome.to_string(),
            "address: (city: required); lines: (2: (sku: unknown)); name: required"
        );
    }

    #[test]
    fn outcomes_serialize_as_json() {
        let mut outcome = ValidationOutcome::new();
        outcome.add_error("age", "too young");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["errors"]["age"][0], "too young");
    }
}
