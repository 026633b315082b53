use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

/// Identity of a [`Context`](crate::context::Context), backed by ULID.
///
/// Scoped lifestyles key their caches by this id rather than by address, so
/// a context allocated where an ended one used to live starts with an empty
/// cache. Ids created later compare greater.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct ContextId(ulid::Ulid);

impl ContextId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// When the context was created, to millisecond precision.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.0.datetime()
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ContextId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(ContextId)
    }
}

impl Serialize for ContextId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContextId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_parse_back() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        let parsed: ContextId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("not-a-ulid".parse::<ContextId>().is_err());
    }

    #[test]
    fn creation_time_is_recorded() {
        let before = SystemTime::now() - std::time::Duration::from_secs(1);
        let id = ContextId::new();
        assert!(id.created_at() >= before);
    }

    #[test]
    fn serializes_as_string() {
        let id = ContextId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ContextId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
