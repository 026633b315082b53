//! Struct-tag style binding metadata.
//!
//! Bindings may describe themselves with a compact tag string:
//!
//! ```text
//! key:"primary" bind:"strict,skipFilters" scope:"rooted" name:"main" layout:"wide"
//! ```
//!
//! Each entry is `name:"value"` where `value` is a double-quoted string that
//! may contain `\"` and `\\` escapes. Entries are separated by whitespace.

use std::fmt;

/// Well-known tag names interpreted by the descriptor builder.
pub const KEY: &str = "key";
pub const BIND: &str = "bind";
pub const SCOPE: &str = "scope";
pub const NAME: &str = "name";
pub const LAYOUT: &str = "layout";
pub const MODE: &str = "mode";

/// Parsed tag entries in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    entries: Vec<(String, String)>,
}

/// A tag string that could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagError {
    pub position: usize,
    pub reason: &'static str,
}

impl fmt::Display for TagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed tag at offset {}: {}", self.position, self.reason)
    }
}

impl std::error::Error for TagError {}

impl Tags {
    /// Parse a tag string.
    pub fn parse(input: &str) -> Result<Self, TagError> {
        let bytes = input.as_bytes();
        let mut entries = Vec::new();
        let mut i = 0;
        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            let start = i;
            while i < bytes.len()
                && bytes[i] > b' '
                && bytes[i] != b':'
                && bytes[i] != b'"'
                && bytes[i] != 0x7f
            {
                i += 1;
            }
            if i == start {
                return Err(TagError {
                    position: i,
                    reason: "expected tag name",
                });
            }
            if i + 1 >= bytes.len() || bytes[i] != b':' || bytes[i + 1] != b'"' {
                return Err(TagError {
                    position: i,
                    reason: "expected ':\"' after tag name",
                });
            }
            let name = input[start..i].to_string();
            i += 2;
            let mut value = String::new();
            let mut closed = false;
            let mut chars = input[i..].char_indices();
            while let Some((offset, ch)) = chars.next() {
                match ch {
                    '"' => {
                        i += offset + 1;
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, escaped @ ('"' | '\\'))) => value.push(escaped),
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        _ => {
                            return Err(TagError {
                                position: i + offset,
                                reason: "invalid escape",
                            })
                        }
                    },
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(TagError {
                    position: input.len(),
                    reason: "unterminated value",
                });
            }
            entries.push((name, value));
        }
        Ok(Self { entries })
    }

    /// Value of the first entry called `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Comma separated options of `name`, trimmed and without empties.
    pub fn options<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.lookup(name)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_in_order() {
        let tags = Tags::parse(r#"key:"primary" bind:"strict, skipFilters"  layout:"a \"b\"""#).unwrap();
        assert_eq!(tags.lookup(KEY), Some("primary"));
        assert_eq!(tags.options(BIND).collect::<Vec<_>>(), vec!["strict", "skipFilters"]);
        assert_eq!(tags.lookup(LAYOUT), Some("a \"b\""));
        assert_eq!(tags.lookup(MODE), None);
        assert_eq!(tags.iter().count(), 3);
    }

    #[test]
    fn empty_input_is_valid() {
        assert!(Tags::parse("   ").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_tags() {
        assert!(Tags::parse("key").is_err());
        assert!(Tags::parse("key:primary").is_err());
        assert!(Tags::parse(r#"key:"open"#).is_err());
        assert!(Tags::parse(r#":"x""#).is_err());
    }
}
