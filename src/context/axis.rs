use serde::{Deserialize, Serialize};
use std::fmt;

/// Which contexts of the graph a callback visits, relative to the receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Only the receiving context, never its parent or children
    SelfOnly,
    Root,
    Child,
    Sibling,
    Ancestor,
    /// Descendants in pre-order
    Descendant,
    DescendantReverse,
    SelfOrChild,
    SelfOrSibling,
    SelfOrAncestor,
    SelfOrDescendant,
    SelfOrDescendantReverse,
    SelfSiblingOrAncestor,
}

impl Axis {
    /// Whether the receiving context itself is visited.
    #[must_use]
    pub fn includes_self(self) -> bool {
        matches!(
            self,
            Axis::SelfOnly
                | Axis::SelfOrChild
                | Axis::SelfOrSibling
                | Axis::SelfOrAncestor
                | Axis::SelfOrDescendant
                | Axis::SelfOrDescendantReverse
                | Axis::SelfSiblingOrAncestor
        )
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::SelfOnly => "self",
            Axis::Root => "root",
            Axis::Child => "child",
            Axis::Sibling => "sibling",
            Axis::Ancestor => "ancestor",
            Axis::Descendant => "descendant",
            Axis::DescendantReverse => "descendant-reverse",
            Axis::SelfOrChild => "self-or-child",
            Axis::SelfOrSibling => "self-or-sibling",
            Axis::SelfOrAncestor => "self-or-ancestor",
            Axis::SelfOrDescendant => "self-or-descendant",
            Axis::SelfOrDescendantReverse => "self-or-descendant-reverse",
            Axis::SelfSiblingOrAncestor => "self-sibling-or-ancestor",
        };
        f.write_str(name)
    }
}
