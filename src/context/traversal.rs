//! Tree traversal with circularity detection.
//!
//! The visitor returns `true` to stop early. Meeting the same node twice
//! fails the traversal instead of looping.

use super::Axis;
use crate::error::Error;
use std::collections::{HashSet, VecDeque};

/// A node of a traversable graph.
pub trait Traversing: Sized {
    /// Identity used to detect cycles.
    fn node_id(&self) -> usize;

    fn parent_node(&self) -> Option<Self>;

    fn child_nodes(&self) -> Vec<Self>;
}

fn circularity(id: usize) -> Error {
    Error::msg(format!("circularity detected at node {id:#x}"))
}

fn mark<N: Traversing>(visited: &mut HashSet<usize>, node: &N) -> Result<(), Error> {
    if visited.insert(node.node_id()) {
        Ok(())
    } else {
        Err(circularity(node.node_id()))
    }
}

/// Node, then each child subtree in order.
pub fn traverse_pre_order<N, F>(root: &N, mut visit: F) -> Result<(), Error>
where
    N: Traversing + Clone,
    F: FnMut(&N) -> bool,
{
    let mut visited = HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        mark(&mut visited, &node)?;
        if visit(&node) {
            return Ok(());
        }
        stack.extend(node.child_nodes().into_iter().rev());
    }
    Ok(())
}

/// Each child subtree in order, then the node.
pub fn traverse_post_order<N, F>(root: &N, mut visit: F) -> Result<(), Error>
where
    N: Traversing + Clone,
    F: FnMut(&N) -> bool,
{
    let mut visited = HashSet::new();
    let mut stack = vec![(root.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            if visit(&node) {
                return Ok(());
            }
            continue;
        }
        mark(&mut visited, &node)?;
        let children = node.child_nodes();
        stack.push((node, true));
        stack.extend(children.into_iter().rev().map(|child| (child, false)));
    }
    Ok(())
}

fn level_order<N: Traversing + Clone>(root: &N) -> Result<Vec<N>, Error> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);
    let mut ordered = Vec::new();
    while let Some(node) = queue.pop_front() {
        mark(&mut visited, &node)?;
        queue.extend(node.child_nodes());
        ordered.push(node);
    }
    Ok(ordered)
}

/// Breadth first, starting at the node.
pub fn traverse_level_order<N, F>(root: &N, mut visit: F) -> Result<(), Error>
where
    N: Traversing + Clone,
    F: FnMut(&N) -> bool,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);
    while let Some(node) = queue.pop_front() {
        mark(&mut visited, &node)?;
        if visit(&node) {
            return Ok(());
        }
        queue.extend(node.child_nodes());
    }
    Ok(())
}

/// Breadth first, deepest nodes first, ending at the node.
pub fn traverse_reverse_level_order<N, F>(root: &N, mut visit: F) -> Result<(), Error>
where
    N: Traversing + Clone,
    F: FnMut(&N) -> bool,
{
    for node in level_order(root)?.iter().rev() {
        if visit(node) {
            break;
        }
    }
    Ok(())
}

/// Parent chain, nearest first, excluding the node.
pub fn traverse_ancestors<N, F>(node: &N, mut visit: F) -> Result<(), Error>
where
    N: Traversing,
    F: FnMut(&N) -> bool,
{
    let mut visited = HashSet::from([node.node_id()]);
    let mut current = node.parent_node();
    while let Some(parent) = current {
        mark(&mut visited, &parent)?;
        if visit(&parent) {
            break;
        }
        current = parent.parent_node();
    }
    Ok(())
}

/// Visit the nodes `axis` selects relative to `node`.
pub fn traverse_axis<N, F>(node: &N, axis: Axis, mut visit: F) -> Result<(), Error>
where
    N: Traversing + Clone,
    F: FnMut(&N) -> bool,
{
    let id = node.node_id();
    let with_self = axis.includes_self();
    match axis {
        Axis::SelfOnly => {
            visit(node);
            Ok(())
        }
        Axis::Root => {
            let mut root = node.clone();
            traverse_ancestors(node, |ancestor| {
                root = ancestor.clone();
                false
            })?;
            visit(&root);
            Ok(())
        }
        Axis::Child | Axis::SelfOrChild => {
            if with_self && visit(node) {
                return Ok(());
            }
            for child in node.child_nodes() {
                if visit(&child) {
                    break;
                }
            }
            Ok(())
        }
        Axis::Ancestor | Axis::SelfOrAncestor => {
            if with_self && visit(node) {
                return Ok(());
            }
            traverse_ancestors(node, visit)
        }
        Axis::Descendant | Axis::SelfOrDescendant => {
            traverse_pre_order(node, |n| (with_self || n.node_id() != id) && visit(n))
        }
        Axis::DescendantReverse | Axis::SelfOrDescendantReverse => {
            traverse_reverse_level_order(node, |n| (with_self || n.node_id() != id) && visit(n))
        }
        Axis::Sibling | Axis::SelfOrSibling | Axis::SelfSiblingOrAncestor => {
            if with_self && visit(node) {
                return Ok(());
            }
            let Some(parent) = node.parent_node() else {
                return Ok(());
            };
            for sibling in parent.child_nodes() {
                if sibling.node_id() != id && visit(&sibling) {
                    return Ok(());
                }
            }
            if axis != Axis::SelfSiblingOrAncestor || visit(&parent) {
                return Ok(());
            }
            traverse_ancestors(&parent, visit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone)]
    struct Node(Arc<(u32, Vec<Node>)>);

    fn node(id: u32, children: Vec<Node>) -> Node {
        Node(Arc::new((id, children)))
    }

    impl Traversing for Node {
        fn node_id(&self) -> usize {
            Arc::as_ptr(&self.0) as usize
        }

        fn parent_node(&self) -> Option<Self> {
            None
        }

        fn child_nodes(&self) -> Vec<Self> {
            self.0 .1.clone()
        }
    }

    fn tree() -> Node {
        node(1, vec![node(2, vec![node(4, vec![])]), node(3, vec![])])
    }

    fn collect(walk: impl FnOnce(&Node, &mut dyn FnMut(&Node) -> bool) -> Result<(), Error>) -> Vec<u32> {
        let mut seen = Vec::new();
        walk(&tree(), &mut |n: &Node| {
            seen.push(n.0 .0);
            false
        })
        .unwrap();
        seen
    }

    #[test]
    fn orders() {
        assert_eq!(collect(|r, f| traverse_pre_order(r, f)), vec![1, 2, 4, 3]);
        assert_eq!(collect(|r, f| traverse_post_order(r, f)), vec![4, 2, 3, 1]);
        assert_eq!(collect(|r, f| traverse_level_order(r, f)), vec![1, 2, 3, 4]);
        assert_eq!(collect(|r, f| traverse_reverse_level_order(r, f)), vec![4, 3, 2, 1]);
    }

    #[derive(Clone)]
    struct Loop;

    impl Traversing for Loop {
        fn node_id(&self) -> usize {
            1
        }

        fn parent_node(&self) -> Option<Self> {
            Some(Loop)
        }

        fn child_nodes(&self) -> Vec<Self> {
            vec![Loop]
        }
    }

    #[test]
    fn cycles_are_detected() {
        assert!(traverse_pre_order(&Loop, |_| false).is_err());
        assert!(traverse_level_order(&Loop, |_| false).is_err());
        assert!(traverse_ancestors(&Loop, |_| false).is_err());
    }
}
