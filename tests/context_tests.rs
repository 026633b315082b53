//! Context graph traversal and lifecycle through the public API
//!
//! # Test Coverage
//!
//! - Axis decorators select which contexts answer a callback
//! - Broadcast commands across descendants
//! - Unwinding ends descendants while the root stays active
//! - End callbacks receive the reason

use callweave::{api, Context, Describe, DescriptorBuilder, EndReason, HandlerExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod tracing_util;
use tracing_util::TestTracing;

struct Tree {
    root: Arc<Context>,
    left: Arc<Context>,
    right: Arc<Context>,
    leaf: Arc<Context>,
}

/// ```text
///        root(1)
///       /       \
///   left(2)   right(3)
///     |
///   leaf(4)
/// ```
fn tree() -> Tree {
    let root = Context::new();
    root.store(Arc::new(1_u8));
    let left = root.new_child().unwrap();
    left.store(Arc::new(2_u8));
    let right = root.new_child().unwrap();
    right.store(Arc::new(3_u8));
    let leaf = left.new_child().unwrap();
    leaf.store(Arc::new(4_u8));
    Tree {
        root,
        left,
        right,
        leaf,
    }
}

fn numbers(handler: Arc<dyn callweave::Handler>) -> Vec<u8> {
    api::resolve_all::<u8>(&*handler)
        .unwrap()
        .wait()
        .unwrap()
        .iter()
        .map(|n| **n)
        .collect()
}

#[test]
fn test_axes_select_contexts() {
    let _tracing = TestTracing::init();
    let t = tree();

    assert_eq!(numbers(Arc::clone(&t.left).self_axis()), vec![2]);
    assert_eq!(numbers(Arc::clone(&t.leaf).root_axis()), vec![1]);
    assert_eq!(numbers(Arc::clone(&t.root).child_axis()), vec![2, 3]);
    assert_eq!(numbers(Arc::clone(&t.right).sibling_axis()), vec![2]);
    assert_eq!(numbers(Arc::clone(&t.leaf).ancestor_axis()), vec![2, 1]);
    assert_eq!(numbers(Arc::clone(&t.root).self_or_descendant_axis()), vec![1, 2, 4, 3]);
    assert_eq!(numbers(Arc::clone(&t.root).descendant_reverse_axis()), vec![4, 3, 2]);

    // Without an axis a context falls back to its ancestors.
    assert_eq!(numbers(Arc::clone(&t.leaf) as Arc<dyn callweave::Handler>), vec![4, 2, 1]);
}

struct Refresh;

struct Panel {
    refreshed: AtomicUsize,
}

impl Describe for Panel {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("refresh", |panel: &Panel, _: Arc<Refresh>, (), _ctx| {
            panel.refreshed.fetch_add(1, Ordering::SeqCst);
        });
    }
}

#[test]
fn test_broadcast_reaches_every_descendant() {
    let t = tree();
    let panels: Vec<Arc<Panel>> = [&t.left, &t.right, &t.leaf]
        .into_iter()
        .map(|context| {
            let panel = Arc::new(Panel {
                refreshed: AtomicUsize::new(0),
            });
            context.add_instance(Arc::clone(&panel)).unwrap();
            panel
        })
        .collect();

    let everywhere = Arc::clone(&t.root).descendant_axis().broadcast();
    api::command(&*everywhere, Arc::new(Refresh)).unwrap();
    assert!(panels.iter().all(|p| p.refreshed.load(Ordering::SeqCst) == 1));

    let first_only = Arc::clone(&t.root).descendant_axis();
    api::command(&*first_only, Arc::new(Refresh)).unwrap();
    let counts: Vec<usize> = panels.iter().map(|p| p.refreshed.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, vec![2, 1, 1]);
}

#[test]
fn test_unwind_to_root_keeps_root_active() {
    let t = tree();
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reasons);
    let _subscription = t.leaf.on_ended(move |_, reason| seen.lock().push(reason));

    t.leaf.unwind_to_root();

    assert!(t.root.is_active());
    assert!(!t.left.is_active());
    assert!(!t.right.is_active());
    assert!(!t.leaf.is_active());
    assert!(t.root.children().is_empty());
    assert_eq!(*reasons.lock(), vec![EndReason::Unwinded]);

    let child = t.root.new_child().unwrap();
    assert_eq!(numbers(child), vec![1]);
}
