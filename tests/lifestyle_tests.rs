//! Lifestyle caching under concurrency and context lifecycles
//!
//! # Test Coverage
//!
//! - Singletons are constructed exactly once across threads
//! - Failed constructions are not cached and are retried
//! - Ending a root ends every descendant and releases their scoped instances
//! - Long-lived bindings cannot capture shorter-lived instances
//! - Contextual instances refuse to move between contexts

use callweave::context::ContextState;
use callweave::error::LifestyleError;
use callweave::{
    api, Context, Contextual, ContextualBase, Describe, DescriptorBuilder, Disposable, EndReason,
    Error, Setup,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod tracing_util;
use tracing_util::TestTracing;

// ---------------------------------------------------------------------------
// Singleton
// ---------------------------------------------------------------------------

static METERS_BUILT: AtomicUsize = AtomicUsize::new(0);

struct Meter;

impl Describe for Meter {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.constructor(|(): ()| {
            METERS_BUILT.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            Meter
        });
    }
}

#[test]
fn test_singleton_constructed_once_across_threads() {
    let _tracing = TestTracing::init();

    let handler = Setup::new().spec_of::<Meter>().handler().unwrap();
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || api::resolve::<Meter>(&*handler).unwrap().wait().unwrap().unwrap())
        })
        .collect();
    let meters: Vec<Arc<Meter>> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(METERS_BUILT.load(Ordering::SeqCst), 1);
    assert!(meters.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

static FLAKY_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct Flaky;

impl Describe for Flaky {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.try_constructor(|(): ()| {
            if FLAKY_ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::msg("warming up"))
            } else {
                Ok(Flaky)
            }
        });
    }
}

#[test]
fn test_failed_construction_is_retried() {
    let handler = Setup::new().spec_of::<Flaky>().handler().unwrap();

    let err = api::resolve::<Flaky>(&*handler).unwrap_err();
    assert!(err.to_string().contains("warming up"), "{err}");

    let first = api::resolve::<Flaky>(&*handler).unwrap().wait().unwrap().unwrap();
    let second = api::resolve::<Flaky>(&*handler).unwrap().wait().unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(FLAKY_ATTEMPTS.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Scoped and context end
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Session {
    disposed: AtomicBool,
}

impl Disposable for Session {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl Describe for Session {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.disposable();
        d.default_constructor().scoped();
    }
}

fn session(context: &Arc<Context>) -> Arc<Session> {
    api::resolve::<Session>(&**context).unwrap().wait().unwrap().unwrap()
}

#[test]
fn test_ending_root_releases_every_descendant() {
    let _tracing = TestTracing::init();

    let root = Setup::new().spec_of::<Session>().context().unwrap();
    let child = root.new_child().unwrap();
    let grandchild = child.new_child().unwrap();

    let in_child = session(&child);
    let in_grandchild = session(&grandchild);
    assert!(!Arc::ptr_eq(&in_child, &in_grandchild));
    assert!(Arc::ptr_eq(&in_grandchild, &session(&grandchild)));

    root.end(EndReason::Requested);

    for context in [&root, &child, &grandchild] {
        assert_eq!(context.state(), ContextState::Ended);
    }
    assert!(in_child.disposed.load(Ordering::SeqCst));
    assert!(in_grandchild.disposed.load(Ordering::SeqCst));
    assert!(child.new_child().is_err());
}

#[derive(Default, Debug)]
struct RequestScope;

impl Describe for RequestScope {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.default_constructor().scoped();
    }
}

#[derive(Debug)]
struct Registry {
    _scope: Arc<RequestScope>,
}

impl Describe for Registry {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.constructor(|(scope,): (Arc<RequestScope>,)| Registry { _scope: scope });
    }
}

#[derive(Debug)]
struct RootCache {
    _scope: Arc<RequestScope>,
}

impl Describe for RootCache {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.constructor(|(scope,): (Arc<RequestScope>,)| RootCache { _scope: scope })
            .rooted();
    }
}

#[test]
fn test_longer_lived_bindings_cannot_capture_scoped_instances() {
    let _tracing = TestTracing::init();

    let root = Setup::new()
        .spec_of::<RequestScope>()
        .spec_of::<Registry>()
        .spec_of::<RootCache>()
        .context()
        .unwrap();
    let child = root.new_child().unwrap();

    let err = api::resolve::<Registry>(&*child).unwrap_err();
    assert!(
        matches!(err, Error::Lifestyle(LifestyleError::Mismatch { .. })),
        "{err}"
    );

    let err = api::resolve::<RootCache>(&*child).unwrap_err();
    assert!(
        matches!(err, Error::Lifestyle(LifestyleError::Mismatch { .. })),
        "{err}"
    );

    let scope = api::resolve::<RequestScope>(&*child).unwrap().wait().unwrap();
    assert!(scope.is_some());
}

// ---------------------------------------------------------------------------
// Contextual
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Workspace {
    base: ContextualBase,
}

impl Contextual for Workspace {
    fn contextual_base(&self) -> &ContextualBase {
        &self.base
    }
}

impl Describe for Workspace {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.contextual();
        d.default_constructor().scoped();
    }
}

#[test]
fn test_managed_contextual_instances_cannot_change_context() {
    let root = Setup::new().spec_of::<Workspace>().context().unwrap();
    let other = Context::new();

    let workspace = api::resolve::<Workspace>(&*root).unwrap().wait().unwrap().unwrap();
    assert!(Arc::ptr_eq(&workspace.context().unwrap(), &root));

    let err = workspace.set_context(Some(&other)).unwrap_err();
    assert!(
        matches!(err, Error::Lifestyle(LifestyleError::ContextChange)),
        "{err}"
    );
    assert!(Arc::ptr_eq(&workspace.context().unwrap(), &root));
}
