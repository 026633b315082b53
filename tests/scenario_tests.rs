//! End-to-end scenarios across dispatch, provisioning, lifestyles and promises
//!
//! # Test Coverage
//!
//! Each test drives one complete flow through the public API:
//! - Command forwarding through the composer
//! - Bindings deciding "not handled" (with and without an error)
//! - Scoped instances per context, disposed when their context ends
//! - Rooted instances shared by every child of a root
//! - Explicit and inferred providers answering the same request
//! - Handlers completing asynchronously through promises
//!
//! # Test Strategy
//!
//! Handlers are registered in the process-wide descriptor factory, the same
//! way applications do. Types are local to this file so lifestyle caches do
//! not leak between test binaries.

use callweave::handler::dispatch;
use callweave::{
    api, Context, Contextual, ContextualBase, Describe, DescriptorBuilder, Disposable, EndReason,
    Error, HandleContext, HandleResult, Handler, Handlers, Handles, InstanceHandler, Promise,
    Provides, Setup, Value,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod tracing_util;
use tracing_util::TestTracing;

#[derive(Default)]
struct Foo {
    count: AtomicUsize,
}

impl Foo {
    fn with_count(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
        }
    }

    fn inc(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Bar {
    count: AtomicUsize,
}

impl Bar {
    fn inc(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Handle/Foo
// ---------------------------------------------------------------------------

struct FooHandler;

impl Describe for FooHandler {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("handle_foo", |_: &FooHandler, foo: Arc<Foo>, (), ctx: &HandleContext<'_>| {
            foo.inc();
            api::command(ctx.composer(), Arc::new(Bar::default())).map(|_| ())
        });
    }
}

#[derive(Default)]
struct BarHandler {
    handled: AtomicUsize,
}

impl Describe for BarHandler {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("handle_bar", |h: &BarHandler, bar: Arc<Bar>, (), _ctx| {
            bar.inc();
            h.handled.fetch_add(1, Ordering::SeqCst);
        });
    }
}

#[test]
fn test_handle_foo_forwards_bar_through_composer() {
    let _tracing = TestTracing::init();

    let bars = Arc::new(BarHandler::default());
    let chain = Handlers::from_vec(vec![
        Arc::new(InstanceHandler::of(Arc::new(FooHandler)).unwrap()) as Arc<dyn Handler>,
        Arc::new(InstanceHandler::of(Arc::clone(&bars)).unwrap()),
    ]);

    let foo = Arc::new(Foo::default());
    let mut handles = Handles::of(Arc::clone(&foo));
    let result = dispatch(&chain, &mut handles, false);

    assert!(result.handled());
    assert!(result.error().is_none());
    assert_eq!(foo.count(), 1);
    assert_eq!(bars.handled.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Counter NotHandled
// ---------------------------------------------------------------------------

struct CounterHandler;

impl Describe for CounterHandler {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("count", |_: &CounterHandler, foo: Arc<Foo>, (), _ctx| {
            let count = foo.inc();
            if count % 3 == 0 {
                HandleResult::NOT_HANDLED.with_error(Error::msg(format!("{count} is divisible by 3")))
            } else if count % 2 == 0 {
                HandleResult::NOT_HANDLED
            } else {
                HandleResult::HANDLED
            }
        });
    }
}

#[test]
fn test_counter_declines_and_reports_errors() {
    let _tracing = TestTracing::init();

    let handler = InstanceHandler::of(Arc::new(CounterHandler)).unwrap();
    let foo = Arc::new(Foo::with_count(1));

    let mut first = Handles::of(Arc::clone(&foo));
    let result = dispatch(&handler, &mut first, false);
    assert!(!result.handled());
    assert!(result.error().is_none());
    assert_eq!(foo.count(), 2);

    let mut second = Handles::of(Arc::clone(&foo));
    let result = dispatch(&handler, &mut second, false);
    assert!(!result.handled());
    assert_eq!(result.error().unwrap().to_string(), "3 is divisible by 3");
}

// ---------------------------------------------------------------------------
// Scoped lifestyle
// ---------------------------------------------------------------------------

#[derive(Default, Debug)]
struct ScopedService {
    disposed: AtomicBool,
}

impl ScopedService {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Disposable for ScopedService {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl Describe for ScopedService {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.disposable();
        d.default_constructor().scoped();
    }
}

fn resolve_scoped(handler: &dyn Handler) -> Arc<ScopedService> {
    api::resolve::<ScopedService>(handler)
        .unwrap()
        .wait()
        .unwrap()
        .expect("scoped service")
}

#[test]
fn test_scoped_instances_follow_their_context() {
    let _tracing = TestTracing::init();

    let root = Setup::new().spec_of::<ScopedService>().context().unwrap();
    let first = resolve_scoped(&*root);
    let second = resolve_scoped(&*root);
    assert!(Arc::ptr_eq(&first, &second));

    let child = root.new_child().unwrap();
    let explicit = api::provide(&*child, Provides::of::<ScopedService>().explicit(), false)
        .unwrap()
        .wait()
        .unwrap();
    let in_child = explicit[0].downcast::<ScopedService>().unwrap();
    assert!(!Arc::ptr_eq(&first, &in_child));

    child.end(EndReason::Requested);
    assert!(in_child.is_disposed());
    assert!(!first.is_disposed());

    root.end(EndReason::Requested);
    assert!(first.is_disposed());
}

#[test]
fn test_scoped_resolution_fails_in_ended_context() {
    let root = Setup::new().spec_of::<ScopedService>().context().unwrap();
    let child = root.new_child().unwrap();
    child.end(EndReason::Requested);

    let err = api::resolve::<ScopedService>(&*child).unwrap_err();
    assert!(err.to_string().contains("inactive context"), "{err}");
}

// ---------------------------------------------------------------------------
// Rooted inside child
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RootedService {
    base: ContextualBase,
}

impl Contextual for RootedService {
    fn contextual_base(&self) -> &ContextualBase {
        &self.base
    }
}

impl Describe for RootedService {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.contextual();
        d.default_constructor().rooted();
    }
}

#[test]
fn test_rooted_instances_are_shared_by_children() {
    let _tracing = TestTracing::init();

    let root = Setup::new().spec_of::<RootedService>().context().unwrap();
    let left = root.new_child().unwrap();
    let right = root.new_child().unwrap();

    let from_left = api::resolve::<RootedService>(&*left).unwrap().wait().unwrap().unwrap();
    let from_right = api::resolve::<RootedService>(&*right).unwrap().wait().unwrap().unwrap();

    assert!(Arc::ptr_eq(&from_left, &from_right));
    assert!(Arc::ptr_eq(&from_left.context().unwrap(), &root));

    root.end(EndReason::Requested);
    assert!(from_left.context().is_none());
}

// ---------------------------------------------------------------------------
// Provides inference
// ---------------------------------------------------------------------------

struct MultiProvider {
    foo: Arc<Foo>,
    bar: Arc<Bar>,
}

impl MultiProvider {
    fn new(count: usize) -> Self {
        Self {
            foo: Arc::new(Foo::with_count(count)),
            bar: Arc::new(Bar::default()),
        }
    }
}

impl Describe for MultiProvider {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.provides::<Foo, _, _, _>("provide_foo", |h: &MultiProvider, (), _ctx| Arc::clone(&h.foo));
        d.provides::<Bar, _, _, _>("provide_bar", |h: &MultiProvider, (), _ctx| Arc::clone(&h.bar));
        d.constructor(|(): ()| MultiProvider::new(0));
    }
}

#[test]
fn test_resolve_all_combines_explicit_and_inferred_providers() {
    let _tracing = TestTracing::init();

    let explicit = Arc::new(MultiProvider::new(1));
    let handler = Setup::new()
        .instance(Arc::clone(&explicit))
        .spec_of::<MultiProvider>()
        .handler()
        .unwrap();

    let foos = api::resolve_all::<Foo>(&*handler).unwrap().wait().unwrap();
    assert_eq!(foos.len(), 2);
    assert!(Arc::ptr_eq(&foos[0], &explicit.foo));
    assert_eq!(foos[1].count(), 0);

    let bars = api::resolve_all::<Bar>(&*handler).unwrap().wait().unwrap();
    assert_eq!(bars.len(), 2);
}

// ---------------------------------------------------------------------------
// Promise handler
// ---------------------------------------------------------------------------

struct SimpleAsyncHandler;

impl Describe for SimpleAsyncHandler {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("handle_bar", |_: &SimpleAsyncHandler, bar: Arc<Bar>, (), _ctx| {
            let delay = Duration::from_millis(bar.count() as u64 + 1);
            Promise::delay(delay).then(move |()| {
                bar.inc();
                bar
            })
        });
    }
}

#[test]
fn test_execute_returns_pending_promise() {
    let _tracing = TestTracing::init();

    let handler = Setup::new().instance(Arc::new(SimpleAsyncHandler)).handler().unwrap();
    let bar = Arc::new(Bar::default());

    let reply = api::execute::<Bar, Bar>(&*handler, Arc::clone(&bar)).unwrap();
    assert!(reply.is_pending());

    let resolved = reply.wait().unwrap().unwrap();
    assert!(Arc::ptr_eq(&resolved, &bar));
    assert_eq!(resolved.count(), 1);
}

#[test]
fn test_values_stored_in_context_are_provided() {
    let context = Context::new();
    context.store_value(Value::new(7_u16));
    let value = api::resolve::<u16>(&*context).unwrap().wait().unwrap();
    assert_eq!(value.as_deref(), Some(&7));
}
