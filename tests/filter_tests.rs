//! Filter pipeline ordering, short-circuiting and skipping
//!
//! # Test Coverage
//!
//! - Filters from bindings, setup and composer options run in ascending order
//! - Aborting prevents the binding and reads as "not handled"
//! - A filter may answer without proceeding
//! - `skip_filters` keeps required providers only; `enable_filters` overrides it
//! - Unsatisfied providers decline, unsatisfied required providers fail
//! - Provider scoping holds for providers installed through options
//! - The validation feature rejects invalid commands and results
//!
//! # Test Strategy
//!
//! Every filter and binding appends to a shared [`Trail`] resolved from the
//! composer, so each test observes the exact execution order.

use callweave::dispatch::Outcome;
use callweave::filter::{filter_fn, FilterInstanceProvider, TracingFilter};
use callweave::descriptor::Binding;
use callweave::features::{LoggingFeature, ValidationFeature};
use callweave::{
    api, Callback, Describe, DescriptorBuilder, Error, Filter, FilterProvider, HandleResult,
    Handler, HandlerExt, InstanceHandler, Key, Next, Setup, Validates, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;

mod tracing_util;
use tracing_util::TestTracing;

#[derive(Default)]
struct Trail(Mutex<Vec<&'static str>>);

impl Trail {
    fn push(&self, step: &'static str) {
        self.0.lock().push(step);
    }

    fn steps(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

fn record(next: &Next<'_>, step: &'static str) {
    if let Ok(Some(trail)) = next.context().resolve::<Trail>() {
        trail.push(step);
    }
}

fn step(order: Option<i32>, name: &'static str) -> Arc<dyn Filter> {
    filter_fn(order, move |next| {
        record(&next, name);
        next.proceed()
    })
}

struct Order;
struct Snack;
struct Guarded;
struct Unsatisfiable;
struct Unavailable;

struct Kitchen;

impl Describe for Kitchen {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("order", |_: &Kitchen, _: Arc<Order>, (trail,): (Arc<Trail>,), _ctx| {
            trail.push("binding");
        })
        .filters(vec![step(Some(20), "declared")]);

        d.handles("snack", |_: &Kitchen, _: Arc<Snack>, (trail,): (Arc<Trail>,), _ctx| {
            trail.push("binding");
        });

        d.handles("guarded", |_: &Kitchen, _: Arc<Guarded>, (trail,): (Arc<Trail>,), _ctx| {
            trail.push("binding");
        })
        .filters(vec![step(Some(20), "declared")])
        .filter(Arc::new(FilterInstanceProvider::required(vec![step(Some(5), "guard")])))
        .skip_filters();

        d.handles("unsatisfiable", |_: &Kitchen, _: Arc<Unsatisfiable>, (), _ctx| {})
            .filter(Arc::new(FilterInstanceProvider::required(Vec::new())));

        d.handles("unavailable", |_: &Kitchen, _: Arc<Unavailable>, (), _ctx| {})
            .filter(Arc::new(FilterInstanceProvider::new(Vec::new())));
    }
}

fn kitchen(trail: &Arc<Trail>) -> Arc<dyn Handler> {
    let handler: Arc<dyn Handler> = Arc::new(InstanceHandler::of(Arc::new(Kitchen)).unwrap());
    handler.with_values(vec![Value::from_arc(Arc::clone(trail))])
}

#[test]
fn test_filters_run_in_ascending_order_across_sources() {
    let _tracing = TestTracing::init();

    let trail = Arc::new(Trail::default());
    let handler = kitchen(&trail).with_filters(vec![
        step(None, "unordered"),
        step(Some(30), "last"),
        step(Some(10), "first"),
        Arc::new(TracingFilter::new()),
    ]);

    api::command(&*handler, Arc::new(Order)).unwrap();
    assert_eq!(
        trail.steps(),
        vec!["first", "declared", "last", "unordered", "binding"]
    );
}

#[test]
fn test_setup_filters_wrap_every_binding() {
    let trail = Arc::new(Trail::default());
    let provider: Arc<dyn FilterProvider> =
        Arc::new(FilterInstanceProvider::new(vec![step(Some(1), "setup")]));
    let handler = Setup::new()
        .instance(Arc::new(Kitchen))
        .with(vec![Value::from_arc(Arc::clone(&trail))])
        .filters([provider])
        .handler()
        .unwrap();

    api::command(&*handler, Arc::new(Order)).unwrap();
    assert_eq!(trail.steps(), vec!["setup", "declared", "binding"]);
}

#[test]
fn test_abort_prevents_the_binding() {
    let trail = Arc::new(Trail::default());
    let bouncer = filter_fn(Some(0), |next| {
        record(&next, "bouncer");
        next.abort()
    });
    let handler = kitchen(&trail).with_filters(vec![bouncer]);

    let err = api::command(&*handler, Arc::new(Order)).unwrap_err();
    assert!(matches!(err, Error::NotHandled(_)), "{err}");
    assert_eq!(trail.steps(), vec!["bouncer"]);
}

#[test]
fn test_filter_may_answer_without_proceeding() {
    let trail = Arc::new(Trail::default());
    let cached = filter_fn(Some(0), |next| {
        record(&next, "cached");
        Ok(Outcome::Result(HandleResult::HANDLED))
    });
    let handler = kitchen(&trail).with_filters(vec![cached]);

    api::command(&*handler, Arc::new(Order)).unwrap();
    assert_eq!(trail.steps(), vec!["cached"]);
}

#[test]
fn test_skip_filters_keeps_required_providers() {
    let _tracing = TestTracing::init();

    let trail = Arc::new(Trail::default());
    api::command(&*kitchen(&trail), Arc::new(Guarded)).unwrap();
    assert_eq!(trail.steps(), vec!["guard", "binding"]);

    let trail = Arc::new(Trail::default());
    api::command(&*kitchen(&trail).enable_filters(), Arc::new(Guarded)).unwrap();
    assert_eq!(trail.steps(), vec!["guard", "declared", "binding"]);

    let trail = Arc::new(Trail::default());
    api::command(&*kitchen(&trail).skip_filters(), Arc::new(Order)).unwrap();
    assert_eq!(trail.steps(), vec!["binding"]);
}

#[test]
fn test_unsatisfied_providers() {
    let trail = Arc::new(Trail::default());
    let handler = kitchen(&trail);

    let err = api::command(&*handler, Arc::new(Unsatisfiable)).unwrap_err();
    assert!(err.to_string().contains("required filter unavailable"), "{err}");

    let err = api::command(&*handler, Arc::new(Unavailable)).unwrap_err();
    assert!(matches!(err, Error::NotHandled(_)), "{err}");
}

/// Supplies its filter only to `Order` commands.
struct OrdersOnly;

impl FilterProvider for OrdersOnly {
    fn applies_to(&self, callback: &dyn Callback) -> bool {
        callback.key() == Key::of::<Order>()
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, Error> {
        Ok(vec![step(Some(1), "orders")])
    }
}

#[test]
fn test_provider_scope_applies_to_option_filters() {
    let trail = Arc::new(Trail::default());
    let provider: Arc<dyn FilterProvider> = Arc::new(OrdersOnly);
    let handler = Setup::new()
        .instance(Arc::new(Kitchen))
        .with(vec![Value::from_arc(Arc::clone(&trail))])
        .filters([provider])
        .handler()
        .unwrap();

    api::command(&*handler, Arc::new(Snack)).unwrap();
    assert_eq!(trail.steps(), vec!["binding"]);

    api::command(&*handler, Arc::new(Order)).unwrap();
    assert_eq!(trail.steps(), vec!["binding", "orders", "declared", "binding"]);
}

struct Bake {
    loaves: u32,
}

#[derive(Default)]
struct Bakery {
    baked: AtomicUsize,
}

impl Describe for Bakery {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("bake", |b: &Bakery, bake: Arc<Bake>, (), _ctx| {
            b.baked.fetch_add(1, Ordering::SeqCst);
            Arc::new(bake.loaves * 2)
        });
        d.validates::<Bake, _, _, _>("loaves", |_: &Bakery, bake: Arc<Bake>, v: &Validates, (), _ctx| {
            if bake.loaves == 0 {
                v.add_error("loaves", "must bake something");
            }
        });
        d.validates::<u32, _, _, _>("oven", |_: &Bakery, total: Arc<u32>, v: &Validates, (), _ctx| {
            if *total > 100 {
                v.add_error("total", "oven too small");
            }
        });
    }
}

#[test]
fn test_validation_feature_checks_commands_and_results() {
    let _tracing = TestTracing::init();

    let bakery = Arc::new(Bakery::default());
    let handler = Setup::new()
        .feature(LoggingFeature.into())
        .feature(ValidationFeature::new().validate_output().into())
        .instance(Arc::clone(&bakery))
        .handler()
        .unwrap();

    let loaves = api::execute::<Bake, u32>(&*handler, Arc::new(Bake { loaves: 4 })).unwrap();
    assert_eq!(*loaves.wait().unwrap().unwrap(), 8);

    let err = api::command(&*handler, Arc::new(Bake { loaves: 0 })).unwrap_err();
    match err {
        Error::Validation(outcome) => {
            assert_eq!(outcome.field_errors("loaves"), vec!["must bake something"]);
        }
        other => panic!("expected validation error, got {other}"),
    }
    assert_eq!(bakery.baked.load(Ordering::SeqCst), 1);

    let err = api::execute::<Bake, u32>(&*handler, Arc::new(Bake { loaves: 60 })).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
    assert_eq!(bakery.baked.load(Ordering::SeqCst), 2);
}
