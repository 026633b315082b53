use callweave::filter::filter_fn;
use callweave::{api, Describe, DescriptorBuilder, Handler, HandlerExt, InstanceHandler, Setup};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

struct Quote {
    symbol: &'static str,
}

struct Price(u64);

#[derive(Default)]
struct Exchange;

impl Describe for Exchange {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.handles("quote", |_: &Exchange, quote: Arc<Quote>, (), _ctx| {
            Arc::new(Price(quote.symbol.len() as u64 * 100))
        });
        d.default_constructor();
    }
}

#[derive(Default)]
struct Ledger;

impl Describe for Ledger {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.default_constructor().scoped();
    }
}

fn bench_execute_instance(c: &mut Criterion) {
    let handler: Arc<dyn Handler> = Arc::new(InstanceHandler::of(Arc::new(Exchange)).unwrap());
    let quote = Arc::new(Quote { symbol: "ACME" });
    c.bench_function("execute_instance", |b| {
        b.iter(|| {
            let reply = api::execute::<Quote, Price>(&*handler, Arc::clone(&quote)).unwrap();
            black_box(reply);
        })
    });
}

fn bench_execute_inferred(c: &mut Criterion) {
    let handler = Setup::new().spec_of::<Exchange>().handler().unwrap();
    let quote = Arc::new(Quote { symbol: "ACME" });
    c.bench_function("execute_inferred", |b| {
        b.iter(|| {
            let reply = api::execute::<Quote, Price>(&*handler, Arc::clone(&quote)).unwrap();
            black_box(reply);
        })
    });
}

fn bench_execute_filtered(c: &mut Criterion) {
    let filters = (0..4).map(|order| filter_fn(Some(order), |next| next.proceed())).collect();
    let handler = Arc::new(InstanceHandler::of(Arc::new(Exchange)).unwrap()).with_filters(filters);
    let quote = Arc::new(Quote { symbol: "ACME" });
    c.bench_function("execute_four_filters", |b| {
        b.iter(|| {
            let reply = api::execute::<Quote, Price>(&*handler, Arc::clone(&quote)).unwrap();
            black_box(reply);
        })
    });
}

fn bench_resolve_lifestyles(c: &mut Criterion) {
    let handler = Setup::new().spec_of::<Exchange>().handler().unwrap();
    c.bench_function("resolve_singleton", |b| {
        b.iter(|| black_box(api::resolve::<Exchange>(&*handler).unwrap()))
    });

    let root = Setup::new().spec_of::<Ledger>().context().unwrap();
    let child = root.new_child().unwrap();
    c.bench_function("resolve_scoped", |b| {
        b.iter(|| black_box(api::resolve::<Ledger>(&*child).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_execute_instance,
    bench_execute_inferred,
    bench_execute_filtered,
    bench_resolve_lifestyles
);
criterion_main!(benches);
