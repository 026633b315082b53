//! # callweave
//!
//! **callweave** is a capability-oriented, in-process callback dispatch
//! engine. Callbacks (commands, provisioning requests, creations, mappings
//! and validations) are routed through a composed graph of handlers whose
//! bindings are declared once per handler type, wrapped by an ordered
//! filter pipeline and cached by lifestyles scoped to a context graph.
//!
//! ## Overview
//!
//! A handler type describes its bindings with [`Describe`]:
//!
//! ```rust
//! use callweave::{api, Describe, DescriptorBuilder, Setup};
//! use std::sync::Arc;
//!
//! struct Greet(String);
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! impl Describe for Greeter {
//!     fn describe(d: &mut DescriptorBuilder<Self>) {
//!         d.handles("greet", |_: &Greeter, greet: Arc<Greet>, (), _ctx| {
//!             Arc::new(format!("hello {}", greet.0))
//!         });
//!         d.default_constructor();
//!     }
//! }
//!
//! let handler = Setup::new().spec_of::<Greeter>().handler().unwrap();
//! let reply = api::execute::<Greet, String>(&*handler, Arc::new(Greet("bob".into()))).unwrap();
//! assert_eq!(*reply.wait().unwrap().unwrap(), "hello bob");
//! ```
//!
//! ## Architecture
//!
//! - **[`policy`]** - the five dispatch policies and their key variance
//! - **[`descriptor`]** - the builder DSL and the registry of compiled descriptors
//! - **[`callback`]** - `Handles`, `Provides`, `Creates`, `Maps`, `Validates`
//! - **[`dispatch`]** - invocation context, dependency extraction, binding outcomes
//! - **[`filter`]** - ordered middleware around every binding
//! - **[`handler`]** - handler building blocks and composer decorators
//! - **[`inference`]** - serves callbacks for handler types without instances
//! - **[`lifestyle`]** - singleton, scoped and rooted caching of provided instances
//! - **[`context`]** - the context graph, its lifecycle and traversal axes
//! - **[`promise`]** - coroutine backed promises for asynchronous results
//! - **[`setup`]** - assembles a handler chain from specs and features
//! - **[`features`]** - logging and validation features
//! - **[`api`]** - one call per common callback shape
//!
//! ### Dispatch Flow
//!
//! ```text
//! api::execute ──► composer chain ──► Handlers
//!                                      ├─ InstanceHandler ──► descriptor.dispatch
//!                                      └─ InferenceHandler ─► resolve instances ──► descriptor.dispatch
//!                                                                                     │
//!                     filters (ascending order) ──► lifestyle ──► binding ◄───────────┘
//! ```
//!
//! ## Concurrency
//!
//! Everything is `Send + Sync`. Descriptor registration and lifestyle caches
//! are copy-on-write behind [`arc_swap`]; contexts use `parking_lot` locks.
//! Promise executors run on `may` coroutines sized by
//! [`runtime_config::RuntimeConfig`].

pub mod api;
pub mod callback;
pub mod constraint;
pub mod context;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod filter;
pub mod handle_result;
pub mod handler;
pub mod ids;
pub mod inference;
pub mod lifestyle;
pub mod logging;
pub mod options;
pub mod policy;
pub mod promise;
pub mod runtime_config;
pub mod setup;
pub mod tags;
pub mod types;
pub mod value;

pub use callback::{Callback, Creates, Handles, Maps, Provides, Reply, ValidationOutcome, Validates};
pub use constraint::{Constraint, ConstraintSet};
pub use context::{Axis, Context, EndReason};
pub use descriptor::{Describe, DescriptorBuilder, FuncSpec, HandlerDescriptorFactory, HandlerSpec};
pub use dispatch::{Cascade, HandleContext, Optional, SideEffect, SideEffects, Strict};
pub use error::Error;
pub use filter::{Filter, FilterOptions, FilterProvider, Next};
pub use handle_result::HandleResult;
pub use handler::{Handler, HandlerExt, Handlers, InstanceHandler};
pub use inference::InferenceHandler;
pub use lifestyle::{Contextual, ContextualBase, Disposable};
pub use options::CallbackSemantics;
pub use promise::Promise;
pub use setup::{Feature, Setup};
pub use types::{Keyed, TypeKey};
pub use value::{Key, Value};
