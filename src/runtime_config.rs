//! # Runtime Configuration Module
//!
//! The runtime configuration module provides environment variable-based configuration
//! for callweave's runtime behavior.
//!
//! ## Overview
//!
//! This module loads configuration from environment variables that affect:
//! - Stack sizes of the coroutines that run promise executors
//! - The maximum depth of nested `Provides` resolutions
//! - Diagnostic logging of compiled bindings
//!
//! ## Environment Variables
//!
//! ### `CALLWEAVE_STACK_SIZE`
//!
//! Sets the stack size for promise executor coroutines. Accepts values in:
//! - Decimal: `65536` (64 KB)
//! - Hexadecimal: `0x10000` (64 KB)
//!
//! Default: `0x10000` (64 KB)
//!
//! Executors frequently dispatch nested callbacks, so the default is larger than
//! a bare coroutine needs.
//!
//! ### `CALLWEAVE_MAX_DISPATCH_DEPTH`
//!
//! Maximum number of nested `Provides` resolutions along one dependency chain.
//! Resolutions deeper than this decline instead of recursing. Default: `256`.
//!
//! ### `CALLWEAVE_LOG_BINDINGS`
//!
//! When `1` or `true`, every compiled binding is logged at `debug` level when a
//! descriptor is registered. Default: off.
//!
//! ## Usage
//!
//! ```rust
//! use callweave::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```
//!
//! ## Example Configuration
//!
//! ```bash
//! # Set executor stack size to 128 KB
//! export CALLWEAVE_STACK_SIZE=0x20000
//!
//! # Allow deeper dependency graphs
//! export CALLWEAVE_MAX_DISPATCH_DEPTH=512
//! ```

use once_cell::sync::Lazy;
use std::env;

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_MAX_DISPATCH_DEPTH: usize = 256;

static GLOBAL: Lazy<RuntimeConfig> = Lazy::new(RuntimeConfig::from_env);

/// Runtime configuration loaded from environment variables.
///
/// Load this at startup using [`RuntimeConfig::from_env()`], or use
/// [`RuntimeConfig::global()`] for the lazily loaded process-wide copy.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for promise executor coroutines in bytes (default: 64 KB / 0x10000)
    pub stack_size: usize,
    /// Maximum nested `Provides` depth (default: 256)
    pub max_dispatch_depth: usize,
    /// Log each compiled binding at registration
    pub log_bindings: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
            log_bindings: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = match env::var("CALLWEAVE_STACK_SIZE") {
            Ok(val) => parse_size(&val).unwrap_or(DEFAULT_STACK_SIZE),
            Err(_) => DEFAULT_STACK_SIZE,
        };
        let max_dispatch_depth = match env::var("CALLWEAVE_MAX_DISPATCH_DEPTH") {
            Ok(val) => parse_size(&val)
                .filter(|depth| *depth > 0)
                .unwrap_or(DEFAULT_MAX_DISPATCH_DEPTH),
            Err(_) => DEFAULT_MAX_DISPATCH_DEPTH,
        };
        let log_bindings = env::var("CALLWEAVE_LOG_BINDINGS")
            .map(|val| matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        RuntimeConfig {
            stack_size,
            max_dispatch_depth,
            log_bindings,
        }
    }

    /// Process-wide configuration, read from the environment on first use.
    #[must_use]
    pub fn global() -> &'static RuntimeConfig {
        &GLOBAL
    }
}

fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    if let Some(hex) = val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}
