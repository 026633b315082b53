//! Ready-made [`Feature`]s installing cross-cutting filters.
//!
//! ```rust,ignore
//! let handler = Setup::new()
//!     .feature(LoggingFeature.into())
//!     .feature(ValidationFeature::new().validate_output().into())
//!     .spec_of::<Orders>()
//!     .handler()?;
//! ```
//!
//! Both features install once per setup however often they are added.

use crate::error::Error;
use crate::filter::{FilterProvider, TracingProvider, ValidationProvider};
use crate::setup::{Feature, Setup};
use std::sync::Arc;

/// Traces every `Handles` binding at the logging stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFeature;

impl From<LoggingFeature> for Arc<dyn Feature> {
    fn from(feature: LoggingFeature) -> Self {
        Arc::new(feature)
    }
}

impl Feature for LoggingFeature {
    fn install(&self, setup: &mut Setup) -> Result<(), Error> {
        if setup.tag::<LoggingFeature>() {
            let provider: Arc<dyn FilterProvider> = Arc::new(TracingProvider::new());
            setup.filters([provider]);
        }
        Ok(())
    }
}

/// Validates commands before their `Handles` bindings run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationFeature {
    output: bool,
}

impl ValidationFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also validate the first result of each binding.
    #[must_use]
    pub fn validate_output(mut self) -> Self {
        self.output = true;
        self
    }
}

impl Feature for ValidationFeature {
    fn install(&self, setup: &mut Setup) -> Result<(), Error> {
        if setup.tag::<ValidationFeature>() {
            let provider: Arc<dyn FilterProvider> = Arc::new(ValidationProvider::new(self.output));
            setup.filters([provider]);
        }
        Ok(())
    }
}

impl From<ValidationFeature> for Arc<dyn Feature> {
    fn from(feature: ValidationFeature) -> Self {
        Arc::new(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_install_once() {
        let mut setup = Setup::new();
        setup
            .feature(LoggingFeature.into())
            .feature(LoggingFeature.into())
            .feature(ValidationFeature::new().into());
        assert!(setup.handler().is_ok());
        assert!(!setup.tag::<LoggingFeature>());
        assert!(!setup.tag::<ValidationFeature>());
    }
}
