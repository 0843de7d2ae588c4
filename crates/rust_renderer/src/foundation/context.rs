//! Engine context passed to the renderer by reference

use crate::config::RendererConfig;
use crate::error::{ErrorMode, RenderError};

/// Process-level state shared by renderer components
///
/// Owns the configuration and the error escalation mode. Constructing it
/// initialises logging at the configured level.
#[derive(Debug, Clone)]
pub struct EngineContext {
    config: RendererConfig,
}

impl EngineContext {
    /// Create a context and initialise logging
    pub fn new(config: RendererConfig) -> Self {
        super::logging::init_with_level(&config.log_level);
        log::debug!(
            "Engine context created for '{}' (error mode {:?})",
            config.application_name,
            config.error_mode
        );
        Self { config }
    }

    /// Renderer configuration
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Active error escalation mode
    pub const fn error_mode(&self) -> ErrorMode {
        self.config.error_mode
    }

    /// Escalate a fatal error through the configured mode
    #[must_use]
    pub fn escalate(&self, error: RenderError) -> RenderError {
        self.config.error_mode.escalate(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_exposes_config() {
        let context = EngineContext::new(
            RendererConfig::new("context test").with_error_mode(ErrorMode::Raise),
        );
        assert_eq!(context.config().application_name, "context test");
        assert_eq!(context.error_mode(), ErrorMode::Raise);
        let error = context.escalate(RenderError::generic("escalated"));
        assert!(error.to_string().contains("escalated"));
    }
}
