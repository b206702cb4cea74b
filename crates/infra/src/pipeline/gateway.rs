//! The single place generator calls go through.
//!
//! Checks the shared rate-limit window first, bounds the call with a timeout,
//! classifies failures and records new windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use coursegen_ai::{
    ContentGenerator, ErrorClass, ErrorClassifier, GenerationRequest, InteractionType, ModelRoute,
    UpstreamError,
};

use crate::error::{RateLimitCondition, StageError};
use crate::rate_limit::RateLimitStore;

/// Which (provider, model) each interaction type is sent to.
#[derive(Debug, Clone)]
pub struct ModelRoutes {
    default: ModelRoute,
    overrides: HashMap<InteractionType, ModelRoute>,
}

impl ModelRoutes {
    pub fn new(default: ModelRoute) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_route(mut self, interaction: InteractionType, route: ModelRoute) -> Self {
        self.overrides.insert(interaction, route);
        self
    }

    pub fn route_for(&self, interaction: InteractionType) -> &ModelRoute {
        self.overrides.get(&interaction).unwrap_or(&self.default)
    }
}

#[derive(Clone)]
pub struct GenerationGateway {
    generator: Arc<dyn ContentGenerator>,
    classifier: ErrorClassifier,
    rate_limits: RateLimitStore,
    routes: ModelRoutes,
    timeout: Duration,
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("routes", &self.routes)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GenerationGateway {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        rate_limits: RateLimitStore,
        routes: ModelRoutes,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            classifier: ErrorClassifier::default(),
            rate_limits,
            routes,
            timeout,
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn routes(&self) -> &ModelRoutes {
        &self.routes
    }

    /// Call the generator for `interaction`.
    ///
    /// Returns `RateLimited` without calling upstream while the route's window
    /// is open. Any unclassified failure, including a timeout, is terminal.
    pub async fn generate(
        &self,
        interaction: InteractionType,
        prompt: String,
        context: &[(&str, &str)],
    ) -> Result<String, StageError> {
        let route = self.routes.route_for(interaction).clone();

        let window = self.rate_limits.check(&route.provider, &route.model).await;
        if window.is_rate_limited {
            debug!(
                provider = %route.provider,
                model = %route.model,
                seconds_remaining = window.seconds_remaining,
                "rate-limit window open, skipping call"
            );
            return Err(StageError::RateLimited(RateLimitCondition {
                route,
                retry_after_secs: window.seconds_remaining,
                suppressed: true,
            }));
        }

        let mut request = GenerationRequest::new(interaction, route.clone(), prompt);
        for (key, value) in context {
            request = request.with_context(*key, *value);
        }

        let result = match tokio::time::timeout(self.timeout, self.generator.generate(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::timeout(format!(
                "no response after {}s",
                self.timeout.as_secs()
            ))),
        };

        let err = match result {
            Ok(text) => return Ok(text),
            Err(err) => err,
        };

        match self.classifier.classify(&err, &route.provider) {
            ErrorClass::RateLimited { retry_after } => {
                let retry_after = retry_after.map(|hint| self.rate_limits.window_secs(Some(hint)));
                info!(
                    provider = %route.provider,
                    model = %route.model,
                    interaction = %interaction,
                    retry_after = retry_after,
                    error = %err,
                    "upstream rate limit"
                );
                self.rate_limits
                    .set(&route.provider, &route.model, retry_after)
                    .await;
                Err(StageError::RateLimited(RateLimitCondition {
                    route,
                    retry_after_secs: retry_after,
                    suppressed: false,
                }))
            }
            ErrorClass::Terminal => {
                warn!(
                    provider = %route.provider,
                    model = %route.model,
                    interaction = %interaction,
                    error = %err,
                    "generation failed"
                );
                Err(StageError::Generation(err.to_string()))
            }
        }
    }
}
