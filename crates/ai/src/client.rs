use std::sync::Arc;

use async_trait::async_trait;

use orbitscope_core::JobId;

use crate::prediction::Prediction;
use crate::result::InferenceError;

/// Narrow boundary to the external inference engine.
///
/// One call analyses exactly one job. Implementations must tolerate being
/// called concurrently up to the configured concurrency level; the engine's
/// internals (model execution, image generation) stay opaque.
#[async_trait]
pub trait InferenceClient: Send + Sync + 'static {
    async fn infer(&self, job: &JobId) -> Result<Prediction, InferenceError>;
}

#[async_trait]
impl<C> InferenceClient for Arc<C>
where
    C: InferenceClient + ?Sized,
{
    async fn infer(&self, job: &JobId) -> Result<Prediction, InferenceError> {
        (**self).infer(job).await
    }
}
