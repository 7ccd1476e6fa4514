use async_trait::async_trait;

use crate::descriptor::GenerationParams;
use crate::errors::GatewayError;
use crate::messages::ChatMessage;
use crate::stream::TokenStream;

/// Abstracts a single streaming call to a language-model backend.
///
/// Implementations must yield fragments in arrival order and close the
/// stream with exactly one terminal event; they never partially return
/// without either completing or failing.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        model: &str,
        transcript: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TokenStream, GatewayError>;
}
