#![deny(unsafe_code)]

use std::sync::Arc;

mod gemini;
mod provider;
mod rig_adapter;

pub use gemini::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, GEMINI_PROVIDER_ID, GeminiProvider};
pub use provider::{
    LlmProvider, ProviderConfig, ProviderError, ProviderEvent, ProviderEventStream,
    ProviderResult, ProviderStreamHandle, ProviderWorker, SYSTEM_INSTRUCTION, StreamFailure,
    StreamRequest, make_event_stream,
};
pub use rig_adapter::{DEFAULT_OPENAI_MODEL, RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};

/// Builds the stream source named by `config.provider_id`, defaulting to Gemini.
pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.is_empty() {
        config.provider_id = GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" => {
            config.provider_id = GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(GeminiProvider::new(config)?))
        }
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
