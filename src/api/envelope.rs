//! Picks the provider-native error envelope for a route: OpenAI,
//! Anthropic, and Google each render errors in their own shape.

use crate::error::ErrorNamespace;
use crate::types::Platform;

pub fn namespace_for(platform: Platform) -> ErrorNamespace {
    match platform {
        Platform::Anthropic => ErrorNamespace::Anthropic,
        Platform::OpenAi | Platform::Antigravity => ErrorNamespace::OpenAi,
        Platform::Gemini => ErrorNamespace::Google,
    }
}
