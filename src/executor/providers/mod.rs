pub mod anthropic;
pub mod antigravity;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use antigravity::AntigravityAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
