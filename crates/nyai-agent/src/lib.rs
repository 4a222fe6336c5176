pub mod anthropic;
pub mod autorag;
pub mod ollama;

pub use anthropic::AnthropicBackend;
pub use autorag::AutoRagClient;
pub use ollama::OllamaBackend;
