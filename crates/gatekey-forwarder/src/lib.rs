mod client;
mod error;
mod family;
mod model;
mod sse;

pub use client::GatewayForwarder;
pub use error::{ForwardError, ForwardResult};
pub use family::{FamilyOps, GeminiFamily, OpenAiFamily};
pub use model::{ForwardRequest, ForwardStream, ProviderFamily, UnaryResponse, UsageTokens};
pub use sse::{SseFrame, SseParser};
