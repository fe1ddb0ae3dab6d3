//! Protocol conversion and credential failover for the Switchyard gateway
//!
//! Clients speak `OpenAI` Chat Completions, `OpenAI` Responses, Anthropic
//! Messages or Gemini; providers are `OpenAI`, Claude, Gemini, Grok and Kiro.
//! Every exchange passes through one canonical model, is routed to a primary
//! provider and walks that provider's credential pool and fallback chain.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod convert;
pub mod dispatch;
pub mod error;
pub mod exchange;
#[cfg(feature = "http")]
pub mod handler;
pub mod observer;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod refresh;
pub mod registry;
pub mod routing;
pub mod state;
pub mod thinking;
pub mod transport;
pub mod types;

pub use dispatch::{CanonicalStream, DispatchPolicy, FallbackRouter};
pub use error::{ErrorKind, GatewayError, ProviderError};
pub use exchange::{ExchangeContext, ExchangeOutput};
#[cfg(feature = "http")]
pub use handler::gateway_router;
pub use observer::{CaptureObserver, NoopObserver, Observer};
pub use pool::{CredentialLease, CredentialRecord, PoolManager, ProviderPool};
pub use state::GatewayState;
pub use types::{CompletionRequest, CompletionResponse, StreamEvent};
