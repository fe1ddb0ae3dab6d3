//! Lookup of protocol converters by protocol and role

use std::sync::Arc;

use indexmap::IndexMap;

use crate::convert::anthropic::AnthropicConverter;
use crate::convert::google::GeminiConverter;
use crate::convert::grok::GrokConverter;
use crate::convert::kiro::KiroConverter;
use crate::convert::openai::OpenAiConverter;
use crate::convert::openai_responses::ResponsesConverter;
use crate::convert::ProtocolConverter;
use crate::error::GatewayError;
use crate::protocol::Protocol;

pub type SharedConverter = Arc<dyn ProtocolConverter>;

/// Converters keyed by the protocol they implement
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: IndexMap<Protocol, SharedConverter>,
}

impl ConverterRegistry {
    /// Registry with no converters
    pub fn empty() -> Self {
        Self {
            converters: IndexMap::new(),
        }
    }

    /// Registry holding every built-in converter
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(OpenAiConverter));
        registry.register(Arc::new(ResponsesConverter));
        registry.register(Arc::new(AnthropicConverter));
        registry.register(Arc::new(GeminiConverter));
        registry.register(Arc::new(GrokConverter));
        registry.register(Arc::new(KiroConverter));
        registry
    }

    /// Add or replace the converter for its protocol
    pub fn register(&mut self, converter: SharedConverter) {
        if let Some(previous) = self.converters.insert(converter.protocol(), converter) {
            tracing::debug!(protocol = %previous.protocol(), "replaced converter");
        }
    }

    pub fn get(&self, protocol: Protocol) -> Option<&SharedConverter> {
        self.converters.get(&protocol)
    }

    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.converters.keys().copied()
    }

    /// Converter that decodes requests arriving in `protocol`
    pub fn client(&self, protocol: Protocol) -> Option<&SharedConverter> {
        self.get(protocol).filter(|converter| converter.roles().serves_client())
    }

    /// Converter that talks to providers speaking `protocol`
    pub fn provider(&self, protocol: Protocol) -> Option<&SharedConverter> {
        self.get(protocol).filter(|converter| converter.roles().serves_provider())
    }

    /// Client and provider converters for one route
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedRoute` when either side has no converter in the
    /// required role.
    pub fn pair(&self, from: Protocol, to: Protocol) -> Result<(SharedConverter, SharedConverter), GatewayError> {
        match (self.client(from), self.provider(to)) {
            (Some(client), Some(provider)) => Ok((Arc::clone(client), Arc::clone(provider))),
            _ => Err(GatewayError::UnsupportedRoute { from, to }),
        }
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConverterRole;

    #[test]
    fn builtin_covers_every_protocol() {
        let registry = ConverterRegistry::builtin();
        let registered: Vec<Protocol> = registry.protocols().collect();
        assert_eq!(registered, Protocol::ALL);
    }

    #[test]
    fn roles_gate_lookups() {
        let registry = ConverterRegistry::builtin();

        assert!(registry.client(Protocol::OpenAiResponses).is_some());
        assert!(registry.provider(Protocol::OpenAiResponses).is_none());
        assert!(registry.client(Protocol::Grok).is_none());
        assert!(registry.provider(Protocol::Kiro).is_some());
        assert_eq!(
            registry.get(Protocol::Anthropic).map(|c| c.roles()),
            Some(ConverterRole::Both)
        );
    }

    #[test]
    fn pairing_a_provider_only_client_fails() {
        let registry = ConverterRegistry::builtin();

        assert!(registry.pair(Protocol::OpenAi, Protocol::Kiro).is_ok());
        assert!(matches!(
            registry.pair(Protocol::Grok, Protocol::OpenAi),
            Err(GatewayError::UnsupportedRoute {
                from: Protocol::Grok,
                to: Protocol::OpenAi
            })
        ));
        assert!(matches!(
            ConverterRegistry::empty().pair(Protocol::OpenAi, Protocol::OpenAi),
            Err(GatewayError::UnsupportedRoute { .. })
        ));
    }
}
