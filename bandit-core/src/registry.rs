//! Capability registry
//!
//! String-keyed tables of scorer factories and content-type codecs, filled
//! once at startup and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{
    APPLICATION_JSON, APPLICATION_JSONLINES, JsonCodec, JsonLinesCodec, RequestDecoder,
    ResponseEncoder,
};
use crate::error::{CodecError, RegistryError};
use crate::scorer::{MockScorerFactory, ScorerFactory, VwConfig, VwScorerFactory};

/// Actions scored by the `mock` scorer when the artifact does not say
const MOCK_DEFAULT_ACTIONS: usize = 2;

#[derive(Default)]
pub struct CapabilityRegistry {
    scorers: HashMap<String, Arc<dyn ScorerFactory>>,
    decoders: HashMap<String, Arc<dyn RequestDecoder>>,
    encoders: HashMap<String, Arc<dyn ResponseEncoder>>,
}

impl CapabilityRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in scorers (`vw`, `mock`) and JSON codecs
    #[must_use]
    pub fn with_defaults(vw: VwConfig) -> Self {
        Self::new()
            .with_scorer("vw", Arc::new(VwScorerFactory::new(vw)))
            .with_scorer("mock", Arc::new(MockScorerFactory::new(MOCK_DEFAULT_ACTIONS)))
            .with_decoder(APPLICATION_JSON, Arc::new(JsonCodec))
            .with_decoder(APPLICATION_JSONLINES, Arc::new(JsonLinesCodec))
            .with_encoder(APPLICATION_JSON, Arc::new(JsonCodec))
            .with_encoder(APPLICATION_JSONLINES, Arc::new(JsonLinesCodec))
    }

    #[must_use]
    pub fn with_scorer(mut self, name: impl Into<String>, factory: Arc<dyn ScorerFactory>) -> Self {
        self.scorers.insert(name.into(), factory);
        self
    }

    #[must_use]
    pub fn with_decoder(
        mut self,
        content_type: impl Into<String>,
        decoder: Arc<dyn RequestDecoder>,
    ) -> Self {
        self.decoders.insert(content_type.into(), decoder);
        self
    }

    #[must_use]
    pub fn with_encoder(
        mut self,
        content_type: impl Into<String>,
        encoder: Arc<dyn ResponseEncoder>,
    ) -> Self {
        self.encoders.insert(content_type.into(), encoder);
        self
    }

    pub fn scorer(&self, name: &str) -> Result<Arc<dyn ScorerFactory>, RegistryError> {
        self.scorers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownScorer(name.to_string()))
    }

    pub fn decoder(&self, content_type: &str) -> Result<Arc<dyn RequestDecoder>, CodecError> {
        self.decoders
            .get(content_type)
            .cloned()
            .ok_or_else(|| CodecError::UnsupportedContentType(content_type.to_string()))
    }

    pub fn encoder(&self, content_type: &str) -> Result<Arc<dyn ResponseEncoder>, CodecError> {
        self.encoders
            .get(content_type)
            .cloned()
            .ok_or_else(|| CodecError::UnsupportedContentType(content_type.to_string()))
    }

    /// Names of every registered scorer, sorted
    pub fn scorer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scorers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
