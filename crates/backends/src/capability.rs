//! Capability tags and their resolution to concrete tool names.
//!
//! The engine references tools by logical capability; the mapping to the
//! tool server's actual tool names is loaded from configuration at startup.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::contracts::{BackendError, BackendResult};

/// Logical capability the engine can ask a backend for.
///
/// On the wire a capability is always its bare tag string; unknown tags
/// round-trip through [`Capability::Other`]. Serde impls are hand-written so
/// the `Other` variant serializes identically to the well-known ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    ConversationalResponder,
    Retriever,
    ImageAnalyzer,
    AudioTranscriber,
    Classifier,
    Synthesize,
    /// A tag from configuration the engine has no special handling for
    Other(String),
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Capability::from_tag(&tag))
    }
}

impl Capability {
    /// Stable tag string used in configuration and logs
    pub fn tag(&self) -> &str {
        match self {
            Self::ConversationalResponder => "conversational_responder",
            Self::Retriever => "retriever",
            Self::ImageAnalyzer => "image_analyzer",
            Self::AudioTranscriber => "audio_transcriber",
            Self::Classifier => "classifier",
            Self::Synthesize => "synthesize",
            Self::Other(tag) => tag,
        }
    }

    /// Parse a tag string, mapping unknown tags to [`Capability::Other`]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "conversational_responder" => Self::ConversationalResponder,
            "retriever" => Self::Retriever,
            "image_analyzer" => Self::ImageAnalyzer,
            "audio_transcriber" => Self::AudioTranscriber,
            "classifier" => Self::Classifier,
            "synthesize" => Self::Synthesize,
            other => Self::Other(other.to_string()),
        }
    }

    /// The well-known capabilities in declaration order
    pub fn known() -> &'static [Capability] {
        &[
            Capability::ConversationalResponder,
            Capability::Retriever,
            Capability::ImageAnalyzer,
            Capability::AudioTranscriber,
            Capability::Classifier,
            Capability::Synthesize,
        ]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Capability tag → concrete tool name, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityMap {
    entries: BTreeMap<String, String>,
}

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map where every well-known capability resolves to its own tag.
    /// Useful for tool servers that already speak the logical names.
    pub fn identity() -> Self {
        let mut map = Self::new();
        for cap in Capability::known() {
            map.insert(cap.clone(), cap.tag());
        }
        map
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, capability: Capability, tool_name: &str) {
        self.entries
            .insert(capability.tag().to_string(), tool_name.to_string());
    }

    /// Resolve a capability to the configured tool name.
    pub fn resolve(&self, capability: &Capability) -> BackendResult<&str> {
        self.entries
            .get(capability.tag())
            .map(String::as_str)
            .ok_or_else(|| BackendError::NotFound(capability.tag().to_string()))
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.entries.contains_key(capability.tag())
    }

    /// All configured tags, for status reporting.
    pub fn tags(&self) -> Vec<Capability> {
        self.entries.keys().map(|k| Capability::from_tag(k)).collect()
    }

    pub fn as_table(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for cap in Capability::known() {
            assert_eq!(&Capability::from_tag(cap.tag()), cap);
        }
        assert_eq!(
            Capability::from_tag("weather_oracle"),
            Capability::Other("weather_oracle".into())
        );
    }

    #[test]
    fn test_resolve_known_and_missing() {
        let map = CapabilityMap::from_pairs([
            ("retriever", "rag.search"),
            ("synthesize", "saul.synthesize"),
        ]);

        assert_eq!(map.resolve(&Capability::Retriever).unwrap(), "rag.search");
        let missing = map.resolve(&Capability::ImageAnalyzer);
        assert!(matches!(missing, Err(BackendError::NotFound(_))));
    }

    #[test]
    fn test_identity_covers_known() {
        let map = CapabilityMap::identity();
        for cap in Capability::known() {
            assert_eq!(map.resolve(cap).unwrap(), cap.tag());
        }
    }

    #[test]
    fn test_serde_shape_is_flat_table() {
        let map = CapabilityMap::from_pairs([("retriever", "rag.search")]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["entries"]["retriever"], "rag.search");
    }

    #[test]
    fn test_capability_serializes_as_bare_tag() {
        let json = serde_json::to_value(&Capability::Retriever).unwrap();
        assert_eq!(json, "retriever");

        let json = serde_json::to_value(&Capability::Other("weather_oracle".into())).unwrap();
        assert_eq!(json, "weather_oracle");
    }

    #[test]
    fn test_capability_serde_roundtrip() {
        for cap in [
            Capability::ConversationalResponder,
            Capability::Synthesize,
            Capability::Other("weather_oracle".into()),
        ] {
            let json = serde_json::to_string(&cap).unwrap();
            let back: Capability = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cap);
        }

        // an unknown tag lands in Other rather than failing
        let parsed: Capability = serde_json::from_str("\"brand_new_tag\"").unwrap();
        assert_eq!(parsed, Capability::Other("brand_new_tag".into()));
    }
}
