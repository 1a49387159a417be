//! Incoming query model.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Input modality of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Mixed,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Kind of an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
}

/// A reference to out-of-band media accompanying the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
}

/// Per-query knobs; unset fields fall back to configuration defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    pub quality_threshold: Option<f64>,
    pub max_iterations: Option<u32>,
    pub strategy_hint: Option<String>,
    #[serde(default = "default_true")]
    pub allow_ensemble: bool,
    #[serde(default)]
    pub consensus_required: bool,
}

fn default_true() -> bool {
    true
}

/// A single incoming query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl Query {
    pub fn new(text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            attachments: Vec::new(),
            user_id: None,
            session_id: None,
            options: QueryOptions {
                allow_ensemble: true,
                ..Default::default()
            },
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_attachment(mut self, kind: AttachmentKind, url: &str) -> Self {
        self.attachments.push(Attachment { kind, url: url.to_string() });
        self
    }

    /// Modality derived from the attachments present
    pub fn modality(&self) -> Modality {
        let has_image = self
            .attachments
            .iter()
            .any(|a| a.kind == AttachmentKind::Image);
        let has_audio = self
            .attachments
            .iter()
            .any(|a| a.kind == AttachmentKind::Audio);

        match (has_image, has_audio) {
            (true, true) => Modality::Mixed,
            (true, false) => Modality::Image,
            (false, true) => Modality::Audio,
            (false, false) => Modality::Text,
        }
    }

    /// The session key used for memory scoping; anonymous queries share one.
    pub fn session_key(&self) -> &str {
        self.session_id.as_deref().unwrap_or("anonymous")
    }

    /// Validate caller-controlled fields.
    pub fn validate(&self) -> CoreResult<()> {
        if self.text.trim().is_empty() {
            return Err(CoreError::invalid_input("query text is empty"));
        }
        if let Some(q) = self.options.quality_threshold {
            if !(0.0..=1.0).contains(&q) {
                return Err(CoreError::invalid_input(format!(
                    "quality_threshold {q} outside [0, 1]"
                )));
            }
        }
        if let Some(iters) = self.options.max_iterations {
            if !(1..=10).contains(&iters) {
                return Err(CoreError::invalid_input(format!(
                    "max_iterations {iters} outside [1, 10]"
                )));
            }
        }
        Ok(())
    }
}
