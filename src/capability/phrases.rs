use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;

use super::{Capability, CapabilityError, CapabilityParams};

#[derive(Debug, Deserialize)]
struct PhraseFile {
    #[serde(alias = "frases")]
    phrases: Vec<String>,
}

/// Returns a random phrase from a JSON file, re-read on every call.
#[derive(Debug, Clone)]
pub struct PhrasePicker {
    path: PathBuf,
}

impl PhrasePicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Capability for PhrasePicker {
    fn name(&self) -> &'static str {
        "phrases"
    }

    async fn invoke(&self, _params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("phrase list: {e}")))?;
        let file: PhraseFile = serde_json::from_slice(&bytes)
            .map_err(|e| CapabilityError::Unavailable(format!("phrase list: {e}")))?;

        let phrase = file
            .phrases
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| CapabilityError::Unavailable("phrase list is empty".into()))?;
        // `frase` is the field older clients read.
        Ok(json!({ "phrase": phrase, "frase": phrase }))
    }
}
