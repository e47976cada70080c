use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::info;
use thiserror::Error;

pub const DEFAULT_LANGUAGE: &str = "English";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt template '{0}' not found")]
    TemplateNotFound(String),
    #[error("Prompt file IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Prompt JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Preset instruction templates, keyed by name.
///
/// `{text}` is replaced by the caller's text and `{language}` by the target language.
#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let templates = [
            ("summarize", "Summarize the following text in at most 200 words:\n\n{text}"),
            (
                "translate",
                "Translate the following text into {language}. Reply with the translation only:\n\n{text}",
            ),
            ("explain", "Explain what the following does, step by step:\n\n{text}"),
            (
                "extract_code",
                "Extract every code fragment from the text below. Return only code, separating fragments with a line containing '---'.\n\nText:\n{text}",
            ),
            (
                "sentiment",
                "Analyse the sentiment of the text below. Reply with JSON only, with the fields sentiment (positive/negative/neutral), score (0-1) and emotions (list).\n\nText:\n{text}",
            ),
        ]
            .into_iter()
            .map(|(name, template)| (name.to_string(), template.to_string()))
            .collect();

        Self { templates }
    }
}

impl PromptConfig {
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn render(
        &self,
        name: &str,
        text: &str,
        language: Option<&str>
    ) -> Result<String, PromptError> {
        let template = self.templates
            .get(name)
            .ok_or_else(|| PromptError::TemplateNotFound(name.to_string()))?;

        Ok(
            template
                .replace("{language}", language.unwrap_or(DEFAULT_LANGUAGE))
                .replace("{text}", text)
        )
    }
}

/// Loads presets from `path` on top of the built-in set.
pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(path.as_ref())?;
    let overrides: PromptConfig = serde_json::from_str(&file_content)?;

    let mut config = PromptConfig::default();
    let count = overrides.templates.len();
    config.templates.extend(overrides.templates);
    info!("Loaded {} prompt template(s) from {}", count, path.as_ref().display());

    Ok(Arc::new(config))
}

pub fn load_prompts_or_default(path: Option<&str>) -> Result<Arc<PromptConfig>, PromptError> {
    match path {
        Some(p) => load_prompts(p),
        None => Ok(Arc::new(PromptConfig::default())),
    }
}
