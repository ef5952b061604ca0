//! Persona
//!
//! Read-only provider of the compiled persona prompt. Loaded once from a TOML
//! file (or the built-in neutral persona) and never mutated at runtime.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

const DEFAULT_MAX_POST_CHARS: usize = 280;

/// Persona definition as written in `persona.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaDefinition {
    pub name: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub bio: String,
    /// Voice rules, one per entry
    #[serde(default)]
    pub voice: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Phrases the persona must never use (also fed to moderation)
    #[serde(default)]
    pub banned_phrases: Vec<String>,
    #[serde(default)]
    pub max_post_chars: Option<usize>,
}

/// Compiled persona
#[derive(Debug, Clone)]
pub struct Persona {
    pub definition: PersonaDefinition,
    compiled_prompt: String,
}

impl Persona {
    /// Load and compile from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file {}", path.display()))?;
        let persona = Self::from_toml(&raw)?;
        info!("Loaded persona '{}' from {}", persona.definition.name, path.display());
        Ok(persona)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let definition: PersonaDefinition = toml::from_str(raw).context("Invalid persona TOML")?;
        Ok(Self::compile(definition))
    }

    /// Neutral persona used when no file is configured
    pub fn neutral(handle: &str) -> Self {
        Self::compile(PersonaDefinition {
            name: handle.to_string(),
            handle: Some(handle.to_string()),
            bio: "A thoughtful account that shares short observations.".to_string(),
            voice: vec![
                "Plain, friendly language".to_string(),
                "No financial advice".to_string(),
            ],
            topics: vec![],
            banned_phrases: vec![],
            max_post_chars: None,
        })
    }

    fn compile(definition: PersonaDefinition) -> Self {
        let mut prompt = format!("You are {}, posting on a social network.", definition.name);
        if !definition.bio.is_empty() {
            prompt.push_str(&format!("\n\nAbout you: {}", definition.bio));
        }
        if !definition.voice.is_empty() {
            prompt.push_str("\n\nVoice:");
            for rule in &definition.voice {
                prompt.push_str(&format!("\n- {}", rule));
            }
        }
        if !definition.topics.is_empty() {
            prompt.push_str(&format!("\n\nTopics you care about: {}", definition.topics.join(", ")));
        }
        if !definition.banned_phrases.is_empty() {
            prompt.push_str(&format!("\n\nNever say: {}", definition.banned_phrases.join(", ")));
        }
        let max = definition.max_post_chars.unwrap_or(DEFAULT_MAX_POST_CHARS);
        prompt.push_str(&format!(
            "\n\nWrite at most {} characters. Output only the post text, no quotes or commentary.",
            max
        ));

        Self {
            definition,
            compiled_prompt: prompt,
        }
    }

    /// System prompt for generation
    pub fn compiled_prompt(&self) -> &str {
        &self.compiled_prompt
    }

    pub fn max_post_chars(&self) -> usize {
        self.definition.max_post_chars.unwrap_or(DEFAULT_MAX_POST_CHARS)
    }

    pub fn banned_phrases(&self) -> &[String] {
        &self.definition.banned_phrases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_from_toml() {
        let persona = Persona::from_toml(
            r#"
            name = "Nova"
            bio = "Onchain researcher"
            voice = ["lowercase", "dry humor"]
            topics = ["defi", "l2s"]
            banned_phrases = ["guaranteed returns"]
            max_post_chars = 200
            "#,
        )
        .unwrap();

        let prompt = persona.compiled_prompt();
        assert!(prompt.contains("You are Nova"));
        assert!(prompt.contains("- dry humor"));
        assert!(prompt.contains("defi, l2s"));
        assert!(prompt.contains("at most 200 characters"));
        assert_eq!(persona.banned_phrases(), ["guaranteed returns".to_string()]);
    }

    #[test]
    fn test_neutral_defaults() {
        let persona = Persona::neutral("bot");
        assert_eq!(persona.max_post_chars(), 280);
        assert!(persona.compiled_prompt().contains("You are bot"));
    }

    #[test]
    fn test_missing_name_rejected() {
        assert!(Persona::from_toml("bio = \"x\"").is_err());
    }
}
