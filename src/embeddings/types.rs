//! Embedding provider metadata.

use serde::Serialize;

/// Provider metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub dimensions: usize,
    pub max_chars: usize,
}

/// Model configuration with dimensions and max chars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub name: String,
    pub dimensions: usize,
    pub max_chars: usize,
}

/// Known Ollama embedding models.
pub mod ollama_models {
    use super::ModelConfig;

    #[must_use]
    pub fn nomic_embed_text() -> ModelConfig {
        ModelConfig {
            name: "nomic-embed-text".to_string(),
            dimensions: 768,
            max_chars: 5000,
        }
    }

    #[must_use]
    pub fn mxbai_embed_large() -> ModelConfig {
        ModelConfig {
            name: "mxbai-embed-large".to_string(),
            dimensions: 1024,
            max_chars: 1500,
        }
    }

    #[must_use]
    pub fn all_minilm() -> ModelConfig {
        ModelConfig {
            name: "all-minilm".to_string(),
            dimensions: 384,
            max_chars: 800,
        }
    }

    /// Configuration for `model`; unknown models assume 768 dimensions.
    #[must_use]
    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "nomic-embed-text" => nomic_embed_text(),
            "mxbai-embed-large" => mxbai_embed_large(),
            "all-minilm" => all_minilm(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 768,
                max_chars: 2000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_models() {
        assert_eq!(ollama_models::get_config("all-minilm").dimensions, 384);
        let custom = ollama_models::get_config("my-model");
        assert_eq!(custom.name, "my-model");
        assert_eq!(custom.dimensions, 768);
    }
}
