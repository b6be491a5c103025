use serde::{Deserialize, Serialize};

use crate::gemini::{GeminiContent, GeminiGenerationConfig, GeminiInlineData, GeminiPart};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

impl GeminiRequest {
    /// One `user` turn with the parts in wire order: instruction, question, image.
    pub fn extraction(instruction: &str, question: &str, image: GeminiInlineData) -> Self {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![
                    GeminiPart::text(instruction),
                    GeminiPart::text(question),
                    GeminiPart::InlineData { inline_data: image },
                ],
            }],
            generation_config: None,
        }
    }

    pub fn with_generation_config(mut self, config: GeminiGenerationConfig) -> Self {
        if !config.is_empty() {
            self.generation_config = Some(config);
        }
        self
    }

    /// Size of the inline payload, for logging without dumping the image.
    pub fn inline_data_len(&self) -> usize {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .map(|p| match p {
                GeminiPart::InlineData { inline_data } => inline_data.data.len(),
                _ => 0,
            })
            .sum()
    }
}
