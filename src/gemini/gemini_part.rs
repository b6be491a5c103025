use serde::{Deserialize, Serialize};
use crate::gemini::GeminiInlineData;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    // Anything else the model may send back (function calls, code results, ...)
    Other(serde_json::Value),
}

impl GeminiPart {
    pub fn text(text: impl Into<String>) -> Self {
        GeminiPart::Text { text: text.into(), thought: None }
    }

    /// Answer text of this part; thought summaries are not part of the answer.
    pub fn answer_text(&self) -> Option<&str> {
        match self {
            GeminiPart::Text { text, thought } if *thought != Some(true) => Some(text.as_str()),
            _ => None,
        }
    }
}
