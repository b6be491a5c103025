use serde::{Deserialize, Serialize};

use crate::gemini::{
    GeminiBlockReason, GeminiCandidate, GeminiFinishReason, GeminiPromptFeedback, GeminiUsage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(rename = "promptFeedback")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(rename = "responseId")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate, untouched.
    ///
    /// `None` when there is no candidate or it carries no text part at all.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let mut texts = content.parts.iter().filter_map(|p| p.answer_text()).peekable();
        texts.peek()?;
        Some(texts.collect())
    }

    pub fn block_reason(&self) -> Option<&GeminiBlockReason> {
        self.prompt_feedback.as_ref()?.block_reason.as_ref()
    }

    pub fn finish_reason(&self) -> Option<&GeminiFinishReason> {
        self.candidates.first()?.finish_reason.as_ref()
    }
}
