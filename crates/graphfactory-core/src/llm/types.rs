//! Prompt and completion types, plus the chat-completions wire format

use serde::{Deserialize, Serialize};

/// What shape the caller expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFormat {
    /// Free prose, e.g. a research brief
    #[default]
    Prose,
    /// A single JSON object; providers that support it are put in JSON mode
    JsonObject,
}

/// A two-message prompt: standing instructions plus the task at hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub format: ReplyFormat,
}

impl Prompt {
    pub fn prose(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            format: ReplyFormat::Prose,
        }
    }

    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            format: ReplyFormat::JsonObject,
            ..Self::prose(system, user)
        }
    }
}

/// Text produced by whichever model answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub tokens: u32,
    /// The provider stopped at the token limit
    pub truncated: bool,
}

impl Completion {
    /// A completion that never touched the network
    pub fn scripted(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            tokens: 0,
            truncated: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Request body for `POST {base_url}/chat/completions`
#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    pub model: &'a str,
    pub messages: [WireMessage<'a>; 2],
    pub temperature: f32,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<WireResponseFormat>,
}

impl<'a> WireRequest<'a> {
    pub fn new(model: &'a str, prompt: &'a Prompt, temperature: f32, max_tokens: usize) -> Self {
        let response_format = match prompt.format {
            ReplyFormat::JsonObject => Some(WireResponseFormat { kind: "json_object" }),
            ReplyFormat::Prose => None,
        };
        Self {
            model,
            messages: [
                WireMessage {
                    role: "system",
                    content: &prompt.system,
                },
                WireMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature,
            max_tokens,
            response_format,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireReply {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChoice {
    pub message: WireReply,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

impl WireResponse {
    /// First choice as a completion; `None` when the provider sent no choices.
    /// `requested` names the model when the provider omits it.
    pub fn into_completion(self, requested: &str) -> Option<Completion> {
        let choice = self.choices.into_iter().next()?;
        let model = if self.model.is_empty() {
            requested.to_string()
        } else {
            self.model
        };
        Some(Completion {
            text: choice.message.content.unwrap_or_default(),
            model,
            tokens: self.usage.map_or(0, |u| u.total_tokens),
            truncated: choice.finish_reason.as_deref() == Some("length"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_prompt_requests_json_mode() {
        let prompt = Prompt::json("sys", "extract this");
        let body = serde_json::to_value(WireRequest::new("m", &prompt, 0.2, 512)).unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "extract this");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn test_prose_prompt_omits_response_format() {
        let prompt = Prompt::prose("sys", "research this");
        let body = serde_json::to_value(WireRequest::new("m", &prompt, 0.2, 512)).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_truncated_reply() {
        let raw = r#"{
            "model": "provider/model",
            "choices": [{"message": {"role": "assistant", "content": "{\"nodes\": ["}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let completion = serde_json::from_str::<WireResponse>(raw)
            .unwrap()
            .into_completion("requested/model")
            .unwrap();

        assert!(completion.truncated);
        assert_eq!(completion.tokens, 15);
        assert_eq!(completion.model, "provider/model");
    }

    #[test]
    fn test_missing_model_and_content() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let completion = serde_json::from_str::<WireResponse>(raw)
            .unwrap()
            .into_completion("requested/model")
            .unwrap();

        assert_eq!(completion.model, "requested/model");
        assert_eq!(completion.text, "");
        assert!(!completion.truncated);
    }

    #[test]
    fn test_no_choices() {
        let response: WireResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(response.into_completion("m").is_none());
    }
}
