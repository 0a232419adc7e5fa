//! Wire entities of the inference server

use serde::{Deserialize, Serialize};

/// One generation request, fixed for the lifetime of its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        GenerationRequest {
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

/// Body of `POST /api/generate`.
#[derive(Serialize, Debug)]
pub struct GenerateBody<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

impl<'a> GenerateBody<'a> {
    pub fn streaming(request: &'a GenerationRequest) -> Self {
        GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: true,
        }
    }

    pub fn single_shot(request: &'a GenerationRequest) -> Self {
        GenerateBody {
            stream: false,
            ..GenerateBody::streaming(request)
        }
    }
}

/// One decoded line of a streaming generation.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Frame {
    #[serde(rename = "response", default)]
    pub response_fragment: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub id: Option<String>,
}

impl Frame {
    /// The fragment to forward, if any. Empty fragments carry nothing.
    pub fn fragment(&self) -> Option<&str> {
        self.response_fragment
            .as_deref()
            .filter(|fragment| !fragment.is_empty())
    }

    pub fn completion_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ignores_unknown_fields() {
        let frame: Frame = serde_json::from_str(
            r#"{"model":"llama3","created_at":"2024-01-01T00:00:00Z","response":"Hi","done":false}"#,
        )
        .unwrap();

        assert_eq!(frame.fragment(), Some("Hi"));
        assert!(!frame.done);
        assert_eq!(frame.completion_id(), None);
    }

    #[test]
    fn test_empty_fragment_and_id_are_treated_as_absent() {
        let frame: Frame = serde_json::from_str(r#"{"response":"","done":true,"id":""}"#).unwrap();

        assert_eq!(frame.fragment(), None);
        assert_eq!(frame.completion_id(), None);
        assert!(frame.done);
    }

    #[test]
    fn test_streaming_body_serialization() {
        let request = GenerationRequest::new("llama3", "Why is the sky blue?");
        let body = serde_json::to_value(GenerateBody::streaming(&request)).unwrap();

        assert_eq!(
            body,
            serde_json::json!({"model": "llama3", "prompt": "Why is the sky blue?", "stream": true})
        );
        assert_eq!(
            serde_json::to_value(GenerateBody::single_shot(&request)).unwrap()["stream"],
            false
        );
    }
}
