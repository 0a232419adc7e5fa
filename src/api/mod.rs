use axum::Router;

pub mod assets;
pub mod chat_stream;
pub mod passthrough;
pub mod socket;

/// All relay endpoints: `/api/*` over HTTP and `/socket` over WebSocket.
pub fn router() -> Router {
    Router::new()
        .nest(
            "/api",
            passthrough::router().merge(chat_stream::router()),
        )
        .merge(socket::router())
}

pub mod schemas {
    use crate::infrastructure::entities::GenerationRequest;
    use serde::{Deserialize, Serialize};

    /// Inbound generation request. Clients send the text as `message` or `prompt`.
    #[derive(Deserialize, Debug)]
    pub struct ChatRequest {
        #[serde(alias = "message")]
        pub prompt: String,
        pub model: String,
    }

    impl From<ChatRequest> for GenerationRequest {
        fn from(request: ChatRequest) -> Self {
            GenerationRequest {
                model: request.model,
                prompt: request.prompt,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ErrorBody {
        pub error: &'static str,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_chat_request_accepts_message_or_prompt() {
            let from_message: ChatRequest =
                serde_json::from_str(r#"{"message":"hi","model":"llama3"}"#).unwrap();
            let from_prompt: ChatRequest =
                serde_json::from_str(r#"{"prompt":"hi","model":"llama3"}"#).unwrap();

            assert_eq!(
                GenerationRequest::from(from_message),
                GenerationRequest::from(from_prompt)
            );
        }

        #[test]
        fn test_chat_request_requires_model() {
            assert!(serde_json::from_str::<ChatRequest>(r#"{"message":"hi"}"#).is_err());
        }
    }
}
