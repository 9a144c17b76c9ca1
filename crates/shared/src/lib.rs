pub mod events;
pub mod message;

pub mod settings {
    use serde::{Deserialize, Serialize};

    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
    pub const MIN_TEMPERATURE: f32 = 0.0;
    pub const MAX_TEMPERATURE: f32 = 2.0;

    /// Chat models offered in the model picker: (id, display name).
    pub const MODEL_CHOICES: &[(&str, &str)] = &[
        ("gpt-4", "GPT-4"),
        ("gpt-3.5-turbo", "GPT-3.5 Turbo"),
    ];

    fn default_chat_model() -> String {
        MODEL_CHOICES[0].0.to_string()
    }

    fn default_image_model() -> String {
        "dall-e-3".to_string()
    }

    fn default_temperature() -> f32 {
        0.7
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppSettings {
        #[serde(default = "default_chat_model")]
        pub chat_model: String,
        #[serde(default = "default_image_model")]
        pub image_model: String,
        #[serde(default = "default_temperature")]
        pub temperature: f32,
        /// Override for self-hosted or proxied OpenAI-compatible endpoints
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub base_url: Option<String>,
    }

    impl Default for AppSettings {
        fn default() -> Self {
            Self {
                chat_model: default_chat_model(),
                image_model: default_image_model(),
                temperature: default_temperature(),
                base_url: None,
            }
        }
    }

    impl AppSettings {
        pub fn base_url(&self) -> &str {
            self.base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
        }

        pub fn set_temperature(&mut self, value: f32) {
            self.temperature = clamp_temperature(value);
        }
    }

    pub fn clamp_temperature(value: f32) -> f32 {
        if value.is_nan() {
            return default_temperature();
        }
        value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
    }

    pub fn model_display_name(id: &str) -> Option<&'static str> {
        MODEL_CHOICES
            .iter()
            .find(|(model, _)| *model == id)
            .map(|(_, name)| *name)
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    use crate::message::Role;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: String,
    }

    impl ChatMessage {
        pub fn user(content: impl Into<String>) -> Self {
            Self {
                role: Role::User,
                content: content.into(),
            }
        }
    }

    /// One request to the completion service.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatRequest {
        pub messages: Vec<ChatMessage>,
        pub model: String,
        pub temperature: f32,
    }

    /// One request to the image service. The payload always comes back base64-encoded.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ImageRequest {
        pub prompt: String,
        pub model: String,
    }

    /// Incremental output of a streaming completion.
    #[derive(Debug, Clone, PartialEq)]
    pub enum StreamChunk {
        Text(String),
        Done { stop_reason: Option<String> },
        Error(String),
    }
}
