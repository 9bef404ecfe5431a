use crate::backend::{self, Backend};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 200;
pub const DEFAULT_MIN_NEW_TOKENS: u32 = 20;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.05;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GenerationOptions {
    pub max_new_tokens: u32,
    pub min_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    /// Output is cut at the first occurrence of each sequence.
    pub stop_sequences: Vec<String>,
    pub sample: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            min_new_tokens: DEFAULT_MIN_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            stop_sequences: Vec::new(),
            sample: true,
        }
    }
}

/// Text generation collaborator.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// One-time readiness gate, run before any worker subscribes.
    async fn load(&self) -> Result<(), backend::Error>;

    /// Generates a completion for `prompt`.
    ///
    /// Never fails: any internal error is logged and yields an empty string,
    /// which callers treat as "no usable output".
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> String;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Parameters {
    max_new_tokens: u32,
    min_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
    do_sample: bool,
    return_full_text: bool,
}

impl From<&GenerationOptions> for Parameters {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            max_new_tokens: options.max_new_tokens,
            min_new_tokens: options.min_new_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            repetition_penalty: options.repetition_penalty,
            do_sample: options.sample,
            return_full_text: false,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    generated_text: String,
}

/// Generation client for a text-generation-inference style server.
#[derive(Debug)]
pub struct HttpGenerator {
    backend: Backend,
}

impl HttpGenerator {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl Generator for HttpGenerator {
    async fn load(&self) -> Result<(), backend::Error> {
        self.backend.load().await
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> String {
        if prompt.is_empty() {
            error!("Empty prompt passed to text generation");
            return String::new();
        }

        debug!("Running text generation, prompt length {}", prompt.len());
        let request = GenerateRequest {
            inputs: prompt,
            parameters: options.into(),
        };
        match self
            .backend
            .post_json::<_, GenerateResponse>("generate", &request)
            .await
        {
            Ok(response) => postprocess(prompt, &response.generated_text, &options.stop_sequences),
            Err(err) => {
                error!("Text generation failed: {}", err);
                String::new()
            }
        }
    }
}

/// Strips an echoed prompt, cuts at stop sequences and trims.
pub fn postprocess(prompt: &str, generated: &str, stop_sequences: &[String]) -> String {
    let mut text = match generated.strip_prefix(prompt) {
        Some(rest) if !prompt.is_empty() => rest.trim(),
        _ => generated,
    };

    for sequence in stop_sequences.iter().filter(|s| !s.is_empty()) {
        if let Some((head, _)) = text.split_once(sequence.as_str()) {
            text = head.trim();
        }
    }

    text.trim().to_string()
}
