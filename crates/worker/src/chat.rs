use crate::{envelope::ReplyError, request_reply::Service};
use genbus_inference::{
    backend,
    generation::{GenerationOptions, Generator},
    prompt::{self, PromptBuilder},
    text::{clean_text, safe_json_parse, DEFAULT_MAX_MESSAGE_LENGTH},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Most recent messages kept as prompt context.
pub const MAX_CONTEXT_MESSAGES: usize = 5;
/// Number of suggestions in every reply.
pub const REPLY_COUNT: usize = 3;

pub const MESSAGES_NOT_A_LIST: &str = "`messages` must be a list";
pub const NO_STRING_MESSAGES: &str = "`messages` must contain at least one string";

// "}\n" drops the closing brace of JSON followed by a newline, which sends
// such output to the fallback replies. Removing it changes reply behaviour.
const STOP_SEQUENCES: [&str; 6] = ["}\n", "\n\n", "DO NOT", "CHAT:", "RULES", "IMPORTANT"];

/// Rule-based replies matched on the last message, first rule wins.
const FALLBACK_RULES: [(&[&str], [&str; REPLY_COUNT]); 3] = [
    (
        &["thank", "thanks", "appreciate"],
        ["Anytime!", "Glad it helped!", "No problem at all"],
    ),
    (
        &["stress", "tired", "busy", "deadline"],
        [
            "That sounds really exhausting",
            "Yeah, that can be stressful",
            "Want to talk about it?",
        ],
    ),
    (
        &["hi", "hello", "hey", "morning"],
        ["Hey!", "Hi there!", "How's it going?"],
    ),
];

const GENERIC_FALLBACK: [&str; REPLY_COUNT] = ["Yeah", "I get that", "Tell me more"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SuggestedReplies {
    pub suggested_replies: Vec<String>,
}

/// Reply body of the chat recommendation subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatBody {
    pub result: SuggestedReplies,
}

/// Cleaned prompt context, oldest message first. Empty when every message was blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext(Vec<String>);

impl ChatContext {
    /// Keeps the last few messages, drops blank or non-string entries and cleans the rest.
    ///
    /// `None` when `messages` holds no string at all.
    pub fn from_messages(messages: &[Value]) -> Option<Self> {
        if !messages.iter().any(Value::is_string) {
            return None;
        }
        let recent = &messages[messages.len().saturating_sub(MAX_CONTEXT_MESSAGES)..];
        let cleaned: Vec<String> = recent
            .iter()
            .filter_map(Value::as_str)
            .filter(|message| !message.trim().is_empty())
            .map(|message| clean_text(message, DEFAULT_MAX_MESSAGE_LENGTH))
            .collect();
        Some(Self(cleaned))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn joined(&self) -> String {
        self.0.join("\n")
    }
}

/// Generation parameters for reply suggestions.
pub fn chat_generation_options() -> GenerationOptions {
    GenerationOptions {
        max_new_tokens: 50,
        min_new_tokens: 15,
        temperature: 0.2,
        top_p: 0.7,
        stop_sequences: STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
        sample: false,
        ..Default::default()
    }
}

/// Canned suggestions for when the model output is unusable.
pub fn fallback_replies(last_message: &str) -> SuggestedReplies {
    let text = last_message.to_lowercase();
    let replies = FALLBACK_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(_, replies)| replies)
        .unwrap_or(&GENERIC_FALLBACK);

    SuggestedReplies {
        suggested_replies: replies.iter().map(|reply| reply.to_string()).collect(),
    }
}

/// Reads exactly [`REPLY_COUNT`] string suggestions out of raw model output.
fn parse_suggestions(raw_output: &str) -> Option<SuggestedReplies> {
    let Some(parsed) = safe_json_parse(raw_output) else {
        warn!("Model did not return a valid JSON object");
        return None;
    };

    let replies: Option<Vec<String>> = match parsed.get("suggested_replies") {
        Some(Value::Array(items)) if items.len() == REPLY_COUNT => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    };
    if replies.is_none() {
        warn!("Invalid or missing suggested_replies");
    }
    replies.map(|suggested_replies| SuggestedReplies { suggested_replies })
}

/// Turns a chat history into three reply suggestions.
#[derive(Clone)]
pub struct ChatRecommender {
    generator: Arc<dyn Generator>,
    prompts: Arc<PromptBuilder>,
}

impl ChatRecommender {
    pub fn new(generator: Arc<dyn Generator>, prompts: Arc<PromptBuilder>) -> Self {
        Self { generator, prompts }
    }

    pub async fn load(&self) -> Result<(), backend::Error> {
        self.generator.load().await
    }

    /// Always yields [`REPLY_COUNT`] suggestions, from the model or the fallback rules.
    pub async fn recommend(&self, context: &ChatContext) -> Result<SuggestedReplies, prompt::Error> {
        if context.is_empty() {
            debug!("No usable chat messages, skipping generation");
            return Ok(fallback_replies(""));
        }
        let chat_context = context.joined();
        debug!("Chat context:\n{}", chat_context);

        let prompt = self.prompts.build(
            prompt::CHAT_RECOMMENDATION,
            &json!({ "chat_context": chat_context }),
        )?;
        let raw_output = self
            .generator
            .generate(&prompt, &chat_generation_options())
            .await;
        debug!("Raw chat recommendation output: {}", raw_output);

        Ok(parse_suggestions(&raw_output).unwrap_or_else(|| fallback_replies(context.last())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub context: ChatContext,
}

/// Request-reply service behind the chat recommendation subject.
pub struct ChatService {
    recommender: ChatRecommender,
}

impl ChatService {
    pub fn new(recommender: ChatRecommender) -> Self {
        Self { recommender }
    }
}

#[async_trait::async_trait]
impl Service for ChatService {
    type Request = ChatRequest;
    type Body = ChatBody;

    async fn load(&self) -> Result<(), backend::Error> {
        self.recommender.load().await
    }

    fn validate(&self, fields: &Map<String, Value>) -> Result<ChatRequest, ReplyError> {
        let messages = match fields.get("messages") {
            Some(Value::Array(messages)) if !messages.is_empty() => messages,
            _ => return Err(ReplyError::validation(MESSAGES_NOT_A_LIST)),
        };
        info!("Processing chat recommendation | messages={}", messages.len());

        let context = ChatContext::from_messages(messages)
            .ok_or_else(|| ReplyError::validation(NO_STRING_MESSAGES))?;
        Ok(ChatRequest { context })
    }

    async fn process(&self, request: ChatRequest) -> Result<ChatBody, ReplyError> {
        let result = self
            .recommender
            .recommend(&request.context)
            .await
            .map_err(ReplyError::internal)?;
        Ok(ChatBody { result })
    }
}
