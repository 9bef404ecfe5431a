use crate::{envelope::ReplyError, request_reply::Service};
use genbus_inference::{
    backend,
    generation::{GenerationOptions, Generator},
    prompt::{self, PromptBuilder},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

pub const MISSING_REQUIRED_FIELDS: &str = "missing_required_fields";
pub const DEFAULT_MOOD: &str = "neutral";
pub const DEFAULT_TONE: &str = "romantic";

/// A validated special day reminder request; also the template variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderRequest {
    pub title: String,
    pub category: String,
    pub location: String,
    pub notes: String,
    pub days_offset: i64,
    pub partner_name: String,
    pub recent_chat_mood: String,
    pub preferred_tone: String,
}

/// Reply body of the reminder notification subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderBody {
    pub notification_text: String,
}

fn required_string(
    fields: &Map<String, Value>,
    name: &str,
    allow_empty: bool,
) -> Result<String, ReplyError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(ReplyError::validation(MISSING_REQUIRED_FIELDS)),
        Some(Value::String(value)) if value.is_empty() && !allow_empty => {
            Err(ReplyError::validation(MISSING_REQUIRED_FIELDS))
        }
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ReplyError::validation(format!("`{name}` must be a string"))),
    }
}

fn optional_string(
    fields: &Map<String, Value>,
    name: &str,
    default: &str,
) -> Result<String, ReplyError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ReplyError::validation(format!("`{name}` must be a string"))),
    }
}

impl ReminderRequest {
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, ReplyError> {
        let title = required_string(fields, "title", false)?;
        let category = required_string(fields, "category", false)?;
        let partner_name = required_string(fields, "partner_name", true)?;
        let days_offset = match fields.get("days_offset") {
            None | Some(Value::Null) => return Err(ReplyError::validation(MISSING_REQUIRED_FIELDS)),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| ReplyError::validation("`days_offset` must be an integer"))?,
        };

        Ok(Self {
            title,
            category,
            location: optional_string(fields, "location", "")?,
            notes: optional_string(fields, "notes", "")?,
            days_offset,
            partner_name,
            recent_chat_mood: optional_string(fields, "recent_chat_mood", DEFAULT_MOOD)?,
            preferred_tone: optional_string(fields, "preferred_tone", DEFAULT_TONE)?,
        })
    }
}

fn reminder_generation_options() -> GenerationOptions {
    GenerationOptions {
        max_new_tokens: 20,
        temperature: 0.7,
        ..Default::default()
    }
}

/// Request-reply service behind the reminder notification subject.
pub struct ReminderService {
    generator: Arc<dyn Generator>,
    prompts: Arc<PromptBuilder>,
}

impl ReminderService {
    pub fn new(generator: Arc<dyn Generator>, prompts: Arc<PromptBuilder>) -> Self {
        Self { generator, prompts }
    }
}

#[async_trait::async_trait]
impl Service for ReminderService {
    type Request = ReminderRequest;
    type Body = ReminderBody;

    async fn load(&self) -> Result<(), backend::Error> {
        self.generator.load().await
    }

    fn validate(&self, fields: &Map<String, Value>) -> Result<ReminderRequest, ReplyError> {
        ReminderRequest::from_fields(fields)
    }

    async fn process(&self, request: ReminderRequest) -> Result<ReminderBody, ReplyError> {
        info!(
            "Processing reminder notification | title={} | days_offset={}",
            request.title, request.days_offset
        );
        let prompt = self
            .prompts
            .build(prompt::REMINDER_NOTIFICATION, &request)
            .map_err(ReplyError::internal)?;

        let notification_text = self
            .generator
            .generate(&prompt, &reminder_generation_options())
            .await;
        if notification_text.is_empty() {
            return Err(ReplyError::internal("generation produced no usable output"));
        }

        info!("Generated reminder notification: {}", notification_text);
        Ok(ReminderBody { notification_text })
    }
}
