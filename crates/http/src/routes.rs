use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use genbus_inference::{
    generation::{GenerationOptions, Generator},
    moments::{self, MomentCaptions, MomentPost},
    prompt::{self, PromptBuilder},
};
use genbus_worker::chat::{ChatContext, ChatRecommender, SuggestedReplies};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

pub const DEFAULT_CAPTION_TONE: &str = "professional";
pub const CAPTION_MAX_NEW_TOKENS: u32 = 60;

/// Process identity reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub environment: String,
}

/// State shared by every route.
pub struct ApiState {
    pub info: ServiceInfo,
    pub generator: Arc<dyn Generator>,
    pub prompts: Arc<PromptBuilder>,
    pub chat: ChatRecommender,
}

/// An error response shaped as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(err: prompt::Error) -> Self {
        error!("Request failed: {}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub(crate) fn health_router() -> Router<Arc<ApiState>> {
    Router::new().route("/health", get(health))
}

pub(crate) fn api_router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/caption", post(caption))
        .route("/caption/monthly-moment", post(monthly_moment))
        .route("/chat/recommend", post(recommend_chat))
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.info.service,
        "version": state.info.version,
        "environment": state.info.environment,
    }))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CaptionRequest {
    pub company_name: String,
    pub category: String,
    pub sub_category: String,
    #[serde(default = "default_caption_tone")]
    pub tone: String,
}

fn default_caption_tone() -> String {
    DEFAULT_CAPTION_TONE.to_string()
}

async fn caption(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CaptionRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = state
        .prompts
        .build(prompt::CAPTION, &request)
        .map_err(ApiError::internal)?;
    let options = GenerationOptions {
        max_new_tokens: CAPTION_MAX_NEW_TOKENS,
        ..Default::default()
    };
    let caption = state.generator.generate(&prompt, &options).await;

    Ok(Json(json!({ "status": "success", "caption": caption })))
}

#[derive(Debug, Deserialize)]
pub struct MonthlyMomentRequest {
    pub month: String,
    #[serde(default)]
    pub posts: Vec<MomentPost>,
    #[serde(default = "default_moment_tone")]
    pub tone: String,
}

fn default_moment_tone() -> String {
    moments::DEFAULT_TONE.to_string()
}

async fn monthly_moment(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<MonthlyMomentRequest>,
) -> Result<Json<MomentCaptions>, ApiError> {
    let captions = moments::generate_moment_captions(
        &state.prompts,
        state.generator.as_ref(),
        &request.month,
        &request.posts,
        &request.tone,
    )
    .await
    .map_err(ApiError::internal)?;
    Ok(Json(captions))
}

const MESSAGES_REQUIRED: &str = "`messages` must be a non-empty list of strings";

async fn recommend_chat(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<Value>,
) -> Result<Json<SuggestedReplies>, ApiError> {
    let messages = match payload.get("messages") {
        Some(Value::Array(messages)) if !messages.is_empty() => messages,
        _ => return Err(ApiError::bad_request(MESSAGES_REQUIRED)),
    };
    let context =
        ChatContext::from_messages(messages).ok_or_else(|| ApiError::bad_request(MESSAGES_REQUIRED))?;

    let replies = state
        .chat
        .recommend(&context)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(replies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::HttpServerBuilder;
    use axum::body::Body;
    use axum::http::Request;
    use genbus_inference::backend;
    use tower::ServiceExt;

    struct FixedGenerator(&'static str);

    #[async_trait::async_trait]
    impl Generator for FixedGenerator {
        async fn load(&self) -> Result<(), backend::Error> {
            Ok(())
        }

        async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> String {
            self.0.to_string()
        }
    }

    fn app(output: &'static str, prefix: &str) -> Router {
        let generator: Arc<dyn Generator> = Arc::new(FixedGenerator(output));
        let prompts = Arc::new(PromptBuilder::new().unwrap());
        let state = Arc::new(ApiState {
            info: ServiceInfo {
                service: "AI Recommender System".to_string(),
                version: "0.1.0".to_string(),
                environment: "test".to_string(),
            },
            chat: ChatRecommender::new(generator.clone(), prompts.clone()),
            generator,
            prompts,
        });
        HttpServerBuilder::new(state)
            .routes_prefix(prefix.to_string())
            .build()
            .router()
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app("", "/api/v1"), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "status": "ok",
                "service": "AI Recommender System",
                "version": "0.1.0",
                "environment": "test"
            })
        );
    }

    #[tokio::test]
    async fn test_caption() {
        let (status, body) = call(
            app("Fresh bread every morning #bakery", "/api/v1"),
            "POST",
            "/api/v1/caption",
            Some(json!({"company_name": "Acme", "category": "food", "sub_category": "bakery"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "success", "caption": "Fresh bread every morning #bakery"})
        );
    }

    #[tokio::test]
    async fn test_chat_recommend() {
        let (status, body) = call(
            app("not json", "/api/v1/"),
            "POST",
            "/api/v1/chat/recommend",
            Some(json!({"messages": ["hello!"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"suggested_replies": ["Hey!", "Hi there!", "How's it going?"]})
        );
    }

    #[tokio::test]
    async fn test_chat_recommend_blank_messages_use_generic_replies() {
        let (status, body) = call(
            app("unused", "/api/v1"),
            "POST",
            "/api/v1/chat/recommend",
            Some(json!({"messages": ["  "]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"suggested_replies": ["Yeah", "I get that", "Tell me more"]})
        );
    }

    #[tokio::test]
    async fn test_chat_recommend_rejects_empty_messages() {
        for payload in [json!({}), json!({"messages": []}), json!({"messages": [1, null]})] {
            let (status, body) = call(
                app("", "/api/v1"),
                "POST",
                "/api/v1/chat/recommend",
                Some(payload),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["detail"], MESSAGES_REQUIRED);
        }
    }

    #[tokio::test]
    async fn test_monthly_moment() {
        let (status, body) = call(
            app("A month to remember", ""),
            "POST",
            "/caption/monthly-moment",
            Some(json!({
                "month": "June",
                "posts": [{"image_blip_caption": "a dog on a beach", "emotion": "joy"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "start": "A month to remember",
                "middle": "A month to remember",
                "end": "A month to remember"
            })
        );
    }

    #[tokio::test]
    async fn test_unprefixed_api_not_found() {
        let (status, _) = call(
            app("", "/api/v1"),
            "POST",
            "/caption",
            Some(json!({"company_name": "a", "category": "b", "sub_category": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
