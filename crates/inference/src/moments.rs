use crate::{
    generation::{GenerationOptions, Generator},
    prompt::{self, PromptBuilder},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Scene captions included in one prompt.
pub const MAX_SCENES: usize = 15;
/// Distinct emotions summarised into the mood line.
pub const MAX_EMOTIONS: usize = 3;
pub const DEFAULT_EMOTION_SUMMARY: &str = "warm";
pub const DEFAULT_TONE: &str = "romantic";
pub const MOMENT_MAX_NEW_TOKENS: u32 = 45;

/// The fields of an enriched post that feed a monthly moment video.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MomentPost {
    #[serde(default)]
    pub image_blip_caption: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MomentCaptions {
    pub start: String,
    pub middle: String,
    pub end: String,
}

fn scenes_text(posts: &[MomentPost]) -> String {
    let scenes: Vec<&str> = posts
        .iter()
        .filter_map(|post| post.image_blip_caption.as_deref())
        .filter(|caption| !caption.is_empty())
        .take(MAX_SCENES)
        .collect();
    format!("- {}", scenes.join("\n- "))
}

/// The most frequent emotions, most common first; ties keep first-seen order.
fn emotion_summary(posts: &[MomentPost]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for emotion in posts
        .iter()
        .filter_map(|post| post.emotion.as_deref())
        .filter(|emotion| !emotion.is_empty())
    {
        match counts.iter_mut().find(|(seen, _)| *seen == emotion) {
            Some((_, count)) => *count += 1,
            None => counts.push((emotion, 1)),
        }
    }

    if counts.is_empty() {
        return DEFAULT_EMOTION_SUMMARY.to_string();
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .iter()
        .take(MAX_EMOTIONS)
        .map(|(emotion, _)| *emotion)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generates the start, middle and end captions of a month's recap video.
pub async fn generate_moment_captions(
    prompts: &PromptBuilder,
    generator: &dyn Generator,
    month: &str,
    posts: &[MomentPost],
    tone: &str,
) -> Result<MomentCaptions, prompt::Error> {
    let scenes = scenes_text(posts);
    let emotions = emotion_summary(posts);
    info!("Generating monthly captions for {} | emotions={}", month, emotions);

    let variables = json!({
        "month": month,
        "scenes": scenes,
        "emotions": emotions,
        "tone": tone,
    });

    Ok(MomentCaptions {
        start: moment_caption(prompts, generator, &variables, "start").await?,
        middle: moment_caption(prompts, generator, &variables, "middle").await?,
        end: moment_caption(prompts, generator, &variables, "end").await?,
    })
}

async fn moment_caption(
    prompts: &PromptBuilder,
    generator: &dyn Generator,
    variables: &Value,
    position: &str,
) -> Result<String, prompt::Error> {
    let mut variables = variables.clone();
    variables["position"] = json!(position);
    let prompt = prompts.build(prompt::MONTHLY_MOMENT, &variables)?;

    let options = GenerationOptions {
        max_new_tokens: MOMENT_MAX_NEW_TOKENS,
        ..Default::default()
    };
    Ok(generator.generate(&prompt, &options).await.trim().to_string())
}
