use handlebars::Handlebars;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CHAT_RECOMMENDATION: &str = "chat_recommendation_prompt";
pub const REMINDER_NOTIFICATION: &str = "reminder_notification";
pub const CAPTION: &str = "caption_prompt";
pub const MONTHLY_MOMENT: &str = "monthly_moment_prompt";

/// File extension of template override files.
const TEMPLATE_EXTENSION: &str = "hbs";

const BUILTIN_TEMPLATES: [(&str, &str); 4] = [
    (
        CHAT_RECOMMENDATION,
        include_str!("../prompts/chat_recommendation_prompt.hbs"),
    ),
    (
        REMINDER_NOTIFICATION,
        include_str!("../prompts/reminder_notification.hbs"),
    ),
    (CAPTION, include_str!("../prompts/caption_prompt.hbs")),
    (MONTHLY_MOMENT, include_str!("../prompts/monthly_moment_prompt.hbs")),
];

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to register prompt template {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: Box<handlebars::TemplateError>,
    },
    #[error("Failed to build prompt {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: Box<handlebars::RenderError>,
    },
    #[error("Failed to read prompt templates at {path}: {source}")]
    ReadTemplates {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fills named prompt templates with variables.
///
/// Rendering is strict: a template referencing a variable that is not
/// supplied fails instead of rendering an empty string. Output is plain text,
/// nothing is HTML escaped.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    registry: Handlebars<'static>,
}

impl PromptBuilder {
    /// Creates a builder holding the built-in templates.
    pub fn new() -> Result<Self, Error> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);

        let mut builder = Self { registry };
        for (name, template) in BUILTIN_TEMPLATES {
            builder.register(name, template)?;
        }
        Ok(builder)
    }

    /// Registers every `*.hbs` file in `dir`, named by its file stem.
    ///
    /// A file named after a built-in template replaces it.
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self, Error> {
        let read_error = |source| Error::ReadTemplates {
            path: dir.to_path_buf(),
            source,
        };

        let mut registered = 0;
        for entry in std::fs::read_dir(dir).map_err(read_error)? {
            let path = entry.map_err(read_error)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let template = std::fs::read_to_string(&path).map_err(|source| {
                Error::ReadTemplates {
                    path: path.clone(),
                    source,
                }
            })?;
            self.register(name, &template)?;
            registered += 1;
        }

        info!("Loaded {} prompt templates from {}", registered, dir.display());
        Ok(self)
    }

    fn register(&mut self, name: &str, template: &str) -> Result<(), Error> {
        self.registry
            .register_template_string(name, template)
            .map_err(|source| Error::Template {
                name: name.to_string(),
                source: Box::new(source),
            })
    }

    /// Renders template `name` with `variables`.
    pub fn build<T: Serialize>(&self, name: &str, variables: &T) -> Result<String, Error> {
        let prompt = self
            .registry
            .render(name, variables)
            .map_err(|source| Error::Render {
                name: name.to_string(),
                source: Box::new(source),
            })?;
        debug!("Prompt {} built", name);
        Ok(prompt)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }
}
