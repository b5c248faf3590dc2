//! Request validation and prompt rendering.

use super::error::RelayError;
use crate::config::PromptTemplate;
use crate::models::parameters::validate_parameters;
use crate::models::{ClientRequest, RenderedPrompt};
use minijinja::{Environment, UndefinedBehavior};
use std::collections::{HashMap, HashSet};
use validator::Validate;

/// Turns a raw client frame into the system and user prompts.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, raw: &str) -> Result<RenderedPrompt, RelayError>;
}

/// Renders per-request-type templates with the request parameters as context.
///
/// Request types with typed rules are checked before rendering. Referencing
/// a parameter the request did not supply is a validation error.
pub struct TemplateRenderer {
    env: Environment<'static>,
    request_types: HashSet<String>,
}

impl TemplateRenderer {
    pub fn new(templates: &HashMap<String, PromptTemplate>) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("join_ints", join_ints);
        env.add_filter("join_strings", join_strings);
        env.add_filter("comma_format", comma_format);

        for (request_type, template) in templates {
            env.add_template_owned(system_name(request_type), template.system.clone())?;
            env.add_template_owned(content_name(request_type), template.content.clone())?;
        }

        Ok(Self {
            env,
            request_types: templates.keys().cloned().collect(),
        })
    }

    fn render_template(
        &self,
        name: &str,
        parameters: &serde_json::Value,
    ) -> Result<String, RelayError> {
        self.env
            .get_template(name)
            .and_then(|template| template.render(parameters))
            .map_err(|e| RelayError::ValidationFailure(format!("error rendering {}: {}", name, e)))
    }
}

impl PromptRenderer for TemplateRenderer {
    fn render(&self, raw: &str) -> Result<RenderedPrompt, RelayError> {
        let request: ClientRequest = serde_json::from_str(raw).map_err(|e| {
            RelayError::ValidationFailure(format!("error parsing request JSON: {}", e))
        })?;

        request
            .validate()
            .map_err(|e| RelayError::ValidationFailure(e.to_string()))?;

        if !request.parameters.is_object() {
            return Err(RelayError::ValidationFailure(
                "parameters must be a JSON object".to_string(),
            ));
        }

        if !self.request_types.contains(&request.request_type) {
            return Err(RelayError::ValidationFailure(format!(
                "unknown request type: {}",
                request.request_type
            )));
        }

        validate_parameters(&request.request_type, &request.parameters)?;

        Ok(RenderedPrompt {
            system: self.render_template(&system_name(&request.request_type), &request.parameters)?,
            content: self
                .render_template(&content_name(&request.request_type), &request.parameters)?,
        })
    }
}

fn system_name(request_type: &str) -> String {
    format!("{}.system", request_type)
}

fn content_name(request_type: &str) -> String {
    format!("{}.content", request_type)
}

fn join_ints(values: Vec<i64>, sep: Option<String>) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(sep.as_deref().unwrap_or(", "))
}

fn join_strings(values: Vec<String>, sep: Option<String>) -> String {
    values.join(sep.as_deref().unwrap_or(", "))
}

/// `1234567` → `1,234,567`.
fn comma_format(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
