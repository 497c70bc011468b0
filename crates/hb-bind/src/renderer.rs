//! Bind template rendering
//!
//! The bind template is rendered the way a chart template would be: it is
//! injected into the chart's template set as `templates/bind.yaml` and
//! evaluated against the installed release. Other chart templates are only
//! loaded when the bind template includes them.
//!
//! Templates may use gotpl-style field access (`{{ .Values.port }}`); the
//! leading dot is dropped before minijinja sees the expression.

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use serde_json::json;
use tracing::debug;

use hb_common::values::merged;
use hb_common::{Chart, Error, Release, ReleaseInfo, Result};

use crate::filters;

/// Name under which the bind template joins the chart's template set
pub const BIND_FILE_NAME: &str = "templates/bind.yaml";

/// The only chart template engine bind rendering supports
pub const SUPPORTED_ENGINE: &str = "gotpl";

/// Rendered bind YAML, ready for credential resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBindYaml(String);

impl RenderedBindYaml {
    /// Wrap already rendered YAML
    pub fn new(yaml: impl Into<String>) -> Self {
        Self(yaml.into())
    }

    /// Borrow the YAML text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders a plan's bind template against an installed release
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait BindTemplateRenderer: Send + Sync {
    /// Render `bind_template` in the context of `release`
    fn render(&self, bind_template: &str, release: &Release) -> Result<RenderedBindYaml>;
}

/// minijinja-backed bind template renderer
#[derive(Debug, Clone, Default)]
pub struct Renderer;

impl Renderer {
    /// Create a renderer
    pub fn new() -> Self {
        Self
    }

    fn environment(templates: HashMap<String, String>) -> Environment<'static> {
        let templates = Arc::new(templates);
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_loader(move |name| Ok(templates.get(name).map(|t| normalize_gotpl_fields(t))));

        env.add_filter("b64enc", filters::b64enc);
        env.add_filter("b64dec", filters::b64dec);
        env.add_filter("quote", filters::quote);
        env.add_filter("required", filters::required);
        env
    }
}

impl BindTemplateRenderer for Renderer {
    fn render(&self, bind_template: &str, release: &Release) -> Result<RenderedBindYaml> {
        let chart = release
            .chart
            .as_ref()
            .ok_or_else(|| Error::template("release is missing the chart section"))?;
        let info = release
            .info
            .as_ref()
            .ok_or_else(|| Error::template("release is missing the info section"))?;

        match chart.metadata.engine.as_deref() {
            None | Some("") | Some(SUPPORTED_ENGINE) => {}
            Some(other) => {
                return Err(Error::template(format!(
                    "chart {} uses unsupported template engine '{other}'",
                    chart.metadata.name
                )))
            }
        }

        let mut templates: HashMap<String, String> = chart
            .templates
            .iter()
            .map(|t| (t.name.clone(), t.data.clone()))
            .collect();
        templates.insert(BIND_FILE_NAME.to_string(), bind_template.to_string());

        let env = Self::environment(templates);
        let template = env
            .get_template(BIND_FILE_NAME)
            .map_err(|e| Error::template(format!("while loading {BIND_FILE_NAME}: {e}")))?;
        let rendered = template
            .render(render_scope(release, chart, info))
            .map_err(|e| Error::template(format!("while rendering {BIND_FILE_NAME}: {e}")))?;

        debug!(release = %release.name, bytes = rendered.len(), "bind template rendered");
        Ok(RenderedBindYaml(rendered))
    }
}

/// Top-level objects visible to templates, named as Helm names them
fn render_scope(release: &Release, chart: &Chart, info: &ReleaseInfo) -> Value {
    let values = merged(&chart.values, release.config.clone());
    Value::from_serialize(json!({
        "Values": values,
        "Release": {
            "Name": release.name,
            "Namespace": release.namespace,
            "Revision": release.revision,
            "Time": info.last_deployed.to_rfc3339(),
            "IsInstall": true,
            "IsUpgrade": false,
            "Service": "Helm",
        },
        "Chart": {
            "Name": chart.metadata.name,
            "Version": chart.metadata.version,
            "Description": chart.metadata.description,
        },
    }))
}

/// Drop the leading dot of gotpl field paths inside `{{ ... }}` and `{% ... %}`.
///
/// `{{ .Release.Name }}` becomes `{{ Release.Name }}`. Dots between
/// identifiers and inside quoted strings are kept.
fn normalize_gotpl_fields(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = find_open(remaining) {
        result.push_str(&remaining[..start + 2]);
        remaining = &remaining[start + 2..];
        let close = if result.ends_with("{{") { "}}" } else { "%}" };

        if let Some(end) = remaining.find(close) {
            result.push_str(&normalize_expression_dots(&remaining[..end]));
            result.push_str(close);
            remaining = &remaining[end + 2..];
        } else {
            result.push_str(remaining);
            remaining = "";
        }
    }

    result.push_str(remaining);
    result
}

fn find_open(s: &str) -> Option<usize> {
    match (s.find("{{"), s.find("{%")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn normalize_expression_dots(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                result.push(ch);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                result.push(ch);
            }
            '.' if !in_single_quote && !in_double_quote => {
                let prev_continues_path = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | ')' | ']'));
                let next_is_field = chars.peek().is_some_and(|c| c.is_alphabetic());
                if prev_continues_path || !next_is_field {
                    result.push('.');
                }
            }
            _ => result.push(ch),
        }
    }

    result
}
