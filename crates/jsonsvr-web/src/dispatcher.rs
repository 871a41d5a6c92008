//! Turns a resolved rule into a response.
//!
//! ```text
//! Pre ──> Expand ──> Headers ──> Body ──> Post ──> Done
//!  │        │                     │
//!  └────────┴──── error ──────────┴──> 404 / 500 (Post skipped)
//! ```
//!
//! `Pre` runs `preScript` against the live context, `Expand` interpolates the
//! rule, `Headers` copies the expanded headers onto the response and `Body`
//! performs exactly one terminal action. `Post` runs `postScript` last, so it
//! sees (and may still change) the response.

use jsonsvr_core::{
    Context, InterpretError, Interpreter, ResponseContext, Rule, display_value,
};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, error, warn};

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pre,
    Expand,
    Headers,
    Body,
    Post,
    Done,
}

/// The single response action a rule performs, chosen by priority
/// `response` > `redirect` > `errorResponse` > `responseText`.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalAction {
    File(String),
    Redirect(String),
    Status(u16),
    Text(String),
    Missing,
}

impl TerminalAction {
    pub fn from_expanded(rule: &Map<String, Value>) -> Self {
        let field = |name: &str| rule.get(name).filter(|v| !v.is_null());

        if let Some(path) = field("response") {
            return Self::File(display_value(path));
        }
        if let Some(target) = field("redirect") {
            let target = display_value(target);
            return Self::Redirect(if target.is_empty() { "/".to_string() } else { target });
        }
        if let Some(code) = field("errorResponse") {
            return Self::Status(status_code(code));
        }
        if let Some(text) = field("responseText") {
            return Self::Text(display_value(text));
        }
        Self::Missing
    }
}

fn status_code(value: &Value) -> u16 {
    let code = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    code.filter(|c| (100.0..=999.0).contains(c) && c.fract() == 0.0)
        .map(|c| c as u16)
        .unwrap_or(500)
}

/// A rule after interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedRule {
    pub headers: Map<String, Value>,
    pub action: TerminalAction,
}

impl ExpandedRule {
    pub fn from_value(value: Value) -> Self {
        let Value::Object(rule) = value else {
            warn!("rule expanded to a non-object value");
            return Self {
                headers: Map::new(),
                action: TerminalAction::Missing,
            };
        };
        let headers = match rule.get("headers") {
            Some(Value::Object(headers)) => headers.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                warn!(headers = %other, "`headers` must be an object; ignored");
                Map::new()
            }
        };
        Self {
            action: TerminalAction::from_expanded(&rule),
            headers,
        }
    }
}

/// Run `rule` to completion and return the response to send.
///
/// Request-scoped failures become responses: missing files and unmatched
/// rules are 404, everything else is 500.
pub async fn dispatch(interpreter: &Interpreter, rule: &Rule, ctx: &Context) -> ResponseContext {
    match run(interpreter, rule, ctx).await {
        Ok(()) => ctx.response(),
        Err(err) => failure_response(&err, ctx),
    }
}

/// Resolve the first matching rule, then dispatch it.
pub async fn dispatch_rules(
    interpreter: &Interpreter,
    rules: &[Rule],
    ctx: &Context,
) -> ResponseContext {
    match interpreter.resolve(rules, ctx) {
        Ok(Some(rule)) => dispatch(interpreter, rule, ctx).await,
        Ok(None) => {
            let request = ctx.request();
            let err = InterpretError::UnresolvedRule {
                method: request.method.clone(),
                path: request.path.clone(),
            };
            failure_response(&err, ctx)
        }
        Err(err) => failure_response(&err, ctx),
    }
}

fn failure_response(err: &InterpretError, ctx: &Context) -> ResponseContext {
    let status = if err.is_not_found() { 404 } else { 500 };
    match err {
        InterpretError::UnresolvedRule { .. } => debug!(error = %err, "no rule matched"),
        _ => error!(error = %err, status, "request failed"),
    }
    ctx.update_response(|response| {
        response.status = status;
        response.body = Value::Null;
        response.redirect = None;
        response.clone()
    })
}

async fn run(interpreter: &Interpreter, rule: &Rule, ctx: &Context) -> jsonsvr_core::Result<()> {
    let mut stage = Stage::Pre;
    let mut expanded = None;

    while stage != Stage::Done {
        debug!(?stage, "dispatch stage");
        stage = match stage {
            Stage::Pre => {
                if let Some(script) = rule.pre_script() {
                    interpreter.evaluator().execute_statements(script, ctx)?;
                }
                Stage::Expand
            }
            Stage::Expand => {
                let value = interpreter.interpolate_document(&rule.template(), ctx).await?;
                expanded = Some(ExpandedRule::from_value(value));
                Stage::Headers
            }
            Stage::Headers => {
                if let Some(expanded) = &expanded {
                    apply_headers(&expanded.headers, ctx);
                }
                Stage::Body
            }
            Stage::Body => {
                let action = expanded
                    .take()
                    .map(|e| e.action)
                    .unwrap_or(TerminalAction::Missing);
                perform(interpreter, action, ctx).await?;
                Stage::Post
            }
            Stage::Post => {
                if let Some(script) = rule.post_script() {
                    interpreter.evaluator().execute_statements(script, ctx)?;
                }
                Stage::Done
            }
            Stage::Done => Stage::Done,
        };
    }
    Ok(())
}

fn apply_headers(headers: &Map<String, Value>, ctx: &Context) {
    ctx.update_response(|response| {
        for (name, value) in headers {
            let value = match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| Value::String(display_value(item)))
                        .collect(),
                ),
                other => Value::String(display_value(other)),
            };
            response.set_header(name, value);
        }
    });
}

async fn perform(
    interpreter: &Interpreter,
    action: TerminalAction,
    ctx: &Context,
) -> jsonsvr_core::Result<()> {
    match action {
        TerminalAction::File(path) => send_file(interpreter, &path, ctx).await?,
        TerminalAction::Redirect(target) => ctx.update_response(|response| {
            if !(300..400).contains(&response.status) {
                response.status = 302;
            }
            response.redirect = Some(target);
        }),
        TerminalAction::Status(code) => ctx.update_response(|response| {
            response.status = code;
            response.body = Value::Null;
        }),
        TerminalAction::Text(text) => ctx.update_response(|response| {
            response.set_default_header("content-type", CONTENT_TYPE_HTML);
            response.body = Value::String(text);
        }),
        TerminalAction::Missing => {
            warn!("rule has no response, redirect, errorResponse or responseText");
            ctx.update_response(|response| {
                response.status = 500;
                response.body = Value::Null;
            });
        }
    }
    Ok(())
}

async fn send_file(interpreter: &Interpreter, path: &str, ctx: &Context) -> jsonsvr_core::Result<()> {
    let content = match interpreter.read_file(path).await {
        Ok(content) => content,
        Err(err) => {
            if let InterpretError::FileNotFound(_) = err {
                error!(file = path, "response file not found");
            }
            return Err(err);
        }
    };

    let extension = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let (body, content_type) = match extension.as_str() {
        "html" | "htm" => {
            let html = interpreter.expand(&content, ctx)?;
            (display_value(&html), CONTENT_TYPE_HTML)
        }
        "json" => {
            let parsed: Value =
                serde_json::from_str(&content).map_err(|e| InterpretError::Read {
                    path: path.to_string(),
                    message: format!("invalid JSON: {e}"),
                })?;
            let value = interpreter.interpolate_document(&parsed, ctx).await?;
            (value.to_string(), CONTENT_TYPE_JSON)
        }
        other => (content, content_type_for(other)),
    };

    ctx.update_response(|response| {
        response.set_default_header("content-type", content_type);
        response.body = Value::String(body);
    });
    Ok(())
}

/// Content type for files sent verbatim.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => CONTENT_TYPE_HTML,
        "json" => CONTENT_TYPE_JSON,
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "txt" | "csv" => "text/plain; charset=utf-8",
        "xml" => "application/xml; charset=utf-8",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
