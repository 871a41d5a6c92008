use crate::context::Context;
use crate::engine::Interpreter;
use crate::error::{InterpretError, Result};
use crate::evaluator::Script;
use crate::template::has_placeholder;
use crate::value::{display_value, is_truthy};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Largest element count `$array` will produce.
pub const MAX_ARRAY_COUNT: usize = 100_000;

/// A command expander. `Ok(None)` omits the command's value.
pub type CommandHandler = for<'a> fn(
    &'a Interpreter,
    &'a Value,
    &'a Context,
) -> BoxFuture<'a, Result<Option<Value>>>;

pub struct Commands {
    handlers: HashMap<String, CommandHandler>,
}

impl Commands {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, CommandHandler> = HashMap::new();
        handlers.insert("$array".into(), cmd_array as CommandHandler);
        handlers.insert("$csv".into(), cmd_csv as CommandHandler);
        handlers.insert("$exec".into(), cmd_exec as CommandHandler);
        handlers.insert("$if".into(), cmd_if as CommandHandler);
        Self { handlers }
    }

    pub fn get(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).copied()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: CommandHandler,
    ) -> Option<CommandHandler> {
        self.handlers.insert(name.into(), handler)
    }
}

impl Default for Commands {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Run the command named by a sigil key against its descriptor.
    pub async fn process_command(
        &self,
        name: &str,
        body: &Value,
        ctx: &Context,
    ) -> Result<Option<Value>> {
        let Some(handler) = self.commands().get(name) else {
            warn!(command = name, "unrecognized command");
            let mut raw = Map::new();
            raw.insert(name.to_string(), body.clone());
            return Ok(Some(Value::Object(raw)));
        };
        debug!(command = name, "processing command");
        handler(self, body, ctx).await
    }
}

fn descriptor<'a>(command: &str, body: &'a Value) -> Result<&'a Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| InterpretError::malformed(command, "expected an object descriptor"))
}

fn require<'a>(command: &str, desc: &'a Map<String, Value>, field: &str) -> Result<&'a Value> {
    desc.get(field)
        .ok_or_else(|| InterpretError::malformed(command, format!("`{field}` is required")))
}

/// Expand an element for one iteration. Object, array and string elements
/// are re-interpolated; anything else is repeated as-is.
async fn expand_element(
    interp: &Interpreter,
    element: &Value,
    ctx: &Context,
) -> Result<Value> {
    match element {
        Value::Object(_) | Value::Array(_) | Value::String(_) => Ok(interp
            .interpolate(element, ctx)
            .await?
            .unwrap_or(Value::Null)),
        other => Ok(other.clone()),
    }
}

fn cmd_array<'a>(
    interp: &'a Interpreter,
    body: &'a Value,
    ctx: &'a Context,
) -> BoxFuture<'a, Result<Option<Value>>> {
    async move {
        let desc = descriptor("$array", body)?;
        let count = require("$array", desc, "count")?;
        let element = require("$array", desc, "element")?;

        let count = array_count(interp, count, ctx)?;
        if count > MAX_ARRAY_COUNT {
            return Err(InterpretError::malformed(
                "$array",
                format!("`count` {count} exceeds the limit of {MAX_ARRAY_COUNT}"),
            ));
        }
        let mut out = Vec::with_capacity(count.min(1024));
        for i in 0..count {
            let scoped = ctx.with_local("i", json!(i));
            out.push(expand_element(interp, element, &scoped).await?);
        }
        Ok(Some(Value::Array(out)))
    }
    .boxed()
}

/// `count` is a number or an expression evaluated once in the outer context.
fn array_count(interp: &Interpreter, count: &Value, ctx: &Context) -> Result<usize> {
    let resolved = match count {
        Value::String(code) if has_placeholder(code) => interp.expand(code, ctx)?,
        Value::String(code) => match code.trim().parse::<f64>() {
            Ok(n) => json!(n),
            Err(_) => interp.evaluator().evaluate_expression(code, ctx)?,
        },
        other => other.clone(),
    };

    match &resolved {
        Value::Number(n) => Ok(n.as_f64().map(ceil_count).unwrap_or(0)),
        Value::Bool(b) => Ok(usize::from(*b)),
        Value::Null => Ok(0),
        Value::String(s) => s.trim().parse::<f64>().map(ceil_count).map_err(|_| {
            InterpretError::malformed("$array", format!("`count` is not a number: {s:?}"))
        }),
        other => Err(InterpretError::malformed(
            "$array",
            format!("`count` is not a number: {other}"),
        )),
    }
}

fn ceil_count(n: f64) -> usize {
    if n.is_nan() || n <= 0.0 {
        0
    } else {
        n.ceil() as usize
    }
}

fn cmd_csv<'a>(
    interp: &'a Interpreter,
    body: &'a Value,
    ctx: &'a Context,
) -> BoxFuture<'a, Result<Option<Value>>> {
    async move {
        let desc = descriptor("$csv", body)?;
        let file = require("$csv", desc, "file")?;
        let element = require("$csv", desc, "element")?;

        let path = match file {
            Value::String(path) => display_value(&interp.expand(path, ctx)?),
            _ => return Err(InterpretError::malformed("$csv", "`file` must be a string")),
        };
        let delimiter = match desc.get("delimiter") {
            Some(Value::String(d)) if !d.is_empty() => d.as_str(),
            _ => ",",
        };
        let first_line_header = desc.get("firstLineHeader").is_some_and(is_truthy);
        let mut headers: Vec<String> = match desc.get("headers") {
            Some(Value::Array(names)) => names.iter().map(display_value).collect(),
            _ => Vec::new(),
        };

        let content = interp.read_file(&path).await?;
        let mut rows = Vec::new();
        let mut header_pending = first_line_header;

        for (idx, line) in content.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            let cols: Vec<String> = line.split(delimiter).map(str::to_string).collect();
            if header_pending {
                headers = cols;
                header_pending = false;
                continue;
            }

            let col: Map<String, Value> = headers
                .iter()
                .zip(cols.iter())
                .map(|(h, c)| (h.clone(), Value::String(c.clone())))
                .collect();
            let scoped = ctx.with_locals([
                ("lineno", json!(idx + 1)),
                ("cols", json!(cols)),
                ("col", Value::Object(col)),
            ]);
            rows.push(expand_element(interp, element, &scoped).await?);
        }

        debug!(file = %path, rows = rows.len(), "csv expanded");
        Ok(Some(Value::Array(rows)))
    }
    .boxed()
}

fn cmd_exec<'a>(
    interp: &'a Interpreter,
    body: &'a Value,
    ctx: &'a Context,
) -> BoxFuture<'a, Result<Option<Value>>> {
    async move {
        let script = Script::from_value(body).ok_or_else(|| {
            InterpretError::malformed("$exec", "expected a statement or a list of statements")
        })?;
        interp.evaluator().execute_statements(&script, ctx)?;
        Ok(None)
    }
    .boxed()
}

fn cmd_if<'a>(
    interp: &'a Interpreter,
    body: &'a Value,
    ctx: &'a Context,
) -> BoxFuture<'a, Result<Option<Value>>> {
    async move {
        let desc = descriptor("$if", body)?;
        let condition = require("$if", desc, "condition")?;
        let then = require("$if", desc, "then")?;

        let condition = match condition {
            Value::String(text) => interp.expand(text, ctx)?,
            other => other.clone(),
        };
        let branch = if is_truthy(&condition) {
            then
        } else {
            match desc.get("else") {
                Some(otherwise) => otherwise,
                None => return Ok(None),
            }
        };
        interp.interpolate(branch, ctx).await
    }
    .boxed()
}
