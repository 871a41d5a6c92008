use crate::context::{Context, ResponseContext, lock};
use crate::error::{InterpretError, Result};
use crate::library;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, Module, Scope};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// One statement or an ordered list of statements.
///
/// Sequence elements keep their raw JSON form so that non-string entries can
/// be reported and skipped at execution time.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    statements: Vec<Value>,
}

impl Script {
    pub fn statement(code: impl Into<String>) -> Self {
        Self {
            statements: vec![Value::String(code.into())],
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self {
                statements: vec![value.clone()],
            }),
            Value::Array(items) => Some(Self {
                statements: items.clone(),
            }),
            _ => None,
        }
    }

    pub fn statements(&self) -> &[Value] {
        &self.statements
    }
}

/// Script engine behind every `${...}` placeholder, condition and script.
///
/// Snippets see `data`, `request` (alias `req`), `response` (alias `res`)
/// and whatever locals the expansion bound (`i`, `lineno`, `cols`, `col`).
/// Writes to `data` and `response` are committed back to the context after
/// each snippet; every other binding dies with the snippet.
pub struct Evaluator {
    engine: Engine,
}

impl Evaluator {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.on_print(|text| info!(target: "script", "{text}"));
        engine.on_debug(|text, source, pos| {
            debug!(target: "script", source = source.unwrap_or_default(), %pos, "{text}")
        });
        engine.register_static_module("lib", library::module().into());
        Self { engine }
    }

    /// Compile a script file and expose its functions as `name::fn(...)`.
    pub fn import_module(&mut self, name: &str, path: &Path) -> Result<()> {
        let source = path.display().to_string();
        let ast = self
            .engine
            .compile_file(path.to_path_buf())
            .map_err(|e| InterpretError::evaluation(&source, e.to_string()))?;
        let module = Module::eval_ast_as_new(Scope::new(), &ast, &self.engine)
            .map_err(|e| InterpretError::evaluation(&source, e.to_string()))?;
        self.engine.register_static_module(name, module.into());
        info!(module = name, path = %source, "script module imported");
        Ok(())
    }

    pub fn evaluate_expression(&self, code: &str, ctx: &Context) -> Result<Value> {
        let result = self.run(code, ctx, |engine, scope| {
            engine.eval_expression_with_scope::<Dynamic>(scope, code)
        })?;
        let value = from_dynamic::<Value>(&result).map_err(|e| {
            InterpretError::evaluation(code, format!("result is not JSON-compatible: {e}"))
        })?;
        debug!(expression = code, result = %value, "expression evaluated");
        Ok(value)
    }

    pub fn execute_statements(&self, script: &Script, ctx: &Context) -> Result<()> {
        for statement in script.statements() {
            let Some(code) = statement.as_str() else {
                warn!(statement = %statement, "invalid statement skipped");
                continue;
            };
            self.run(code, ctx, |engine, scope| {
                engine.run_with_scope(scope, code).map(|()| Dynamic::UNIT)
            })?;
            debug!(statement = code, "statement executed");
        }
        Ok(())
    }

    fn run<F>(&self, code: &str, ctx: &Context, exec: F) -> Result<Dynamic>
    where
        F: FnOnce(&Engine, &mut Scope) -> std::result::Result<Dynamic, Box<EvalAltResult>>,
    {
        // Held for the whole snippet: one writer at a time on the shared bag.
        let mut data = lock(ctx.data());
        let response = ctx.response();

        let mut scope = Scope::new();
        scope.push_dynamic("data", encode(code, "data", &*data)?);
        let request = encode(code, "request", ctx.request())?;
        scope.push_dynamic("request", request.clone());
        scope.push_dynamic("req", request);
        let handle = encode(code, "response", &response)?;
        scope.push_dynamic("response", handle.clone());
        scope.push_dynamic("res", handle);
        for (name, value) in ctx.locals() {
            scope.push_dynamic(name.as_str(), encode(code, name, value)?);
        }

        // Writes made before a runtime error still land.
        let outcome = exec(&self.engine, &mut scope);

        if let Some(updated) = scope.get_value::<Dynamic>("data") {
            match from_dynamic::<Value>(&updated) {
                Ok(Value::Object(map)) => *data = map,
                Ok(_) => warn!(code, "`data` replaced by a non-object value; change discarded"),
                Err(e) => {
                    return Err(InterpretError::evaluation(
                        code,
                        format!("`data` is no longer JSON-compatible: {e}"),
                    ));
                }
            }
        }
        drop(data);

        for name in ["res", "response"] {
            let Some(updated) = scope.get_value::<Dynamic>(name) else {
                continue;
            };
            let updated = from_dynamic::<ResponseContext>(&updated).map_err(|e| {
                InterpretError::evaluation(code, format!("invalid `{name}` handle: {e}"))
            })?;
            if updated != response {
                ctx.set_response(updated);
                break;
            }
        }

        outcome.map_err(|e| InterpretError::evaluation(code, e.to_string()))
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn encode<T: serde::Serialize + ?Sized>(code: &str, name: &str, value: &T) -> Result<Dynamic> {
    to_dynamic(value)
        .map_err(|e| InterpretError::evaluation(code, format!("cannot expose `{name}`: {e}")))
}
