use crate::context::Context;
use crate::engine::Interpreter;
use crate::error::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::warn;

/// Key prefix that turns an object into a command invocation.
pub const COMMAND_SIGIL: char = '$';

impl Interpreter {
    /// Recursively expand a JSON value against `ctx`.
    ///
    /// `Ok(None)` means the value is omitted: an object drops the key, an
    /// array stores `null` in its place.
    pub fn interpolate<'a>(
        &'a self,
        value: &'a Value,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        async move {
            match value {
                Value::Object(map) => {
                    if let Some((command, body)) =
                        map.iter().find(|(k, _)| k.starts_with(COMMAND_SIGIL))
                    {
                        if map.len() > 1 {
                            warn!(command = %command, "keys next to a command are ignored");
                        }
                        return self.process_command(command, body, ctx).await;
                    }

                    let mut out = Map::with_capacity(map.len());
                    for (key, item) in map {
                        if let Some(item) = self.interpolate(item, ctx).await? {
                            out.insert(key.clone(), item);
                        }
                    }
                    Ok(Some(Value::Object(out)))
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.interpolate(item, ctx).await?.unwrap_or(Value::Null));
                    }
                    Ok(Some(Value::Array(out)))
                }
                Value::String(text) => self.expand(text, ctx).map(Some),
                other => Ok(Some(other.clone())),
            }
        }
        .boxed()
    }

    /// Like [`Interpreter::interpolate`], with an omitted document read as `null`.
    pub async fn interpolate_document(&self, value: &Value, ctx: &Context) -> Result<Value> {
        Ok(self.interpolate(value, ctx).await?.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{Context, lock};
    use crate::engine::Interpreter;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn ctx() -> Context {
        let ctx = Context::detached();
        lock(ctx.data()).insert("name".to_string(), json!("Ada"));
        ctx
    }

    #[rstest]
    #[case(json!({"a": 1, "b": [true, null, 2.5], "c": {"d": "text"}}))]
    #[case(json!([1, "two", {"three": 3}]))]
    #[case(json!("plain"))]
    #[case(json!(null))]
    #[tokio::test]
    async fn resolved_values_are_unchanged(#[case] value: Value) {
        let interpreter = Interpreter::new();
        let out = interpreter.interpolate(&value, &ctx()).await.unwrap();
        assert_eq!(out, Some(value));
    }

    #[tokio::test]
    async fn strings_expand_at_any_depth() {
        let interpreter = Interpreter::new();
        let template = json!({
            "greeting": "Hello, ${data.name}",
            "nested": { "list": ["${data.name}", "${1 + 1}"] }
        });

        let out = interpreter.interpolate_document(&template, &ctx()).await.unwrap();
        assert_eq!(
            out,
            json!({ "greeting": "Hello, Ada", "nested": { "list": ["Ada", 2] } })
        );
    }

    #[tokio::test]
    async fn command_replaces_its_object_and_siblings_are_ignored() {
        let interpreter = Interpreter::new();
        let template = json!({
            "items": { "$array": { "count": 2, "element": "${i}" }, "ignored": true }
        });

        let out = interpreter.interpolate_document(&template, &ctx()).await.unwrap();
        assert_eq!(out, json!({ "items": [0, 1] }));
    }

    #[tokio::test]
    async fn omitted_values_drop_keys_and_null_array_slots() {
        let interpreter = Interpreter::new();
        let ctx = ctx();
        let template = json!({
            "kept": 1,
            "gone": { "$exec": "data.touched = true" },
            "list": [{ "$if": { "condition": false, "then": "x" } }, 2]
        });

        let out = interpreter.interpolate_document(&template, &ctx).await.unwrap();
        assert_eq!(out, json!({ "kept": 1, "list": [null, 2] }));
        assert_eq!(lock(ctx.data()).get("touched"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn false_if_without_else_drops_its_key() {
        let interpreter = Interpreter::new();
        let template = json!({ "k": { "$if": { "condition": false, "then": 1 } } });

        let out = interpreter.interpolate_document(&template, &ctx()).await.unwrap();
        assert_eq!(out, json!({}));
    }

    #[tokio::test]
    async fn unknown_commands_pass_through() {
        let interpreter = Interpreter::new();
        let template = json!({ "wrapped": { "$nope": { "x": "${1}" } } });

        let out = interpreter.interpolate_document(&template, &ctx()).await.unwrap();
        assert_eq!(out, json!({ "wrapped": { "$nope": { "x": "${1}" } } }));
    }
}
