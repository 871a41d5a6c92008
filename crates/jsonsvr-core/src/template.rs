use crate::context::Context;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::value::display_value;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{(.*?)\}").expect("placeholder pattern is valid"))
}

pub fn has_placeholder(text: &str) -> bool {
    placeholder().is_match(text)
}

/// Substitute every `${expr}` in `text`.
///
/// A string that is exactly one placeholder yields the evaluated value with
/// its native type. Otherwise each placeholder is replaced, left to right, by
/// the string form of its value and the result is a string. The first `}`
/// closes a placeholder.
pub fn expand(evaluator: &Evaluator, text: &str, ctx: &Context) -> Result<Value> {
    let re = placeholder();
    let Some(first) = re.captures(text) else {
        return Ok(Value::String(text.to_string()));
    };

    let whole = first.get(0).map(|m| m.start() == 0 && m.end() == text.len());
    if whole == Some(true) {
        let code = first.get(1).map(|m| m.as_str()).unwrap_or_default();
        return evaluator.evaluate_expression(code, ctx);
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let (Some(span), Some(code)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&text[last..span.start()]);
        let value = evaluator.evaluate_expression(code.as_str(), ctx)?;
        out.push_str(&display_value(&value));
        last = span.end();
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::lock;
    use rstest::rstest;
    use serde_json::json;

    fn ctx() -> Context {
        let ctx = Context::detached();
        {
            let mut data = lock(ctx.data());
            data.insert("name".to_string(), json!("Ada"));
            data.insert("age".to_string(), json!(36));
            data.insert("tags".to_string(), json!(["x", "y"]));
        }
        ctx
    }

    #[rstest]
    #[case("plain text")]
    #[case("")]
    #[case("$ {not} a placeholder")]
    #[case("{}")]
    fn placeholder_free_strings_are_unchanged(#[case] text: &str) {
        let out = expand(&Evaluator::new(), text, &ctx()).unwrap();
        assert_eq!(out, json!(text));
    }

    #[rstest]
    #[case("${data.age}", json!(36))]
    #[case("${data.age > 30}", json!(true))]
    #[case("${data.tags}", json!(["x", "y"]))]
    #[case("${data.name}", json!("Ada"))]
    #[case("${()}", json!(null))]
    fn whole_placeholder_keeps_native_type(#[case] text: &str, #[case] expected: Value) {
        let out = expand(&Evaluator::new(), text, &ctx()).unwrap();
        assert_eq!(out, expected);
    }

    #[rstest]
    #[case("Hello, ${data.name}", "Hello, Ada")]
    #[case("${data.name} is ${data.age}", "Ada is 36")]
    #[case("${1}${2}", "12")]
    #[case("total: ${1.5 * 2.0}", "total: 3")]
    fn mixed_mode_produces_text(#[case] text: &str, #[case] expected: &str) {
        let out = expand(&Evaluator::new(), text, &ctx()).unwrap();
        assert_eq!(out, json!(expected));
    }

    #[test]
    fn first_closing_brace_ends_the_placeholder() {
        let evaluator = Evaluator::new();
        let err = expand(&evaluator, "${#{a: 1}.a}", &ctx()).expect_err("`#{a: 1` is cut short");
        assert!(matches!(err, crate::InterpretError::Evaluation { .. }));
    }

    #[test]
    fn evaluation_errors_propagate() {
        let err = expand(&Evaluator::new(), "x ${nope} y", &ctx()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
