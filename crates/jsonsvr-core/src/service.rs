//! Service definition model.
//!
//! A service file maps URL paths to methods, and each method to one rule or
//! an ordered list of rules:
//!
//! ```json
//! {
//!   "/greet": {
//!     "get": [
//!       { "condition": "request.query.name == ()", "errorResponse": 400 },
//!       { "responseText": "Hello, ${request.query.name}" }
//!     ]
//!   }
//! }
//! ```
//!
//! Tables are immutable once built; reloading produces a new table.

use crate::error::ServiceError;
use crate::evaluator::Script;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{info, warn};

/// Rule fields that hold code rather than template text.
const SCRIPT_FIELDS: [&str; 3] = ["condition", "preScript", "postScript"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    Any,
}

impl RouteMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "delete" => Some(Self::Delete),
            "patch" => Some(Self::Patch),
            "options" => Some(Self::Options),
            "head" => Some(Self::Head),
            "*" | "all" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Any => "*",
        }
    }

    /// Whether a request with this HTTP method is served by the entry.
    /// `GET` entries also answer `HEAD`.
    pub fn matches(&self, method: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Get => {
                method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
            }
            other => method.eq_ignore_ascii_case(other.as_str()),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conditional response recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    definition: Map<String, Value>,
    condition: Option<String>,
    pre_script: Option<Script>,
    post_script: Option<Script>,
}

impl Rule {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let Value::Object(definition) = value else {
            return Err("a rule must be a JSON object".to_string());
        };

        let condition = match definition.get("condition") {
            None | Some(Value::Null) => None,
            Some(Value::String(code)) => Some(code.clone()),
            Some(other) => Some(other.to_string()),
        };
        let pre_script = script_field(definition, "preScript")?;
        let post_script = script_field(definition, "postScript")?;

        Ok(Self {
            definition: definition.clone(),
            condition,
            pre_script,
            post_script,
        })
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn pre_script(&self) -> Option<&Script> {
        self.pre_script.as_ref()
    }

    pub fn post_script(&self) -> Option<&Script> {
        self.post_script.as_ref()
    }

    pub fn definition(&self) -> &Map<String, Value> {
        &self.definition
    }

    /// The rule without its code fields, ready for interpolation.
    pub fn template(&self) -> Value {
        let fields = self
            .definition
            .iter()
            .filter(|(k, _)| !SCRIPT_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(fields)
    }
}

fn script_field(definition: &Map<String, Value>, name: &str) -> Result<Option<Script>, String> {
    match definition.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Script::from_value(value)
            .map(Some)
            .ok_or_else(|| format!("`{name}` must be a statement or a list of statements")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub path: String,
    pub method: RouteMethod,
    pub rules: Vec<Rule>,
}

/// Ordered routes of one service definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_json_str(text: &str) -> Result<Self, ServiceError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ServiceError> {
        let Value::Object(paths) = value else {
            return Err(ServiceError::NotAnObject);
        };

        let mut routes = Vec::new();
        for (path, methods) in paths {
            if path.starts_with('$') {
                continue;
            }
            let Value::Object(methods) = methods else {
                return Err(ServiceError::InvalidRoute { path: path.clone() });
            };

            for (name, entry) in methods {
                let Some(method) = RouteMethod::parse(name) else {
                    warn!(path = %path, method = %name, "unknown method skipped");
                    continue;
                };
                let entries = match entry {
                    Value::Array(items) => items.iter().collect::<Vec<_>>(),
                    single => vec![single],
                };
                let rules = entries
                    .into_iter()
                    .map(Rule::from_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|message| ServiceError::InvalidRule {
                        path: path.clone(),
                        method: method.to_string(),
                        message,
                    })?;

                info!(path = %path, method = %method, rules = rules.len(), "route registered");
                routes.push(Route {
                    path: path.clone(),
                    method,
                    rules,
                });
            }
        }

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.routes.iter().any(|r| r.path == path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("GET", Some(RouteMethod::Get))]
    #[case("post", Some(RouteMethod::Post))]
    #[case("*", Some(RouteMethod::Any))]
    #[case("fetch", None)]
    fn method_names(#[case] name: &str, #[case] expected: Option<RouteMethod>) {
        assert_eq!(RouteMethod::parse(name), expected);
    }

    #[test]
    fn get_answers_head_and_any_answers_all() {
        assert!(RouteMethod::Get.matches("HEAD"));
        assert!(RouteMethod::Get.matches("get"));
        assert!(!RouteMethod::Post.matches("GET"));
        assert!(RouteMethod::Any.matches("DELETE"));
    }

    #[test]
    fn table_keeps_definition_order() {
        let table = RouteTable::from_value(&json!({
            "$comment": "ignored",
            "/b": { "get": { "responseText": "b" } },
            "/a": {
                "post": [ { "condition": "false", "errorResponse": 400 }, { "responseText": "a" } ],
                "brew": { "responseText": "teapot" }
            }
        }))
        .unwrap();

        let routes = table.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].path, "/b");
        assert_eq!(routes[1].method, RouteMethod::Post);
        assert_eq!(routes[1].rules.len(), 2);
        assert_eq!(routes[1].rules[0].condition(), Some("false"));
        assert!(table.has_path("/a"));
        assert!(!table.has_path("/"));
    }

    #[test]
    fn template_leaves_out_code_fields() {
        let rule = Rule::from_value(&json!({
            "condition": "true",
            "preScript": "data.x = `${1}`",
            "postScript": ["data.y = 1"],
            "responseText": "${data.x}",
            "headers": { "x-a": "b" }
        }))
        .unwrap();

        assert_eq!(
            rule.template(),
            json!({ "responseText": "${data.x}", "headers": { "x-a": "b" } })
        );
        assert_eq!(rule.pre_script().map(|s| s.statements().len()), Some(1));
        assert_eq!(rule.post_script().map(|s| s.statements().len()), Some(1));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            RouteTable::from_value(&json!([])),
            Err(ServiceError::NotAnObject)
        ));
        assert!(matches!(
            RouteTable::from_value(&json!({ "/x": "nope" })),
            Err(ServiceError::InvalidRoute { .. })
        ));
        assert!(matches!(
            RouteTable::from_value(&json!({ "/x": { "get": [1] } })),
            Err(ServiceError::InvalidRule { .. })
        ));
        assert!(matches!(
            RouteTable::from_value(&json!({ "/x": { "get": { "preScript": 3 } } })),
            Err(ServiceError::InvalidRule { .. })
        ));
        assert!(matches!(
            RouteTable::from_json_str("{"),
            Err(ServiceError::Json(_))
        ));
    }
}
