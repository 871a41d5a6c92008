use jsonsvr_core::{Route, RouteTable};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// An express-style path pattern: literal segments (case-insensitive),
/// `:name` parameters and `*` wildcards. A trailing `*` swallows the rest of
/// the path and binds it as parameter `0`. Empty segments are ignored, so
/// trailing slashes do not matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|segment| match segment {
                "*" => Segment::Wildcard,
                s if s.starts_with(':') && s.len() > 1 => Segment::Param(s[1..].to_string()),
                s => Segment::Literal(s.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = HashMap::new();

        for (idx, segment) in self.segments.iter().enumerate() {
            let last = idx + 1 == self.segments.len();
            match segment {
                Segment::Wildcard if last => {
                    let rest = parts.get(idx..).unwrap_or_default().join("/");
                    params.insert("0".to_string(), rest);
                    return Some(params);
                }
                Segment::Wildcard => {
                    parts.get(idx)?;
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), parts.get(idx)?.to_string());
                }
                Segment::Literal(literal) => {
                    if !parts.get(idx)?.eq_ignore_ascii_case(literal) {
                        return None;
                    }
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A route table with its paths compiled for matching.
#[derive(Debug, Default)]
pub struct ServiceRoutes {
    table: RouteTable,
    patterns: Vec<RoutePattern>,
}

#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
}

impl ServiceRoutes {
    pub fn compile(table: RouteTable) -> Self {
        let patterns = table
            .routes()
            .iter()
            .map(|route| RoutePattern::parse(&route.path))
            .collect();
        Self { table, patterns }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// First route, in definition order, whose method and path both match.
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        self.table
            .routes()
            .iter()
            .zip(&self.patterns)
            .filter(|(route, _)| route.method.matches(method))
            .find_map(|(route, pattern)| {
                pattern
                    .matches(path)
                    .map(|params| RouteMatch { route, params })
            })
    }
}

/// Holder for the active routes. Replacing swaps the whole table; requests
/// already in flight keep the `Arc` they started with.
#[derive(Debug, Clone, Default)]
pub struct RouteSlot {
    inner: Arc<RwLock<Arc<ServiceRoutes>>>,
}

impl RouteSlot {
    pub fn new(routes: ServiceRoutes) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(routes))),
        }
    }

    pub fn current(&self) -> Arc<ServiceRoutes> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, routes: ServiceRoutes) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(routes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("/greet", "/greet", true)]
    #[case("/greet", "/GREET/", true)]
    #[case("/greet", "/greet/x", false)]
    #[case("/", "/", true)]
    #[case("/", "/a", false)]
    #[case("/users/:id", "/users/42", true)]
    #[case("/users/:id", "/users", false)]
    #[case("/files/*", "/files/a/b.txt", true)]
    #[case("/files/*", "/files", true)]
    #[case("*", "/anything/at/all", true)]
    #[case("/a/*/c", "/a/b/c", true)]
    #[case("/a/*/c", "/a/c", false)]
    fn pattern_matching(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(RoutePattern::parse(pattern).matches(path).is_some(), expected);
    }

    #[test]
    fn params_are_bound() {
        let params = RoutePattern::parse("/users/:id/files/*")
            .matches("/users/7/files/docs/a.txt")
            .unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
        assert_eq!(params.get("0").map(String::as_str), Some("docs/a.txt"));
    }

    #[test]
    fn find_respects_method_and_order() {
        let table = RouteTable::from_value(&json!({
            "/items/:id": { "post": { "responseText": "post" } },
            "/items/special": { "get": { "responseText": "special" } },
            "/items/*": { "*": { "responseText": "any" } }
        }))
        .unwrap();
        let routes = ServiceRoutes::compile(table);

        let hit = routes.find("GET", "/items/special").unwrap();
        assert_eq!(hit.route.path, "/items/special");

        let hit = routes.find("POST", "/items/special").unwrap();
        assert_eq!(hit.route.path, "/items/:id");
        assert_eq!(hit.params.get("id").map(String::as_str), Some("special"));

        let hit = routes.find("DELETE", "/items/x").unwrap();
        assert_eq!(hit.route.path, "/items/*");

        assert!(routes.find("GET", "/other").is_none());
    }

    #[test]
    fn slot_swaps_without_touching_held_tables() {
        let first = RouteTable::from_value(&json!({ "/a": { "get": { "responseText": "a" } } })).unwrap();
        let second = RouteTable::from_value(&json!({ "/b": { "get": { "responseText": "b" } } })).unwrap();
        let slot = RouteSlot::new(ServiceRoutes::compile(first));

        let held = slot.current();
        slot.replace(ServiceRoutes::compile(second));

        assert!(held.find("GET", "/a").is_some());
        assert!(slot.current().find("GET", "/a").is_none());
        assert!(slot.current().find("GET", "/b").is_some());
    }
}
