use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide data bag shared by every request and script.
pub type SharedData = Arc<Mutex<Map<String, Value>>>;

pub fn shared_data() -> SharedData {
    Arc::new(Mutex::new(Map::new()))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    #[serde(default = "default_status_ok")]
    pub status: u16,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub redirect: Option<String>,
}

fn default_status_ok() -> u16 {
    200
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self {
            status: default_status_ok(),
            headers: Map::new(),
            body: Value::Null,
            redirect: None,
        }
    }
}

impl ResponseContext {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn set_header(&mut self, name: &str, value: Value) {
        let existing = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        self.headers.insert(existing.unwrap_or_else(|| name.to_string()), value);
    }

    pub fn set_default_header(&mut self, name: &str, value: &str) {
        if self.header(name).is_none() {
            self.headers
                .insert(name.to_string(), Value::String(value.to_string()));
        }
    }
}

/// Evaluation environment for one request.
///
/// Cloning is cheap: `data` and the response handle are shared between
/// clones, only the ephemeral locals are copied.
#[derive(Debug, Clone)]
pub struct Context {
    data: SharedData,
    request: Arc<RequestContext>,
    response: Arc<Mutex<ResponseContext>>,
    locals: Map<String, Value>,
}

impl Context {
    pub fn new(data: SharedData, request: RequestContext) -> Self {
        Self {
            data,
            request: Arc::new(request),
            response: Arc::new(Mutex::new(ResponseContext::default())),
            locals: Map::new(),
        }
    }

    /// A context with its own empty data bag and a blank request.
    pub fn detached() -> Self {
        Self::new(shared_data(), RequestContext::default())
    }

    pub fn data(&self) -> &SharedData {
        &self.data
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn response(&self) -> ResponseContext {
        lock(&self.response).clone()
    }

    pub fn set_response(&self, response: ResponseContext) {
        *lock(&self.response) = response;
    }

    pub fn update_response<R>(&self, f: impl FnOnce(&mut ResponseContext) -> R) -> R {
        f(&mut lock(&self.response))
    }

    pub fn locals(&self) -> &Map<String, Value> {
        &self.locals
    }

    pub fn with_local(&self, name: &str, value: Value) -> Self {
        self.with_locals([(name, value)])
    }

    pub fn with_locals<'n>(&self, bindings: impl IntoIterator<Item = (&'n str, Value)>) -> Self {
        let mut child = self.clone();
        for (name, value) in bindings {
            child.locals.insert(name.to_string(), value);
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn locals_do_not_leak_into_parent() {
        let ctx = Context::detached();
        let child = ctx.with_local("i", json!(3));
        assert_eq!(child.locals().get("i"), Some(&json!(3)));
        assert!(ctx.locals().is_empty());
    }

    #[test]
    fn clones_share_data_and_response() {
        let ctx = Context::detached();
        let child = ctx.with_local("i", json!(0));
        lock(child.data()).insert("seen".to_string(), json!(true));
        child.update_response(|r| r.status = 201);

        assert_eq!(lock(ctx.data()).get("seen"), Some(&json!(true)));
        assert_eq!(ctx.response().status, 201);
    }

    #[test]
    fn header_helpers_ignore_case() {
        let mut response = ResponseContext::default();
        response.set_header("Content-Type", json!("text/plain"));
        response.set_default_header("content-type", "text/html");
        response.set_header("CONTENT-TYPE", json!("application/json"));

        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.header("content-type"), Some(&json!("application/json")));
    }
}
