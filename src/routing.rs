//! Request routing: match a parsed request against per-backend rules.
//!
//! `read_resource` requests route on `params.uri` through each backend's
//! URI prefixes and then its regexes; `call_tool` requests route on
//! `params.name` through exact tool-name membership. Backends are tried
//! in declaration order and the first match wins; any other method
//! routes nowhere.

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::config::BackendConfig;
use crate::envelope::RpcRequest;
use crate::error::RouteError;

/// Method routed on `params.uri`.
pub const METHOD_READ_RESOURCE: &str = "read_resource";
/// Method routed on `params.name`.
pub const METHOD_CALL_TOOL: &str = "call_tool";

struct CompiledBackend {
    name: String,
    resource_prefixes: Vec<String>,
    resource_regexes: Vec<Regex>,
    tool_names: Vec<String>,
}

impl CompiledBackend {
    fn serves_resource(&self, uri: &str) -> bool {
        self.resource_prefixes
            .iter()
            .any(|prefix| uri.starts_with(prefix.as_str()))
            || self.resource_regexes.iter().any(|re| re.is_match(uri))
    }

    fn serves_tool(&self, name: &str) -> bool {
        self.tool_names.iter().any(|tool| tool == name)
    }
}

/// Routing table compiled from the backend declarations.
pub struct Router {
    backends: Vec<CompiledBackend>,
}

impl Router {
    /// Compile routing rules. Fails on the first invalid regex.
    pub fn new(backends: &[BackendConfig]) -> Result<Self, RouteError> {
        let mut compiled = Vec::with_capacity(backends.len());
        for backend in backends {
            let mut resource_regexes = Vec::with_capacity(backend.resource_regexes.len());
            for pattern in &backend.resource_regexes {
                let regex = Regex::new(pattern).map_err(|source| RouteError::InvalidRegex {
                    backend: backend.name.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
                resource_regexes.push(regex);
            }
            compiled.push(CompiledBackend {
                name: backend.name.clone(),
                resource_prefixes: backend.resource_prefixes.clone(),
                resource_regexes,
                tool_names: backend.tool_names.clone(),
            });
        }
        Ok(Self { backends: compiled })
    }

    /// Select a backend for `method`/`params`, returning its declaration
    /// index. `None` means no backend serves this request.
    pub fn route(&self, method: &str, params: &Value) -> Option<usize> {
        let index = match method {
            METHOD_READ_RESOURCE => {
                let uri = params.get("uri")?.as_str()?;
                self.backends.iter().position(|b| b.serves_resource(uri))
            }
            METHOD_CALL_TOOL => {
                let name = params.get("name")?.as_str()?;
                self.backends.iter().position(|b| b.serves_tool(name))
            }
            _ => None,
        };
        if let Some(i) = index {
            trace!(method, backend = %self.backends[i].name, "routed request");
        }
        index
    }

    /// Convenience wrapper over [`route`](Self::route).
    pub fn route_request(&self, request: &RpcRequest) -> Option<usize> {
        self.route(&request.method, &request.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            address: "127.0.0.1:7000".to_string(),
            pool: Default::default(),
            resource_prefixes: Vec::new(),
            resource_regexes: Vec::new(),
            tool_names: Vec::new(),
        }
    }

    fn router_with_two_backends() -> Router {
        let mut x = backend("x");
        x.resource_prefixes = vec!["cache://".to_string()];
        let mut y = backend("y");
        y.tool_names = vec!["echo".to_string()];
        Router::new(&[x, y]).unwrap()
    }

    #[test]
    fn routes_resources_by_prefix() {
        let router = router_with_two_backends();
        let params = json!({"uri": "cache://foo"});
        assert_eq!(router.route(METHOD_READ_RESOURCE, &params), Some(0));
    }

    #[test]
    fn routes_tools_by_exact_name() {
        let router = router_with_two_backends();
        assert_eq!(
            router.route(METHOD_CALL_TOOL, &json!({"name": "echo"})),
            Some(1)
        );
        assert_eq!(router.route(METHOD_CALL_TOOL, &json!({"name": "echo2"})), None);
    }

    #[test]
    fn unrouted_methods_match_nothing() {
        let router = router_with_two_backends();
        assert_eq!(router.route("ping", &json!({})), None);
        assert_eq!(router.route("list_resources", &json!({})), None);
    }

    #[test]
    fn missing_or_nonstring_params_match_nothing() {
        let router = router_with_two_backends();
        assert_eq!(router.route(METHOD_READ_RESOURCE, &json!({})), None);
        assert_eq!(router.route(METHOD_READ_RESOURCE, &json!({"uri": 5})), None);
        assert_eq!(router.route(METHOD_CALL_TOOL, &json!({})), None);
    }

    #[test]
    fn regex_rules_apply_after_prefixes() {
        let mut a = backend("a");
        a.resource_regexes = vec!["^db://[a-z]+/[0-9]+$".to_string()];
        let mut b = backend("b");
        b.resource_prefixes = vec!["db://".to_string()];
        let router = Router::new(&[a, b]).unwrap();

        // The regex backend is declared first, so it wins when it matches.
        assert_eq!(
            router.route(METHOD_READ_RESOURCE, &json!({"uri": "db://users/42"})),
            Some(0)
        );
        // Otherwise the prefix backend picks it up.
        assert_eq!(
            router.route(METHOD_READ_RESOURCE, &json!({"uri": "db://users/abc"})),
            Some(1)
        );
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let mut first = backend("first");
        first.tool_names = vec!["shared".to_string()];
        let mut second = backend("second");
        second.tool_names = vec!["shared".to_string()];
        let router = Router::new(&[first, second]).unwrap();
        assert_eq!(
            router.route(METHOD_CALL_TOOL, &json!({"name": "shared"})),
            Some(0)
        );
    }

    #[test]
    fn invalid_regex_fails_compilation() {
        let mut broken = backend("broken");
        broken.resource_regexes = vec!["[unclosed".to_string()];
        assert!(matches!(
            Router::new(&[broken]),
            Err(RouteError::InvalidRegex { .. })
        ));
    }
}
