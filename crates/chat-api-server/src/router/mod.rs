use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// One dispatchable pipeline handler. Handlers are their own final error
/// boundary: an `Err` escaping `handle` is logged by the router and turned
/// into "no response for this event", never surfaced to the receive loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<Option<Value>>;
}

struct Route {
    pattern: Regex,
    handler_id: String,
}

/// Ordered route table plus an explicit handler-id map. Both are built
/// once at startup; registration order is the tie-break when more than
/// one pattern could match.
#[derive(Default)]
pub struct EventRouter {
    routes: Vec<Route>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Patterns are matched in registration order.
    pub fn register(&mut self, pattern: &str, handler_id: &str) -> Result<()> {
        let compiled = Regex::new(pattern)
            .map_err(|err| anyhow!("Invalid route pattern '{}': {}", pattern, err))?;

        debug!("Registered route {} -> {}", pattern, handler_id);
        self.routes.push(Route {
            pattern: compiled,
            handler_id: handler_id.to_string(),
        });
        Ok(())
    }

    /// Bind a handler id to its implementation.
    pub fn bind(&mut self, handler_id: &str, handler: Arc<dyn EventHandler>) {
        debug!("Bound handler {}", handler_id);
        self.handlers.insert(handler_id.to_string(), handler);
    }

    /// Startup check: every registered route must resolve to a bound
    /// handler. A dangling id is a wiring bug, so the process refuses to
    /// come up rather than failing on the first matching event.
    pub fn validate(&self) -> Result<()> {
        for route in &self.routes {
            if !self.handlers.contains_key(&route.handler_id) {
                return Err(anyhow!(
                    "No handler bound for id '{}' (route '{}')",
                    route.handler_id,
                    route.pattern.as_str()
                ));
            }
        }
        Ok(())
    }

    /// Resolve `event_name` against the route table and invoke the first
    /// matching handler with the payload plus any named capture groups.
    ///
    /// Returns `Ok(None)` when no route matches (event names are
    /// client-controlled, so unknown ones are dropped silently) and when
    /// the matched handler failed (logged here, never propagated). The
    /// only `Err` is an unbound handler id, which is a configuration bug.
    pub async fn dispatch(&self, event_name: &str, mut payload: Value) -> Result<Option<Value>> {
        for route in &self.routes {
            let Some(captures) = route.pattern.captures(event_name) else {
                continue;
            };

            let handler = self.handlers.get(&route.handler_id).ok_or_else(|| {
                anyhow!(
                    "No handler bound for id '{}' matched by event '{}'",
                    route.handler_id,
                    event_name
                )
            })?;

            // Merge named capture groups into the payload so parameterized
            // routes (e.g. trailing task segments) reach the handler as
            // ordinary fields.
            if let Some(object) = payload.as_object_mut() {
                for name in route.pattern.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        object.insert(name.to_string(), Value::String(value.as_str().to_string()));
                    }
                }
            }

            debug!(
                "Event '{}' matched route '{}' (handler {})",
                event_name,
                route.pattern.as_str(),
                route.handler_id
            );

            return match handler.handle(payload).await {
                Ok(result) => Ok(result),
                Err(err) => {
                    error!(
                        "Handler {} failed for event '{}': {:#}",
                        route.handler_id, event_name, err
                    );
                    Ok(None)
                }
            };
        }

        debug!("No route registered for event '{}'", event_name);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        calls: AtomicUsize,
        last_payload: Mutex<Option<Value>>,
        fail: bool,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_payload: Mutex::new(None),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_payload: Mutex::new(None),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, payload: Value) -> Result<Option<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload);
            if self.fail {
                return Err(anyhow!("handler exploded"));
            }
            Ok(Some(json!({"ok": true})))
        }
    }

    fn router_with(routes: &[(&str, &str)], handlers: &[(&str, Arc<Recorder>)]) -> EventRouter {
        let mut router = EventRouter::new();
        for (pattern, id) in routes {
            router.register(pattern, id).unwrap();
        }
        for (id, handler) in handlers {
            router.bind(id, handler.clone() as Arc<dyn EventHandler>);
        }
        router
    }

    #[tokio::test]
    async fn test_dispatch_invokes_matching_handler_once() {
        let text = Recorder::new();
        let image = Recorder::new();
        let router = router_with(
            &[
                (r"^message/text/text_generation$", "text"),
                (r"^message/text/image_generation$", "image"),
            ],
            &[("text", text.clone()), ("image", image.clone())],
        );

        let result = router
            .dispatch("message/text/text_generation", json!({"text": "hi"}))
            .await
            .unwrap();

        assert!(result.is_some());
        assert_eq!(text.calls(), 1);
        assert_eq!(image.calls(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_event_is_silent_noop() {
        let text = Recorder::new();
        let router = router_with(
            &[(r"^message/text/text_generation$", "text")],
            &[("text", text.clone())],
        );

        let result = router.dispatch("message/video/upload", json!({})).await.unwrap();

        assert!(result.is_none());
        assert_eq!(text.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_registered_route_wins() {
        let first = Recorder::new();
        let second = Recorder::new();
        let router = router_with(
            &[
                (r"^message/text/.*$", "first"),
                (r"^message/text/text_generation$", "second"),
            ],
            &[("first", first.clone()), ("second", second.clone())],
        );

        router
            .dispatch("message/text/text_generation", json!({}))
            .await
            .unwrap();

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_named_captures_merged_into_payload() {
        let rag = Recorder::new();
        let router = router_with(
            &[(r"^message/[a-z]+/rag/(?P<task>[a-z_]+)$", "rag")],
            &[("rag", rag.clone())],
        );

        router
            .dispatch("message/text/rag/query", json!({"text": "q"}))
            .await
            .unwrap();

        let payload = rag.last_payload.lock().unwrap().clone().unwrap();
        assert_eq!(payload["task"], "query");
        assert_eq!(payload["text"], "q");
    }

    #[tokio::test]
    async fn test_handler_error_is_caught_and_converted_to_none() {
        let boom = Recorder::failing();
        let router = router_with(&[(r"^message/.*$", "boom")], &[("boom", boom.clone())]);

        let result = router.dispatch("message/text/x", json!({})).await.unwrap();

        assert!(result.is_none());
        assert_eq!(boom.calls(), 1);
    }

    #[tokio::test]
    async fn test_unbound_handler_id_is_fatal() {
        let mut router = EventRouter::new();
        router.register(r"^message/.*$", "ghost").unwrap();

        assert!(router.validate().is_err());
        assert!(router.dispatch("message/text/x", json!({})).await.is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut router = EventRouter::new();
        assert!(router.register(r"([unclosed", "x").is_err());
    }
}
