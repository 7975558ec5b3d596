//! Address-pattern → callback registry.
//!
//! The `HandlerRegistry` is a cheap-to-clone handle: the endpoint keeps one
//! copy for registration and its receive loop dispatches through another.
//!
//! # Dispatch rules
//!
//! - Every entry whose pattern matches the incoming address runs.
//! - Entries run in registration order, synchronously, on the receive loop.
//! - Registering the same pattern twice keeps both callbacks.
//! - A panicking callback is caught and logged; later callbacks still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, trace};

use oscb_protocol::{AddressPattern, Atom, Message};

use crate::error::Result;

/// Callback invoked with the message address and its arguments.
pub type Handler = Arc<dyn Fn(&str, &[Atom]) + Send + Sync>;

struct Entry {
    pattern: AddressPattern,
    handler: Handler,
}

/// Ordered list of handlers shared between registration and dispatch.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: Arc<RwLock<Vec<Arc<Entry>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `callback` for every address matching `pattern`.
    ///
    /// # Errors
    ///
    /// - `BridgeError::InvalidPattern` if the pattern does not compile
    pub fn register<F>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, &[Atom]) + Send + Sync + 'static,
    {
        let entry = Arc::new(Entry {
            pattern: AddressPattern::parse(pattern)?,
            handler: Arc::new(callback),
        });
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        trace!(pattern, "Handler registered");
        Ok(())
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.handler_count() == 0
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Removes every handler registered under exactly `pattern`, returning
    /// how many were removed.
    pub fn unregister(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.pattern.as_str() != pattern);
        before - entries.len()
    }

    /// Runs every handler matching `address`. Returns how many matched.
    pub fn dispatch(&self, address: &str, args: &[Atom]) -> usize {
        // Snapshot so callbacks may register handlers without deadlocking.
        let matching: Vec<Arc<Entry>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.pattern.matches(address))
            .cloned()
            .collect();

        for entry in &matching {
            let handler = &entry.handler;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(address, args)));
            if let Err(payload) = outcome {
                error!(
                    address,
                    pattern = %entry.pattern,
                    panic = panic_message(payload.as_ref()),
                    "Handler panicked; continuing"
                );
            }
        }

        matching.len()
    }

    pub fn dispatch_message(&self, message: &Message) -> usize {
        self.dispatch(&message.address, &message.args)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_list()
            .entries(entries.iter().map(|entry| entry.pattern.as_str()))
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use oscb_protocol::atoms;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&str, &[Atom]) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |tag: &str| {
            let sink = Arc::clone(&sink);
            let tag = tag.to_string();
            Box::new(move |addr: &str, _: &[Atom]| {
                sink.lock().unwrap().push(format!("{tag}:{addr}"));
            }) as Box<dyn Fn(&str, &[Atom]) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_literal_handler_only_sees_its_address() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.register("/test/m4l", make("h")).unwrap();

        assert_eq!(registry.dispatch("/test/m4l", &atoms!["hello"]), 1);
        assert_eq!(registry.dispatch("/test/other", &atoms!["nope"]), 0);
        assert_eq!(registry.dispatch("/test/m4l/deeper", &[]), 0);

        assert_eq!(*log.lock().unwrap(), vec!["h:/test/m4l"]);
    }

    #[test]
    fn test_all_matches_run_in_registration_order() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.register("/a/*", make("first")).unwrap();
        registry.register("/a/b", make("second")).unwrap();
        registry.register("/a/b", make("third")).unwrap();

        assert_eq!(registry.dispatch("/a/b", &[]), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:/a/b", "second:/a/b", "third:/a/b"]
        );
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry
            .register("/boom", |_: &str, _: &[Atom]| panic!("handler failure"))
            .unwrap();
        registry.register("/boom", make("after")).unwrap();

        assert_eq!(registry.dispatch("/boom", &[]), 2);
        assert_eq!(*log.lock().unwrap(), vec!["after:/boom"]);

        // registry still usable afterwards
        assert_eq!(registry.dispatch("/boom", &[]), 2);
    }

    #[test]
    fn test_handler_receives_arguments() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry
            .register("/test/m4l", move |_, args| {
                if let Some(first) = args.first().and_then(|a| a.as_string().ok()) {
                    *sink.lock().unwrap() = Some(first.to_string());
                }
            })
            .unwrap();

        let message = Message::new("/test/m4l", atoms!["hello"]);
        registry.dispatch_message(&message);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_register_from_inside_handler() {
        let registry = HandlerRegistry::new();
        let inner = registry.clone();
        registry
            .register("/add", move |_, _| {
                let _ = inner.register("/added", |_, _| {});
            })
            .unwrap();

        registry.dispatch("/add", &[]);
        assert_eq!(registry.handler_count(), 2);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let registry = HandlerRegistry::new();
        let result = registry.register("no-slash", |_, _| {});
        assert!(matches!(result, Err(crate::BridgeError::InvalidPattern(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = HandlerRegistry::new();
        registry.register("/a", |_, _| {}).unwrap();
        registry.register("/a", |_, _| {}).unwrap();
        registry.register("/b", |_, _| {}).unwrap();

        assert_eq!(registry.unregister("/a"), 2);
        assert_eq!(registry.handler_count(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_debug_lists_patterns() {
        let registry = HandlerRegistry::new();
        registry.register("/x/*", |_, _| {}).unwrap();
        assert_eq!(format!("{registry:?}"), r#"["/x/*"]"#);
    }
}
