//! External collaborators reachable from scripts.
//!
//! The runtime does not own AniList clients, the database or media players.
//! Hosts register them here; a binding whose collaborator is missing fails
//! with [`RuntimeError::ServiceDown`] instead of retrying.

use std::collections::HashMap;
use std::sync::Arc;

use harbor_core::Scope;
use harbor_storage::KvStore;
use serde_json::Value;

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

/// Delivers `$notification.send` messages.
pub trait Notifier: Send + Sync {
    /// Show `message` on behalf of `extension_id`.
    ///
    /// # Errors
    ///
    /// Implementation defined.
    fn notify(&self, extension_id: &str, message: &str) -> RuntimeResult<()>;
}

/// A host system proxied into scripts (`$anilist`, `$database`...).
pub trait ExternalService: Send + Sync {
    /// Serve `method` with JSON arguments.
    ///
    /// # Errors
    ///
    /// Implementation defined; returned to the script as a thrown error.
    fn call(&self, extension_id: &str, method: &str, args: &[Value]) -> RuntimeResult<Value>;
}

/// Names of the proxied services.
pub const SERVICE_NAMES: &[&str] = &["anilist", "database", "playback", "mediaPlayer", "torrent"];

/// Script global and required scope of a proxied service.
#[must_use]
pub fn service_binding(name: &str) -> Option<(&'static str, Scope)> {
    match name {
        "anilist" => Some(("$anilist", Scope::Anilist)),
        "database" => Some(("$database", Scope::Database)),
        "playback" => Some(("$playback", Scope::Playback)),
        "mediaPlayer" => Some(("$mediaPlayer", Scope::MediaPlayer)),
        "torrent" => Some(("$torrentUtils", Scope::AnimeTorrent)),
        _ => None,
    }
}

/// Collaborators handed to every interpreter of a host.
#[derive(Clone, Default)]
pub struct Services {
    notifier: Option<Arc<dyn Notifier>>,
    external: HashMap<String, Arc<dyn ExternalService>>,
    kv: Option<Arc<dyn KvStore>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.external.keys().collect();
        names.sort();
        f.debug_struct("Services")
            .field("notifier", &self.notifier.is_some())
            .field("external", &names)
            .field("kv", &self.kv.is_some())
            .finish()
    }
}

impl Services {
    /// No collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route notifications to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register a proxied service under `name` (see [`SERVICE_NAMES`]).
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, service: Arc<dyn ExternalService>) -> Self {
        self.external.insert(name.into(), service);
        self
    }

    /// Back `$storage` with `store`.
    #[must_use]
    pub fn with_kv_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.kv = Some(store);
        self
    }

    /// The notifier, if any.
    #[must_use]
    pub fn notifier(&self) -> Option<Arc<dyn Notifier>> {
        self.notifier.clone()
    }

    /// A registered service.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<Arc<dyn ExternalService>> {
        self.external.get(name).cloned()
    }

    /// The key-value store, if any.
    #[must_use]
    pub fn kv_store(&self) -> Option<Arc<dyn KvStore>> {
        self.kv.clone()
    }
}

/// `service.call(name, method, args)`.
pub(crate) struct ServiceModule;

impl HostModule for ServiceModule {
    fn namespace(&self) -> &'static str {
        "service"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        if method != "call" {
            return Err(unknown_method("service", method));
        }
        let name = args.str(0)?;
        let target = args.str(1)?;
        let (global, scope) = service_binding(name)
            .ok_or_else(|| RuntimeError::invalid_argument(args.op(), format!("unknown service {name}")))?;
        if !cx.gate().has_scope(&scope) {
            return Err(RuntimeError::script(format!("{global} is not defined")));
        }
        let service = cx
            .services()
            .service(name)
            .ok_or_else(|| RuntimeError::ServiceDown(format!("{name} is not available")))?;
        let call_args = match args.value(2) {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        service.call(cx.extension_id(), target, &call_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing;
    use harbor_core::PermissionManifest;
    use serde_json::json;

    struct Echo;

    impl ExternalService for Echo {
        fn call(&self, extension_id: &str, method: &str, args: &[Value]) -> RuntimeResult<Value> {
            Ok(json!({ "ext": extension_id, "method": method, "args": args }))
        }
    }

    fn manifest(scopes: &[&str]) -> PermissionManifest {
        PermissionManifest {
            scopes: scopes.iter().map(|s| Scope::from((*s).to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_service_is_service_down() {
        let cx = testing::context(&manifest(&["anilist"]));
        let err = testing::call(
            Arc::new(ServiceModule),
            &cx,
            "service.call",
            json!(["anilist", "getAnime", [1]]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ServiceDown);
    }

    #[test]
    fn test_scope_and_forwarding() {
        let cx = testing::context(&manifest(&[]));
        let err = testing::call(Arc::new(ServiceModule), &cx, "service.call", json!(["database", "x"]))
            .unwrap_err();
        assert!(err.to_string().contains("$database is not defined"));

        let cx = HostContext::new(
            "ext",
            harbor_capabilities::CapabilityGate::new(&manifest(&["database"]), &Default::default()),
            Arc::default(),
            Services::new().with_service("database", Arc::new(Echo)),
            None,
        );
        let out = testing::call(
            Arc::new(ServiceModule),
            &cx,
            "service.call",
            json!(["database", "listEntries", ["a"]]),
        )
        .unwrap();
        assert_eq!(out, json!({"ext": "ext", "method": "listEntries", "args": ["a"]}));
    }
}
