//! Pluggable server hooks.
//!
//! The hub depends on capabilities, not closures: deployments inject one
//! [`ServerHooks`] implementation covering admission (`authenticate`),
//! custom HTTP handling (`on_request`), and custom connection handling
//! (`on_connection`). [`AllowAll`] is the open default.

use std::collections::HashMap;

use async_trait::async_trait;

/// Facts about an incoming connection handed to the hooks.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Request path, before name derivation.
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
}

/// Error type for hook failures; surfaced to clients as an internal-error
/// close, never as a payload.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait ServerHooks: Send + Sync {
    /// Admission predicate invoked once per socket after name validation.
    ///
    /// `Ok(false)` closes the socket with a policy-violation code;
    /// `Err(_)` closes it with an internal-error code.
    async fn authenticate(
        &self,
        _request: &ConnectRequest,
        _doc_name: &str,
    ) -> Result<bool, HookError> {
        Ok(true)
    }

    /// Custom HTTP handling invoked before the built-in routes.
    /// Return `Some((status, body))` to answer the request yourself.
    async fn on_request(&self, _method: &str, _path: &str) -> Option<(u16, String)> {
        None
    }

    /// Custom connection handling invoked before the built-in upgrade.
    /// Return `true` to claim the connection; the hub then declines it.
    async fn on_connection(&self, _request: &ConnectRequest) -> bool {
        false
    }
}

/// Default hooks: every connection is admitted, nothing is intercepted.
pub struct AllowAll;

#[async_trait]
impl ServerHooks for AllowAll {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all_admits_everything() {
        let hooks = AllowAll;
        let request = ConnectRequest {
            path: "/doc".to_string(),
            query: HashMap::new(),
        };
        assert!(hooks.authenticate(&request, "doc").await.unwrap());
        assert!(hooks.on_request("GET", "/doc").await.is_none());
        assert!(!hooks.on_connection(&request).await);
    }
}
