//! Runtime permission checks performed before an activity starts.

use async_trait::async_trait;

/// The permission scopes an activity may need before it can touch the radio.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum PermissionScope {
    /// bluetooth
    Bluetooth,
    /// scanner
    Scanner,
    /// broadcaster
    Broadcaster,
}

/// Answers and requests platform permissions, typically by presenting a system prompt.
///
/// Implementations are supplied by the platform layer; the activity state machine only ever calls
/// [`has_permission`][Self::has_permission] followed, if needed, by
/// [`request_permission`][Self::request_permission].
#[async_trait]
pub trait PermissionManager: Send + Sync {
    /// Returns `true` if `scope` has already been granted.
    async fn has_permission(&self, scope: PermissionScope) -> bool;

    /// Asks the user (or the OS) for `scope`. Returns `true` if it was granted.
    async fn request_permission(&self, _scope: PermissionScope) -> bool {
        false
    }
}

/// A permission manager that reports every scope as granted.
///
/// Suitable for platforms without runtime permissions (desktop Linux, Windows) and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrantAll;

#[async_trait]
impl PermissionManager for GrantAll {
    async fn has_permission(&self, _scope: PermissionScope) -> bool {
        true
    }

    async fn request_permission(&self, _scope: PermissionScope) -> bool {
        true
    }
}

/// Ensures each of `scopes` is granted, requesting the missing ones in order.
///
/// Returns the first scope that was denied.
pub(crate) async fn ensure(
    manager: &dyn PermissionManager,
    scopes: &[PermissionScope],
) -> Result<(), PermissionScope> {
    for &scope in scopes {
        if manager.has_permission(scope).await {
            continue;
        }
        tracing::debug!(%scope, "requesting permission");
        if !manager.request_permission(scope).await {
            return Err(scope);
        }
    }
    Ok(())
}
