//! Error types for the community manager.

use std::fmt;

use cohort_core::{CategoryId, ChatId, CommunityId, CoreError, DescriptionError, PermissionId, RequestId};
use cohort_perms::PermsError;
use cohort_store::StoreError;
use cohort_sync::SyncError;
use thiserror::Error;

/// A removal refused because of the target's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleViolation {
    CannotRemoveOwnerOrAdmin,
    CannotBanOwnerOrAdmin,
}

impl fmt::Display for RoleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleViolation::CannotRemoveOwnerOrAdmin => f.write_str("not allowed to remove admin or owner"),
            RoleViolation::CannotBanOwnerOrAdmin => f.write_str("not allowed to ban admin or owner"),
        }
    }
}

/// Errors that can occur during manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The update is not newer than the state already held.
    #[error("stale update: current clock {current}, incoming {incoming}")]
    Stale { current: u64, incoming: u64 },

    /// Wrong signer or insufficient privilege for the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// None of the supplied accounts satisfies the membership gate.
    #[error("permission to join not satisfied")]
    PermissionNotSatisfied,

    #[error("{0}")]
    RoleConstraintViolation(RoleViolation),

    /// A privileged sync contradicts what can be validated locally.
    #[error("malformed privileged sync: {0}")]
    MalformedSync(String),

    #[error("community not found: {0}")]
    CommunityNotFound(CommunityId),

    #[error("chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("chat already exists: {0}")]
    ChatAlreadyExists(ChatId),

    #[error("a chat named {0:?} already exists")]
    DuplicateChatName(String),

    #[error("category not found: {0}")]
    CategoryNotFound(CategoryId),

    #[error("category already exists: {0}")]
    CategoryAlreadyExists(CategoryId),

    #[error("chat {0} is already assigned to another category")]
    ChatAlreadyAssigned(ChatId),

    #[error("token permission already exists: {0}")]
    TokenPermissionAlreadyExists(PermissionId),

    #[error("token permission not found: {0}")]
    TokenPermissionNotFound(PermissionId),

    #[error("member not found")]
    MemberNotFound,

    #[error("request to join not found: {0}")]
    RequestNotFound(RequestId),

    /// A declined request is still within its cool-off period.
    #[error("request to join already rejected")]
    RequestAlreadyRejected,

    #[error("invalid clock")]
    InvalidClock,

    #[error("cannot request access: {0}")]
    CannotRequestAccess(String),

    #[error("too many pending requests to join")]
    TooManyPendingRequests,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Structural description error without a dedicated variant.
    #[error("description error: {0}")]
    Description(DescriptionError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("permission error: {0}")]
    Perms(#[from] PermsError),

    #[error("sync error: {0}")]
    Sync(SyncError),
}

impl From<DescriptionError> for ManagerError {
    fn from(err: DescriptionError) -> Self {
        match err {
            DescriptionError::ChatNotFound(id) => ManagerError::ChatNotFound(id),
            DescriptionError::ChatAlreadyExists(id) => ManagerError::ChatAlreadyExists(id),
            DescriptionError::DuplicateChatName(name) => ManagerError::DuplicateChatName(name),
            DescriptionError::ChatAlreadyAssigned(id) => ManagerError::ChatAlreadyAssigned(id),
            DescriptionError::CategoryNotFound(id) => ManagerError::CategoryNotFound(id),
            DescriptionError::CategoryAlreadyExists(id) => ManagerError::CategoryAlreadyExists(id),
            DescriptionError::TokenPermissionAlreadyExists(id) => ManagerError::TokenPermissionAlreadyExists(id),
            DescriptionError::TokenPermissionNotFound(id) => ManagerError::TokenPermissionNotFound(id),
            DescriptionError::MemberNotFound => ManagerError::MemberNotFound,
            other => ManagerError::Description(other),
        }
    }
}

impl From<SyncError> for ManagerError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::MalformedSync(reason) => ManagerError::MalformedSync(reason),
            other => ManagerError::Sync(other),
        }
    }
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_errors_map_to_typed_variants() {
        let id = ChatId::random();
        assert!(matches!(
            ManagerError::from(DescriptionError::ChatNotFound(id)),
            ManagerError::ChatNotFound(got) if got == id
        ));
        assert!(matches!(
            ManagerError::from(DescriptionError::MemberNotFound),
            ManagerError::MemberNotFound
        ));
        assert!(matches!(
            ManagerError::from(DescriptionError::Structural("x".into())),
            ManagerError::Description(_)
        ));
    }

    #[test]
    fn test_malformed_sync_is_surfaced() {
        let err = ManagerError::from(SyncError::MalformedSync("accounts differ".into()));
        assert!(matches!(err, ManagerError::MalformedSync(_)));
        let err = ManagerError::from(SyncError::SubscriptionClosed);
        assert!(matches!(err, ManagerError::Sync(SyncError::SubscriptionClosed)));
    }

    #[test]
    fn test_role_violation_messages() {
        let err = ManagerError::RoleConstraintViolation(RoleViolation::CannotBanOwnerOrAdmin);
        assert_eq!(err.to_string(), "not allowed to ban admin or owner");
    }
}
