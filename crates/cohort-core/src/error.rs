//! Error types for Cohort core.

use thiserror::Error;

use crate::types::{CategoryId, ChatId, PermissionId};

/// Errors raised by pure cryptographic and encoding operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("wallet address {address} does not match the revealing key")]
    AddressMismatch { address: String },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors raised while editing or validating a community description.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptionError {
    #[error("chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("chat already exists: {0}")]
    ChatAlreadyExists(ChatId),

    #[error("a chat named {0:?} already exists")]
    DuplicateChatName(String),

    #[error("chat {0} is already assigned to another category")]
    ChatAlreadyAssigned(ChatId),

    #[error("category not found: {0}")]
    CategoryNotFound(CategoryId),

    #[error("category already exists: {0}")]
    CategoryAlreadyExists(CategoryId),

    #[error("token permission already exists: {0}")]
    TokenPermissionAlreadyExists(PermissionId),

    #[error("token permission not found: {0}")]
    TokenPermissionNotFound(PermissionId),

    #[error("member not found")]
    MemberNotFound,

    #[error("invalid token permission: {0}")]
    InvalidPermission(String),

    #[error("structural error: {0}")]
    Structural(String),
}
