//! Permission Lookup Module
//!
//! The capability the decision cache calls on a miss.

use std::sync::Arc;

use async_trait::async_trait;

/// Identifier of a user whose permissions are cached.
pub type UserId = i64;

// == Permission Lookup ==
/// Source of truth for a user's permission codes, typically backed by the
/// role and permission tables.
#[async_trait]
pub trait PermissionLookup: Send + Sync {
    type Error: Send;

    /// Returns every permission code currently granted to `user_id`.
    async fn fetch(&self, user_id: UserId) -> Result<Vec<String>, Self::Error>;
}

#[async_trait]
impl<T> PermissionLookup for Arc<T>
where
    T: PermissionLookup + ?Sized,
{
    type Error = T::Error;

    async fn fetch(&self, user_id: UserId) -> Result<Vec<String>, Self::Error> {
        (**self).fetch(user_id).await
    }
}
