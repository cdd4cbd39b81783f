use async_trait::async_trait;

use crate::core::error::ChatResult;
use crate::core::models::{Identity, NewIdentity, UserId};
use crate::core::store::StoreHandle;

/// Host-side account lookup. The messaging code never writes accounts
/// except when provisioning the finance identity.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn identity(&self, id: UserId) -> ChatResult<Option<Identity>>;

    /// Match on login first, then on e-mail.
    async fn find_by_login(&self, login: &str, email: &str) -> ChatResult<Option<Identity>>;

    async fn create_identity(&self, new: NewIdentity) -> ChatResult<Identity>;

    /// Whether the host's role catalog knows `role`.
    async fn role_exists(&self, role: &str) -> ChatResult<bool>;
}

#[async_trait]
impl Directory for StoreHandle {
    async fn identity(&self, id: UserId) -> ChatResult<Option<Identity>> {
        StoreHandle::identity(self, id).await
    }

    async fn find_by_login(&self, login: &str, email: &str) -> ChatResult<Option<Identity>> {
        self.find_identity(login, email).await
    }

    async fn create_identity(&self, new: NewIdentity) -> ChatResult<Identity> {
        StoreHandle::create_identity(self, new).await
    }

    async fn role_exists(&self, role: &str) -> ChatResult<bool> {
        StoreHandle::role_exists(self, role).await
    }
}
