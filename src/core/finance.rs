use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::OnceCell;

use crate::core::directory::Directory;
use crate::core::error::{ChatError, ChatResult};
use crate::core::models::{Identity, NewIdentity, UserId};
use crate::core::roles::{resolve_role, Role, ADMIN_FALLBACK_LABEL, FINANCE_LABEL};

/// Resolves the single identity behind the finance desk.
#[async_trait]
pub trait FinanceProvider: Send + Sync {
    /// `Ok(None)` means the identity neither exists nor could be created.
    async fn resolve(&self) -> ChatResult<Option<Identity>>;
}

/// Reserved account that represents the finance desk.
#[derive(Debug, Clone, PartialEq)]
pub struct FinanceAccount {
    pub login: String,
    pub email: String,
    pub display_name: String,
}

/// Looks the finance identity up in the host directory and provisions it
/// on first use.
pub struct DirectoryFinanceProvider {
    directory: Arc<dyn Directory>,
    account: FinanceAccount,
}

impl DirectoryFinanceProvider {
    pub fn new(directory: Arc<dyn Directory>, account: FinanceAccount) -> Self {
        DirectoryFinanceProvider { directory, account }
    }
}

#[async_trait]
impl FinanceProvider for DirectoryFinanceProvider {
    async fn resolve(&self) -> ChatResult<Option<Identity>> {
        let FinanceAccount {
            login,
            email,
            display_name,
        } = &self.account;

        if let Some(found) = self.directory.find_by_login(login, email).await? {
            return Ok(Some(found));
        }

        let (role, is_admin) = if self.directory.role_exists(FINANCE_LABEL).await? {
            (FINANCE_LABEL, false)
        } else {
            log::warn!("Role catalog has no {FINANCE_LABEL:?} role, provisioning finance desk as {ADMIN_FALLBACK_LABEL:?}");
            (ADMIN_FALLBACK_LABEL, true)
        };

        let created = self
            .directory
            .create_identity(NewIdentity {
                login: login.clone(),
                display_name: display_name.clone(),
                email: email.clone(),
                roles: vec![role.to_string()],
                is_admin,
                managed_by: None,
                credential: random_credential(),
            })
            .await?;

        log::info!("Provisioned finance identity {} ({})", created.id, created.login);
        Ok(Some(created))
    }
}

fn random_credential() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Per-request view of the caller. The finance identity is resolved at most
/// once per context and dropped with it.
pub struct RequestContext {
    pub viewer: Identity,
    pub role: Role,
    acting_as_finance: bool,
    finance: OnceCell<Identity>,
}

impl RequestContext {
    pub fn new(viewer: Identity, acting_as_finance: bool) -> Self {
        let role = resolve_role(&viewer);
        RequestContext {
            viewer,
            role,
            acting_as_finance,
            finance: OnceCell::new(),
        }
    }

    pub fn is_acting_as_finance(&self) -> bool {
        self.acting_as_finance
    }

    pub async fn finance(&self, provider: &dyn FinanceProvider) -> ChatResult<&Identity> {
        self.finance
            .get_or_try_init(|| async {
                match provider.resolve().await {
                    Ok(Some(identity)) => Ok(identity),
                    Ok(None) => {
                        log::error!("Finance identity could not be resolved or provisioned");
                        Err(ChatError::FinanceChannelUnavailable)
                    }
                    Err(e) => {
                        log::error!("Finance identity lookup failed: {e}");
                        Err(ChatError::FinanceChannelUnavailable)
                    }
                }
            })
            .await
    }

    /// Who the caller speaks as: the finance identity when acting for the
    /// desk, the caller's own account otherwise.
    pub async fn actor(&self, provider: &dyn FinanceProvider) -> ChatResult<&Identity> {
        if self.acting_as_finance {
            self.finance(provider).await
        } else {
            Ok(&self.viewer)
        }
    }

    pub async fn actor_id(&self, provider: &dyn FinanceProvider) -> ChatResult<UserId> {
        Ok(self.actor(provider).await?.id)
    }
}
