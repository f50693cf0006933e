//! Single Sign-On probe (UAA)
//!
//! Walks the OAuth2 and SCIM flows a bound SSO plan has to support:
//!
//! 1. Client credentials grant
//! 2. Create local user (an existing user is tolerated and fetched instead)
//! 3. Get local groups/scopes
//! 4. Add local user to group `smoketest.extinguish`
//! 5. Resource owner password credentials grant
//! 6. Authorization code grant
//! 7. Delete local user
//!
//! A failing step ends the flow, but once the user id is known the user is
//! always deleted.

pub mod uaa;

use async_trait::async_trait;
use serde::Deserialize;
use std::future;
use std::sync::Arc;

use crate::bindings::{Binding, BindingError};
use smoketest_core::{Probe, StepFailure, StepLog, TestResult};

pub const KEY: &str = "sso";
pub const NAME: &str = "Single Sign-On";

pub const SMOKE_USERNAME: &str = "smokeuser";
pub const SMOKE_PASSWORD: &str = "smokepassword";

/// Group (scope) the smoke user is added to
pub const SMOKE_SCOPE: &str = "smoketest.extinguish";

/// Status code reported for tolerated conflicts
const CONFLICT: u16 = 409;

/// Settings read from a `p-identity` binding
#[derive(Clone, PartialEq, Eq)]
pub struct IdentitySettings {
    /// Base URL of the identity zone, e.g. `https://login.sys.example.com`
    pub auth_domain: String,
    pub client_id: String,
    pub client_secret: String,
    /// Redirect URI registered for the client, used by the authorization
    /// code grant
    pub redirect_uri: String,
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("auth_domain", &self.auth_domain)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl IdentitySettings {
    pub fn from_binding(binding: &Binding, redirect_uri: &str) -> Result<Self, BindingError> {
        Ok(Self {
            auth_domain: binding
                .credential_str("auth_domain")?
                .trim_end_matches('/')
                .to_string(),
            client_id: binding.credential_str("client_id")?.to_string(),
            client_secret: binding.credential_str("client_secret")?.to_string(),
            redirect_uri: redirect_uri.to_string(),
        })
    }
}

/// A SCIM user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScimUser {
    pub id: String,
    #[serde(rename = "userName", default)]
    pub user_name: String,
}

/// A SCIM group
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScimGroup {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

/// Outcome of a create call that tolerates an existing resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created<T> {
    New(T),
    AlreadyExists,
}

/// Identity provider operations used by the probe
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Token for the bound client itself
    async fn client_credentials_token(&self) -> anyhow::Result<String>;

    async fn create_user(&self, token: &str, user_name: &str, password: &str) -> anyhow::Result<Created<ScimUser>>;

    async fn find_user(&self, token: &str, user_name: &str) -> anyhow::Result<ScimUser>;

    async fn list_groups(&self, token: &str) -> anyhow::Result<Vec<ScimGroup>>;

    async fn add_group_member(&self, token: &str, group_id: &str, user_id: &str) -> anyhow::Result<Created<()>>;

    /// Token for a user, via the password grant
    async fn password_token(&self, user_name: &str, password: &str) -> anyhow::Result<String>;

    /// Token via the authorization code grant, authorizing as the user
    /// holding `user_token`
    async fn authorization_code_token(&self, user_token: &str) -> anyhow::Result<String>;

    async fn delete_user(&self, token: &str, user_id: &str) -> anyhow::Result<()>;
}

/// Single Sign-On probe
pub struct IdentityProbe {
    api: Arc<dyn IdentityApi>,
}

impl IdentityProbe {
    pub fn new(api: Arc<dyn IdentityApi>) -> Self {
        Self { api }
    }

    /// Run a create step whose "already exists" outcome still passes, tagged
    /// with the conflict status code
    async fn create_step<T>(
        steps: &mut StepLog,
        label: &str,
        outcome: anyhow::Result<Created<T>>,
    ) -> Option<Created<T>> {
        match outcome {
            Ok(Created::AlreadyExists) => {
                steps.record(TestResult::passed(label).with_status_code(CONFLICT));
                Some(Created::AlreadyExists)
            }
            other => steps.run(label, future::ready(other)).await,
        }
    }

    /// Steps that need the user to exist
    async fn exercise_user(&self, steps: &mut StepLog, token: &str, user: &ScimUser) {
        let api = self.api.as_ref();

        let Some(groups) = steps.run("Get local groups/scopes", api.list_groups(token)).await else {
            return;
        };

        let added = match groups.iter().find(|g| g.display_name == SMOKE_SCOPE) {
            Some(group) => {
                let outcome = api.add_group_member(token, &group.id, &user.id).await;
                Self::create_step(steps, "Add local user to group", outcome).await
            }
            None => {
                steps.fail("Add local user to group", format!("Group {} not found", SMOKE_SCOPE));
                None
            }
        };
        if added.is_none() {
            return;
        }

        let Some(user_token) = steps
            .run(
                "Resource owner password credentials grant",
                api.password_token(SMOKE_USERNAME, SMOKE_PASSWORD),
            )
            .await
        else {
            return;
        };

        steps
            .run("Authorization code grant", api.authorization_code_token(&user_token))
            .await;
    }
}

#[async_trait]
impl Probe for IdentityProbe {
    fn key(&self) -> &str {
        KEY
    }

    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> TestResult {
        let api = self.api.as_ref();
        let mut steps = StepLog::new();

        let Some(token) = steps
            .run("Client credentials grant", api.client_credentials_token())
            .await
        else {
            return steps.finish(KEY, NAME);
        };

        let outcome = api.create_user(&token, SMOKE_USERNAME, SMOKE_PASSWORD).await;
        let user = match Self::create_step(&mut steps, "Create local user", outcome).await {
            Some(Created::New(user)) => Some(user),
            // Left over from an earlier run whose cleanup failed
            Some(Created::AlreadyExists) => {
                steps
                    .run("Get local user", api.find_user(&token, SMOKE_USERNAME))
                    .await
            }
            None => None,
        };

        if let Some(user) = user {
            self.exercise_user(&mut steps, &token, &user).await;
            steps
                .run("Delete local user", api.delete_user(&token, &user.id))
                .await;
        }

        steps.finish(KEY, NAME)
    }
}

/// OAuth / SCIM error body
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    /// SCIM endpoints use `message` for the description
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Failure for a response with status `status` and body `body`
    pub(crate) fn into_failure(self, status: u16) -> StepFailure {
        let message = self
            .error
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| format!("Unexpected status code {}", status));
        let mut failure = StepFailure::new(message).with_status_code(status);
        if let Some(detail) = self.error_description.or(self.message).filter(|d| !d.is_empty()) {
            failure = failure.with_detail(detail);
        }
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;

    /// Scripted identity provider recording every call
    #[derive(Default)]
    struct FakeIdentity {
        calls: Mutex<Vec<&'static str>>,
        user_exists: bool,
        already_member: bool,
        missing_group: bool,
        fail_password: bool,
        fail_groups: bool,
    }

    impl FakeIdentity {
        fn called(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn smoke_user() -> ScimUser {
        ScimUser {
            id: "u-1".to_string(),
            user_name: SMOKE_USERNAME.to_string(),
        }
    }

    #[async_trait]
    impl IdentityApi for FakeIdentity {
        async fn client_credentials_token(&self) -> anyhow::Result<String> {
            self.called("client_credentials");
            Ok("client-token".to_string())
        }

        async fn create_user(&self, _token: &str, _user_name: &str, _password: &str) -> anyhow::Result<Created<ScimUser>> {
            self.called("create_user");
            if self.user_exists {
                Ok(Created::AlreadyExists)
            } else {
                Ok(Created::New(smoke_user()))
            }
        }

        async fn find_user(&self, _token: &str, _user_name: &str) -> anyhow::Result<ScimUser> {
            self.called("find_user");
            Ok(smoke_user())
        }

        async fn list_groups(&self, _token: &str) -> anyhow::Result<Vec<ScimGroup>> {
            self.called("list_groups");
            if self.fail_groups {
                return Err(StepFailure::new("insufficient_scope")
                    .with_detail("Insufficient scope for this resource")
                    .with_status_code(403)
                    .into());
            }
            let mut groups = vec![ScimGroup {
                id: "g-0".to_string(),
                display_name: "uaa.user".to_string(),
            }];
            if !self.missing_group {
                groups.push(ScimGroup {
                    id: "g-1".to_string(),
                    display_name: SMOKE_SCOPE.to_string(),
                });
            }
            Ok(groups)
        }

        async fn add_group_member(&self, _token: &str, group_id: &str, _user_id: &str) -> anyhow::Result<Created<()>> {
            self.called("add_group_member");
            assert_eq!(group_id, "g-1");
            if self.already_member {
                Ok(Created::AlreadyExists)
            } else {
                Ok(Created::New(()))
            }
        }

        async fn password_token(&self, _user_name: &str, _password: &str) -> anyhow::Result<String> {
            self.called("password");
            if self.fail_password {
                bail!(StepFailure::new("unauthorized").with_status_code(401));
            }
            Ok("user-token".to_string())
        }

        async fn authorization_code_token(&self, user_token: &str) -> anyhow::Result<String> {
            self.called("authorization_code");
            assert_eq!(user_token, "user-token");
            Ok("code-token".to_string())
        }

        async fn delete_user(&self, _token: &str, user_id: &str) -> anyhow::Result<()> {
            self.called("delete_user");
            assert_eq!(user_id, "u-1");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_flow() {
        let api = Arc::new(FakeIdentity::default());
        let result = IdentityProbe::new(api.clone()).run().await;

        assert!(result.is_passed());
        assert_eq!(
            result.child_names(),
            vec![
                "Client credentials grant",
                "Create local user",
                "Get local groups/scopes",
                "Add local user to group",
                "Resource owner password credentials grant",
                "Authorization code grant",
                "Delete local user",
            ]
        );
        assert_eq!(api.calls().last(), Some(&"delete_user"));
    }

    #[tokio::test]
    async fn test_existing_user_is_fetched() {
        let api = Arc::new(FakeIdentity {
            user_exists: true,
            already_member: true,
            ..Default::default()
        });
        let result = IdentityProbe::new(api.clone()).run().await;

        assert!(result.is_passed());
        let create = result.child("Create local user").unwrap();
        assert!(create.is_passed());
        assert_eq!(create.status_code(), Some(409));
        assert!(result.child("Get local user").unwrap().is_passed());
        assert_eq!(result.child("Add local user to group").unwrap().status_code(), Some(409));
        assert!(api.calls().contains(&"find_user"));
    }

    #[tokio::test]
    async fn test_user_deleted_after_failed_grant() {
        let api = Arc::new(FakeIdentity {
            fail_password: true,
            ..Default::default()
        });
        let result = IdentityProbe::new(api.clone()).run().await;

        assert!(!result.is_passed());
        let grant = result.child("Resource owner password credentials grant").unwrap();
        assert_eq!(grant.error(), Some("unauthorized"));
        assert_eq!(grant.status_code(), Some(401));
        assert!(result.child("Authorization code grant").is_none());
        assert!(result.child("Delete local user").unwrap().is_passed());
        assert!(!api.calls().contains(&"authorization_code"));
    }

    #[tokio::test]
    async fn test_failure_detail_is_lifted() {
        let api = Arc::new(FakeIdentity {
            fail_groups: true,
            ..Default::default()
        });
        let result = IdentityProbe::new(api).run().await;

        let groups = result.child("Get local groups/scopes").unwrap();
        assert_eq!(groups.error(), Some("insufficient_scope"));
        assert_eq!(groups.error_detail(), Some("Insufficient scope for this resource"));
        assert_eq!(groups.status_code(), Some(403));
        assert!(result.child("Delete local user").is_some());
    }

    #[tokio::test]
    async fn test_missing_group() {
        let api = Arc::new(FakeIdentity {
            missing_group: true,
            ..Default::default()
        });
        let result = IdentityProbe::new(api.clone()).run().await;

        let add = result.child("Add local user to group").unwrap();
        assert!(!add.is_passed());
        assert!(add.error().unwrap().contains(SMOKE_SCOPE));
        assert!(!api.calls().contains(&"add_group_member"));
        assert!(result.child("Delete local user").is_some());
    }

    #[test]
    fn test_error_body_into_failure() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":"scim_resource_already_exists","message":"Username already in use: smokeuser"}"#,
        )
        .unwrap();
        let failure = body.into_failure(409);
        assert_eq!(failure.message, "scim_resource_already_exists");
        assert_eq!(failure.detail.as_deref(), Some("Username already in use: smokeuser"));
        assert_eq!(failure.status_code, Some(409));

        let failure = ErrorBody::default().into_failure(502);
        assert_eq!(failure.message, "Unexpected status code 502");
        assert!(failure.detail.is_none());
    }
}
