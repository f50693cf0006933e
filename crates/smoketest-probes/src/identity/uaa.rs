//! UAA client over reqwest

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, LOCATION};
use reqwest::{redirect, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Created, ErrorBody, IdentityApi, IdentitySettings, ScimGroup, ScimUser};

const USER_EXISTS: &str = "scim_resource_already_exists";
const MEMBER_EXISTS: &str = "member_already_exists";

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ScimList<T> {
    #[serde(rename = "totalResults", default)]
    total_results: u64,
    #[serde(alias = "Resources", default = "Vec::new")]
    resources: Vec<T>,
}

/// Client for one UAA identity zone
pub struct UaaClient {
    settings: IdentitySettings,
    client: reqwest::Client,
}

impl UaaClient {
    pub fn new(settings: IdentitySettings) -> anyhow::Result<Self> {
        // Redirects are not followed so the authorization code can be read
        // from the Location header
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.auth_domain, path)
    }

    async fn token(&self, form: &[(&str, &str)]) -> anyhow::Result<String> {
        let response = self
            .client
            .post(self.url("/oauth/token"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(form)
            .send()
            .await?;
        let token: TokenResponse = expect_status(response, StatusCode::OK).await?.json().await?;
        Ok(token.access_token)
    }
}

/// Pass the response through when it has `expected` status, otherwise
/// turn its error body into a failure
async fn expect_status(response: Response, expected: StatusCode) -> anyhow::Result<Response> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(error_body(response).await.1.into())
    }
}

/// Status and parsed failure of an error response
async fn error_body(response: Response) -> (StatusCode, smoketest_core::StepFailure) {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    (status, body.into_failure(status.as_u16()))
}

#[async_trait]
impl IdentityApi for UaaClient {
    async fn client_credentials_token(&self) -> anyhow::Result<String> {
        self.token(&[("grant_type", "client_credentials")]).await
    }

    async fn create_user(&self, token: &str, user_name: &str, password: &str) -> anyhow::Result<Created<ScimUser>> {
        let user = json!({
            "userName": user_name,
            "name": { "formatted": "Smoke User", "familyName": "User", "givenName": "Smoke" },
            "emails": [{ "value": format!("{}@example.com", user_name) }],
            "active": true,
            "verified": true,
            "origin": "uaa",
            "password": password,
            "schemas": ["urn:scim:schemas:core:1.0"],
        });
        let response = self
            .client
            .post(self.url("/Users"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(token)
            .json(&user)
            .send()
            .await?;

        if response.status() == StatusCode::CREATED {
            return Ok(Created::New(response.json().await?));
        }
        let (status, failure) = error_body(response).await;
        if status == StatusCode::CONFLICT && failure.message == USER_EXISTS {
            return Ok(Created::AlreadyExists);
        }
        Err(failure.into())
    }

    async fn find_user(&self, token: &str, user_name: &str) -> anyhow::Result<ScimUser> {
        let filter = format!("userName eq \"{}\"", user_name);
        let response = self
            .client
            .get(self.url("/Users"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(token)
            .query(&[("filter", filter.as_str())])
            .send()
            .await?;
        let users: ScimList<ScimUser> = expect_status(response, StatusCode::OK).await?.json().await?;

        if users.total_results == 0 {
            return Err(smoketest_core::StepFailure::new("scim_resource_not_found")
                .with_detail(format!("User {} does not exist", user_name))
                .with_status_code(StatusCode::OK.as_u16())
                .into());
        }
        users
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("User list reported results but returned none"))
    }

    async fn list_groups(&self, token: &str) -> anyhow::Result<Vec<ScimGroup>> {
        let response = self
            .client
            .get(self.url("/Groups"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(token)
            .send()
            .await?;
        let groups: ScimList<ScimGroup> = expect_status(response, StatusCode::OK).await?.json().await?;
        Ok(groups.resources)
    }

    async fn add_group_member(&self, token: &str, group_id: &str, user_id: &str) -> anyhow::Result<Created<()>> {
        let member = json!({ "origin": "uaa", "type": "USER", "value": user_id });
        let response = self
            .client
            .post(self.url(&format!("/Groups/{}/members", group_id)))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(token)
            .json(&member)
            .send()
            .await?;

        if response.status() == StatusCode::CREATED {
            return Ok(Created::New(()));
        }
        let (status, failure) = error_body(response).await;
        if status == StatusCode::CONFLICT && failure.message == MEMBER_EXISTS {
            return Ok(Created::AlreadyExists);
        }
        Err(failure.into())
    }

    async fn password_token(&self, user_name: &str, password: &str) -> anyhow::Result<String> {
        self.token(&[
            ("grant_type", "password"),
            ("username", user_name),
            ("password", password),
        ])
        .await
    }

    async fn authorization_code_token(&self, user_token: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(self.url("/oauth/authorize"))
            .bearer_auth(user_token)
            .query(&[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_redirection() {
            let (_, failure) = error_body(response).await;
            return Err(failure.into());
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|l| l.to_str().ok())
            .ok_or_else(|| anyhow!("Authorization response has no Location header"))?;
        let location = Url::parse(location).context("Invalid redirect location")?;
        let code = location
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| anyhow!("No authorization code in redirect to {}", location))?;

        self.token(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ])
        .await
    }

    async fn delete_user(&self, token: &str, user_id: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/Users/{}", user_id)))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(token)
            .send()
            .await?;
        expect_status(response, StatusCode::OK).await?;
        Ok(())
    }
}
