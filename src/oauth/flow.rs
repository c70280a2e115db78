//! Authorization flow controller
//!
//! Drives an inbound authorization request through exactly one upstream
//! authentication path and hands the verified identity to the
//! [`CompletionPort`]:
//!
//! ```text
//! password:   BeginAuthorization ─► CompletePasswordGrant ─► port
//! federated:  BeginAuthorization ─► BeginFederatedLogin ─► provider
//!                                   ─► CompleteFederatedCallback ─► port
//! ```
//!
//! Nothing is kept in memory between requests. Every operation takes the
//! request's [`CookieJar`] and returns the jar carrying the cookies to set or
//! delete, so handlers only have to attach it to the response.

use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::clients::ClientRegistry;
use super::identity::{IdentityClient, Session};
use super::pages;
use super::provider::FederatedProvider;
use super::request::{AuthorizationRequest, CompleteAuthorization, CompletionPort, GrantMetadata};
use super::state::{self, CookieSettings, OAuthState, STATE_COOKIE, StateCodec};
use super::pkce;
use crate::config::Config;
use crate::credential::Credential;
use crate::{Error, Result};

/// Fields posted by the credential form
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PasswordForm {
    /// Anti-forgery token from the hidden field
    #[serde(default)]
    pub state: Option<String>,
    /// Account email
    #[serde(default)]
    pub email: Option<String>,
    /// Account password
    #[serde(default)]
    pub password: Option<String>,
}

/// Per-project settings of the flow
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Attributes for the state and verifier cookies
    pub cookies: CookieSettings,
    /// Name of the PKCE verifier cookie
    pub verifier_cookie: String,
    /// Identity project embedded in every credential
    pub project_id: String,
    /// Public client key embedded in every credential
    pub client_id: String,
}

/// The authorization flow controller
pub struct AuthFlow {
    identity: IdentityClient,
    clients: Arc<ClientRegistry>,
    port: Arc<dyn CompletionPort>,
    codec: StateCodec,
    settings: FlowSettings,
}

impl AuthFlow {
    /// Create a flow controller
    pub fn new(
        identity: IdentityClient,
        clients: Arc<ClientRegistry>,
        port: Arc<dyn CompletionPort>,
        codec: StateCodec,
        settings: FlowSettings,
    ) -> Self {
        Self {
            identity,
            clients,
            port,
            codec,
            settings,
        }
    }

    /// Build a flow controller from configuration
    pub fn from_config(
        config: &Config,
        clients: Arc<ClientRegistry>,
        port: Arc<dyn CompletionPort>,
    ) -> Result<Self> {
        let identity = IdentityClient::from_config(&config.identity, &config.http)?;

        let codec = if let Some(secret) = config.cookies.resolve_secret() {
            StateCodec::new(secret.into_bytes())
        } else {
            warn!("No cookie secret configured, using a per-process key; pending logins will not survive a restart");
            StateCodec::ephemeral()
        };

        let settings = FlowSettings {
            cookies: CookieSettings {
                secure: config.cookies.secure,
                max_age: config.cookies.max_age,
            },
            verifier_cookie: config.identity.verifier_cookie_name(),
            project_id: config.identity.project_id.clone(),
            client_id: config.identity.client_id.clone(),
        };

        Ok(Self::new(identity, clients, port, codec, settings))
    }

    /// Name of the PKCE verifier cookie
    #[must_use]
    pub fn verifier_cookie(&self) -> &str {
        &self.settings.verifier_cookie
    }

    /// Whether flow cookies carry the `Secure` attribute
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.settings.cookies.secure
    }

    /// Start a flow attempt: store the request and a fresh anti-forgery
    /// token in the state cookie and render the credential form.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] if the request has no client id, the client
    /// is not registered, or the redirect URI is not one it registered.
    pub fn begin_authorization(
        &self,
        jar: CookieJar,
        request: AuthorizationRequest,
    ) -> Result<(CookieJar, String)> {
        if request.client_id.trim().is_empty() {
            return Err(Error::InvalidRequest("missing client_id".to_string()));
        }
        let request = self.clients.authorize(request)?;

        let client_id = request.client_id.clone();
        let oauth_state = OAuthState::new(request);
        let cookie_value = self.codec.encode(&oauth_state)?;
        let page = pages::login_form(&oauth_state.state);

        info!(client_id = %client_id, "Authorization started");
        let jar = jar.add(self.settings.cookies.build(STATE_COOKIE, cookie_value));
        Ok((jar, page))
    }

    /// Finish the password path and return the client redirect target.
    ///
    /// The state cookie is consumed whatever the outcome.
    pub async fn complete_password_grant(
        &self,
        jar: CookieJar,
        form: PasswordForm,
    ) -> (CookieJar, Result<String>) {
        let (jar, stored) = take_cookie(jar, STATE_COOKIE);
        let result = self.password_grant(stored, form).await;
        (jar, result)
    }

    async fn password_grant(&self, stored: Option<String>, form: PasswordForm) -> Result<String> {
        let (Some(submitted), Some(email), Some(password)) = (
            non_empty(form.state),
            non_empty(form.email),
            non_empty(form.password),
        ) else {
            return Err(Error::InvalidRequest("Invalid form submission".to_string()));
        };

        let oauth_state = self.read_state(stored)?;
        if !oauth_state.matches(&submitted) {
            warn!(client_id = %oauth_state.oauth_req_info.client_id, "Anti-forgery token mismatch");
            return Err(Error::InvalidState);
        }

        let session = self.identity.sign_in_with_password(&email, &password).await?;
        debug!(client_id = %oauth_state.oauth_req_info.client_id, "Password grant accepted");

        self.complete(oauth_state.oauth_req_info, &session, email.clone(), email)
            .await
    }

    /// Redirect the browser to a federated provider's consent page.
    ///
    /// Returns the jar with the PKCE verifier cookie and the consent URL.
    /// An unsupported provider sets no cookies.
    pub fn begin_federated_login(
        &self,
        jar: CookieJar,
        provider: &str,
        public_url: &str,
    ) -> Result<(CookieJar, String)> {
        let provider: FederatedProvider = provider.parse()?;
        let redirect_to = format!("{}/oauth/callback", public_url.trim_end_matches('/'));

        let sign_in = self.identity.federated_sign_in(provider, &redirect_to)?;
        info!(provider = %provider, "Redirecting to federated provider");

        let jar = jar.add(
            self.settings
                .cookies
                .build(self.settings.verifier_cookie.clone(), sign_in.verifier_cookie),
        );
        Ok((jar, sign_in.url))
    }

    /// Finish the federated path and return the client redirect target.
    ///
    /// Both the state cookie and the verifier cookie are deleted on every
    /// path, success or failure.
    pub async fn complete_federated_callback(
        &self,
        jar: CookieJar,
        code: Option<String>,
    ) -> (CookieJar, Result<String>) {
        let (jar, stored) = take_cookie(jar, STATE_COOKIE);
        let (jar, verifier) = take_cookie(jar, &self.settings.verifier_cookie);
        let result = self.federated_callback(code, stored, verifier).await;
        (jar, result)
    }

    async fn federated_callback(
        &self,
        code: Option<String>,
        stored: Option<String>,
        verifier: Option<String>,
    ) -> Result<String> {
        let code = non_empty(code)
            .ok_or_else(|| Error::InvalidRequest("missing authorization code".to_string()))?;
        let oauth_state = self.read_state(stored)?;
        let verifier = verifier
            .as_deref()
            .and_then(pkce::decode_verifier_cookie)
            .ok_or(Error::MissingVerifier)?;

        let session = self.identity.exchange_code_for_session(&code, &verifier).await?;
        let user = session
            .user
            .clone()
            .ok_or_else(|| Error::TokenExchangeFailed("response missing user identity".to_string()))?;
        let label = user.email.unwrap_or_else(|| user.id.clone());

        self.complete(oauth_state.oauth_req_info, &session, label, user.id)
            .await
    }

    fn read_state(&self, stored: Option<String>) -> Result<OAuthState> {
        let value = stored.ok_or(Error::InvalidState)?;
        self.codec.decode(&value)
    }

    async fn complete(
        &self,
        request: AuthorizationRequest,
        session: &Session,
        label: String,
        user_id: String,
    ) -> Result<String> {
        let props = Credential::new(
            session.access_token.clone(),
            session.refresh_token.clone(),
            self.settings.project_id.clone(),
            self.settings.client_id.clone(),
        );
        let client_id = request.client_id.clone();

        let completed = self
            .port
            .complete_authorization(CompleteAuthorization {
                metadata: GrantMetadata { label },
                props,
                scope: request.scope.clone(),
                request,
                user_id,
            })
            .await
            .map_err(|e| match e {
                Error::DownstreamCompletionFailed(_) => e,
                other => Error::DownstreamCompletionFailed(other.to_string()),
            })?;

        info!(client_id = %client_id, "Authorization completed");
        Ok(completed.redirect_to)
    }
}

/// Read a cookie and queue its deletion
fn take_cookie(jar: CookieJar, name: &str) -> (CookieJar, Option<String>) {
    let value = jar.get(name).map(|c| c.value().to_string());
    (jar.remove(state::removal(name.to_string())), value)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
