//! OAuth bridge between MCP clients and the upstream identity provider
//!
//! - [`request`]: the inbound authorization request and the completion port
//! - [`clients`]: dynamic client registration
//! - [`state`]: signed state cookie and anti-forgery tokens
//! - [`pkce`]: PKCE pairs and the verifier cookie encoding
//! - [`identity`]: identity provider HTTP client
//! - [`flow`]: the authorization flow controller
//! - [`grants`]: in-memory completion port and code redemption

pub mod clients;
pub mod flow;
pub mod grants;
pub mod identity;
pub mod pages;
pub mod pkce;
pub mod provider;
pub mod request;
pub mod state;

pub use clients::{ClientMetadata, ClientRegistry, RegisteredClient};
pub use flow::{AuthFlow, FlowSettings, PasswordForm};
pub use grants::{GrantError, GrantedSession, InMemoryGrants, Reaped, TokenRequest, TokenResponse};
pub use identity::{IdentityClient, RefreshedTokens, Session};
pub use provider::FederatedProvider;
pub use request::{
    AuthorizationRequest, CompleteAuthorization, CompletedAuthorization, CompletionPort,
    GrantMetadata,
};
pub use state::{CookieSettings, OAuthState, STATE_COOKIE, StateCodec};
