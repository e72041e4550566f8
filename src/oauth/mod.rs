//! OAuth2/OIDC credential engine: encrypted artifacts, grants, tickets,
//! token issuance, rate limiting and the authorization server facade.

pub mod account;
pub mod artifacts;
pub mod auth_server;
pub mod authorization_code;
pub mod claims;
pub mod crypto;
pub mod lockout;
pub mod notifications;
pub mod password;
pub mod rate_limit;
pub mod refresh_token;
pub mod signing;
pub mod state;
pub mod ticket;
pub mod token_issuer;
pub mod types;

// Re-export frequently used items from each module
pub use account::{FORGOT_PASSWORD_MESSAGE, LoginForm, LoginPage, LoginRedirect, SignupForm};
pub use auth_server::{
    AuthorizationServer, AuthorizeOutcome, AuthorizeRequest, ClientAuthentication,
    RequestContext, ServerSettings, TokenForm, TokenRequest, UserInfo, extract_client_auth,
};
pub use crypto::CryptoBox;
pub use notifications::{EmailSender, LogEmailSender, MemoryEmailSender, WebhookEmailSender};
pub use password::{Argon2PasswordService, PasswordService};
pub use rate_limit::{RateLimitAxis, RateLimitDecision, RateLimiter};
pub use signing::SigningKey;
pub use ticket::TicketAction;
pub use token_issuer::TokenLifetimes;
pub use types::{ApiRecord, Client, GrantType, SessionRecord, TokenResponse, User, parse_scope};
