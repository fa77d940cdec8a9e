//! OpenID Connect relying party.
//!
//! Drives the authorization code flow against an identity provider, verifies
//! ID Tokens and backchannel logout tokens and enforces essential claims.
//! Transport, sessions, randomness and time are injected, see
//! [`ProviderClient`], [`SessionStore`], [`RandomSource`] and [`Now`].
pub mod backchannel;
pub mod claims;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod end_session;
pub mod error;
pub mod flow;
pub mod id_token;
pub mod key;
pub mod logout_token;
pub mod policy;
pub mod provider;
pub mod random;
pub mod replay;
pub mod session;
pub mod step;
pub mod token;
pub mod userinfo;

pub use backchannel::{BackchannelDispatcher, LogoutHandler};
pub use claims::{ClaimSet, IdTokenClaims, LogoutTokenClaims, RawClaims};
pub use clock::{Now, SystemNow};
pub use config::{ClientOptions, OidcConfig};
pub use error::{
    BackchannelError, ConfigError, DecodeError, Rejection, TransportError, VerificationError,
};
pub use flow::{AuthorizationRedirect, CallbackParams, LoginParams, RelyingParty};
pub use policy::{ClaimsConfig, ClaimsPolicy};
pub use provider::{HttpProvider, ProviderClient};
pub use random::{RandomSource, SecureRandom};
pub use session::{MemorySessionStore, SessionStore, VisitorSession};
pub use step::{FlowStep, OtherRequest};
pub use userinfo::AuthenticatedIdentity;

#[cfg(feature = "mock")]
pub use clock::mock::{MOCK_NOW, MockNow};
#[cfg(feature = "mock")]
pub use random::mock::MockRandom;
