//! Client-side access token management for user sessions
//!
//! A client web application holds an access token and refresh token for
//! each signed-in user. This crate keeps those tokens usable and keeps the
//! session's view of the user in step with them:
//!
//! * [`ClientTokenContext`] hands out the held access token, exchanging the
//!   refresh token at the authority once the access token expires.
//! * [`ClientTokenRefreshGuard`] notices when the token behind a session has
//!   changed and reloads the session's authentication from the new token.
//!
//! ```
//! use std::time::Duration;
//!
//! use warden_clock::{TestClock, UnixTime};
//! use warden_oauth2::{AccessToken, RefreshToken};
//! use warden_tokens::{TokenLifetimeConfig, TokenStatus};
//!
//! let clock = TestClock::new(UnixTime::from_secs(1_700_000_000));
//! let token = TokenLifetimeConfig::default()
//!     .with_clock(clock.clone())
//!     .create_token(
//!         AccessToken::from_static("a1"),
//!         Some(RefreshToken::from_static("r1")),
//!         Duration::from_secs(3600),
//!     );
//!
//! assert_eq!(token.token_status_with_clock(&clock), TokenStatus::Fresh);
//! clock.advance(Duration::from_secs(3601));
//! assert_eq!(token.token_status_with_clock(&clock), TokenStatus::Expired);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod context;
mod events;
mod guard;
mod security;
pub mod source;
mod tokens;

pub use context::{ClientTokenContext, TokenAcquisitionError, TokenProvider};
pub use events::{AuthenticationEvent, AuthenticationEvents, BroadcastEvents, NoEvents};
pub use guard::{ClientTokenRefreshGuard, CredentialsError, RefreshGuardConfig, Resolution};
pub use security::SecurityContext;
pub use source::{RefreshSource, RefreshTokenSource};
pub use tokens::{ClientToken, TokenLifetimeConfig, TokenStatus};
