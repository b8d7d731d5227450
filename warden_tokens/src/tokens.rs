use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_clock::{Clock, System, UnixTime};
use warden_oauth2::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, BEARER};

/// A token held by a client, along with lifetime information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientToken {
    access_token: AccessToken,
    token_type: String,
    refresh_token: Option<RefreshToken>,
    lifetime: Duration,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be refreshed
    Stale,
    /// The token is no longer valid
    Expired,
}

impl ClientToken {
    /// The access token to present to resource servers
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The token type, normally `bearer`
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Sets the token type reported by the authority
    pub fn with_token_type(self, token_type: impl Into<String>) -> Self {
        Self {
            token_type: token_type.into(),
            ..self
        }
    }

    /// The refresh token, if one was issued
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// The lifetime granted by the authority
    #[inline]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// When the token was received
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// When the token becomes stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// When the token expires
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The token's lifetime status as of `time`
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// The token's lifetime status according to `clock`
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// How much longer the token remains valid as of `time`
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> Duration {
        self.expiry.saturating_duration_since(time)
    }
}

/// Configuration for determining how long a token should be considered fresh
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    freshness_period: f64,
    min_staleness_period: Duration,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Uses a freshness period of 75%, with a minimum stale period of 30
    /// seconds, and the system clock
    fn default() -> Self {
        Self::new(0.75, Duration::from_secs(30))
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A token is considered stale once `freshness_period` (a ratio of the
    /// token's lifetime) has passed, and always has at least
    /// `min_staleness_period` of stale time before expiring.
    pub fn new(freshness_period: f64, min_staleness_period: Duration) -> Self {
        Self {
            freshness_period,
            min_staleness_period,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Uses a different clock
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            freshness_period: self.freshness_period,
            min_staleness_period: self.min_staleness_period,
            clock,
        }
    }

    /// The clock in use
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn time_to_stale(&self, issued: UnixTime, valid_duration: Duration) -> UnixTime {
        let fresh = valid_duration.mul_f64(self.freshness_period);
        let latest = valid_duration.saturating_sub(self.min_staleness_period);
        issued + fresh.min(latest)
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Constructs a bearer token with a lifetime, as received now
    ///
    /// Use [`ClientToken::with_token_type`] when the authority reports a
    /// different token type.
    pub fn create_token(
        &self,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        valid_duration: Duration,
    ) -> ClientToken {
        let issued = self.clock.now();
        ClientToken {
            access_token,
            token_type: BEARER.to_owned(),
            refresh_token,
            lifetime: valid_duration,
            issued,
            stale: self.time_to_stale(issued, valid_duration),
            expiry: issued + valid_duration,
        }
    }
}
