use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use thiserror::Error;
use warden_clock::{Clock, System};

use crate::{ClientToken, RefreshSource, TokenStatus};

/// An access token could not be obtained for the current user
#[derive(Debug, Error)]
pub enum TokenAcquisitionError {
    /// No usable token is held, and the user must be sent through the
    /// authorization flow again
    #[error("a redirect is required to obtain an access token")]
    UserRedirectRequired,
    /// The refresh token exchange failed
    #[error("unable to refresh access token")]
    Refresh(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// A source of the current user's access token
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The token to present, obtaining a new one if needed
    async fn access_token(&self) -> Result<Arc<ClientToken>, TokenAcquisitionError>;
}

#[async_trait]
impl<P: TokenProvider + ?Sized> TokenProvider for Arc<P> {
    async fn access_token(&self) -> Result<Arc<ClientToken>, TokenAcquisitionError> {
        (**self).access_token().await
    }
}

/// Holds a client's token for one user session
///
/// Fresh and stale tokens are handed out as-is. Once the token expires, it
/// is exchanged using its refresh token. Concurrent callers share a single
/// exchange.
pub struct ClientTokenContext<S, C = System> {
    token: ArcSwapOption<ClientToken>,
    source: S,
    refreshing: tokio::sync::Mutex<()>,
    clock: C,
}

impl<S: fmt::Debug, C: fmt::Debug> fmt::Debug for ClientTokenContext<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientTokenContext")
            .field("token", &self.token.load())
            .field("source", &self.source)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<S> ClientTokenContext<S, System> {
    /// An empty context that refreshes through `source`
    pub fn new(source: S) -> Self {
        Self::with_clock(source, System)
    }
}

impl<S, C> ClientTokenContext<S, C> {
    /// An empty context using a custom clock
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            token: ArcSwapOption::empty(),
            source,
            refreshing: tokio::sync::Mutex::new(()),
            clock,
        }
    }

    /// Replaces the held token, such as after completing an authorization
    /// code exchange
    pub fn set_token(&self, token: ClientToken) {
        self.token.store(Some(Arc::new(token)));
    }

    /// Drops the held token
    pub fn clear(&self) {
        self.token.store(None);
    }

    /// The currently held token
    pub fn token(&self) -> Option<Arc<ClientToken>> {
        self.token.load_full()
    }
}

impl<S, C> ClientTokenContext<S, C>
where
    S: RefreshSource,
    C: Clock + Send + Sync,
{
    fn usable(&self, token: &ClientToken) -> bool {
        token.token_status_with_clock(&self.clock) != TokenStatus::Expired
    }

    #[tracing::instrument(skip_all)]
    async fn refresh(&self) -> Result<Arc<ClientToken>, TokenAcquisitionError> {
        let _guard = self.refreshing.lock().await;

        let current = self
            .token
            .load_full()
            .ok_or(TokenAcquisitionError::UserRedirectRequired)?;
        if self.usable(&current) {
            tracing::trace!("token already refreshed by concurrent request");
            return Ok(current);
        }

        let refresh_token = current.refresh_token().ok_or_else(|| {
            tracing::debug!("access token expired without a refresh token");
            TokenAcquisitionError::UserRedirectRequired
        })?;

        match self.source.refresh(refresh_token).await {
            Ok(token) => {
                let token = Arc::new(token);
                self.token.store(Some(Arc::clone(&token)));
                Ok(token)
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "refresh token exchange failed");
                Err(TokenAcquisitionError::Refresh(Box::new(err)))
            }
        }
    }
}

#[async_trait]
impl<S, C> TokenProvider for ClientTokenContext<S, C>
where
    S: RefreshSource,
    C: Clock + Send + Sync,
{
    async fn access_token(&self) -> Result<Arc<ClientToken>, TokenAcquisitionError> {
        match self.token.load_full() {
            Some(token) if self.usable(&token) => Ok(token),
            Some(_) => self.refresh().await,
            None => Err(TokenAcquisitionError::UserRedirectRequired),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use color_eyre::Result;
    use warden_clock::{TestClock, UnixTime};
    use warden_oauth2::{AccessToken, RefreshToken, RefreshTokenRef};

    use super::*;
    use crate::TokenLifetimeConfig;

    const NOW: UnixTime = UnixTime(1_700_000_000_000);

    #[derive(Debug, Error)]
    #[error("authority rejected the refresh token")]
    struct Rejected;

    #[derive(Debug)]
    struct CountingSource {
        calls: AtomicUsize,
        clock: TestClock,
        fail: bool,
    }

    #[async_trait]
    impl RefreshSource for CountingSource {
        type Error = Rejected;

        async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<ClientToken, Rejected> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(Rejected);
            }
            Ok(TokenLifetimeConfig::default()
                .with_clock(self.clock.clone())
                .create_token(
                    AccessToken::from_static("renewed"),
                    Some(refresh_token.to_owned()),
                    Duration::from_secs(3600),
                ))
        }
    }

    fn context(fail: bool) -> (ClientTokenContext<CountingSource, TestClock>, TestClock) {
        let clock = TestClock::new(NOW);
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            clock: clock.clone(),
            fail,
        };
        (ClientTokenContext::with_clock(source, clock.clone()), clock)
    }

    fn issued(clock: &TestClock, refresh: Option<&'static str>) -> ClientToken {
        TokenLifetimeConfig::default()
            .with_clock(clock.clone())
            .create_token(
                AccessToken::from_static("original"),
                refresh.map(RefreshToken::from_static),
                Duration::from_secs(60),
            )
    }

    #[tokio::test]
    async fn empty_context_requires_redirect() {
        let (context, _) = context(false);
        assert!(matches!(
            context.access_token().await,
            Err(TokenAcquisitionError::UserRedirectRequired)
        ));
    }

    #[tokio::test]
    async fn stale_tokens_are_used_as_is() -> Result<()> {
        let (context, clock) = context(false);
        context.set_token(issued(&clock, Some("r1")));
        clock.advance(Duration::from_secs(45));

        assert_eq!(context.access_token().await?.access_token().as_str(), "original");
        assert_eq!(context.source.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_for_concurrent_callers() -> Result<()> {
        let (context, clock) = context(false);
        context.set_token(issued(&clock, Some("r1")));
        clock.advance(Duration::from_secs(61));

        let (a, b) = tokio::join!(context.access_token(), context.access_token());
        assert_eq!(a?.access_token().as_str(), "renewed");
        assert_eq!(b?.access_token().as_str(), "renewed");
        assert_eq!(context.source.calls.load(Ordering::SeqCst), 1);

        let held = context.token().map(|t| t.access_token().to_owned());
        assert_eq!(held, Some(AccessToken::from_static("renewed")));
        Ok(())
    }

    #[tokio::test]
    async fn expired_without_refresh_token_requires_redirect() {
        let (context, clock) = context(false);
        context.set_token(issued(&clock, None));
        clock.advance(Duration::from_secs(61));

        assert!(matches!(
            context.access_token().await,
            Err(TokenAcquisitionError::UserRedirectRequired)
        ));
    }

    #[tokio::test]
    async fn failed_exchange_keeps_expired_token() {
        let (context, clock) = context(true);
        context.set_token(issued(&clock, Some("r1")));
        clock.advance(Duration::from_secs(61));

        assert!(matches!(
            context.access_token().await,
            Err(TokenAcquisitionError::Refresh(_))
        ));
        let held = context.token().map(|t| t.access_token().to_owned());
        assert_eq!(held, Some(AccessToken::from_static("original")));
    }
}
