use std::sync::Arc;

use arc_swap::ArcSwapOption;
use warden_oauth2::OAuth2Authentication;

/// The authentication held by one client session
///
/// Replacing the authentication is a single atomic store, so concurrent
/// readers observe either the old or the new authentication in full.
#[derive(Debug, Default)]
pub struct SecurityContext {
    authentication: ArcSwapOption<OAuth2Authentication>,
}

impl SecurityContext {
    /// A context holding no authentication
    pub fn new() -> Self {
        Self::default()
    }

    /// A context holding `authentication`
    pub fn with_authentication(authentication: OAuth2Authentication) -> Self {
        Self {
            authentication: ArcSwapOption::from_pointee(authentication),
        }
    }

    /// The current authentication, if any
    pub fn authentication(&self) -> Option<Arc<OAuth2Authentication>> {
        self.authentication.load_full()
    }

    /// Replaces the current authentication
    pub fn set_authentication(&self, authentication: Arc<OAuth2Authentication>) {
        self.authentication.store(Some(authentication));
    }

    /// Removes the current authentication
    pub fn clear(&self) {
        self.authentication.store(None);
    }
}
