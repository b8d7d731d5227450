//! OAuth2 scopes

use std::{collections::btree_set, convert::TryFrom, str::FromStr};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An invalid scope token
#[derive(Debug, Error)]
pub enum InvalidScopeToken {
    /// The scope token was the empty string
    #[error("scope token cannot be empty")]
    EmptyString,
    /// The scope token contained an invalid byte
    #[error("invalid scope token byte at position {position}: 0x{value:02x}")]
    InvalidByte {
        /// The index in the scope token where the invalid byte was found
        position: usize,
        /// The invalid byte value
        value: u8,
    },
}

impl From<std::convert::Infallible> for InvalidScopeToken {
    #[inline(always)]
    fn from(x: std::convert::Infallible) -> Self {
        match x {}
    }
}

/// An OAuth2 scope token as defined in [RFC 6749, Section 3.3][RFC6749 3.3]
///
/// A scope token must be composed of printable ASCII characters excluding
/// ` ` (space), `"` (double quote), and `\` (backslash).
///
///   [RFC6749 3.3]: https://datatracker.ietf.org/doc/html/rfc6749#section-3.3
#[braid(
    serde,
    validator,
    ref_doc = "A borrowed reference to an OAuth2 [`ScopeToken`]"
)]
pub struct ScopeToken;

impl aliri_braid::Validator for ScopeToken {
    type Error = InvalidScopeToken;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            Err(InvalidScopeToken::EmptyString)
        } else if let Some((position, &value)) = s
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, &b)| b <= 0x20 || b == 0x22 || b == 0x5C || 0x7F <= b)
        {
            Err(InvalidScopeToken::InvalidByte { position, value })
        } else {
            Ok(())
        }
    }
}

/// The `scope` claim may be a space-delimited string or an array
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum ScopeDto {
    String(String),
    Array(Vec<ScopeToken>),
}

impl TryFrom<Option<ScopeDto>> for Scope {
    type Error = InvalidScopeToken;

    fn try_from(dto: Option<ScopeDto>) -> Result<Self, Self::Error> {
        match dto {
            Some(ScopeDto::String(s)) => Self::try_from(s.as_str()),
            Some(ScopeDto::Array(arr)) => Ok(arr.into_iter().collect()),
            None => Ok(Self::empty()),
        }
    }
}

impl From<Scope> for ScopeDto {
    fn from(s: Scope) -> Self {
        ScopeDto::Array(s.0.into_iter().collect())
    }
}

/// An OAuth2 scope defining a set of access permissions
///
/// Serializes as an array of scope tokens, and accepts either an array or
/// a space-delimited string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Option<ScopeDto>", into = "ScopeDto")]
pub struct Scope(btree_set::BTreeSet<ScopeToken>);

impl Scope {
    /// Produces an empty scope
    #[inline]
    pub const fn empty() -> Self {
        Self(btree_set::BTreeSet::new())
    }

    /// Constructs a new scope from a single scope token
    #[inline]
    pub fn single(scope_token: ScopeToken) -> Self {
        let mut s = Self::empty();
        s.insert(scope_token);
        s
    }

    /// Adds an additional scope token
    #[inline]
    pub fn and(mut self, scope_token: ScopeToken) -> Self {
        self.insert(scope_token);
        self
    }

    /// Adds a scope token to the scope
    #[inline]
    pub fn insert(&mut self, scope_token: ScopeToken) {
        self.0.insert(scope_token);
    }

    /// Produces an iterator of the scope tokens in this set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ScopeTokenRef> {
        self.0.iter().map(|t| &**t)
    }

    /// Whether the scope holds a given token
    #[inline]
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t.as_str() == token)
    }

    /// Checks to see whether this scope contains all of
    /// the scope tokens in `subset`.
    #[inline]
    pub fn contains_all(&self, subset: &Scope) -> bool {
        self.0.is_superset(&subset.0)
    }

    /// Whether the scope holds no tokens
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Formats as the space-delimited form used on the wire
impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut first = true;
        for token in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(token.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl IntoIterator for Scope {
    type Item = ScopeToken;
    type IntoIter = btree_set::IntoIter<ScopeToken>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<S> Extend<S> for Scope
where
    S: Into<ScopeToken>,
{
    #[inline]
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = S>,
    {
        self.0.extend(iter.into_iter().map(Into::into))
    }
}

impl<S> FromIterator<S> for Scope
where
    S: Into<ScopeToken>,
{
    #[inline]
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        let mut set = Self::empty();
        set.extend(iter);
        set
    }
}

impl TryFrom<&'_ str> for Scope {
    type Error = InvalidScopeToken;

    #[inline]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.split_whitespace()
            .map(|t| ScopeToken::new(t.to_owned()))
            .collect()
    }
}

impl FromStr for Scope {
    type Err = InvalidScopeToken;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn owned_rejects_empty() {
        let x = ScopeToken::new(String::new());
        assert!(matches!(x, Err(InvalidScopeToken::EmptyString)));
    }

    #[test]
    fn owned_rejects_invalid_quote() {
        let x = ScopeToken::new("read\"write\"".to_owned());
        assert!(matches!(
            x,
            Err(InvalidScopeToken::InvalidByte {
                position: 4,
                value: 0x22
            })
        ));
    }

    #[test]
    fn parses_space_delimited() -> Result<()> {
        let scope: Scope = "read  write".parse()?;
        assert!(scope.contains("read"));
        assert!(scope.contains("write"));
        assert!(!scope.contains("admin"));
        Ok(())
    }

    #[test]
    fn deserializes_string_or_array() -> Result<()> {
        let from_string: Scope = serde_json::from_str(r#""USER read""#)?;
        let from_array: Scope = serde_json::from_str(r#"["read", "USER"]"#)?;
        assert_eq!(from_string, from_array);

        let missing: Option<Scope> = serde_json::from_str("null")?;
        assert!(missing.is_none());
        Ok(())
    }

    #[test]
    fn serializes_as_sorted_array() -> Result<()> {
        let scope: Scope = "write read".parse()?;
        assert_eq!(serde_json::to_string(&scope)?, r#"["read","write"]"#);
        Ok(())
    }

    #[test]
    fn superset_check() -> Result<()> {
        let held: Scope = "read write".parse()?;
        assert!(held.contains_all(&"read".parse()?));
        assert!(!held.contains_all(&"read admin".parse()?));
        assert!(held.contains_all(&Scope::empty()));
        Ok(())
    }

    #[test]
    fn displays_space_delimited_in_order() -> Result<()> {
        let scope: Scope = "write read".parse()?;
        assert_eq!(scope.to_string(), "read write");
        assert_eq!(Scope::empty().to_string(), "");
        Ok(())
    }
}
