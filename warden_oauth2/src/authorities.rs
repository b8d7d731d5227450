//! Granted authorities (roles) and their canonical ordering

use std::collections::{btree_set, BTreeMap, BTreeSet};

use thiserror::Error;

/// A role or other authority granted to a principal
///
/// An authority without a name is one that could not be represented as a
/// string, such as an anonymous or otherwise unresolved grant. Unnamed
/// authorities always order before named ones; named authorities order
/// lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantedAuthority(Option<String>);

impl GrantedAuthority {
    /// A named authority, such as `ROLE_USER`
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    /// An authority with no string representation
    #[inline]
    pub const fn unresolved() -> Self {
        Self(None)
    }

    /// The authority's name, if it has one
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&'_ str> for GrantedAuthority {
    #[inline]
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for GrantedAuthority {
    #[inline]
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A deterministically ordered set of granted authorities
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authorities(BTreeSet<GrantedAuthority>);

impl Authorities {
    /// An empty set of authorities
    #[inline]
    pub const fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses a comma-delimited list such as `"ROLE_USER, ROLE_ADMIN"`
    ///
    /// Entries are trimmed, and empty entries are skipped.
    pub fn from_comma_separated(s: &str) -> Self {
        s.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(GrantedAuthority::new)
            .collect()
    }

    /// Adds an authority to the set
    #[inline]
    pub fn insert(&mut self, authority: impl Into<GrantedAuthority>) {
        self.0.insert(authority.into());
    }

    /// Whether a named authority is held
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|a| a.as_str() == Some(name))
    }

    /// Whether the set holds no authorities
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of authorities held
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the authorities in canonical order
    #[inline]
    pub fn iter(&self) -> btree_set::Iter<'_, GrantedAuthority> {
        self.0.iter()
    }

    /// The authority names in canonical order, with unresolved authorities
    /// as `None`
    pub fn names(&self) -> impl Iterator<Item = Option<&str>> {
        self.0.iter().map(GrantedAuthority::as_str)
    }
}

impl<A: Into<GrantedAuthority>> FromIterator<A> for Authorities {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<A: Into<GrantedAuthority>> Extend<A> for Authorities {
    fn extend<I: IntoIterator<Item = A>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into))
    }
}

impl IntoIterator for Authorities {
    type Item = GrantedAuthority;
    type IntoIter = btree_set::IntoIter<GrantedAuthority>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Authorities {
    type Item = &'a GrantedAuthority;
    type IntoIter = btree_set::Iter<'a, GrantedAuthority>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A role hierarchy definition could not be parsed
#[derive(Debug, Error)]
#[error("invalid role hierarchy on line {line}: '{text}'")]
pub struct InvalidRoleHierarchy {
    line: usize,
    text: String,
}

/// A hierarchy in which holding one role implies holding others
///
/// Definitions are written one relation per line, with `>` meaning
/// "includes":
///
/// ```
/// use warden_oauth2::{Authorities, RoleHierarchy};
///
/// let hierarchy: RoleHierarchy = "ROLE_ADMIN > ROLE_STAFF > ROLE_USER".parse().unwrap();
/// let reachable = hierarchy.reachable(&Authorities::from_comma_separated("ROLE_ADMIN"));
/// assert!(reachable.contains("ROLE_USER"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleHierarchy {
    includes: BTreeMap<String, BTreeSet<String>>,
}

impl RoleHierarchy {
    /// Declares that `higher` includes every authority of `lower`
    pub fn with_relation(mut self, higher: impl Into<String>, lower: impl Into<String>) -> Self {
        self.includes
            .entry(higher.into())
            .or_default()
            .insert(lower.into());
        self
    }

    /// Expands `authorities` to include every authority reachable through
    /// the hierarchy
    pub fn reachable(&self, authorities: &Authorities) -> Authorities {
        let mut result = authorities.clone();
        let mut pending: Vec<&str> = authorities.names().flatten().collect();

        while let Some(name) = pending.pop() {
            if let Some(lower) = self.includes.get(name) {
                for l in lower {
                    if !result.contains(l) {
                        result.insert(l.as_str());
                        pending.push(l);
                    }
                }
            }
        }

        result
    }
}

impl std::str::FromStr for RoleHierarchy {
    type Err = InvalidRoleHierarchy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hierarchy = Self::default();

        for (idx, text) in s.lines().enumerate() {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            let roles: Vec<&str> = text.split('>').map(str::trim).collect();
            if roles.len() < 2 || roles.iter().any(|r| r.is_empty()) {
                return Err(InvalidRoleHierarchy {
                    line: idx + 1,
                    text: text.to_owned(),
                });
            }

            for pair in roles.windows(2) {
                hierarchy = hierarchy.with_relation(pair[0], pair[1]);
            }
        }

        Ok(hierarchy)
    }
}
