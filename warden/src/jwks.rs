use serde::{Deserialize, Deserializer, Serialize};

use crate::{jwa, jwk, Jwk};

/// A JSON Web Key Set (JWKS)
///
/// Keys that cannot be understood (unknown key types or algorithms) are
/// dropped when deserializing rather than failing the whole set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<Jwk>,
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// Removes every key with the given ID, returning whether any were removed
    ///
    /// Tokens signed by a removed key will no longer find a verification key.
    pub fn remove_key(&mut self, kid: &jwk::KeyIdRef) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k.key_id() != Some(kid));
        self.keys.len() != before
    }

    /// A view of the keys in this set
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Gets the best key based on the key id (if provided) and algorithm requested
    ///
    /// When a key ID is given, only a key carrying exactly that ID will be
    /// returned. Without one, the most specific compatible key is chosen.
    pub fn get_key_by_opt(
        &self,
        kid: Option<&jwk::KeyIdRef>,
        alg: jwa::Algorithm,
    ) -> Option<&Jwk> {
        let best = self.keys.iter().fold(None, move |best, k| {
            if !k.is_compatible(alg) {
                return best;
            }

            let mut score = 0;

            match (kid, k.key_id()) {
                (Some(wanted), Some(actual)) if wanted == actual => score += 4,
                (Some(_), _) => return best,
                (None, _) => {}
            }

            if k.algorithm().is_some() {
                score += 2;
            }

            if k.usage().is_some() {
                score += 1;
            }

            match best {
                Some((_, best_score)) if best_score < score => Some((k, score)),
                None => Some((k, score)),
                _ => best,
            }
        });

        best.map(|(b, _)| b)
    }
}

impl FromIterator<Jwk> for Jwks {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;

    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
            Ok(key) => Some(key),
            Err(_error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_error, "ignoring unusable key in key set");
                None
            }
        })
        .collect())
}
