//! Identifier, revision and ordering types for docbench.

use crate::TypesError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of digits in the numeric part of a generated document id.
pub const DOC_ID_WIDTH: usize = 10;

/// Build the id of the `i`-th generated document.
///
/// Ids are `doc_` followed by `i` zero-padded to [`DOC_ID_WIDTH`] digits, so
/// lexicographic order matches numeric order.
pub fn doc_id(i: u64) -> String {
    format!("doc_{:0width$}", i, width = DOC_ID_WIDTH)
}

/// Generate a random database name that is valid for CouchDB.
///
/// Names start with a lowercase letter and only contain digits and `_`.
pub fn safe_random_db_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("test0_{:016}", rng.gen_range(0..10_000_000_000_000_000u64))
}

/// A parsed CouchDB revision (`N-hash`).
///
/// Ordering follows CouchDB's deterministic winner selection: higher
/// generation wins, ties are broken by the lexically greater hash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    /// Create a revision from its parts.
    pub fn new(generation: u64, hash: impl Into<String>) -> Self {
        Self {
            generation,
            hash: hash.into(),
        }
    }

    /// Revision generation (number of edits in this branch).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Revision hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl FromStr for Revision {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| TypesError::InvalidRevision(s.to_string()))?;
        let generation: u64 = generation
            .parse()
            .map_err(|_| TypesError::InvalidRevision(s.to_string()))?;
        if generation == 0 || hash.is_empty() {
            return Err(TypesError::InvalidRevision(s.to_string()));
        }
        Ok(Self::new(generation, hash))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self)
    }
}

/// An opaque database update sequence.
///
/// CouchDB 1.x reports integers, clustered CouchDB reports strings. The value
/// is only ever echoed back as the `since` of the next changes request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(serde_json::Value);

impl Seq {
    /// Sequence for a numeric position.
    pub fn from_u64(value: u64) -> Self {
        Self(serde_json::Value::from(value))
    }

    /// Sequence representing "before the first change".
    pub fn zero() -> Self {
        Self::from_u64(0)
    }

    /// Numeric value, if this sequence is numeric.
    pub fn as_u64(&self) -> Option<u64> {
        self.0.as_u64()
    }

    /// Render for use as a `since` query parameter.
    pub fn as_query_param(&self) -> String {
        match &self.0 {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl Default for Seq {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_query_param())
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self)
    }
}
