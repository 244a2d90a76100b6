//! Run identity for keying durable pipeline state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies one independent pipeline instance.
///
/// Two requests with the same `(application, user, session)` triple share a
/// context and are serialized against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The application the run belongs to.
    pub application: String,
    /// The user who owns the run.
    pub user: String,
    /// The session within the user's application.
    pub session: String,
}

impl RunIdentity {
    /// Creates a new run identity.
    #[must_use]
    pub fn new(
        application: impl Into<String>,
        user: impl Into<String>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            user: user.into(),
            session: session.into(),
        }
    }

    /// Returns a filesystem-safe key derived from all three components.
    ///
    /// Components are length-prefixed before hashing so `("a/b", "c", "d")`
    /// and `("a", "b/c", "d")` never collide.
    #[must_use]
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.application, &self.user, &self.session] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.application, self.user, self.session)
    }
}
