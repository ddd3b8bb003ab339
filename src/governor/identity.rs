use sha2::{Digest, Sha256};

/// Who is on the other end of a chat request. Authenticated users come from
/// the upstream auth proxy's headers; everyone else gets a salted fingerprint
/// so quotas survive across requests without storing raw client data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    User { id: i64, role: String },
    Anonymous { fingerprint: String },
}

impl ClientIdentity {
    pub fn user(id: i64, role: impl Into<String>) -> Self {
        Self::User {
            id,
            role: role.into(),
        }
    }

    /// SHA-256 over salt, forwarded address, and user agent, hex-encoded.
    pub fn anonymous(salt: &str, forwarded_for: &str, user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(b"|");
        hasher.update(forwarded_for.as_bytes());
        hasher.update(b"|");
        hasher.update(user_agent.as_bytes());
        Self::Anonymous {
            fingerprint: hex::encode(hasher.finalize()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::User { id, .. } => Some(*id),
            Self::Anonymous { .. } => None,
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            Self::User { role, .. } => Some(role),
            Self::Anonymous { .. } => None,
        }
    }

    /// Stable key used by the quota/streak counters.
    pub fn counter_key(&self) -> String {
        match self {
            Self::User { id, .. } => format!("user:{id}"),
            Self::Anonymous { fingerprint } => format!("anon:{fingerprint}"),
        }
    }
}
