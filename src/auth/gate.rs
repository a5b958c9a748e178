//! The Identity Gate seam: resolves a bearer credential to a user identity.
//!
//! The identity/authorization store is an external collaborator; everything
//! behind this trait is replaceable without touching the handshake.

use async_trait::async_trait;

/// A resolved identity: who is on the other end of the socket, and which
/// tenant every subsequent lookup must be scoped to.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub tenant_id: String,
    pub display_name: String,
}

/// Why a credential was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential was presented at all.
    Missing,
    /// Presented but unusable: bad signature, expired, malformed.
    Invalid,
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "credential missing"),
            Self::Invalid => write!(f, "credential invalid"),
        }
    }
}

/// External collaborator: verifies a bearer credential.
#[async_trait]
pub trait IdentityGate: Send + Sync {
    async fn verify_credential(&self, token: &str) -> Result<Identity, CredentialError>;
}

/// Production gate: validates HS256 tokens minted by the identity service
/// against the shared verification key. Purely CPU-bound, no I/O.
pub struct JwtIdentityGate {
    secret: Vec<u8>,
}

impl JwtIdentityGate {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl IdentityGate for JwtIdentityGate {
    async fn verify_credential(&self, token: &str) -> Result<Identity, CredentialError> {
        let claims = super::jwt::validate_access_token(&self.secret, token).map_err(|e| {
            tracing::debug!(error = %e, "Credential validation failed");
            CredentialError::Invalid
        })?;

        Ok(Identity {
            user_id: claims.sub,
            tenant_id: claims.tenant,
            display_name: claims.name,
        })
    }
}
