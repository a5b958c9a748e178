//! Connection handshake state machine.
//!
//! `Pending → Authenticated → Admitted → Open → Closed`, with `Rejected`
//! terminal from the first three states. The phases are an explicit enum and
//! every transition is a method that checks its source phase — a connection
//! that skipped the membership check cannot reach `Admitted`, no matter what
//! the calling code does.

use crate::auth::gate::{CredentialError, Identity, IdentityGate};
use crate::teams::MembershipDirectory;

/// Why a handshake was rejected. Each variant maps to a distinct close code
/// so clients can tell a retryable credential problem from a fatal one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    CredentialMissing,
    CredentialInvalid,
    NotATeamMember,
}

impl Rejection {
    /// WebSocket close code sent to the client (4xxx application range).
    pub fn close_code(&self) -> u16 {
        match self {
            Self::CredentialMissing => 4001,
            Self::CredentialInvalid => 4002,
            Self::NotATeamMember => 4003,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::CredentialMissing => "credential required",
            Self::CredentialInvalid => "credential invalid",
            Self::NotATeamMember => "not a team member",
        }
    }
}

/// Handshake phases. `Closed` is reached from `Open` when the socket ends;
/// the connection actor owns that transition implicitly by unregistering.
#[derive(Debug, Clone)]
pub enum HandshakePhase {
    Pending,
    Authenticated(Identity),
    Admitted(Identity),
    Open(Identity),
    Closed,
    Rejected(Rejection),
}

/// The handshake driver for one connection attempt.
pub struct Handshake {
    phase: HandshakePhase,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::Pending,
        }
    }

    pub fn phase(&self) -> &HandshakePhase {
        &self.phase
    }

    /// `Pending → Authenticated` via the Identity Gate, or `Rejected`.
    pub async fn authenticate(
        &mut self,
        gate: &dyn IdentityGate,
        token: Option<&str>,
    ) -> Result<(), Rejection> {
        if !matches!(self.phase, HandshakePhase::Pending) {
            return Err(self.reject_out_of_order("authenticate"));
        }

        let Some(token) = token else {
            return Err(self.reject(Rejection::CredentialMissing));
        };

        match gate.verify_credential(token).await {
            Ok(identity) => {
                self.phase = HandshakePhase::Authenticated(identity);
                Ok(())
            }
            Err(CredentialError::Missing) => Err(self.reject(Rejection::CredentialMissing)),
            Err(CredentialError::Invalid) => Err(self.reject(Rejection::CredentialInvalid)),
        }
    }

    /// `Authenticated → Admitted` via the Membership Check, or `Rejected`.
    /// A missing or unknown team and a non-membership all reject alike — the
    /// client learns "not a team member", nothing about team existence.
    pub async fn admit(
        &mut self,
        membership: &dyn MembershipDirectory,
        team_id: Option<&str>,
    ) -> Result<(), Rejection> {
        let identity = match &self.phase {
            HandshakePhase::Authenticated(identity) => identity.clone(),
            _ => return Err(self.reject_out_of_order("admit")),
        };

        let Some(team_id) = team_id else {
            return Err(self.reject(Rejection::NotATeamMember));
        };

        if !membership.team_exists(team_id, &identity.tenant_id).await {
            return Err(self.reject(Rejection::NotATeamMember));
        }
        if !membership
            .is_member(team_id, &identity.user_id, &identity.tenant_id)
            .await
        {
            return Err(self.reject(Rejection::NotATeamMember));
        }

        self.phase = HandshakePhase::Admitted(identity);
        Ok(())
    }

    /// `Admitted → Open`. Yields the identity the connection runs under.
    /// Callers invoke this at the moment the registry entry is created.
    pub fn open(&mut self) -> Result<Identity, Rejection> {
        match &self.phase {
            HandshakePhase::Admitted(identity) => {
                let identity = identity.clone();
                self.phase = HandshakePhase::Open(identity.clone());
                Ok(identity)
            }
            _ => Err(self.reject_out_of_order("open")),
        }
    }

    fn reject(&mut self, rejection: Rejection) -> Rejection {
        self.phase = HandshakePhase::Rejected(rejection.clone());
        rejection
    }

    fn reject_out_of_order(&mut self, attempted: &str) -> Rejection {
        tracing::error!(
            attempted = attempted,
            phase = ?self.phase,
            "Handshake transition out of order; rejecting connection"
        );
        self.reject(Rejection::CredentialInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticGate {
        accept: bool,
    }

    #[async_trait]
    impl IdentityGate for StaticGate {
        async fn verify_credential(&self, _token: &str) -> Result<Identity, CredentialError> {
            if self.accept {
                Ok(Identity {
                    user_id: "u1".into(),
                    tenant_id: "acme".into(),
                    display_name: "User One".into(),
                })
            } else {
                Err(CredentialError::Invalid)
            }
        }
    }

    struct StaticMembership {
        exists: bool,
        member: bool,
    }

    #[async_trait]
    impl MembershipDirectory for StaticMembership {
        async fn team_exists(&self, _team_id: &str, _tenant_id: &str) -> bool {
            self.exists
        }
        async fn is_member(&self, _team_id: &str, _user_id: &str, _tenant_id: &str) -> bool {
            self.member
        }
    }

    #[tokio::test]
    async fn full_happy_path() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: true };
        let membership = StaticMembership { exists: true, member: true };

        hs.authenticate(&gate, Some("tok")).await.unwrap();
        hs.admit(&membership, Some("t1")).await.unwrap();
        let identity = hs.open().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert!(matches!(hs.phase(), HandshakePhase::Open(_)));
    }

    #[tokio::test]
    async fn missing_credential_rejects_with_4001() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: true };
        let rejection = hs.authenticate(&gate, None).await.unwrap_err();
        assert_eq!(rejection.close_code(), 4001);
        assert!(matches!(hs.phase(), HandshakePhase::Rejected(_)));
    }

    #[tokio::test]
    async fn invalid_credential_rejects_with_4002() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: false };
        let rejection = hs.authenticate(&gate, Some("bad")).await.unwrap_err();
        assert_eq!(rejection.close_code(), 4002);
    }

    #[tokio::test]
    async fn non_member_rejects_with_4003() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: true };
        let membership = StaticMembership { exists: true, member: false };

        hs.authenticate(&gate, Some("tok")).await.unwrap();
        let rejection = hs.admit(&membership, Some("t1")).await.unwrap_err();
        assert_eq!(rejection.close_code(), 4003);
    }

    #[tokio::test]
    async fn unknown_team_rejects_like_non_membership() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: true };
        let membership = StaticMembership { exists: false, member: true };

        hs.authenticate(&gate, Some("tok")).await.unwrap();
        let rejection = hs.admit(&membership, Some("missing")).await.unwrap_err();
        assert_eq!(rejection, Rejection::NotATeamMember);
    }

    #[tokio::test]
    async fn cannot_admit_without_authentication() {
        let mut hs = Handshake::new();
        let membership = StaticMembership { exists: true, member: true };
        assert!(hs.admit(&membership, Some("t1")).await.is_err());
        assert!(matches!(hs.phase(), HandshakePhase::Rejected(_)));
    }

    #[tokio::test]
    async fn cannot_open_without_admission() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: true };
        hs.authenticate(&gate, Some("tok")).await.unwrap();
        assert!(hs.open().is_err());
    }

    #[tokio::test]
    async fn rejected_handshake_stays_rejected() {
        let mut hs = Handshake::new();
        let gate = StaticGate { accept: false };
        let membership = StaticMembership { exists: true, member: true };

        let _ = hs.authenticate(&gate, Some("bad")).await;
        assert!(hs.admit(&membership, Some("t1")).await.is_err());
        assert!(hs.open().is_err());
    }
}
