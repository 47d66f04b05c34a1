//! Local participant identity.
//!
//! The router never infers "who am I" from ambient state or from advisory
//! fields the relay stamps on messages; every self-comparison uses the
//! identity injected here.

/// Role of the local participant within a lecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Captures and sends media; always the handshake initiator
    Broadcaster,
    /// Receives media; never initiates offers
    Viewer,
}

/// Identity of the local participant for one (lecture, user) connection
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Opaque participant id, as the relay knows it
    pub user_id: String,
    /// Lecture this connection belongs to
    pub lecture_id: String,
    /// Identity token attached to the signaling connection at connect time
    pub token: String,
    /// Local role
    pub role: Role,
}

impl LocalIdentity {
    /// Identity for the lecture's broadcaster
    pub fn broadcaster(
        user_id: impl Into<String>,
        lecture_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            lecture_id: lecture_id.into(),
            token: token.into(),
            role: Role::Broadcaster,
        }
    }

    /// Identity for a viewer
    pub fn viewer(
        user_id: impl Into<String>,
        lecture_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            lecture_id: lecture_id.into(),
            token: token.into(),
            role: Role::Viewer,
        }
    }

    /// True when the local participant is the broadcaster
    pub fn is_broadcaster(&self) -> bool {
        self.role == Role::Broadcaster
    }
}
