use uuid::Uuid;

use crate::models::profile::{Profile, Role};
use crate::models::session::{Session, User};

/// Local mirror of the backend's authentication state.
///
/// `Uninitialized → Loading → {Authenticated | Anonymous}`; backend events
/// move between the two settled states afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthState {
    #[default]
    Uninitialized,
    Loading,
    Authenticated {
        session: Session,
        /// `None` when the profile row could not be ensured or read.
        profile: Option<Profile>,
    },
    Anonymous,
}

impl AuthState {
    pub fn is_loading(&self) -> bool {
        matches!(self, AuthState::Uninitialized | AuthState::Loading)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user().map(|u| u.id)
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthState::Authenticated { profile, .. } => profile.as_ref(),
            _ => None,
        }
    }

    /// Role from the profile row; the row is the only authority.
    pub fn role(&self) -> Option<Role> {
        self.profile().map(|p| p.role)
    }
}
