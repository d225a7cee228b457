//! Users and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum full name length in bytes
pub const USER_FULL_NAME_BYTES_MAX: usize = 255;

/// Maximum email length in bytes
pub const USER_EMAIL_BYTES_MAX: usize = 254;

// =============================================================================
// Role
// =============================================================================

/// Access level attached to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleName {
    Admin,
    Staff,
    Viewer,
}

impl RoleName {
    /// Get string representation (as stored in `Role.RoleName`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Staff => "Staff",
            Self::Viewer => "Viewer",
        }
    }

    /// Parse from string, case-insensitively.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "staff" => Some(Self::Staff),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored role row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

impl Role {
    #[must_use]
    pub fn new(name: &str) -> Self {
        assert!(!name.is_empty(), "role name cannot be empty");
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

// =============================================================================
// User
// =============================================================================

/// A registered account.
///
/// Staff sign up inactive and wait for an admin; admins are created active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role_id: Uuid,
    pub full_name: String,
    pub email: String,
    /// Argon2 PHC string. Never serialized to clients.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_staff: bool,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new user row.
    ///
    /// # Panics
    /// Panics if the name or email exceed their limits.
    #[must_use]
    pub fn new(
        role_id: Uuid,
        full_name: String,
        email: String,
        password_hash: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        assert!(
            full_name.len() <= USER_FULL_NAME_BYTES_MAX,
            "full name {} bytes exceeds max {}",
            full_name.len(),
            USER_FULL_NAME_BYTES_MAX
        );
        assert!(
            email.len() <= USER_EMAIL_BYTES_MAX,
            "email {} bytes exceeds max {}",
            email.len(),
            USER_EMAIL_BYTES_MAX
        );

        Self {
            id: Uuid::new_v4(),
            role_id,
            full_name,
            email,
            password_hash,
            created_at,
            last_login: None,
            is_active: false,
            is_admin: false,
            is_staff: false,
            approved_by: None,
            approved_at: None,
        }
    }

    /// Staff application still waiting for an admin decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.is_active && self.is_staff
    }

    /// Allowed to add and edit events.
    #[must_use]
    pub fn can_manage_events(&self) -> bool {
        self.is_active && (self.is_admin || self.is_staff)
    }

    /// Mark a pending application approved.
    pub fn approve(&mut self, admin_id: Uuid, at: DateTime<Utc>) {
        assert!(self.is_pending(), "can only approve pending users");
        self.is_active = true;
        self.approved_by = Some(admin_id);
        self.approved_at = Some(at);
    }

    /// First name for greetings.
    #[must_use]
    pub fn first_name(&self) -> &str {
        self.full_name.split_whitespace().next().unwrap_or(&self.full_name)
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.full_name, self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff() -> User {
        let mut user = User::new(
            Uuid::new_v4(),
            "Maria Clara".to_string(),
            "maria@cit.edu".to_string(),
            "hash".to_string(),
            Utc::now(),
        );
        user.is_staff = true;
        user
    }

    #[test]
    fn test_role_name_from_str() {
        assert_eq!(RoleName::from_str("ADMIN"), Some(RoleName::Admin));
        assert_eq!(RoleName::from_str("staff"), Some(RoleName::Staff));
        assert_eq!(RoleName::from_str("guest"), None);
    }

    #[test]
    fn test_pending_lifecycle() {
        let mut user = staff();
        assert!(user.is_pending());
        assert!(!user.can_manage_events());

        let admin = Uuid::new_v4();
        user.approve(admin, Utc::now());

        assert!(!user.is_pending());
        assert!(user.can_manage_events());
        assert_eq!(user.approved_by, Some(admin));
    }

    #[test]
    #[should_panic(expected = "can only approve pending users")]
    fn test_approve_twice_panics() {
        let mut user = staff();
        user.approve(Uuid::new_v4(), Utc::now());
        user.approve(Uuid::new_v4(), Utc::now());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(staff()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "maria@cit.edu");
    }
}
