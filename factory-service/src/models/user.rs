use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Wrong passwords allowed before an account is blocked.
pub const MAX_PASSWORD_TRIES: i32 = 5;

/// Days between a deletion request and the account actually being removed.
pub const ACCOUNT_DELETION_GRACE_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Client,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Client => "client",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::Client,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub tokens: i64,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub password_tries: i32,
    pub account_blocked: bool,
    pub account_suspended: bool,
    pub account_deleted: bool,
    pub marked_for_deletion: bool,
    pub delete_account_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> UserRole {
        UserRole::from_string(&self.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role() == UserRole::Admin
    }

    /// Reason the account may not be used, if any.
    pub fn access_denied_reason(&self) -> Option<&'static str> {
        if self.account_deleted {
            Some("Account has been deleted")
        } else if self.account_blocked {
            Some("Account is blocked")
        } else if self.account_suspended {
            Some("Account is suspended")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            password_hash: "$argon2id$...".to_string(),
            role: "client".to_string(),
            tokens: 0,
            email_verified: false,
            password_tries: 0,
            account_blocked: false,
            account_suspended: false,
            account_deleted: false,
            marked_for_deletion: false,
            delete_account_after: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(UserRole::from_string("admin"), UserRole::Admin);
        assert_eq!(UserRole::from_string("client"), UserRole::Client);
        assert_eq!(UserRole::from_string("unknown"), UserRole::Client);
    }

    #[test]
    fn test_access_denied_reason() {
        let mut u = user();
        assert!(u.access_denied_reason().is_none());

        u.account_suspended = true;
        assert_eq!(u.access_denied_reason(), Some("Account is suspended"));

        u.account_blocked = true;
        assert_eq!(u.access_denied_reason(), Some("Account is blocked"));

        u.account_deleted = true;
        assert_eq!(u.access_denied_reason(), Some("Account has been deleted"));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_tries").is_none());
        assert_eq!(json["tokens"], 0);
    }
}
