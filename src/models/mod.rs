use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a closed, string-backed enum stored as TEXT and serialized in snake_case.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("invalid {}: {}", stringify!($name), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(
    /// Whether a user is currently paired with a partner
    RelationshipStatus {
        Single => "single",
        InRelationship => "in_relationship",
    }
);

text_enum!(
    FriendStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
);

text_enum!(
    CoupleStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
);

text_enum!(
    SpaceType {
        Couple => "couple",
        Family => "family",
    }
);

text_enum!(
    SpaceStatus {
        Active => "active",
        Archived => "archived",
    }
);

text_enum!(
    /// Role of a member inside a space, ordered owner > admin > member
    MemberRole {
        Owner => "owner",
        Admin => "admin",
        Member => "member",
    }
);

text_enum!(
    MemberStatus {
        Active => "active",
        Pending => "pending",
        Left => "left",
    }
);

text_enum!(
    /// Lifecycle of a mention. Only `Pending` is non-terminal.
    MentionStatus {
        Pending => "pending",
        Viewed => "viewed",
        Ignored => "ignored",
        Expired => "expired",
    }
);

text_enum!(
    PostStatus {
        Normal => "normal",
        Deleted => "deleted",
    }
);

impl MemberRole {
    fn rank(&self) -> u8 {
        match self {
            MemberRole::Owner => 2,
            MemberRole::Admin => 1,
            MemberRole::Member => 0,
        }
    }

    /// Whether a member holding this role may approve, reject or remove a member holding `target`.
    /// Owners manage everyone, admins manage plain members, members manage nobody.
    pub fn can_manage(&self, target: MemberRole) -> bool {
        match self {
            MemberRole::Owner => true,
            MemberRole::Admin => target.rank() < self.rank(),
            MemberRole::Member => false,
        }
    }
}

/// User is an identity plus its couple pairing.
/// `relationship_status == InRelationship` exactly when `partner_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub relationship_status: RelationshipStatus,
    pub partner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            username: username.into(),
            display_name: display_name.into(),
            relationship_status: RelationshipStatus::Single,
            partner_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_single(&self) -> bool {
        self.relationship_status == RelationshipStatus::Single
    }

    pub fn is_paired_with(&self, other_id: &str) -> bool {
        self.relationship_status == RelationshipStatus::InRelationship
            && self.partner_id.as_deref() == Some(other_id)
    }
}

/// Friend is a directed request edge; one row per unordered pair of users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friend {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: FriendStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Friend {
    pub fn other_user(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Couple is a pairing request from `requester_id` to `partner_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Couple {
    pub id: String,
    pub requester_id: String,
    pub partner_id: String,
    pub status: CoupleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Longest check-in interval a space accepts (one year)
pub const MAX_CHECK_IN_INTERVAL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Longest response window a mention accepts (thirty days)
pub const MAX_MENTION_TIMEOUT_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Space is a shared group container joined through its invite code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub space_type: SpaceType,
    pub invite_code: String,
    pub check_in_interval_seconds: i64,
    pub status: SpaceStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Space {
    pub fn is_active(&self) -> bool {
        self.status == SpaceStatus::Active
    }
}

/// SpaceMember links a user to a space; one row per (space, user) for its whole lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMember {
    pub id: String,
    pub space_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SpacePost carries only what the check-in timer reads: author, space, status and time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacePost {
    pub id: String,
    pub space_id: String,
    pub user_id: String,
    pub content: String,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
}

/// PostMention asks `mentioned_user_id` to respond to a post before its deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMention {
    pub id: String,
    pub post_id: String,
    pub mentioned_user_id: String,
    pub mentioner_user_id: String,
    pub timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub status: MentionStatus,
}

impl PostMention {
    /// Saturates at the latest representable instant for out-of-range timeouts
    pub fn deadline(&self) -> DateTime<Utc> {
        Duration::try_seconds(self.timeout_seconds)
            .and_then(|timeout| self.created_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MentionStatus::Pending && self.viewed_at.is_none() && now >= self.deadline()
    }

    /// Whole seconds left before the deadline, zero once it has passed
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline() - now).num_seconds().max(0)
    }
}

/// Notification is an entry in a user's local inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub notification_type: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// Request/Response types for API
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct CreateSpaceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub space_type: SpaceType,
    pub partner_id: Option<String>,
    #[serde(default)]
    pub check_in_interval_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct JoinSpaceRequest {
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCheckInRequest {
    pub check_in_interval_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct FriendRequestBody {
    pub receiver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CoupleRequestBody {
    pub partner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMentionsRequest {
    pub mentioned_user_ids: Vec<String>,
    pub timeout_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTimeoutRequest {
    pub timeout_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}
