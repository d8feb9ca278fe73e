use serde::Deserialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::backend::BackendError;

/// Who a package or booking belongs to. Never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Profile(Uuid),
    Child(Uuid),
}

impl Owner {
    fn from_columns(user_id: Option<Uuid>, child_id: Option<Uuid>, what: &str) -> Result<Self, BackendError> {
        match (user_id, child_id) {
            (_, Some(child_id)) => Ok(Owner::Child(child_id)),
            (Some(user_id), None) => Ok(Owner::Profile(user_id)),
            (None, None) => Err(BackendError::Decode(format!("{what} has neither user_id nor child_id"))),
        }
    }
}

/// The acting identity: a parent profile, optionally booking for one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub child_id: Option<Uuid>,
}

impl Identity {
    pub fn parent(user_id: Uuid) -> Self {
        Identity { user_id, child_id: None }
    }

    pub fn child(user_id: Uuid, child_id: Uuid) -> Self {
        Identity { user_id, child_id: Some(child_id) }
    }

    pub fn owner(&self) -> Owner {
        match self.child_id {
            Some(child_id) => Owner::Child(child_id),
            None => Owner::Profile(self.user_id),
        }
    }

    pub fn package_kind(&self) -> PackageKind {
        if self.child_id.is_some() {
            PackageKind::Junior
        } else {
            PackageKind::Adult
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSummary {
    pub profile: Profile,
    pub child_count: u32,
}

impl ProfileSummary {
    pub fn label(&self) -> String {
        if self.child_count > 0 {
            format!("{} (👨‍👩‍👧 Parent - {} kids)", self.profile.full_name, self.child_count)
        } else {
            format!("{} (👤 Player)", self.profile.full_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChildProfile {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub nickname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Adult,
    Junior,
}

impl PackageKind {
    fn parse(s: &str) -> Result<Self, BackendError> {
        match s {
            "adult" => Ok(PackageKind::Adult),
            "junior" => Ok(PackageKind::Junior),
            other => Err(BackendError::Decode(format!("unknown package type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageTemplate {
    pub id: i32,
    pub name: String,
    pub kind: PackageKind,
    pub price: f64,
    pub session_count: u32,
    pub days_valid: u32,
    pub extra_session_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserPackage {
    pub id: Uuid,
    pub owner: Owner,
    pub template_name: String,
    pub extra_session_price: f64,
    pub remaining_sessions: u32,
    pub expiry_date: Date,
    pub active: bool,
    pub extra_sessions_purchased: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub id: Uuid,
    pub start_time: OffsetDateTime,
    pub location: String,
    pub max_capacity: u32,
    pub current_bookings: u32,
}

impl Class {
    pub fn is_full(&self) -> bool {
        self.current_bookings >= self.max_capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Booked,
    /// Position in the class queue, 1 is promoted next.
    Standby(u32),
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Standby(_) => "standby",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    fn parse(status: &str, standby_order: Option<i32>) -> Result<Self, BackendError> {
        match status {
            "booked" => Ok(BookingStatus::Booked),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "standby" => {
                let order = standby_order
                    .ok_or_else(|| BackendError::Decode("standby booking without standby_order".to_string()))?;
                Ok(BookingStatus::Standby(non_negative(order, "standby_order")?))
            }
            other => Err(BackendError::Decode(format!("unknown booking status '{other}'"))),
        }
    }
}

/// A booking joined with its class and, for child bookings, the child's nickname.
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub class_id: Uuid,
    pub owner: Owner,
    pub package_id: Uuid,
    pub status: BookingStatus,
    pub class_date: OffsetDateTime,
    pub location: String,
    pub child_nickname: Option<String>,
}

/// One row of the standby queue, enough to aggregate queue depth per class.
#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct StandbyEntry {
    pub class_id: Uuid,
    pub class_date: OffsetDateTime,
}

fn non_negative(value: i32, field: &str) -> Result<u32, BackendError> {
    u32::try_from(value).map_err(|_| BackendError::Decode(format!("{field} is negative: {value}")))
}

// Raw rows as they come off the wire. Validated into the records above.

#[derive(Debug, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub full_name: String,
    pub role: Option<String>,
    pub child_count: i64,
}

impl TryFrom<ProfileRow> for ProfileSummary {
    type Error = BackendError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let child_count = u32::try_from(row.child_count)
            .map_err(|_| BackendError::Decode(format!("bad child count {}", row.child_count)))?;
        Ok(ProfileSummary {
            profile: Profile {
                id: row.id,
                full_name: row.full_name,
                role: row.role.unwrap_or_else(|| "player".to_string()),
            },
            child_count,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct TemplateRow {
    pub id: i32,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub price: f64,
    pub session_count: i32,
    pub days_valid: i32,
    pub extra_session_price: f64,
}

impl TryFrom<TemplateRow> for PackageTemplate {
    type Error = BackendError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(PackageTemplate {
            id: row.id,
            name: row.name,
            kind: PackageKind::parse(&row.kind)?,
            price: row.price,
            session_count: non_negative(row.session_count, "session_count")?,
            days_valid: non_negative(row.days_valid, "days_valid")?,
            extra_session_price: row.extra_session_price,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PackageRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub child_id: Option<Uuid>,
    pub template_name: String,
    pub extra_session_price: f64,
    pub remaining_sessions: i32,
    pub expiry_date: Date,
    pub status: String,
    pub extra_sessions_purchased: i32,
}

impl TryFrom<PackageRow> for UserPackage {
    type Error = BackendError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        Ok(UserPackage {
            id: row.id,
            owner: Owner::from_columns(row.user_id, row.child_id, "user package")?,
            template_name: row.template_name,
            extra_session_price: row.extra_session_price,
            remaining_sessions: non_negative(row.remaining_sessions, "remaining_sessions")?,
            expiry_date: row.expiry_date,
            active: row.status == "active",
            extra_sessions_purchased: non_negative(row.extra_sessions_purchased, "extra_sessions_purchased")?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ClassRow {
    pub id: Uuid,
    pub start_time: OffsetDateTime,
    pub location: Option<String>,
    pub max_capacity: i32,
    pub current_bookings: i32,
}

impl TryFrom<ClassRow> for Class {
    type Error = BackendError;

    fn try_from(row: ClassRow) -> Result<Self, Self::Error> {
        Ok(Class {
            id: row.id,
            start_time: row.start_time,
            location: row.location.unwrap_or_default(),
            max_capacity: non_negative(row.max_capacity, "max_capacity")?,
            current_bookings: non_negative(row.current_bookings, "current_bookings")?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct BookingRow {
    pub id: Uuid,
    pub class_id: Uuid,
    pub user_id: Option<Uuid>,
    pub child_id: Option<Uuid>,
    pub package_id: Uuid,
    pub status: String,
    pub standby_order: Option<i32>,
    pub class_date: OffsetDateTime,
    pub location: Option<String>,
    pub child_nickname: Option<String>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BackendError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            class_id: row.class_id,
            owner: Owner::from_columns(row.user_id, row.child_id, "booking")?,
            package_id: row.package_id,
            status: BookingStatus::parse(&row.status, row.standby_order)?,
            class_date: row.class_date,
            location: row.location.unwrap_or_default(),
            child_nickname: row.child_nickname,
        })
    }
}

// Stored procedure replies.

/// JSON returned by every procedure: `{success, status?, queue_position?, message?}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcReply {
    pub success: bool,
    pub status: Option<String>,
    pub queue_position: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookOutcome {
    Booked,
    Standby { queue_position: Option<u32> },
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutcome {
    Done,
    Rejected(String),
}

const GENERIC_REJECTION: &str = "The request was rejected";

impl TryFrom<RpcReply> for BookOutcome {
    type Error = BackendError;

    fn try_from(reply: RpcReply) -> Result<Self, Self::Error> {
        if !reply.success {
            return Ok(BookOutcome::Rejected(reply.message.unwrap_or_else(|| GENERIC_REJECTION.to_string())));
        }
        match reply.status.as_deref() {
            None | Some("booked") => Ok(BookOutcome::Booked),
            Some("standby") => {
                let queue_position = reply
                    .queue_position
                    .map(|p| u32::try_from(p).map_err(|_| BackendError::Decode(format!("bad queue_position {p}"))))
                    .transpose()?;
                Ok(BookOutcome::Standby { queue_position })
            }
            Some(other) => Err(BackendError::Decode(format!("book_class returned status '{other}'"))),
        }
    }
}

impl From<RpcReply> for RpcOutcome {
    fn from(reply: RpcReply) -> Self {
        if reply.success {
            RpcOutcome::Done
        } else {
            RpcOutcome::Rejected(reply.message.unwrap_or_else(|| GENERIC_REJECTION.to_string()))
        }
    }
}
