use std::future::Future;

use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{
    BookOutcome, Booking, BookingRow, ChildProfile, Class, ClassRow, Identity, PackageRow, PackageTemplate,
    Profile, ProfileRow, ProfileSummary, RpcOutcome, RpcReply, StandbyEntry, TemplateRow, UserPackage,
};

#[cfg(test)]
pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unexpected data from backend: {0}")]
    Decode(String),
}

/// Everything the bot reads from or asks of the ProKick database.
///
/// Capacity checks, standby ordering and session arithmetic live behind
/// the four procedures; implementations only relay them.
pub trait Backend: Send + Sync {
    fn list_profiles(&self) -> impl Future<Output = Result<Vec<ProfileSummary>, BackendError>> + Send;

    fn profile(&self, user_id: Uuid) -> impl Future<Output = Result<Option<Profile>, BackendError>> + Send;

    fn children(&self, parent_id: Uuid) -> impl Future<Output = Result<Vec<ChildProfile>, BackendError>> + Send;

    fn child(&self, child_id: Uuid) -> impl Future<Output = Result<Option<ChildProfile>, BackendError>> + Send;

    /// Catalogue ordered by price.
    fn templates(&self) -> impl Future<Output = Result<Vec<PackageTemplate>, BackendError>> + Send;

    /// Packages with status `active` owned by the identity.
    fn active_packages(
        &self,
        identity: Identity,
    ) -> impl Future<Output = Result<Vec<UserPackage>, BackendError>> + Send;

    /// Non-cancelled bookings owned by the identity, ordered by class date.
    fn open_bookings(&self, identity: Identity) -> impl Future<Output = Result<Vec<Booking>, BackendError>> + Send;

    /// Classes starting after `now`, ordered by start time.
    fn future_classes(&self, now: OffsetDateTime) -> impl Future<Output = Result<Vec<Class>, BackendError>> + Send;

    /// Standby bookings for classes after `now`, across all users.
    fn standby_entries(
        &self,
        now: OffsetDateTime,
    ) -> impl Future<Output = Result<Vec<StandbyEntry>, BackendError>> + Send;

    fn book_class(
        &self,
        identity: Identity,
        package_id: Uuid,
        class_id: Uuid,
    ) -> impl Future<Output = Result<BookOutcome, BackendError>> + Send;

    fn cancel_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = Result<RpcOutcome, BackendError>> + Send;

    fn buy_new_package(
        &self,
        identity: Identity,
        template_id: i32,
    ) -> impl Future<Output = Result<RpcOutcome, BackendError>> + Send;

    fn buy_extra_session(
        &self,
        user_id: Uuid,
        package_id: Uuid,
    ) -> impl Future<Output = Result<RpcOutcome, BackendError>> + Send;
}

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        PgBackend { pool }
    }
}

const PACKAGE_COLUMNS: &str = r#"
    SELECT up.id, up.user_id, up.child_id,
           pt.name AS template_name,
           pt.extra_session_price::float8 AS extra_session_price,
           up.remaining_sessions, up.expiry_date, up.status, up.extra_sessions_purchased
    FROM user_packages up
    JOIN package_templates pt ON up.template_id = pt.id
"#;

const BOOKING_COLUMNS: &str = r#"
    SELECT b.id, b.class_id, b.user_id, b.child_id, b.package_id, b.status, b.standby_order,
           b.class_date, c.location, cp.nickname AS child_nickname
    FROM bookings b
    JOIN classes c ON b.class_id = c.id
    LEFT JOIN child_profiles cp ON b.child_id = cp.id
"#;

fn validate<R, T>(rows: Vec<R>) -> Result<Vec<T>, BackendError>
where
    T: TryFrom<R, Error = BackendError>,
{
    rows.into_iter().map(T::try_from).collect()
}

impl Backend for PgBackend {
    async fn list_profiles(&self) -> Result<Vec<ProfileSummary>, BackendError> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT p.id, p.full_name, p.role, COUNT(c.id) AS child_count
            FROM profiles p
            LEFT JOIN child_profiles c ON c.parent_id = p.id
            GROUP BY p.id
            ORDER BY p.full_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        validate(rows)
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT p.id, p.full_name, p.role, 0::int8 AS child_count
            FROM profiles p
            WHERE p.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProfileSummary::try_from).transpose()?.map(|summary| summary.profile))
    }

    async fn children(&self, parent_id: Uuid) -> Result<Vec<ChildProfile>, BackendError> {
        Ok(sqlx::query_as::<_, ChildProfile>(
            "SELECT id, parent_id, nickname FROM child_profiles WHERE parent_id = $1 ORDER BY nickname",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn child(&self, child_id: Uuid) -> Result<Option<ChildProfile>, BackendError> {
        Ok(sqlx::query_as::<_, ChildProfile>(
            "SELECT id, parent_id, nickname FROM child_profiles WHERE id = $1",
        )
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn templates(&self) -> Result<Vec<PackageTemplate>, BackendError> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, type, price::float8 AS price, session_count, days_valid,
                   extra_session_price::float8 AS extra_session_price
            FROM package_templates
            ORDER BY price
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        validate(rows)
    }

    async fn active_packages(&self, identity: Identity) -> Result<Vec<UserPackage>, BackendError> {
        let rows = match identity.child_id {
            Some(child_id) => {
                sqlx::query_as::<_, PackageRow>(&format!(
                    "{PACKAGE_COLUMNS} WHERE up.status = 'active' AND up.child_id = $1 ORDER BY up.expiry_date"
                ))
                .bind(child_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PackageRow>(&format!(
                    "{PACKAGE_COLUMNS} WHERE up.status = 'active' AND up.user_id = $1 AND up.child_id IS NULL ORDER BY up.expiry_date"
                ))
                .bind(identity.user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        validate(rows)
    }

    async fn open_bookings(&self, identity: Identity) -> Result<Vec<Booking>, BackendError> {
        let rows = match identity.child_id {
            Some(child_id) => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "{BOOKING_COLUMNS} WHERE b.status <> 'cancelled' AND b.child_id = $1 ORDER BY b.class_date"
                ))
                .bind(child_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "{BOOKING_COLUMNS} WHERE b.status <> 'cancelled' AND b.user_id = $1 AND b.child_id IS NULL ORDER BY b.class_date"
                ))
                .bind(identity.user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        validate(rows)
    }

    async fn future_classes(&self, now: OffsetDateTime) -> Result<Vec<Class>, BackendError> {
        let rows = sqlx::query_as::<_, ClassRow>(
            r#"
            SELECT id, start_time, location, max_capacity, current_bookings
            FROM classes
            WHERE start_time > $1
            ORDER BY start_time
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        validate(rows)
    }

    async fn standby_entries(&self, now: OffsetDateTime) -> Result<Vec<StandbyEntry>, BackendError> {
        Ok(sqlx::query_as::<_, StandbyEntry>(
            "SELECT class_id, class_date FROM bookings WHERE status = 'standby' AND class_date > $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn book_class(
        &self,
        identity: Identity,
        package_id: Uuid,
        class_id: Uuid,
    ) -> Result<BookOutcome, BackendError> {
        let (Json(reply),): (Json<RpcReply>,) = sqlx::query_as(
            "SELECT book_class(p_user_id => $1, p_child_id => $2, p_package_id => $3, p_class_id => $4)::jsonb",
        )
        .bind(identity.user_id)
        .bind(identity.child_id)
        .bind(package_id)
        .bind(class_id)
        .fetch_one(&self.pool)
        .await?;
        BookOutcome::try_from(reply)
    }

    async fn cancel_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<RpcOutcome, BackendError> {
        let (Json(reply),): (Json<RpcReply>,) =
            sqlx::query_as("SELECT cancel_booking(p_booking_id => $1, p_user_id => $2)::jsonb")
                .bind(booking_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(reply.into())
    }

    async fn buy_new_package(&self, identity: Identity, template_id: i32) -> Result<RpcOutcome, BackendError> {
        let (Json(reply),): (Json<RpcReply>,) = sqlx::query_as(
            "SELECT buy_new_package(p_user_id => $1, p_child_id => $2, p_template_id => $3)::jsonb",
        )
        .bind(identity.user_id)
        .bind(identity.child_id)
        .bind(template_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(reply.into())
    }

    async fn buy_extra_session(&self, user_id: Uuid, package_id: Uuid) -> Result<RpcOutcome, BackendError> {
        let (Json(reply),): (Json<RpcReply>,) =
            sqlx::query_as("SELECT buy_extra_session(p_user_id => $1, p_package_id => $2)::jsonb")
                .bind(user_id)
                .bind(package_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(reply.into())
    }
}
