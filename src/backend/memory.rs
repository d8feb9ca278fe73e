//! In-process stand-in for the ProKick database used by the tests.
//!
//! It plays the part of the stored procedures: a booking into a class with
//! room deducts a session, a booking into a full class joins the standby
//! queue, cancelling a booked seat refunds it. All state sits behind one
//! mutex so every procedure call is serialized, which is what keeps two
//! bookings from racing for the last seat.

use std::sync::Mutex;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{Backend, BackendError};
use crate::models::{
    BookOutcome, Booking, BookingStatus, ChildProfile, Class, Identity, Owner, PackageKind, PackageTemplate,
    Profile, ProfileSummary, RpcOutcome, StandbyEntry, UserPackage,
};

#[derive(Default)]
pub struct MemoryState {
    pub now: Option<OffsetDateTime>,
    pub profiles: Vec<Profile>,
    pub children: Vec<ChildProfile>,
    pub templates: Vec<PackageTemplate>,
    pub packages: Vec<UserPackage>,
    pub classes: Vec<Class>,
    pub bookings: Vec<Booking>,
    pub calls: Vec<&'static str>,
    /// Makes the next procedure call fail as if the database were unreachable.
    pub fail_next: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

fn rejected(message: &str) -> RpcOutcome {
    RpcOutcome::Rejected(message.to_string())
}

impl MemoryBackend {
    pub fn new(now: OffsetDateTime) -> Self {
        MemoryBackend {
            state: Mutex::new(MemoryState { now: Some(now), ..Default::default() }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_profile(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.with(|s| {
            s.profiles.push(Profile { id, full_name: name.to_string(), role: "player".to_string() })
        });
        id
    }

    pub fn add_child(&self, parent_id: Uuid, nickname: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.with(|s| s.children.push(ChildProfile { id, parent_id, nickname: nickname.to_string() }));
        id
    }

    pub fn add_template(&self, id: i32, name: &str, kind: PackageKind, price: f64, sessions: u32) -> i32 {
        self.with(|s| {
            s.templates.push(PackageTemplate {
                id,
                name: name.to_string(),
                kind,
                price,
                session_count: sessions,
                days_valid: 60,
                extra_session_price: 500.0,
            })
        });
        id
    }

    pub fn add_package(&self, owner: Owner, remaining_sessions: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.with(|s| {
            let expiry_date = s.now.unwrap_or_else(OffsetDateTime::now_utc).date() + Duration::days(30);
            s.packages.push(UserPackage {
                id,
                owner,
                template_name: "Starter 4".to_string(),
                extra_session_price: 500.0,
                remaining_sessions,
                expiry_date,
                active: true,
                extra_sessions_purchased: 0,
            })
        });
        id
    }

    pub fn add_class(&self, start_time: OffsetDateTime, max_capacity: u32, current_bookings: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.with(|s| {
            s.classes.push(Class {
                id,
                start_time,
                location: "Pitch A".to_string(),
                max_capacity,
                current_bookings,
            })
        });
        id
    }

    pub fn package(&self, id: Uuid) -> UserPackage {
        self.with(|s| s.packages.iter().find(|p| p.id == id).cloned().unwrap())
    }

    pub fn class(&self, id: Uuid) -> Class {
        self.with(|s| s.classes.iter().find(|c| c.id == id).cloned().unwrap())
    }

    pub fn booking(&self, id: Uuid) -> Booking {
        self.with(|s| s.bookings.iter().find(|b| b.id == id).cloned().unwrap())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.with(|s| s.calls.clone())
    }

    fn procedure<R>(&self, name: &'static str, f: impl FnOnce(&mut MemoryState) -> R) -> Result<R, BackendError> {
        self.with(|s| {
            s.calls.push(name);
            if std::mem::take(&mut s.fail_next) {
                return Err(BackendError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(f(s))
        })
    }
}

impl MemoryState {
    fn now(&self) -> OffsetDateTime {
        self.now.unwrap_or_else(OffsetDateTime::now_utc)
    }

    fn owns(&self, user_id: Uuid, owner: Owner) -> bool {
        match owner {
            Owner::Profile(id) => id == user_id,
            Owner::Child(child_id) => self.children.iter().any(|c| c.id == child_id && c.parent_id == user_id),
        }
    }

    fn book(&mut self, identity: Identity, package_id: Uuid, class_id: Uuid) -> BookOutcome {
        let owner = identity.owner();
        let today = self.now().date();
        let Some(package) = self.packages.iter().find(|p| p.id == package_id) else {
            return BookOutcome::Rejected("Package not found".to_string());
        };
        if package.owner != owner || !self.owns(identity.user_id, owner) {
            return BookOutcome::Rejected("Package does not belong to this profile".to_string());
        }
        if !package.active || package.expiry_date < today || package.remaining_sessions == 0 {
            return BookOutcome::Rejected("Package has no sessions left".to_string());
        }
        let Some(class) = self.classes.iter().find(|c| c.id == class_id).cloned() else {
            return BookOutcome::Rejected("Class not found".to_string());
        };
        if self
            .bookings
            .iter()
            .any(|b| b.class_id == class_id && b.owner == owner && b.status != BookingStatus::Cancelled)
        {
            return BookOutcome::Rejected("Already booked for this class".to_string());
        }

        let (status, outcome) = if class.is_full() {
            let depth = self
                .bookings
                .iter()
                .filter(|b| b.class_id == class_id && matches!(b.status, BookingStatus::Standby(_)))
                .count() as u32;
            (BookingStatus::Standby(depth + 1), BookOutcome::Standby { queue_position: Some(depth + 1) })
        } else {
            if let Some(class) = self.classes.iter_mut().find(|c| c.id == class_id) {
                class.current_bookings += 1;
            }
            if let Some(package) = self.packages.iter_mut().find(|p| p.id == package_id) {
                package.remaining_sessions -= 1;
            }
            (BookingStatus::Booked, BookOutcome::Booked)
        };

        self.bookings.push(Booking {
            id: Uuid::new_v4(),
            class_id,
            owner,
            package_id,
            status,
            class_date: class.start_time,
            location: class.location,
            child_nickname: identity
                .child_id
                .and_then(|id| self.children.iter().find(|c| c.id == id).map(|c| c.nickname.clone())),
        });
        outcome
    }

    fn cancel(&mut self, booking_id: Uuid, user_id: Uuid) -> RpcOutcome {
        let now = self.now();
        let Some(booking) = self.bookings.iter().find(|b| b.id == booking_id).cloned() else {
            return rejected("Booking not found");
        };
        if !self.owns(user_id, booking.owner) {
            return rejected("Not your booking");
        }
        if booking.status == BookingStatus::Cancelled {
            return rejected("Booking already cancelled");
        }
        if now >= booking.class_date - Duration::hours(2) {
            return rejected("Too late to cancel");
        }
        if booking.status == BookingStatus::Booked {
            if let Some(package) = self.packages.iter_mut().find(|p| p.id == booking.package_id) {
                package.remaining_sessions += 1;
            }
            if let Some(class) = self.classes.iter_mut().find(|c| c.id == booking.class_id) {
                class.current_bookings = class.current_bookings.saturating_sub(1);
            }
        }
        if let Some(b) = self.bookings.iter_mut().find(|b| b.id == booking_id) {
            b.status = BookingStatus::Cancelled;
        }
        RpcOutcome::Done
    }

    fn buy_package(&mut self, identity: Identity, template_id: i32) -> RpcOutcome {
        let owner = identity.owner();
        if !self.owns(identity.user_id, owner) {
            return rejected("Profile not found");
        }
        let Some(template) = self.templates.iter().find(|t| t.id == template_id).cloned() else {
            return rejected("Package not found");
        };
        if template.kind != identity.package_kind() {
            return rejected("Package type does not match profile");
        }
        let expiry_date = self.now().date() + Duration::days(i64::from(template.days_valid));
        self.packages.push(UserPackage {
            id: Uuid::new_v4(),
            owner,
            template_name: template.name,
            extra_session_price: template.extra_session_price,
            remaining_sessions: template.session_count,
            expiry_date,
            active: true,
            extra_sessions_purchased: 0,
        });
        RpcOutcome::Done
    }

    fn buy_extra(&mut self, user_id: Uuid, package_id: Uuid) -> RpcOutcome {
        let Some(owner) = self.packages.iter().find(|p| p.id == package_id).map(|p| p.owner) else {
            return rejected("Package not found");
        };
        if !self.owns(user_id, owner) {
            return rejected("Not your package");
        }
        let Some(package) = self.packages.iter_mut().find(|p| p.id == package_id) else {
            return rejected("Package not found");
        };
        if package.extra_sessions_purchased >= 2 {
            return rejected("Maximum extra sessions reached");
        }
        package.extra_sessions_purchased += 1;
        package.remaining_sessions += 1;
        RpcOutcome::Done
    }
}

impl Backend for MemoryBackend {
    async fn list_profiles(&self) -> Result<Vec<ProfileSummary>, BackendError> {
        Ok(self.with(|s| {
            let mut summaries: Vec<ProfileSummary> = s
                .profiles
                .iter()
                .map(|p| ProfileSummary {
                    profile: p.clone(),
                    child_count: s.children.iter().filter(|c| c.parent_id == p.id).count() as u32,
                })
                .collect();
            summaries.sort_by(|a, b| a.profile.full_name.cmp(&b.profile.full_name));
            summaries
        }))
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError> {
        Ok(self.with(|s| s.profiles.iter().find(|p| p.id == user_id).cloned()))
    }

    async fn children(&self, parent_id: Uuid) -> Result<Vec<ChildProfile>, BackendError> {
        Ok(self.with(|s| s.children.iter().filter(|c| c.parent_id == parent_id).cloned().collect()))
    }

    async fn child(&self, child_id: Uuid) -> Result<Option<ChildProfile>, BackendError> {
        Ok(self.with(|s| s.children.iter().find(|c| c.id == child_id).cloned()))
    }

    async fn templates(&self) -> Result<Vec<PackageTemplate>, BackendError> {
        Ok(self.with(|s| {
            let mut templates = s.templates.clone();
            templates.sort_by(|a, b| a.price.total_cmp(&b.price));
            templates
        }))
    }

    async fn active_packages(&self, identity: Identity) -> Result<Vec<UserPackage>, BackendError> {
        let owner = identity.owner();
        Ok(self.with(|s| s.packages.iter().filter(|p| p.active && p.owner == owner).cloned().collect()))
    }

    async fn open_bookings(&self, identity: Identity) -> Result<Vec<Booking>, BackendError> {
        let owner = identity.owner();
        Ok(self.with(|s| {
            let mut bookings: Vec<Booking> = s
                .bookings
                .iter()
                .filter(|b| b.owner == owner && b.status != BookingStatus::Cancelled)
                .cloned()
                .collect();
            bookings.sort_by_key(|b| b.class_date);
            bookings
        }))
    }

    async fn future_classes(&self, now: OffsetDateTime) -> Result<Vec<Class>, BackendError> {
        Ok(self.with(|s| {
            let mut classes: Vec<Class> = s.classes.iter().filter(|c| c.start_time > now).cloned().collect();
            classes.sort_by_key(|c| c.start_time);
            classes
        }))
    }

    async fn standby_entries(&self, now: OffsetDateTime) -> Result<Vec<StandbyEntry>, BackendError> {
        Ok(self.with(|s| {
            s.bookings
                .iter()
                .filter(|b| matches!(b.status, BookingStatus::Standby(_)) && b.class_date > now)
                .map(|b| StandbyEntry { class_id: b.class_id, class_date: b.class_date })
                .collect()
        }))
    }

    async fn book_class(
        &self,
        identity: Identity,
        package_id: Uuid,
        class_id: Uuid,
    ) -> Result<BookOutcome, BackendError> {
        self.procedure("book_class", |s| s.book(identity, package_id, class_id))
    }

    async fn cancel_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<RpcOutcome, BackendError> {
        self.procedure("cancel_booking", |s| s.cancel(booking_id, user_id))
    }

    async fn buy_new_package(&self, identity: Identity, template_id: i32) -> Result<RpcOutcome, BackendError> {
        self.procedure("buy_new_package", |s| s.buy_package(identity, template_id))
    }

    async fn buy_extra_session(&self, user_id: Uuid, package_id: Uuid) -> Result<RpcOutcome, BackendError> {
        self.procedure("buy_extra_session", |s| s.buy_extra(user_id, package_id))
    }
}
