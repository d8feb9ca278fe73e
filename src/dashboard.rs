use time::OffsetDateTime;
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use crate::booking::can_cancel;
use crate::flow::{Flow, FlowError, Precondition};
use crate::models::{
    Booking, BookingStatus, ChildProfile, Identity, PackageTemplate, Profile, RpcOutcome, UserPackage,
};

pub const MAX_EXTRA_SESSIONS: u32 = 2;

pub fn can_buy_extra(package: &UserPackage) -> bool {
    package.extra_sessions_purchased < MAX_EXTRA_SESSIONS
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardAction {
    Cancel { booking_id: Uuid, was_booked: bool },
    BuyPackage { template_id: i32 },
    BuyExtra { package_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub profile: Profile,
    pub children: Vec<ChildProfile>,
    pub templates: Vec<PackageTemplate>,
    /// `None` is the parent's own tab.
    pub active_child: Option<Uuid>,
    pub packages: Vec<UserPackage>,
    pub bookings: Vec<Booking>,
    pub booking_page: usize,
    pub flow: Flow<DashboardAction>,
}

impl Dashboard {
    /// Loads the profile, its children and the catalogue, then the parent's tab.
    /// Returns `None` when the profile does not exist.
    pub async fn load<B: Backend>(backend: &B, user_id: Uuid) -> Result<Option<Self>, BackendError> {
        let Some(profile) = backend.profile(user_id).await? else {
            return Ok(None);
        };
        let mut children = backend.children(user_id).await?;
        children.retain(|c| c.parent_id == user_id);
        let templates = backend.templates().await?;
        let mut dashboard = Dashboard {
            profile,
            children,
            templates,
            active_child: None,
            packages: Vec::new(),
            bookings: Vec::new(),
            booking_page: 0,
            flow: Flow::Idle,
        };
        dashboard.reload(backend).await?;
        Ok(Some(dashboard))
    }

    pub fn identity(&self) -> Identity {
        match self.active_child {
            Some(child_id) => Identity::child(self.profile.id, child_id),
            None => Identity::parent(self.profile.id),
        }
    }

    pub fn active_child_name(&self) -> Option<&str> {
        let id = self.active_child?;
        self.children.iter().find(|c| c.id == id).map(|c| c.nickname.as_str())
    }

    pub async fn reload<B: Backend>(&mut self, backend: &B) -> Result<(), BackendError> {
        let identity = self.identity();
        self.packages = backend.active_packages(identity).await?;
        self.bookings = backend.open_bookings(identity).await?;
        Ok(())
    }

    /// Switches tab. Unknown children are ignored.
    pub async fn switch_to<B: Backend>(&mut self, backend: &B, child: Option<Uuid>) -> Result<bool, BackendError> {
        if self.flow.is_busy() {
            return Ok(false);
        }
        if let Some(id) = child {
            if !self.children.iter().any(|c| c.id == id) {
                return Ok(false);
            }
        }
        self.active_child = child;
        self.booking_page = 0;
        self.flow = Flow::Idle;
        self.reload(backend).await?;
        Ok(true)
    }

    /// Catalogue entries for the current tab: junior packages for a child, adult otherwise.
    pub fn available_templates(&self) -> impl Iterator<Item = &PackageTemplate> {
        let kind = self.identity().package_kind();
        self.templates.iter().filter(move |t| t.kind == kind)
    }

    pub fn request_cancel(&mut self, booking_id: Uuid, now: OffsetDateTime) -> Result<(), FlowError> {
        let Some(booking) = self.bookings.iter().find(|b| b.id == booking_id) else {
            return self.flow.fail(Precondition::NotListed("booking"));
        };
        if booking.status == BookingStatus::Cancelled {
            return self.flow.fail(Precondition::AlreadyCancelled);
        }
        if !can_cancel(booking.class_date, now) {
            return self.flow.fail(Precondition::TooLateToCancel);
        }
        let was_booked = booking.status == BookingStatus::Booked;
        self.flow.begin(DashboardAction::Cancel { booking_id, was_booked })
    }

    pub fn request_buy_package(&mut self, template_id: i32) -> Result<(), FlowError> {
        let kind = self.identity().package_kind();
        match self.templates.iter().find(|t| t.id == template_id) {
            None => self.flow.fail(Precondition::NotListed("package")),
            Some(t) if t.kind != kind => self.flow.fail(Precondition::WrongPackageType),
            Some(_) => self.flow.begin(DashboardAction::BuyPackage { template_id }),
        }
    }

    pub fn request_buy_extra(&mut self, package_id: Uuid) -> Result<(), FlowError> {
        match self.packages.iter().find(|p| p.id == package_id) {
            None => self.flow.fail(Precondition::NotListed("package")),
            Some(p) if !can_buy_extra(p) => self.flow.fail(Precondition::ExtraLimitReached),
            Some(_) => self.flow.begin(DashboardAction::BuyExtra { package_id }),
        }
    }

    pub fn confirm_prompt(&self) -> Option<String> {
        let Flow::Confirming(action) = &self.flow else {
            return None;
        };
        match action {
            DashboardAction::Cancel { .. } => Some("Are you sure you want to cancel this booking?".to_string()),
            DashboardAction::BuyPackage { template_id } => {
                let t = self.templates.iter().find(|t| t.id == *template_id)?;
                Some(format!(
                    "Confirm purchase of {} ({} sessions, {} days) for ฿{:.0}?",
                    t.name, t.session_count, t.days_valid, t.price
                ))
            }
            DashboardAction::BuyExtra { package_id } => {
                let p = self.packages.iter().find(|p| p.id == *package_id)?;
                Some(format!("Buy 1 Extra Session for ฿{:.0}?", p.extra_session_price))
            }
        }
    }

    /// Runs the confirmed action. On success the dashboard is reloaded.
    pub async fn submit<B: Backend>(&mut self, backend: &B) -> Option<Result<String, FlowError>> {
        let action = self.flow.confirm()?;
        let user_id = self.profile.id;
        let (name, reply) = match &action {
            DashboardAction::Cancel { booking_id, .. } => {
                ("cancel_booking", backend.cancel_booking(*booking_id, user_id).await)
            }
            DashboardAction::BuyPackage { template_id } => {
                ("buy_new_package", backend.buy_new_package(self.identity(), *template_id).await)
            }
            DashboardAction::BuyExtra { package_id } => {
                ("buy_extra_session", backend.buy_extra_session(user_id, *package_id).await)
            }
        };

        let result = match reply {
            Ok(RpcOutcome::Done) => {
                info!("{} succeeded for {:?}", name, action);
                Ok(match action {
                    DashboardAction::Cancel { was_booked: true, .. } => {
                        "✅ Booking Cancelled. Session has been refunded.".to_string()
                    }
                    DashboardAction::Cancel { was_booked: false, .. } => {
                        "✅ Removed from the standby list.".to_string()
                    }
                    DashboardAction::BuyPackage { .. } => "✅ Purchased!".to_string(),
                    DashboardAction::BuyExtra { .. } => "✅ Extra session added!".to_string(),
                })
            }
            Ok(RpcOutcome::Rejected(message)) => {
                warn!("{} rejected: {}", name, message);
                Err(FlowError::Rejected(message))
            }
            Err(e) => {
                error!("{} failed: {}", name, e);
                Err(e.into())
            }
        };
        self.flow.finish(result.clone());
        if result.is_ok() {
            if let Err(e) = self.reload(backend).await {
                error!("reload after {} failed: {}", name, e);
            }
        }
        Some(result)
    }
}
