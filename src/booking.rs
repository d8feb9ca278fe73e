use std::collections::HashMap;

use time::{Date, Duration, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use crate::flow::{Flow, FlowError, Precondition};
use crate::models::{BookOutcome, Class, Identity, StandbyEntry, UserPackage};
use crate::views::format_when;

pub const CANCEL_CUTOFF: Duration = Duration::hours(2);

/// Queue depth per class, counting only classes still ahead of `now`.
pub fn standby_counts(entries: &[StandbyEntry], now: OffsetDateTime) -> HashMap<Uuid, u32> {
    let mut counts = HashMap::new();
    for entry in entries.iter().filter(|e| e.class_date > now) {
        *counts.entry(entry.class_id).or_insert(0) += 1;
    }
    counts
}

pub fn is_bookable(package: &UserPackage, today: Date) -> bool {
    package.active && package.remaining_sessions > 0 && package.expiry_date >= today
}

/// Picks the package when there is exactly one to choose from.
pub fn auto_select(packages: &[UserPackage], today: Date) -> Option<Uuid> {
    let mut eligible = packages.iter().filter(|p| is_bookable(p, today));
    match (eligible.next(), eligible.next()) {
        (Some(only), None) => Some(only.id),
        _ => None,
    }
}

pub fn can_cancel(class_start: OffsetDateTime, now: OffsetDateTime) -> bool {
    now < class_start - CANCEL_CUTOFF
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingAction {
    pub class_id: Uuid,
    pub package_id: Uuid,
}

/// State of the "Book a Session" screen for one identity.
#[derive(Debug, Clone)]
pub struct BookingPage {
    pub identity: Identity,
    pub child_name: Option<String>,
    pub classes: Vec<Class>,
    pub packages: Vec<UserPackage>,
    pub standby: HashMap<Uuid, u32>,
    pub selected_package: Option<Uuid>,
    /// Page of the class list on screen.
    pub class_page: usize,
    pub flow: Flow<BookingAction>,
}

impl BookingPage {
    pub async fn load<B: Backend>(backend: &B, identity: Identity, now: OffsetDateTime) -> Result<Self, BackendError> {
        let child_name = match identity.child_id {
            Some(child_id) => backend.child(child_id).await?.map(|c| c.nickname),
            None => None,
        };
        let mut page = BookingPage {
            identity,
            child_name,
            classes: Vec::new(),
            packages: Vec::new(),
            standby: HashMap::new(),
            selected_package: None,
            class_page: 0,
            flow: Flow::Idle,
        };
        page.reload(backend, now).await?;
        Ok(page)
    }

    /// Refetches classes, queue depths and packages. A selection that is still
    /// usable survives; otherwise auto-pick runs again.
    ///
    /// Package expiry is checked against the calendar date of `now` in its own
    /// offset, so callers pass `now` in the club's local offset.
    pub async fn reload<B: Backend>(&mut self, backend: &B, now: OffsetDateTime) -> Result<(), BackendError> {
        let today = now.date();
        self.classes = backend.future_classes(now).await?;
        self.standby = standby_counts(&backend.standby_entries(now).await?, now);
        self.packages = backend
            .active_packages(self.identity)
            .await?
            .into_iter()
            .filter(|p| is_bookable(p, today))
            .collect();

        let kept = self
            .selected_package
            .filter(|id| self.packages.iter().any(|p| p.id == *id));
        self.selected_package = kept.or_else(|| auto_select(&self.packages, today));
        debug!(
            "booking page reloaded: {} classes, {} packages, selected {:?}",
            self.classes.len(),
            self.packages.len(),
            self.selected_package
        );
        Ok(())
    }

    pub fn select_package(&mut self, package_id: Uuid) -> bool {
        if self.flow.is_busy() || !self.packages.iter().any(|p| p.id == package_id) {
            return false;
        }
        self.selected_package = Some(package_id);
        true
    }

    pub fn queue_size(&self, class_id: Uuid) -> u32 {
        self.standby.get(&class_id).copied().unwrap_or(0)
    }

    pub fn class(&self, class_id: Uuid) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == class_id)
    }

    /// Opens the confirmation for booking `class_id`, or records why it can't be booked.
    pub fn request(&mut self, class_id: Uuid) -> Result<(), FlowError> {
        let precondition = if self.packages.is_empty() {
            Some(Precondition::NoActivePackage)
        } else if self.class(class_id).is_none() {
            Some(Precondition::NotListed("class"))
        } else {
            None
        };
        if let Some(precondition) = precondition {
            return self.flow.fail(precondition);
        }
        match self.selected_package {
            Some(package_id) => self.flow.begin(BookingAction { class_id, package_id }),
            None => self.flow.fail(Precondition::NoPackageSelected),
        }
    }

    pub fn confirm_prompt(&self, offset: UtcOffset) -> Option<String> {
        let Flow::Confirming(action) = &self.flow else {
            return None;
        };
        let class = self.class(action.class_id)?;
        let when = format_when(class.start_time, offset);
        Some(if class.is_full() {
            format!(
                "This class is full. Join the standby list for {when}?\n\nNo session is deducted while you wait."
            )
        } else {
            format!("Book the class on {when} at {}?", class.location)
        })
    }

    /// Sends the confirmed booking and reloads the page from the backend.
    pub async fn submit<B: Backend>(&mut self, backend: &B, now: OffsetDateTime) -> Option<Result<String, FlowError>> {
        let action = self.flow.confirm()?;
        let result = match backend.book_class(self.identity, action.package_id, action.class_id).await {
            Ok(BookOutcome::Booked) => {
                info!("booked class {} with package {}", action.class_id, action.package_id);
                Ok("✅ Booking Confirmed!\n\nSee you on the field.".to_string())
            }
            Ok(BookOutcome::Standby { queue_position }) => {
                info!("standby for class {} at position {:?}", action.class_id, queue_position);
                let position = queue_position.map(|p| format!(" You are #{p} in the queue.")).unwrap_or_default();
                Ok(format!(
                    "📝 Added to Standby List!\n\nWe will notify you if a spot opens up.{position} (No session deducted yet)"
                ))
            }
            Ok(BookOutcome::Rejected(message)) => {
                warn!("book_class rejected for class {}: {}", action.class_id, message);
                Err(FlowError::Rejected(message))
            }
            Err(e) => {
                error!("book_class failed: {}", e);
                Err(e.into())
            }
        };
        self.flow.finish(result.clone());
        if result.is_ok() {
            if let Err(e) = self.reload(backend, now).await {
                error!("reload after booking failed: {}", e);
            }
        }
        Some(result)
    }
}
