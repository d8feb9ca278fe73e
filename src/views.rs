use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use time::{macros::format_description, OffsetDateTime, UtcOffset};

use crate::booking::{can_cancel, BookingPage};
use crate::dashboard::{can_buy_extra, Dashboard, MAX_EXTRA_SESSIONS};
use crate::flow::Flow;
use crate::handlers::Callback;
use crate::models::{BookingStatus, ProfileSummary};

pub type View = (String, InlineKeyboardMarkup);

/// Rows per page for class and booking lists. Keeps a screen well under
/// Telegram's 4096-character message limit.
pub const PAGE_SIZE: usize = 8;

pub fn format_when(t: OffsetDateTime, offset: UtcOffset) -> String {
    let format = format_description!("[day].[month].[year] [hour]:[minute]");
    let local = t.to_offset(offset);
    local.format(&format).unwrap_or_else(|_| local.to_string())
}

fn button(label: impl Into<String>, callback: Callback) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, callback.to_string())
}

pub fn profile_picker(profiles: &[ProfileSummary]) -> View {
    if profiles.is_empty() {
        return ("No profiles found.".to_string(), InlineKeyboardMarkup::default());
    }
    let keyboard = profiles
        .iter()
        .map(|p| vec![button(p.label(), Callback::Profile(p.profile.id))])
        .collect::<Vec<_>>();
    (
        "⚽ ProKick Login\n\nSelect a user profile to continue:".to_string(),
        InlineKeyboardMarkup::new(keyboard),
    )
}

/// Confirm, processing or result dialog, if the flow has one open.
fn dialog<A>(flow: &Flow<A>, prompt: Option<String>) -> Option<View> {
    match flow {
        Flow::Idle => None,
        Flow::Confirming(_) => Some((
            prompt.unwrap_or_else(|| "Are you sure?".to_string()),
            InlineKeyboardMarkup::new(vec![vec![
                button("✅ Confirm", Callback::Confirm),
                button("✖ Back", Callback::Dismiss),
            ]]),
        )),
        Flow::Submitting(_) => Some(processing()),
        Flow::Succeeded(message) => Some((message.clone(), ok_keyboard())),
        Flow::Failed(err) => Some((err.to_string(), ok_keyboard())),
    }
}

/// The slice of `items` on `page` (clamped to the last page) and, when the
/// list spans more than one page, a Prev / position / Next row.
fn paged<T>(items: &[T], page: usize) -> (&[T], Option<Vec<InlineKeyboardButton>>) {
    let pages = items.len().div_ceil(PAGE_SIZE).max(1);
    let page = page.min(pages - 1);
    let start = page * PAGE_SIZE;
    let shown = &items[start..items.len().min(start + PAGE_SIZE)];
    if pages == 1 {
        return (shown, None);
    }
    let mut nav = Vec::new();
    if page > 0 {
        nav.push(button("◀ Prev", Callback::Page(page - 1)));
    }
    nav.push(button(format!("{}/{}", page + 1, pages), Callback::Ignore));
    if page + 1 < pages {
        nav.push(button("Next ▶", Callback::Page(page + 1)));
    }
    (shown, Some(nav))
}

fn ok_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("OK", Callback::Ok)]])
}

pub fn processing() -> View {
    ("⏳ Processing...".to_string(), InlineKeyboardMarkup::default())
}

pub fn dashboard(d: &Dashboard, now: OffsetDateTime, offset: UtcOffset) -> View {
    if let Some(view) = dialog(&d.flow, d.confirm_prompt()) {
        return view;
    }

    let mut text = format!("🏆 ProKick Dashboard\nWelcome back, {} ({})\n", d.profile.full_name, d.profile.role);
    let mut keyboard = Vec::new();

    // Profile tabs
    let mut tabs = vec![button(
        if d.active_child.is_none() { "• 👤 My Profile" } else { "👤 My Profile" },
        Callback::Tab(None),
    )];
    for child in &d.children {
        let marker = if d.active_child == Some(child.id) { "• " } else { "" };
        tabs.push(button(format!("{marker}👶 {}", child.nickname), Callback::Tab(Some(child.id))));
    }
    keyboard.push(tabs);

    text.push_str(if d.active_child.is_some() { "\n📦 Child's Packages\n" } else { "\n📦 My Packages\n" });
    if d.packages.is_empty() {
        text.push_str("No active packages found.\n");
    }
    for pkg in &d.packages {
        text.push_str(&format!(
            "• {}: {} sessions left, expires {}, extras {}/{}\n",
            pkg.template_name,
            pkg.remaining_sessions,
            pkg.expiry_date,
            pkg.extra_sessions_purchased,
            MAX_EXTRA_SESSIONS
        ));
        if can_buy_extra(pkg) {
            keyboard.push(vec![button(
                format!("⚡ Buy Extra for {} (฿{:.0})", pkg.template_name, pkg.extra_session_price),
                Callback::BuyExtra(pkg.id),
            )]);
        }
    }

    text.push_str("\n🗓 Schedule\n");
    if d.bookings.is_empty() {
        text.push_str("No upcoming classes.\n");
    }
    let (bookings, nav) = paged(&d.bookings, d.booking_page);
    for booking in bookings {
        let badge = match booking.status {
            BookingStatus::Standby(position) => format!("STANDBY #{position}"),
            other => other.as_str().to_uppercase(),
        };
        let who = booking.child_nickname.as_deref().map(|n| format!(" 👶 {n}")).unwrap_or_default();
        text.push_str(&format!(
            "• {} 📍 {}{} [{}]\n",
            format_when(booking.class_date, offset),
            booking.location,
            who,
            badge
        ));
        if booking.status != BookingStatus::Cancelled {
            let when = format_when(booking.class_date, offset);
            keyboard.push(vec![if can_cancel(booking.class_date, now) {
                button(format!("❌ Cancel {when}"), Callback::Cancel(booking.id))
            } else {
                button(format!("🔒 Too Late to Cancel {when}"), Callback::Ignore)
            }]);
        }
    }
    keyboard.extend(nav);

    keyboard.push(vec![button("+ Buy Package", Callback::Shop), button("Book Class →", Callback::Book)]);
    keyboard.push(vec![button("🔄 Refresh", Callback::Refresh), button("Sign Out", Callback::SignOut)]);
    (text, InlineKeyboardMarkup::new(keyboard))
}

pub fn shop(d: &Dashboard) -> View {
    if let Some(view) = dialog(&d.flow, d.confirm_prompt()) {
        return view;
    }
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = d
        .available_templates()
        .map(|t| {
            vec![button(
                format!("{}: {} Sessions • {} Days • ฿{:.0}", t.name, t.session_count, t.days_valid, t.price),
                Callback::BuyPackage(t.id),
            )]
        })
        .collect();
    let text = if keyboard.is_empty() {
        "No packages available for this profile.".to_string()
    } else {
        "Select a Package".to_string()
    };
    keyboard.push(vec![button("⟵ Back", Callback::Refresh)]);
    (text, InlineKeyboardMarkup::new(keyboard))
}

pub fn booking(page: &BookingPage, offset: UtcOffset) -> View {
    if let Some(view) = dialog(&page.flow, page.confirm_prompt(offset)) {
        return view;
    }

    let mut text = format!(
        "Book a Session\nBooking for: {}\n",
        page.child_name.as_deref().unwrap_or("Myself (Parent)")
    );
    let mut keyboard = Vec::new();

    if page.packages.is_empty() {
        text.push_str("\n⚠ No active packages found.\nPlease buy a package on the dashboard first.\n");
    } else {
        text.push_str("\nSelect Package to Use\n");
        for pkg in &page.packages {
            let radio = if page.selected_package == Some(pkg.id) { "🔘" } else { "⚪" };
            keyboard.push(vec![button(
                format!(
                    "{radio} {} ({} left, expires {})",
                    pkg.template_name, pkg.remaining_sessions, pkg.expiry_date
                ),
                Callback::UsePackage(pkg.id),
            )]);
        }
    }

    text.push_str("\nAvailable Classes\n");
    if page.classes.is_empty() {
        text.push_str("No upcoming classes found.\n");
    }
    let (classes, nav) = paged(&page.classes, page.class_page);
    for class in classes {
        let queue = page.queue_size(class.id);
        let when = format_when(class.start_time, offset);
        text.push_str(&format!(
            "• {when} 📍 {} - {} / {} Spots Filled",
            class.location, class.current_bookings, class.max_capacity
        ));
        if class.is_full() {
            text.push_str(&format!(" (Waitlist Only, 👥 {queue} waiting in queue)"));
        }
        text.push('\n');

        let label = if page.selected_package.is_none() {
            format!("{when}: Select Package")
        } else if class.is_full() {
            format!("{when}: Join Standby (Queue: {queue})")
        } else {
            format!("{when}: Book Session")
        };
        keyboard.push(vec![button(label, Callback::Class(class.id))]);
    }
    keyboard.extend(nav);

    keyboard.push(vec![button("🔄 Refresh", Callback::Refresh), button("← Back to Dashboard", Callback::Back)]);
    (text, InlineKeyboardMarkup::new(keyboard))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::flow::{FlowError, Precondition};
    use crate::models::{Booking, Class, Identity, Owner, Profile, UserPackage};
    use time::macros::{date, datetime, offset};
    use time::Duration;
    use uuid::Uuid;

    const NOW: OffsetDateTime = datetime!(2026-10-19 09:00 UTC);

    fn labels(view: &View) -> Vec<String> {
        view.1.inline_keyboard.iter().flatten().map(|b| b.text.clone()).collect()
    }

    fn package(extras: u32) -> UserPackage {
        UserPackage {
            id: Uuid::new_v4(),
            owner: Owner::Profile(Uuid::new_v4()),
            template_name: "Adult 10".to_string(),
            extra_session_price: 500.0,
            remaining_sessions: 4,
            expiry_date: date!(2026 - 12 - 31),
            active: true,
            extra_sessions_purchased: extras,
        }
    }

    fn page(classes: Vec<Class>, selected: bool) -> BookingPage {
        let pkg = package(0);
        BookingPage {
            identity: Identity::parent(Uuid::new_v4()),
            child_name: None,
            selected_package: selected.then_some(pkg.id),
            class_page: 0,
            packages: vec![pkg],
            standby: classes.iter().map(|c| (c.id, 2)).collect::<HashMap<_, _>>(),
            classes,
            flow: Flow::Idle,
        }
    }

    fn class(current_bookings: u32) -> Class {
        Class {
            id: Uuid::new_v4(),
            start_time: datetime!(2026-10-20 11:00 UTC),
            location: "Pitch A".to_string(),
            max_capacity: 10,
            current_bookings,
        }
    }

    #[test]
    fn times_are_shown_in_local_offset() {
        assert_eq!(format_when(datetime!(2026-10-20 11:00 UTC), offset!(+7)), "20.10.2026 18:00");
    }

    #[test]
    fn class_buttons_follow_state() {
        let view = booking(&page(vec![class(10), class(3)], true), offset!(+7));
        let labels = labels(&view);
        assert!(labels.iter().any(|l| l.ends_with("Join Standby (Queue: 2)")));
        assert!(labels.iter().any(|l| l.ends_with("Book Session")));
        assert!(view.0.contains("Waitlist Only"));

        let view = booking(&page(vec![class(3)], false), offset!(+7));
        assert!(labels_contain(&view, "Select Package"));
    }

    fn labels_contain(view: &View, needle: &str) -> bool {
        labels(view).iter().any(|l| l.contains(needle))
    }

    #[test]
    fn failed_flow_renders_message_with_ok() {
        let mut p = page(vec![class(3)], false);
        p.flow = Flow::Failed(FlowError::Precondition(Precondition::NoPackageSelected));
        let view = booking(&p, offset!(+7));
        assert_eq!(view.0, "Please select a package to use.");
        assert_eq!(labels(&view), vec!["OK".to_string()]);
    }

    #[test]
    fn dashboard_gates_cancel_and_extras() {
        let user = Uuid::new_v4();
        let soon = Booking {
            id: Uuid::new_v4(),
            class_id: Uuid::new_v4(),
            owner: Owner::Profile(user),
            package_id: Uuid::new_v4(),
            status: BookingStatus::Booked,
            class_date: NOW + Duration::hours(1),
            location: "Pitch A".to_string(),
            child_nickname: None,
        };
        let later = Booking {
            id: Uuid::new_v4(),
            status: BookingStatus::Standby(3),
            class_date: NOW + Duration::days(1),
            ..soon.clone()
        };
        let d = Dashboard {
            profile: Profile { id: user, full_name: "Ploy".to_string(), role: "player".to_string() },
            children: Vec::new(),
            templates: Vec::new(),
            active_child: None,
            packages: vec![package(0), package(2)],
            bookings: vec![soon, later],
            booking_page: 0,
            flow: Flow::Idle,
        };
        let view = dashboard(&d, NOW, offset!(+7));
        assert!(view.0.contains("STANDBY #3"));
        assert!(view.0.contains("extras 2/2"));
        assert!(labels_contain(&view, "Too Late to Cancel"));
        assert!(labels_contain(&view, "❌ Cancel"));
        assert_eq!(labels(&view).iter().filter(|l| l.starts_with("⚡ Buy Extra")).count(), 1);
    }

    fn fits_in_one_message(view: &View) {
        assert!(view.0.chars().count() < 4096, "{} chars", view.0.chars().count());
        assert!(labels(view).len() < 100, "{} buttons", labels(view).len());
    }

    #[test]
    fn long_schedule_is_paged() {
        let classes: Vec<Class> = (0..100)
            .map(|i| Class { start_time: NOW + Duration::hours(i), ..class(10) })
            .collect();
        let mut p = page(classes, true);
        let first = booking(&p, offset!(+7));
        fits_in_one_message(&first);
        assert_eq!(labels(&first).iter().filter(|l| l.contains("Join Standby")).count(), PAGE_SIZE);
        assert!(labels_contain(&first, "Next ▶"));
        assert!(!labels_contain(&first, "◀ Prev"));
        assert!(labels_contain(&first, "1/13"));

        // A page past the end shows the last one.
        p.class_page = 40;
        let last = booking(&p, offset!(+7));
        fits_in_one_message(&last);
        assert!(labels_contain(&last, "13/13"));
        assert!(!labels_contain(&last, "Next ▶"));
        assert_eq!(labels(&last).iter().filter(|l| l.contains("Join Standby")).count(), 100 - 12 * PAGE_SIZE);
    }

    #[test]
    fn long_booking_history_is_paged() {
        let user = Uuid::new_v4();
        let bookings = (0..100)
            .map(|i| Booking {
                id: Uuid::new_v4(),
                class_id: Uuid::new_v4(),
                owner: Owner::Profile(user),
                package_id: Uuid::new_v4(),
                status: BookingStatus::Standby(4),
                class_date: NOW + Duration::days(i),
                location: "ProKick Arena, Sukhumvit 71, Bangkok".to_string(),
                child_nickname: Some("Nong".to_string()),
            })
            .collect();
        let d = Dashboard {
            profile: Profile { id: user, full_name: "Ploy".to_string(), role: "parent".to_string() },
            children: Vec::new(),
            templates: Vec::new(),
            active_child: None,
            packages: vec![package(0)],
            bookings,
            booking_page: 1,
            flow: Flow::Idle,
        };
        let view = dashboard(&d, NOW, offset!(+7));
        fits_in_one_message(&view);
        assert_eq!(view.0.matches("STANDBY #4").count(), PAGE_SIZE);
        assert!(labels_contain(&view, "◀ Prev"));
        assert!(labels_contain(&view, "Next ▶"));
    }
}
