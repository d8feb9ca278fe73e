use std::{collections::HashMap, error::Error, fmt, str::FromStr, sync::Arc};

use teloxide::{
    prelude::*,
    types::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, MessageId},
    ApiError, RequestError,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use crate::booking::BookingPage;
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::flow::Flow;
use crate::views::{self, View};

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Payload of every inline button the bot sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Profile(Uuid),
    /// `None` is the parent's own tab.
    Tab(Option<Uuid>),
    Shop,
    BuyPackage(i32),
    BuyExtra(Uuid),
    Cancel(Uuid),
    Book,
    UsePackage(Uuid),
    Class(Uuid),
    /// Page of the list on the current screen.
    Page(usize),
    Confirm,
    Dismiss,
    Ok,
    Refresh,
    Back,
    SignOut,
    Ignore,
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Profile(id) => write!(f, "profile:{id}"),
            Callback::Tab(None) => write!(f, "tab:self"),
            Callback::Tab(Some(id)) => write!(f, "tab:{id}"),
            Callback::Shop => write!(f, "shop"),
            Callback::BuyPackage(id) => write!(f, "buy:{id}"),
            Callback::BuyExtra(id) => write!(f, "extra:{id}"),
            Callback::Cancel(id) => write!(f, "cancel:{id}"),
            Callback::Book => write!(f, "book"),
            Callback::UsePackage(id) => write!(f, "pkg:{id}"),
            Callback::Class(id) => write!(f, "class:{id}"),
            Callback::Page(n) => write!(f, "page:{n}"),
            Callback::Confirm => write!(f, "confirm"),
            Callback::Dismiss => write!(f, "dismiss"),
            Callback::Ok => write!(f, "ok"),
            Callback::Refresh => write!(f, "refresh"),
            Callback::Back => write!(f, "back"),
            Callback::SignOut => write!(f, "signout"),
            Callback::Ignore => write!(f, "ignore"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown callback data '{0}'")]
pub struct UnknownCallback(String);

impl FromStr for Callback {
    type Err = UnknownCallback;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCallback(data.to_string());
        let uuid = |s: &str| Uuid::parse_str(s).map_err(|_| unknown());

        let callback = match data.split_once(':') {
            None => match data {
                "shop" => Callback::Shop,
                "book" => Callback::Book,
                "confirm" => Callback::Confirm,
                "dismiss" => Callback::Dismiss,
                "ok" => Callback::Ok,
                "refresh" => Callback::Refresh,
                "back" => Callback::Back,
                "signout" => Callback::SignOut,
                "ignore" => Callback::Ignore,
                _ => return Err(unknown()),
            },
            Some(("profile", id)) => Callback::Profile(uuid(id)?),
            Some(("tab", "self")) => Callback::Tab(None),
            Some(("tab", id)) => Callback::Tab(Some(uuid(id)?)),
            Some(("buy", id)) => Callback::BuyPackage(id.parse().map_err(|_| unknown())?),
            Some(("extra", id)) => Callback::BuyExtra(uuid(id)?),
            Some(("cancel", id)) => Callback::Cancel(uuid(id)?),
            Some(("pkg", id)) => Callback::UsePackage(uuid(id)?),
            Some(("class", id)) => Callback::Class(uuid(id)?),
            Some(("page", n)) => Callback::Page(n.parse().map_err(|_| unknown())?),
            Some(_) => return Err(unknown()),
        };
        Ok(callback)
    }
}

enum Screen {
    Profiles,
    Dashboard { dashboard: Dashboard, shop: bool },
    Booking(BookingPage),
}

// Per-chat state: which screen the chat is on and the data it shows
pub struct UserSession {
    screen: Screen,
}

impl UserSession {
    pub fn new() -> Self {
        UserSession { screen: Screen::Profiles }
    }
}

impl Default for UserSession {
    fn default() -> Self {
        Self::new()
    }
}

pub type Sessions = Arc<Mutex<HashMap<i64, Arc<Mutex<UserSession>>>>>;

/// Current instant in the club's offset, so `now.date()` is the local day.
fn local_now(config: &Config) -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(config.display_offset)
}

async fn session_for(sessions: &Sessions, chat_id: ChatId) -> Arc<Mutex<UserSession>> {
    let mut sessions = sessions.lock().await;
    sessions.entry(chat_id.0).or_default().clone()
}

pub async fn handle_message<B: Backend>(
    bot: Bot,
    msg: Message,
    backend: Arc<B>,
    config: Arc<Config>,
    sessions: Sessions,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let session = session_for(&sessions, chat_id).await;
    let mut session = session.lock().await;

    if msg.text() == Some("/start") {
        session.screen = Screen::Profiles;
    }

    // Anything typed brings the current screen back with fresh data.
    let now = local_now(&config);
    let view = match refresh(&*backend, &mut session.screen, now).await {
        Ok(()) => render(&*backend, &session.screen, &config, now).await,
        Err(e) => {
            error!("refresh for chat {} failed: {}", chat_id, e);
            Ok(error_view(&e))
        }
    };
    let (text, keyboard) = match view {
        Ok(view) => view,
        Err(e) => {
            error!("rendering for chat {} failed: {}", chat_id, e);
            error_view(&e)
        }
    };
    bot.send_message(chat_id, text).reply_markup(keyboard).await?;
    Ok(())
}

pub async fn handle_callback_query<B: Backend>(
    bot: Bot,
    q: CallbackQuery,
    backend: Arc<B>,
    config: Arc<Config>,
    sessions: Sessions,
) -> HandlerResult {
    bot.answer_callback_query(q.id.clone()).await?;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();

    let callback = match data.parse::<Callback>() {
        Ok(Callback::Ignore) => return Ok(()),
        Ok(callback) => callback,
        Err(e) => {
            warn!("chat {}: {}", chat_id, e);
            return Ok(());
        }
    };

    let session = session_for(&sessions, chat_id).await;
    let mut session = session.lock().await;
    let now = local_now(&config);

    let screen = &mut session.screen;
    let outcome = match apply(&bot, chat_id, message_id, &*backend, screen, callback, now).await {
        Ok(()) => render(&*backend, screen, &config, now).await,
        Err(e) => Err(e),
    };
    let view = outcome.unwrap_or_else(|e| {
        error!("chat {}: {:?} failed: {}", chat_id, callback, e);
        error_view(&e)
    });
    show(&bot, chat_id, message_id, view).await?;
    Ok(())
}

/// Applies one button press to the chat's screen.
async fn apply<B: Backend>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    backend: &B,
    screen: &mut Screen,
    callback: Callback,
    now: OffsetDateTime,
) -> Result<(), BackendError> {
    match (callback, &mut *screen) {
        (Callback::Profile(user_id), _) => match Dashboard::load(backend, user_id).await? {
            Some(dashboard) => {
                info!("chat {} acting as profile {}", chat_id, user_id);
                *screen = Screen::Dashboard { dashboard, shop: false };
            }
            None => {
                warn!("chat {} picked unknown profile {}", chat_id, user_id);
                *screen = Screen::Profiles;
            }
        },
        (Callback::SignOut, _) => *screen = Screen::Profiles,

        (Callback::Tab(child), Screen::Dashboard { dashboard, shop }) => {
            *shop = false;
            dashboard.switch_to(backend, child).await?;
        }
        (Callback::Shop, Screen::Dashboard { shop, .. }) => *shop = true,
        (Callback::BuyPackage(template_id), Screen::Dashboard { dashboard, .. }) => {
            if let Err(e) = dashboard.request_buy_package(template_id) {
                warn!("chat {}: purchase of template {} ignored: {}", chat_id, template_id, e);
            }
        }
        (Callback::BuyExtra(package_id), Screen::Dashboard { dashboard, .. }) => {
            if let Err(e) = dashboard.request_buy_extra(package_id) {
                warn!("chat {}: extra session for package {} ignored: {}", chat_id, package_id, e);
            }
        }
        (Callback::Cancel(booking_id), Screen::Dashboard { dashboard, .. }) => {
            if let Err(e) = dashboard.request_cancel(booking_id, now) {
                warn!("chat {}: cancellation of booking {} ignored: {}", chat_id, booking_id, e);
            }
        }
        (Callback::Page(n), Screen::Dashboard { dashboard, shop: false }) => dashboard.booking_page = n,
        (Callback::Book, Screen::Dashboard { dashboard, .. }) => {
            let page = BookingPage::load(backend, dashboard.identity(), now).await?;
            *screen = Screen::Booking(page);
        }
        (Callback::Confirm, Screen::Dashboard { dashboard, .. }) => {
            if matches!(dashboard.flow, Flow::Confirming(_)) {
                show(bot, chat_id, message_id, views::processing()).await.ok();
                dashboard.submit(backend).await;
            }
        }
        (Callback::Dismiss | Callback::Ok, Screen::Dashboard { dashboard, shop }) => {
            if dashboard.flow.dismiss() && callback == Callback::Ok {
                *shop = false;
                dashboard.reload(backend).await?;
            }
        }
        (Callback::Refresh, Screen::Dashboard { dashboard, shop }) => {
            *shop = false;
            dashboard.reload(backend).await?;
        }

        (Callback::UsePackage(package_id), Screen::Booking(page)) => {
            page.select_package(package_id);
        }
        (Callback::Class(class_id), Screen::Booking(page)) => {
            if let Err(e) = page.request(class_id) {
                warn!("chat {}: booking request for class {} ignored: {}", chat_id, class_id, e);
            }
        }
        (Callback::Page(n), Screen::Booking(page)) => page.class_page = n,
        (Callback::Confirm, Screen::Booking(page)) => {
            if matches!(page.flow, Flow::Confirming(_)) {
                show(bot, chat_id, message_id, views::processing()).await.ok();
                page.submit(backend, now).await;
            }
        }
        (Callback::Ok, Screen::Booking(page)) if matches!(page.flow, Flow::Succeeded(_)) => {
            // A finished booking lands back on the dashboard for the same identity.
            *screen = dashboard_for(backend, page.identity.user_id, page.identity.child_id).await?;
        }
        (Callback::Dismiss | Callback::Ok, Screen::Booking(page)) => {
            if page.flow.dismiss() {
                page.reload(backend, now).await?;
            }
        }
        (Callback::Refresh, Screen::Booking(page)) => {
            if !page.flow.is_busy() {
                page.reload(backend, now).await?;
            }
        }
        (Callback::Back, Screen::Booking(page)) => {
            if !page.flow.is_busy() {
                *screen = dashboard_for(backend, page.identity.user_id, page.identity.child_id).await?;
            }
        }

        (callback, _) => {
            // Button from a screen the chat has since left.
            warn!("chat {}: stale {:?}", chat_id, callback);
            refresh(backend, screen, now).await?;
        }
    }
    Ok(())
}

async fn dashboard_for<B: Backend>(backend: &B, user_id: Uuid, child: Option<Uuid>) -> Result<Screen, BackendError> {
    let Some(mut dashboard) = Dashboard::load(backend, user_id).await? else {
        return Ok(Screen::Profiles);
    };
    if child.is_some() {
        dashboard.switch_to(backend, child).await?;
    }
    Ok(Screen::Dashboard { dashboard, shop: false })
}

/// Refetches whatever the screen shows. Dialogs stay open; nothing is refetched mid-request.
async fn refresh<B: Backend>(backend: &B, screen: &mut Screen, now: OffsetDateTime) -> Result<(), BackendError> {
    match screen {
        Screen::Profiles => Ok(()),
        Screen::Dashboard { dashboard, .. } if !dashboard.flow.is_busy() => dashboard.reload(backend).await,
        Screen::Booking(page) if !page.flow.is_busy() => page.reload(backend, now).await,
        _ => Ok(()),
    }
}

async fn render<B: Backend>(
    backend: &B,
    screen: &Screen,
    config: &Config,
    now: OffsetDateTime,
) -> Result<View, BackendError> {
    Ok(match screen {
        Screen::Profiles => views::profile_picker(&backend.list_profiles().await?),
        Screen::Dashboard { dashboard, shop: true } => views::shop(dashboard),
        Screen::Dashboard { dashboard, shop: false } => views::dashboard(dashboard, now, config.display_offset),
        Screen::Booking(page) => views::booking(page, config.display_offset),
    })
}

fn error_view(e: &BackendError) -> View {
    (
        format!("Error: {e}"),
        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
            "🔄 Try again",
            Callback::Refresh.to_string(),
        )]]),
    )
}

async fn show(bot: &Bot, chat_id: ChatId, message_id: MessageId, (text, keyboard): View) -> Result<(), RequestError> {
    match bot.edit_message_text(chat_id, message_id, text).reply_markup(keyboard).await {
        Ok(_) => Ok(()),
        // Refreshing an unchanged screen.
        Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e),
    }
}
