// Message router
// Typed messages from the UI layer and the handler table that maps each of them
// onto the launcher components.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthProfile;
use crate::context::{LauncherContext, ThemePreference};
use crate::shutdown::ShutdownTrigger;
use crate::updater::UpdateCheck;
use crate::windows::{ProgressState, WindowAction, WindowError, WindowKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowCommand {
    Open,
    Show,
    Hide,
    Minimize,
    ToggleMaximize,
    Reload,
    Close,
    OpenDevtools,
    CloseDevtools,
}

impl WindowCommand {
    fn action(self) -> Option<WindowAction> {
        match self {
            WindowCommand::Show => Some(WindowAction::Show),
            WindowCommand::Hide => Some(WindowAction::Hide),
            WindowCommand::Minimize => Some(WindowAction::Minimize),
            WindowCommand::ToggleMaximize => Some(WindowAction::ToggleMaximize),
            WindowCommand::Reload => Some(WindowAction::Reload),
            WindowCommand::OpenDevtools => Some(WindowAction::OpenDevtools),
            WindowCommand::CloseDevtools => Some(WindowAction::CloseDevtools),
            WindowCommand::Open | WindowCommand::Close => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ProgressUpdate {
    Set { progress: f64, size: f64 },
    Reset,
    Loading,
}

impl ProgressUpdate {
    pub fn state(self) -> ProgressState {
        match self {
            ProgressUpdate::Set { progress, size } => ProgressState::from_ratio(progress, size),
            ProgressUpdate::Reset => ProgressState::None,
            ProgressUpdate::Loading => ProgressState::Indeterminate,
        }
    }
}

/// Theme argument of a theme query: a bare name (`"dark"`) or `{ "theme": "dark" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThemeArg {
    Name(String),
    Field {
        #[serde(default)]
        theme: Option<String>,
    },
}

impl ThemeArg {
    pub fn preference(&self) -> Option<ThemePreference> {
        match self {
            ThemeArg::Name(name) => ThemePreference::parse(name),
            ThemeArg::Field { theme } => theme.as_deref().and_then(ThemePreference::parse),
        }
    }
}

/// Client id of a sign-in request: a bare string or `{ "client_id": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthArg {
    ClientId(String),
    Field { client_id: String },
}

impl AuthArg {
    pub fn client_id(&self) -> &str {
        match self {
            AuthArg::ClientId(client_id) | AuthArg::Field { client_id } => client_id,
        }
    }
}

/// Every message the UI layer can send to the launcher process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum UiMessage {
    Window { target: WindowKind, command: WindowCommand },
    Progress { target: WindowKind, update: ProgressUpdate },
    UserDataPath,
    AppDataPath,
    AuthRequest(AuthArg),
    /// A missing or unrecognised theme defers to the OS preference.
    ThemeQuery(Option<ThemeArg>),
    GameSessionStart,
    GameSessionStop,
    TrayDestroy,
    AppQuit,
    UpdateCheck,
    UpdateStart,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("invalid payload for '{channel}': {reason}")]
    InvalidPayload { channel: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct LegacyProgress {
    progress: f64,
    size: f64,
}

impl UiMessage {
    pub fn name(&self) -> &'static str {
        match self {
            UiMessage::Window { .. } => "window",
            UiMessage::Progress { .. } => "progress",
            UiMessage::UserDataPath => "user-data-path",
            UiMessage::AppDataPath => "app-data-path",
            UiMessage::AuthRequest(_) => "auth-request",
            UiMessage::ThemeQuery(_) => "theme-query",
            UiMessage::GameSessionStart => "game-session-start",
            UiMessage::GameSessionStop => "game-session-stop",
            UiMessage::TrayDestroy => "tray-destroy",
            UiMessage::AppQuit => "app-quit",
            UiMessage::UpdateCheck => "update-check",
            UiMessage::UpdateStart => "update-start",
        }
    }

    /// Request/reply messages; everything else is fire-and-forget.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            UiMessage::UserDataPath
                | UiMessage::AppDataPath
                | UiMessage::AuthRequest(_)
                | UiMessage::ThemeQuery(_)
                | UiMessage::UpdateCheck
        )
    }

    /// Maps a channel name used by the UI bundle (or a message kind) to a message.
    pub fn from_channel(channel: &str, payload: Option<Value>) -> Result<Self, RouterError> {
        use WindowCommand::*;

        let window = |target, command| Ok(UiMessage::Window { target, command });
        let progress = |target, update| Ok(UiMessage::Progress { target, update });

        match channel {
            "main-window-open" => window(WindowKind::Main, Open),
            "main-window-show" => window(WindowKind::Main, Show),
            "main-window-hide" => window(WindowKind::Main, Hide),
            "main-window-minimize" => window(WindowKind::Main, Minimize),
            "main-window-maximize" => window(WindowKind::Main, ToggleMaximize),
            "main-window-reload" => window(WindowKind::Main, Reload),
            "main-window-close" => window(WindowKind::Main, Close),
            "main-window-dev-tools" => window(WindowKind::Main, OpenDevtools),
            "main-window-dev-tools-close" => window(WindowKind::Main, CloseDevtools),
            "update-window-close" => window(WindowKind::Update, Close),
            "update-window-dev-tools" => window(WindowKind::Update, OpenDevtools),
            "main-window-progress" => {
                progress(WindowKind::Main, Self::legacy_progress(channel, payload)?)
            }
            "update-window-progress" => {
                progress(WindowKind::Update, Self::legacy_progress(channel, payload)?)
            }
            "main-window-progress-reset" => progress(WindowKind::Main, ProgressUpdate::Reset),
            "update-window-progress-reset" => progress(WindowKind::Update, ProgressUpdate::Reset),
            "main-window-progress-load" => progress(WindowKind::Main, ProgressUpdate::Loading),
            "update-window-progress-load" => progress(WindowKind::Update, ProgressUpdate::Loading),
            "path-user-data" => Ok(UiMessage::UserDataPath),
            "appData" => Ok(UiMessage::AppDataPath),
            "Microsoft-window" | "auth-request" => {
                let arg = serde_json::from_value(payload.unwrap_or(Value::Null)).map_err(|e| {
                    RouterError::InvalidPayload {
                        channel: channel.to_string(),
                        reason: format!("expected a client id: {}", e),
                    }
                })?;
                Ok(UiMessage::AuthRequest(arg))
            }
            "is-dark-theme" | "theme-query" => {
                let arg = serde_json::from_value(payload.unwrap_or(Value::Null)).unwrap_or_else(|e| {
                    debug!("[ROUTER] theme argument ignored: {}", e);
                    None
                });
                Ok(UiMessage::ThemeQuery(arg))
            }
            "minecraft-launch" => Ok(UiMessage::GameSessionStart),
            "minecraft-close" => Ok(UiMessage::GameSessionStop),
            "update-app" => Ok(UiMessage::UpdateCheck),
            "start-update" => Ok(UiMessage::UpdateStart),
            kind => {
                let mut envelope = json!({ "kind": kind });
                if let Some(payload) = payload {
                    envelope["payload"] = payload;
                }
                serde_json::from_value(envelope).map_err(|e| {
                    debug!("[ROUTER] '{}' did not parse as a message: {}", kind, e);
                    RouterError::UnknownChannel(kind.to_string())
                })
            }
        }
    }

    /// Parses a `{kind, payload}` envelope; malformed input becomes a router error.
    pub fn parse(envelope: Value) -> Result<Self, RouterError> {
        let kind = envelope
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("<missing kind>")
            .to_string();
        serde_json::from_value(envelope).map_err(|e| RouterError::InvalidPayload {
            channel: kind,
            reason: e.to_string(),
        })
    }

    fn legacy_progress(channel: &str, payload: Option<Value>) -> Result<ProgressUpdate, RouterError> {
        let options: LegacyProgress = serde_json::from_value(payload.unwrap_or(Value::Null))
            .map_err(|e| RouterError::InvalidPayload {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ProgressUpdate::Set {
            progress: options.progress,
            size: options.size,
        })
    }
}

/// Failure value returned to request/reply callers instead of a rejected call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeFailure {
    pub error: bool,
    pub message: String,
}

impl BridgeFailure {
    pub fn new(message: impl Into<String>) -> Self {
        BridgeFailure {
            error: true,
            message: message.into(),
        }
    }
}

impl From<RouterError> for BridgeFailure {
    fn from(error: RouterError) -> Self {
        BridgeFailure::new(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RouterReply {
    Unit,
    Path(String),
    Flag(bool),
    Auth(Box<AuthProfile>),
    Update(UpdateCheck),
    Failure(BridgeFailure),
}

impl RouterReply {
    pub fn is_failure(&self) -> bool {
        matches!(self, RouterReply::Failure(_))
    }
}

fn absorb(what: &str, result: Result<(), WindowError>) {
    match result {
        Ok(()) => {}
        Err(WindowError::NotOpen(label)) => {
            debug!("[ROUTER] {} ignored: '{}' is not open", what, label)
        }
        Err(e) => warn!("[ROUTER] {} failed: {}", what, e),
    }
}

pub async fn dispatch(ctx: &LauncherContext, message: UiMessage) -> RouterReply {
    debug!("[ROUTER] {}", message.name());

    match message {
        UiMessage::Window { target, command } => {
            match command.action() {
                Some(action) => absorb(message_label(command), ctx.windows.control(target, action)),
                None if command == WindowCommand::Open => match ctx.windows.create_window(target) {
                    Ok(_) => {}
                    Err(WindowError::Opening(label)) => {
                        debug!("[ROUTER] open ignored: '{}' is already being opened", label)
                    }
                    Err(e) => warn!("[ROUTER] Failed to open '{}': {}", target.label(), e),
                },
                None => {
                    ctx.windows.destroy_window(target);
                }
            }
            RouterReply::Unit
        }
        UiMessage::Progress { target, update } => {
            absorb("progress", ctx.windows.set_progress(target, update.state()));
            RouterReply::Unit
        }
        UiMessage::UserDataPath => RouterReply::Path(ctx.paths.user_data_display()),
        UiMessage::AppDataPath => RouterReply::Path(ctx.paths.app_data_display()),
        UiMessage::AuthRequest(arg) => match ctx.auth.authenticate(arg.client_id()).await {
            Ok(profile) => RouterReply::Auth(Box::new(profile)),
            Err(e) => {
                warn!("[ROUTER] Sign-in failed: {}", e);
                RouterReply::Failure(BridgeFailure::new(e.to_string()))
            }
        },
        UiMessage::ThemeQuery(arg) => {
            let requested = arg.as_ref().and_then(ThemeArg::preference);
            RouterReply::Flag(ctx.is_dark_theme(requested))
        }
        UiMessage::GameSessionStart => {
            absorb("pause-audio", ctx.windows.emit(WindowKind::Main, "pause-audio", Value::Null));
            RouterReply::Unit
        }
        UiMessage::GameSessionStop => {
            absorb("resume-audio", ctx.windows.emit(WindowKind::Main, "resume-audio", Value::Null));
            RouterReply::Unit
        }
        UiMessage::TrayDestroy => {
            ctx.tray.destroy();
            RouterReply::Unit
        }
        UiMessage::AppQuit => {
            info!("[ROUTER] Quit requested by the UI");
            ctx.shutdown(ShutdownTrigger::QuitMessage);
            RouterReply::Unit
        }
        UiMessage::UpdateCheck => match ctx.updates.check_for_updates().await {
            Ok(check) => RouterReply::Update(check),
            Err(e) => RouterReply::Failure(BridgeFailure::new(e.to_string())),
        },
        UiMessage::UpdateStart => match ctx.updates.start_update().await {
            Ok(()) => RouterReply::Unit,
            Err(e) => RouterReply::Failure(BridgeFailure::new(e.to_string())),
        },
    }
}

fn message_label(command: WindowCommand) -> &'static str {
    match command {
        WindowCommand::Open => "open",
        WindowCommand::Show => "show",
        WindowCommand::Hide => "hide",
        WindowCommand::Minimize => "minimize",
        WindowCommand::ToggleMaximize => "toggle-maximize",
        WindowCommand::Reload => "reload",
        WindowCommand::Close => "close",
        WindowCommand::OpenDevtools => "open-devtools",
        WindowCommand::CloseDevtools => "close-devtools",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_window_channels() {
        assert_eq!(
            UiMessage::from_channel("main-window-maximize", None).unwrap(),
            UiMessage::Window {
                target: WindowKind::Main,
                command: WindowCommand::ToggleMaximize
            }
        );
        assert_eq!(
            UiMessage::from_channel("update-window-dev-tools", None).unwrap(),
            UiMessage::Window {
                target: WindowKind::Update,
                command: WindowCommand::OpenDevtools
            }
        );
    }

    #[test]
    fn test_legacy_progress_channels() {
        let message =
            UiMessage::from_channel("update-window-progress", Some(json!({ "progress": 50, "size": 200 })))
                .unwrap();
        match message {
            UiMessage::Progress { target, update } => {
                assert_eq!(target, WindowKind::Update);
                assert_eq!(update.state(), ProgressState::Fraction(0.25));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let reset = UiMessage::from_channel("main-window-progress-reset", None).unwrap();
        assert_eq!(
            reset,
            UiMessage::Progress {
                target: WindowKind::Main,
                update: ProgressUpdate::Reset
            }
        );

        let missing = UiMessage::from_channel("main-window-progress", None);
        assert!(matches!(missing, Err(RouterError::InvalidPayload { .. })));
    }

    #[test]
    fn test_legacy_request_channels() {
        assert_eq!(UiMessage::from_channel("appData", None).unwrap(), UiMessage::AppDataPath);
        assert_eq!(
            UiMessage::from_channel("Microsoft-window", Some(json!("client-123"))).unwrap(),
            UiMessage::AuthRequest(AuthArg::ClientId("client-123".into()))
        );
        assert!(UiMessage::from_channel("Microsoft-window", None).is_err());
        assert_eq!(
            UiMessage::from_channel("is-dark-theme", None).unwrap(),
            UiMessage::ThemeQuery(None)
        );
        assert!(UiMessage::from_channel("update-app", None).unwrap().expects_reply());
        assert!(!UiMessage::from_channel("start-update", None).unwrap().expects_reply());
    }

    #[test]
    fn test_message_kinds_are_accepted_as_channels() {
        assert_eq!(UiMessage::from_channel("app-quit", None).unwrap(), UiMessage::AppQuit);
        let object = UiMessage::from_channel("theme-query", Some(json!({ "theme": "dark" }))).unwrap();
        let bare = UiMessage::from_channel("theme-query", Some(json!("dark"))).unwrap();
        let unset = UiMessage::from_channel("theme-query", None).unwrap();
        for (message, expected) in [
            (&object, Some(ThemePreference::Dark)),
            (&bare, Some(ThemePreference::Dark)),
            (&unset, None),
        ] {
            match message {
                UiMessage::ThemeQuery(arg) => assert_eq!(arg.as_ref().and_then(ThemeArg::preference), expected),
                other => panic!("unexpected message: {:?}", other),
            }
        }

        let by_field = UiMessage::from_channel("auth-request", Some(json!({ "client_id": "abc" }))).unwrap();
        let by_string = UiMessage::from_channel("auth-request", Some(json!("abc"))).unwrap();
        for message in [by_field, by_string] {
            match message {
                UiMessage::AuthRequest(arg) => assert_eq!(arg.client_id(), "abc"),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert!(UiMessage::from_channel("auth-request", None).is_err());
    }

    #[test]
    fn test_envelopes_accept_every_theme_payload_form() {
        for envelope in [
            json!({ "kind": "theme-query" }),
            json!({ "kind": "theme-query", "payload": null }),
            json!({ "kind": "theme-query", "payload": "light" }),
            json!({ "kind": "theme-query", "payload": { "theme": "light" } }),
        ] {
            let message = UiMessage::parse(envelope.clone()).unwrap();
            assert_eq!(message.name(), "theme-query", "envelope {}", envelope);
        }

        assert_eq!(
            UiMessage::parse(json!({ "kind": "auth-request", "payload": "abc" })).unwrap(),
            UiMessage::AuthRequest(AuthArg::ClientId("abc".into()))
        );

        let err = UiMessage::parse(json!({ "kind": "window", "payload": { "target": "side" } })).unwrap_err();
        assert!(matches!(err, RouterError::InvalidPayload { ref channel, .. } if channel == "window"));
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let result = UiMessage::from_channel("main-window-explode", None);
        assert!(matches!(result, Err(RouterError::UnknownChannel(ref name)) if name == "main-window-explode"));

        let failure = BridgeFailure::from(result.unwrap_err());
        assert!(failure.error);
        assert!(failure.message.contains("main-window-explode"));
    }

    #[test]
    fn test_typed_message_wire_format() {
        let message: UiMessage = serde_json::from_value(json!({
            "kind": "window",
            "payload": { "target": "update", "command": "close" }
        }))
        .unwrap();
        assert_eq!(
            message,
            UiMessage::Window {
                target: WindowKind::Update,
                command: WindowCommand::Close
            }
        );

        let progress: UiMessage = serde_json::from_value(json!({
            "kind": "progress",
            "payload": { "target": "main", "update": { "mode": "set", "progress": 1, "size": 4 } }
        }))
        .unwrap();
        assert_eq!(progress.name(), "progress");
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(serde_json::to_value(RouterReply::Unit).unwrap(), Value::Null);
        assert_eq!(serde_json::to_value(RouterReply::Flag(true)).unwrap(), json!(true));
        assert_eq!(
            serde_json::to_value(RouterReply::Failure(BridgeFailure::new("boom"))).unwrap(),
            json!({ "error": true, "message": "boom" })
        );
    }
}
