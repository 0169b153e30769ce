// Discord rich presence broadcaster

use std::sync::{Mutex, MutexGuard};

use discord_rich_presence::{activity, DiscordIpc, DiscordIpcClient};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::PresenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PlayerSummary {
    Online { online: u32, max: u32 },
    Offline,
}

impl PlayerSummary {
    pub fn display(&self) -> String {
        match self {
            PlayerSummary::Online { online, max } => format!("Players: {}/{}", online, max),
            PlayerSummary::Offline => "Server offline".to_string(),
        }
    }
}

/// Display state pushed to the presence service. Each update replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceState {
    pub headline: String,
    pub detail: String,
    pub start_timestamp: i64,
    pub large_image_key: String,
    pub large_image_text: String,
    pub players: Option<PlayerSummary>,
}

/// Static parts of the presence, taken from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceTemplate {
    pub headline: String,
    pub large_image_key: String,
    pub large_image_text: String,
}

impl PresenceTemplate {
    pub fn from_config(config: &PresenceConfig) -> Self {
        PresenceTemplate {
            headline: config.headline.clone(),
            large_image_key: config.large_image_key.clone(),
            large_image_text: config.large_image_text.clone(),
        }
    }

    pub fn render(&self, players: PlayerSummary, start_timestamp: i64) -> PresenceState {
        PresenceState {
            headline: self.headline.clone(),
            detail: players.display(),
            start_timestamp,
            large_image_key: self.large_image_key.clone(),
            large_image_text: self.large_image_text.clone(),
            players: Some(players),
        }
    }

    /// Presence shown before the first server poll completes.
    pub fn starting(&self, start_timestamp: i64) -> PresenceState {
        PresenceState {
            headline: self.headline.clone(),
            detail: "Starting".to_string(),
            start_timestamp,
            large_image_key: self.large_image_key.clone(),
            large_image_text: self.large_image_text.clone(),
            players: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence connection failed: {0}")]
    Connect(String),
    #[error("presence update failed: {0}")]
    Update(String),
    #[error("presence disconnect failed: {0}")]
    Disconnect(String),
}

pub trait PresenceTransport: Send {
    fn connect(&mut self) -> Result<(), PresenceError>;
    fn set_activity(&mut self, state: &PresenceState) -> Result<(), PresenceError>;
    fn close(&mut self) -> Result<(), PresenceError>;
}

/// The transport is taken out of the link while an update talks to the service, so
/// the lock is never held across I/O.
struct Link {
    transport: Option<Box<dyn PresenceTransport>>,
    connected: bool,
    closed: bool,
}

pub struct PresenceBroadcaster {
    enabled: bool,
    link: Mutex<Link>,
}

impl PresenceBroadcaster {
    pub fn new(transport: Box<dyn PresenceTransport>, enabled: bool) -> Self {
        PresenceBroadcaster {
            enabled,
            link: Mutex::new(Link {
                transport: Some(transport),
                connected: false,
                closed: false,
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pushes a display state. Connects lazily; failures are logged and retried on the next update.
    /// Blocks on the service, so async callers run it on the blocking pool.
    pub fn update_presence(&self, state: &PresenceState) {
        if !self.enabled {
            return;
        }

        let (mut transport, mut connected) = {
            let mut link = self.link();
            if link.closed {
                debug!("[PRESENCE] update dropped: broadcaster disconnected");
                return;
            }
            match link.transport.take() {
                Some(transport) => (transport, link.connected),
                None => {
                    debug!("[PRESENCE] update dropped: previous update still in flight");
                    return;
                }
            }
        };

        if !connected {
            match transport.connect() {
                Ok(()) => {
                    connected = true;
                    info!("[PRESENCE] Connected to presence service");
                }
                Err(e) => warn!("[PRESENCE] {}", e),
            }
        }

        if connected {
            match transport.set_activity(state) {
                Ok(()) => debug!("[PRESENCE] {} | {}", state.headline, state.detail),
                Err(e) => {
                    warn!("[PRESENCE] {}", e);
                    connected = false;
                }
            }
        }

        {
            let mut link = self.link();
            if !link.closed {
                link.connected = connected;
                link.transport = Some(transport);
                return;
            }
            link.connected = false;
        }

        // Disconnected while this update was in flight; release the connection here
        if connected {
            match transport.close() {
                Ok(()) => info!("[PRESENCE] Disconnected from presence service"),
                Err(e) => warn!("[PRESENCE] {}", e),
            }
        }
    }

    /// Releases the connection. Safe to call repeatedly or before any connection was made.
    /// Never waits for an update in flight; that update closes the connection when it returns.
    pub fn disconnect(&self) -> bool {
        let transport = {
            let mut link = self.link();
            link.closed = true;
            if !link.connected {
                return false;
            }
            link.connected = false;
            link.transport.take()
        };

        match transport {
            Some(mut transport) => match transport.close() {
                Ok(()) => info!("[PRESENCE] Disconnected from presence service"),
                Err(e) => warn!("[PRESENCE] {}", e),
            },
            None => debug!("[PRESENCE] close handed to the update in flight"),
        }
        true
    }

    pub fn is_connected(&self) -> bool {
        self.link().connected
    }
}

/// Discord IPC transport.
pub struct DiscordTransport {
    client_id: String,
    client: Option<DiscordIpcClient>,
}

impl DiscordTransport {
    pub fn new(client_id: &str) -> Self {
        DiscordTransport {
            client_id: client_id.to_string(),
            client: None,
        }
    }
}

impl PresenceTransport for DiscordTransport {
    fn connect(&mut self) -> Result<(), PresenceError> {
        let mut client = DiscordIpcClient::new(&self.client_id)
            .map_err(|e| PresenceError::Connect(e.to_string()))?;
        client
            .connect()
            .map_err(|e| PresenceError::Connect(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    fn set_activity(&mut self, state: &PresenceState) -> Result<(), PresenceError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PresenceError::Update("not connected".to_string()))?;

        let activity = activity::Activity::new()
            .state(&state.detail)
            .details(&state.headline)
            .timestamps(activity::Timestamps::new().start(state.start_timestamp))
            .assets(
                activity::Assets::new()
                    .large_image(&state.large_image_key)
                    .large_text(&state.large_image_text),
            );

        client
            .set_activity(activity)
            .map_err(|e| PresenceError::Update(e.to_string()))
    }

    fn close(&mut self) -> Result<(), PresenceError> {
        match self.client.take() {
            Some(mut client) => client
                .close()
                .map_err(|e| PresenceError::Disconnect(e.to_string())),
            None => Ok(()),
        }
    }
}
