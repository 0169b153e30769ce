// Game server status poller
// Queries the community server with the Minecraft Server List Ping and turns the
// result into a presence update on a fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::context::BoxFuture;
use crate::presence::{PlayerSummary, PresenceBroadcaster, PresenceState, PresenceTemplate};

const MAX_RESPONSE_LEN: i32 = 65535;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("status query timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed status reply: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerStatus {
    pub online: u32,
    pub max: u32,
    pub version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    players: Option<PlayersDocument>,
    #[serde(default)]
    version: Option<VersionDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayersDocument {
    #[serde(default)]
    online: Option<u32>,
    #[serde(default)]
    max: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    name: Option<String>,
}

/// Parses the JSON document of a status reply. Missing player fields count as zero.
pub fn parse_status_json(json: &str) -> Result<ServerStatus, StatusError> {
    let document: StatusDocument =
        serde_json::from_str(json).map_err(|e| StatusError::Malformed(e.to_string()))?;
    let players = document.players.unwrap_or_default();

    Ok(ServerStatus {
        online: players.online.unwrap_or(0),
        max: players.max.unwrap_or(0),
        version: document.version.and_then(|v| v.name),
    })
}

/// Maps a query outcome to the player summary shown in the presence.
pub fn summarize(result: &Result<ServerStatus, StatusError>) -> PlayerSummary {
    match result {
        Ok(status) => PlayerSummary::Online {
            online: status.online,
            max: status.max,
        },
        Err(_) => PlayerSummary::Offline,
    }
}

pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

/// Decodes a VarInt from the front of `data`, returning the value and bytes consumed.
pub fn read_varint(data: &[u8]) -> Result<(i32, usize), StatusError> {
    let mut result: u32 = 0;
    for (i, &byte) in data.iter().enumerate().take(5) {
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result as i32, i + 1));
        }
    }
    Err(StatusError::Malformed("unterminated varint".to_string()))
}

async fn read_varint_from<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<i32, StatusError> {
    let mut bytes = Vec::with_capacity(5);
    loop {
        let byte = reader.read_u8().await?;
        bytes.push(byte);
        if byte & 0x80 == 0 || bytes.len() == 5 {
            break;
        }
    }
    read_varint(&bytes).map(|(value, _)| value)
}

fn frame(packet: Vec<u8>) -> Vec<u8> {
    let mut framed = Vec::with_capacity(packet.len() + 5);
    write_varint(&mut framed, packet.len() as i32);
    framed.extend(packet);
    framed
}

/// Handshake (next state = status) followed by the status request, both framed.
pub fn encode_status_request(host: &str, port: u16, protocol_version: i32) -> Vec<u8> {
    let mut handshake = vec![0x00];
    write_varint(&mut handshake, protocol_version);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, 1);

    let mut out = frame(handshake);
    out.extend(frame(vec![0x00]));
    out
}

/// Extracts the JSON string from a status response packet body (packet id + string).
pub fn decode_status_response(body: &[u8]) -> Result<String, StatusError> {
    let (packet_id, id_len) = read_varint(body)?;
    if packet_id != 0x00 {
        return Err(StatusError::Malformed(format!("unexpected packet id {}", packet_id)));
    }

    let (json_len, len_size) = read_varint(&body[id_len..])?;
    if json_len < 0 {
        return Err(StatusError::Malformed("negative string length".to_string()));
    }
    let start = id_len + len_size;
    let end = start + json_len as usize;
    if end > body.len() {
        return Err(StatusError::Malformed("truncated status string".to_string()));
    }

    std::str::from_utf8(&body[start..end])
        .map(str::to_string)
        .map_err(|e| StatusError::Malformed(e.to_string()))
}

pub trait StatusSource: Send + Sync {
    fn query(&self) -> BoxFuture<'_, Result<ServerStatus, StatusError>>;
}

/// Server List Ping over TCP.
pub struct MinecraftPing {
    host: String,
    port: u16,
    protocol_version: i32,
    timeout: Duration,
}

impl MinecraftPing {
    pub fn from_config(config: &ServerConfig) -> Self {
        MinecraftPing {
            host: config.host.clone(),
            port: config.port,
            protocol_version: config.protocol_version,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    async fn exchange(&self) -> Result<ServerStatus, StatusError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream
            .write_all(&encode_status_request(&self.host, self.port, self.protocol_version))
            .await?;

        let length = read_varint_from(&mut stream).await?;
        if length <= 0 || length > MAX_RESPONSE_LEN {
            return Err(StatusError::Malformed(format!("invalid packet length {}", length)));
        }

        let mut body = vec![0u8; length as usize];
        stream.read_exact(&mut body).await?;

        let json = decode_status_response(&body)?;
        parse_status_json(&json)
    }
}

impl StatusSource for MinecraftPing {
    fn query(&self) -> BoxFuture<'_, Result<ServerStatus, StatusError>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.exchange()).await {
                Ok(result) => result,
                Err(_) => Err(StatusError::Timeout(self.timeout)),
            }
        })
    }
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn try_set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    broadcaster: Arc<PresenceBroadcaster>,
    template: PresenceTemplate,
    interval: Duration,
    started_at: i64,
    in_flight: AtomicBool,
}

impl StatusPoller {
    pub fn new(
        source: Arc<dyn StatusSource>,
        broadcaster: Arc<PresenceBroadcaster>,
        template: PresenceTemplate,
        interval: Duration,
    ) -> Self {
        StatusPoller {
            source,
            broadcaster,
            template,
            interval,
            started_at: Utc::now().timestamp(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Runs one poll. Returns `None` when the previous query is still in flight.
    pub async fn tick(&self) -> Option<PresenceState> {
        let Some(_guard) = InFlightGuard::try_set(&self.in_flight) else {
            debug!("[STATUS] Previous status query still running, skipping tick");
            return None;
        };

        let result = self.source.query().await;
        match &result {
            Ok(status) => debug!("[STATUS] Server online: {}/{}", status.online, status.max),
            Err(e) => warn!("[STATUS] Server status query failed: {}", e),
        }

        let state = self.template.render(summarize(&result), self.started_at);
        let broadcaster = Arc::clone(&self.broadcaster);
        let update = state.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || broadcaster.update_presence(&update)).await {
            warn!("[STATUS] Presence update task failed: {}", e);
        }
        Some(state)
    }

    /// Polls immediately and then on every interval. Each tick runs as its own task so a
    /// slow query never delays the schedule; overlapping ticks are skipped by `tick`.
    pub fn spawn(self: Arc<Self>) -> tauri::async_runtime::JoinHandle<()> {
        info!("[STATUS] Status poller started, interval {:?}", self.interval);
        tauri::async_runtime::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let poller = Arc::clone(&self);
                tauri::async_runtime::spawn(async move {
                    poller.tick().await;
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{PresenceError, PresenceTransport};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct NullTransport;

    impl PresenceTransport for NullTransport {
        fn connect(&mut self) -> Result<(), PresenceError> {
            Ok(())
        }
        fn set_activity(&mut self, _state: &PresenceState) -> Result<(), PresenceError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), PresenceError> {
            Ok(())
        }
    }

    struct FixedSource(Mutex<Option<Result<ServerStatus, StatusError>>>);

    impl StatusSource for FixedSource {
        fn query(&self) -> BoxFuture<'_, Result<ServerStatus, StatusError>> {
            let result = self
                .0
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(StatusError::Malformed("exhausted".into())));
            Box::pin(async move { result })
        }
    }

    struct GatedSource {
        started: Notify,
        release: Notify,
    }

    impl StatusSource for GatedSource {
        fn query(&self) -> BoxFuture<'_, Result<ServerStatus, StatusError>> {
            Box::pin(async move {
                self.started.notify_one();
                self.release.notified().await;
                Ok(ServerStatus { online: 1, max: 10, version: None })
            })
        }
    }

    fn template() -> PresenceTemplate {
        PresenceTemplate {
            headline: "Born from a bad joke".into(),
            large_image_key: "logo".into(),
            large_image_text: "BlockHaven".into(),
        }
    }

    fn poller(source: Arc<dyn StatusSource>) -> StatusPoller {
        let broadcaster = Arc::new(PresenceBroadcaster::new(Box::new(NullTransport), true));
        StatusPoller::new(source, broadcaster, template(), Duration::from_secs(15))
    }

    #[test]
    fn test_parse_status_json() {
        let status = parse_status_json(
            r#"{"version":{"name":"1.21.1","protocol":767},"players":{"online":3,"max":20},"description":"hi"}"#,
        )
        .unwrap();
        assert_eq!(status.online, 3);
        assert_eq!(status.max, 20);
        assert_eq!(status.version.as_deref(), Some("1.21.1"));
    }

    #[test]
    fn test_missing_players_default_to_zero() {
        let status = parse_status_json(r#"{"description":"maintenance"}"#).unwrap();
        assert_eq!((status.online, status.max), (0, 0));

        let status = parse_status_json(r#"{"players":{"max":50}}"#).unwrap();
        assert_eq!((status.online, status.max), (0, 50));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(parse_status_json("not json"), Err(StatusError::Malformed(_))));
    }

    #[test]
    fn test_varint_known_values() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 767);
        assert_eq!(buf, vec![0xFF, 0x05]);
        assert_eq!(read_varint(&buf).unwrap(), (767, 2));

        let mut buf = Vec::new();
        write_varint(&mut buf, -1);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(read_varint(&buf).unwrap(), (-1, 5));

        assert!(read_varint(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn test_encode_status_request_layout() {
        let bytes = encode_status_request("mc.local", 25565, 767);
        // length, id, protocol(2), host len, host(8), port(2), next state
        assert_eq!(bytes[0] as usize, 1 + 2 + 1 + 8 + 2 + 1);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(&bytes[5..13], b"mc.local");
        assert_eq!(&bytes[13..15], &25565u16.to_be_bytes());
        assert_eq!(bytes[15], 1);
        assert_eq!(&bytes[16..], &[0x01, 0x00]);
    }

    #[test]
    fn test_decode_status_response() {
        let json = r#"{"players":{"online":2,"max":8}}"#;
        let mut body = vec![0x00];
        write_varint(&mut body, json.len() as i32);
        body.extend_from_slice(json.as_bytes());
        assert_eq!(decode_status_response(&body).unwrap(), json);

        body.truncate(body.len() - 3);
        assert!(decode_status_response(&body).is_err());
        assert!(decode_status_response(&[0x01, 0x00]).is_err());
    }

    #[tokio::test]
    async fn test_tick_reports_player_counts() {
        let source = Arc::new(FixedSource(Mutex::new(Some(Ok(ServerStatus {
            online: 3,
            max: 20,
            version: None,
        })))));
        let poller = poller(source);

        let state = poller.tick().await.unwrap();
        assert_eq!(state.detail, "Players: 3/20");
        assert_eq!(state.start_timestamp, poller.started_at());
        // Published from the blocking pool before the tick returns
        assert!(poller.broadcaster.is_connected());
    }

    #[tokio::test]
    async fn test_tick_absorbs_failures() {
        let source = Arc::new(FixedSource(Mutex::new(Some(Err(StatusError::Timeout(
            Duration::from_secs(5),
        ))))));
        let poller = poller(source);

        let state = poller.tick().await.unwrap();
        assert_eq!(state.detail, "Server offline");
        assert_eq!(state.players, Some(PlayerSummary::Offline));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let poller = Arc::new(poller(source.clone()));

        let first = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.tick().await })
        };
        source.started.notified().await;

        assert!(poller.tick().await.is_none());

        source.release.notify_one();
        let state = first.await.unwrap().unwrap();
        assert_eq!(state.detail, "Players: 1/10");

        // The guard is released once the first query finishes.
        source.release.notify_one();
        assert!(poller.tick().await.is_some());
    }

    #[tokio::test]
    async fn test_ping_against_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 64];
            let _ = socket.read(&mut request).await.unwrap();

            let json = r#"{"players":{"online":7,"max":40}}"#;
            let mut body = vec![0x00];
            write_varint(&mut body, json.len() as i32);
            body.extend_from_slice(json.as_bytes());
            socket.write_all(&frame(body)).await.unwrap();
        });

        let ping = MinecraftPing {
            host: "127.0.0.1".into(),
            port,
            protocol_version: 767,
            timeout: Duration::from_secs(5),
        };
        let status = ping.query().await.unwrap();
        assert_eq!((status.online, status.max), (7, 40));
    }

    #[tokio::test]
    async fn test_ping_refused_connection_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ping = MinecraftPing {
            host: "127.0.0.1".into(),
            port,
            protocol_version: 767,
            timeout: Duration::from_secs(2),
        };
        let result = ping.query().await;
        assert_eq!(summarize(&result), PlayerSummary::Offline);
    }
}
