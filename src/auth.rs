// Microsoft account authentication
// Exchanges a Microsoft OAuth authorization code for a Minecraft session through
// Xbox Live, XSTS and Minecraft services.

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::context::BoxFuture;

pub const AUTHORIZE_URL: &str = "https://login.live.com/oauth20_authorize.srf";
pub const TOKEN_URL: &str = "https://login.live.com/oauth20_token.srf";
pub const REDIRECT_URI: &str = "https://login.live.com/oauth20_desktop.srf";
pub const SCOPE: &str = "XboxLive.signin offline_access";

const XBL_AUTH_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
const XSTS_AUTH_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
const MINECRAFT_LOGIN_URL: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
const MINECRAFT_PROFILE_URL: &str = "https://api.minecraftservices.com/minecraft/profile";
const MINECRAFT_RELYING_PARTY: &str = "rp://api.minecraftservices.com/";
const XBOX_RELYING_PARTY: &str = "http://xboxlive.com";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in cancelled")]
    Cancelled,
    #[error("sign-in refused: {0}")]
    Denied(String),
    #[error("sign-in redirect carried no authorization code")]
    MissingCode,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Xbox Live refused the account: {0}")]
    Xsts(String),
    #[error("this account does not own Minecraft: Java Edition")]
    NoGameOwnership,
    #[error("unexpected response: {0}")]
    Unexpected(String),
    #[error("sign-in window error: {0}")]
    Window(String),
}

/// Delegated sign-in flow. Given a client identifier, yields a game session profile.
pub trait AuthProvider: Send + Sync {
    fn authenticate<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<AuthProfile, AuthError>>;
}

pub fn authorize_url(client_id: &str) -> Result<Url, AuthError> {
    Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", client_id),
            ("response_type", "code"),
            ("redirect_uri", REDIRECT_URI),
            ("scope", SCOPE),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| AuthError::Unexpected(e.to_string()))
}

/// Inspects a navigation target of the sign-in window. `None` while the user is still
/// on Microsoft pages; the outcome once the redirect URI is reached.
pub fn extract_authorization_code(url: &Url) -> Option<Result<String, AuthError>> {
    let target = format!("{}://{}{}", url.scheme(), url.host_str().unwrap_or(""), url.path());
    if target != REDIRECT_URI {
        return None;
    }

    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    Some(match (code, error) {
        (Some(code), _) if !code.is_empty() => Ok(code),
        (_, Some(error)) if error == "access_denied" => Err(AuthError::Cancelled),
        (_, Some(error)) => Err(AuthError::Denied(description.unwrap_or(error))),
        _ => Err(AuthError::MissingCode),
    })
}

/// Readable reason for an XSTS `XErr` code.
pub fn xsts_error_reason(code: u64) -> String {
    match code {
        2148916233 => "the account has no Xbox profile".to_string(),
        2148916235 => "Xbox Live is not available in the account's country".to_string(),
        2148916236 | 2148916237 => "the account needs adult verification".to_string(),
        2148916238 => "child accounts must be added to a Microsoft family".to_string(),
        other => format!("XSTS error {}", other),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub access_token_expires_in: u64,
    pub demo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XboxAccount {
    pub xuid: String,
    pub gamertag: String,
    pub age_group: String,
}

/// Session handed back to the UI after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProfile {
    pub access_token: String,
    pub client_token: String,
    pub uuid: String,
    pub name: String,
    pub refresh_token: String,
    pub user_properties: String,
    pub meta: AuthMeta,
    pub xbox_account: XboxAccount,
}

#[derive(Debug, Deserialize)]
struct MicrosoftToken {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XboxToken {
    token: String,
    display_claims: DisplayClaims,
}

#[derive(Debug, Deserialize)]
struct DisplayClaims {
    xui: Vec<XuiClaim>,
}

#[derive(Debug, Default, Deserialize)]
struct XuiClaim {
    #[serde(default)]
    uhs: String,
    #[serde(default)]
    xid: Option<String>,
    #[serde(default)]
    gtg: Option<String>,
    #[serde(default)]
    agg: Option<String>,
}

impl XboxToken {
    fn user_hash(&self) -> Result<&str, AuthError> {
        self.display_claims
            .xui
            .first()
            .map(|claim| claim.uhs.as_str())
            .filter(|uhs| !uhs.is_empty())
            .ok_or_else(|| AuthError::Unexpected("missing user hash".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct MinecraftToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct MinecraftProfile {
    id: String,
    name: String,
}

/// Parses an XSTS refusal body (`{"XErr": ...}`).
pub fn parse_xsts_error(body: &str) -> AuthError {
    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("XErr").and_then(Value::as_u64));
    match code {
        Some(code) => AuthError::Xsts(xsts_error_reason(code)),
        None => AuthError::Xsts(format!("unrecognized refusal: {}", body)),
    }
}

/// HTTP side of the sign-in: code -> Microsoft token -> Xbox -> XSTS -> Minecraft.
pub struct TokenExchange {
    http: reqwest::Client,
}

impl TokenExchange {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(TokenExchange { http })
    }

    pub async fn exchange_code(&self, client_id: &str, code: &str) -> Result<AuthProfile, AuthError> {
        debug!("[AUTH] Redeeming authorization code");
        let microsoft = self.microsoft_token(client_id, code).await?;
        let xbox = self.xbox_live(&microsoft.access_token).await?;
        let xsts = self.xsts(&xbox.token, MINECRAFT_RELYING_PARTY).await?;
        let minecraft = self.minecraft_login(xsts.user_hash()?, &xsts.token).await?;
        let profile = self.minecraft_profile(&minecraft.access_token).await?;

        let account = match self.xsts(&xbox.token, XBOX_RELYING_PARTY).await {
            Ok(token) => token.display_claims.xui.into_iter().next().unwrap_or_default(),
            Err(e) => {
                warn!("[AUTH] Xbox account details unavailable: {}", e);
                XuiClaim::default()
            }
        };

        info!("[AUTH] Signed in as {}", profile.name);
        Ok(AuthProfile {
            access_token: minecraft.access_token,
            client_token: uuid::Uuid::new_v4().simple().to_string(),
            uuid: profile.id,
            name: profile.name,
            refresh_token: microsoft.refresh_token,
            user_properties: "{}".to_string(),
            meta: AuthMeta {
                kind: "Xbox".to_string(),
                access_token_expires_in: minecraft.expires_in,
                demo: false,
            },
            xbox_account: XboxAccount {
                xuid: account.xid.unwrap_or_default(),
                gamertag: account.gtg.unwrap_or_default(),
                age_group: account.agg.unwrap_or_default(),
            },
        })
    }

    async fn microsoft_token(&self, client_id: &str, code: &str) -> Result<MicrosoftToken, AuthError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", client_id),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", REDIRECT_URI),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Denied(format!("token exchange refused: {}", body)));
        }
        Ok(response.json().await?)
    }

    async fn xbox_live(&self, microsoft_token: &str) -> Result<XboxToken, AuthError> {
        let body = json!({
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": "user.auth.xboxlive.com",
                "RpsTicket": format!("d={}", microsoft_token),
            },
            "RelyingParty": "http://auth.xboxlive.com",
            "TokenType": "JWT",
        });

        let response = self.http.post(XBL_AUTH_URL).json(&body).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    async fn xsts(&self, xbox_token: &str, relying_party: &str) -> Result<XboxToken, AuthError> {
        let body = json!({
            "Properties": {
                "SandboxId": "RETAIL",
                "UserTokens": [xbox_token],
            },
            "RelyingParty": relying_party,
            "TokenType": "JWT",
        });

        let response = self.http.post(XSTS_AUTH_URL).json(&body).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_xsts_error(&body));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    async fn minecraft_login(&self, user_hash: &str, xsts_token: &str) -> Result<MinecraftToken, AuthError> {
        let body = json!({
            "identityToken": format!("XBL3.0 x={};{}", user_hash, xsts_token),
        });

        let response = self.http.post(MINECRAFT_LOGIN_URL).json(&body).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    async fn minecraft_profile(&self, access_token: &str) -> Result<MinecraftProfile, AuthError> {
        let response = self
            .http
            .get(MINECRAFT_PROFILE_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AuthError::NoGameOwnership);
        }
        Ok(response.error_for_status()?.json().await?)
    }
}
