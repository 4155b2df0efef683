//! Credential mint and SDP exchange with the realtime service
//!
//! Two HTTP round-trips back the media negotiation: the backend mints a
//! short-lived client token for the session, then the local SDP offer is
//! posted directly to the realtime service in exchange for an answer.
//! Minted tokens are cached per (session, language, model) until shortly
//! before expiry so reopening a session does not burn a fresh token.

use super::error::ConnectError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Realtime service SDP endpoint used when the mint response names none
pub(crate) const DEFAULT_SDP_URL: &str = "https://api.openai.com/v1/realtime/calls";

/// Capability header added on the single SDP retry
const BETA_HEADER_NAME: &str = "OpenAI-Beta";
const BETA_HEADER_VALUE: &str = "realtime=v1";

/// Cached tokens are discarded this long before their advertised expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// HTTP timeouts for signaling requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What counts as a rejected SDP exchange worth the one beta-header retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTrigger {
    /// Retry only on a non-2xx status
    NonSuccessStatus,
    /// Retry only when the answer body comes back empty
    EmptyBody,
    /// Retry on either signal
    #[default]
    Either,
}

/// Short-lived credential minted by the backend for one realtime session
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeCredential {
    pub session_id: String,
    pub client_token: String,
    /// Advertised token lifetime in seconds
    pub expires_in: Option<u64>,
    /// SDP endpoint override; falls back to [`DEFAULT_SDP_URL`]
    pub webrtc_sdp_url: Option<String>,
}

impl Drop for RealtimeCredential {
    fn drop(&mut self) {
        self.client_token.zeroize();
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest<'a> {
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Clone)]
struct CachedCredential {
    credential: RealtimeCredential,
    expires_at: Option<Instant>,
}

impl CachedCredential {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

type CacheKey = (String, String, String);

/// Raw SDP endpoint response, split out so rejection rules stay testable
struct SdpResponse {
    status: u16,
    body: String,
}

/// Signaling client for one backend
pub(crate) struct SignalingClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    retry_trigger: RetryTrigger,
    cache: Mutex<HashMap<CacheKey, CachedCredential>>,
}

impl SignalingClient {
    pub(crate) fn new(
        base_url: &str,
        auth_token: Option<String>,
        retry_trigger: RetryTrigger,
    ) -> Result<Self, ConnectError> {
        // Validate early so a bad backend URL fails before any negotiation
        url::Url::parse(base_url).map_err(|e| ConnectError::Endpoint(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            retry_trigger,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Mint a client token for the session, reusing a cached one when fresh.
    pub(crate) async fn mint_credential(
        &self,
        session_id: &str,
        language: Option<&str>,
        model: Option<&str>,
    ) -> Result<RealtimeCredential, ConnectError> {
        let key: CacheKey = (
            session_id.to_string(),
            language.unwrap_or_default().to_string(),
            model.unwrap_or_default().to_string(),
        );

        if let Some(credential) = self.cached(&key) {
            debug!(session_id = %session_id, "Reusing cached realtime credential");
            return Ok(credential);
        }

        let url = format!("{}/api/realtime/session", self.base_url);
        let mut request = self.http.post(&url).json(&MintRequest {
            session_id,
            language,
            model,
        });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectError::CredentialMint {
                status: status.as_u16(),
                body,
            });
        }

        let credential: RealtimeCredential = response.json().await?;
        info!(
            session_id = %credential.session_id,
            expires_in = ?credential.expires_in,
            "Minted realtime credential"
        );

        let expires_at = credential.expires_in.map(|secs| {
            Instant::now() + Duration::from_secs(secs).saturating_sub(TOKEN_EXPIRY_MARGIN)
        });
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key,
                CachedCredential {
                    credential: credential.clone(),
                    expires_at,
                },
            );
        }

        Ok(credential)
    }

    fn cached(&self, key: &CacheKey) -> Option<RealtimeCredential> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(key) {
            Some(entry) if entry.is_fresh(Instant::now()) => Some(entry.credential.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// Post the local offer and return the remote answer SDP.
    ///
    /// A rejected first attempt (per the configured trigger) is retried
    /// exactly once with the beta capability header added. Network errors
    /// are not rejections and propagate immediately.
    pub(crate) async fn exchange_sdp(
        &self,
        credential: &RealtimeCredential,
        offer_sdp: &str,
    ) -> Result<String, ConnectError> {
        let url = credential
            .webrtc_sdp_url
            .as_deref()
            .unwrap_or(DEFAULT_SDP_URL);

        let first = self.post_offer(url, credential, offer_sdp, false).await?;
        if rejected(first.status, &first.body, self.retry_trigger) {
            warn!(
                status = first.status,
                "SDP exchange rejected, retrying once with capability header"
            );
            let second = self.post_offer(url, credential, offer_sdp, true).await?;
            return answer_from(second);
        }
        answer_from(first)
    }

    async fn post_offer(
        &self,
        url: &str,
        credential: &RealtimeCredential,
        offer_sdp: &str,
        with_beta_header: bool,
    ) -> Result<SdpResponse, ConnectError> {
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&credential.client_token)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string());
        if with_beta_header {
            request = request.header(BETA_HEADER_NAME, BETA_HEADER_VALUE);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(SdpResponse { status, body })
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if let Some(token) = self.auth_token.as_mut() {
            token.zeroize();
        }
    }
}

fn rejected(status: u16, body: &str, trigger: RetryTrigger) -> bool {
    let non_success = !(200..300).contains(&status);
    let empty = body.trim().is_empty();
    match trigger {
        RetryTrigger::NonSuccessStatus => non_success,
        RetryTrigger::EmptyBody => empty,
        RetryTrigger::Either => non_success || empty,
    }
}

fn answer_from(response: SdpResponse) -> Result<String, ConnectError> {
    if !(200..300).contains(&response.status) {
        return Err(ConnectError::SdpExchange {
            status: response.status,
            body: response.body,
        });
    }
    if response.body.trim().is_empty() {
        return Err(ConnectError::EmptyAnswer);
    }
    Ok(response.body)
}
