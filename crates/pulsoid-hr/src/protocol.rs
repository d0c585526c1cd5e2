//! # Wire Types
//!
//! Typed decoding of the two payloads this crate receives from outside:
//!
//! - **Real-time frames** from the telemetry WebSocket:
//!   `{"measured_at": 1700000000000, "data": {"heart_rate": 72}}`
//! - **OAuth fragments** relayed by the loopback redirect page:
//!   `access_token=...&token_type=bearer&expires_in=...&scope=...&state=...`
//!
//! Any other frame shape yields [`PulsoidError::MessageParse`], which the
//! receive loop treats as "no sample".

use serde::Deserialize;

use crate::error::{PulsoidError, PulsoidResult};

/// A single real-time frame.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartRateMessage {
    /// Server-side measurement time in Unix milliseconds.
    #[serde(default)]
    pub measured_at: Option<i64>,

    /// Measurement payload.
    #[serde(default)]
    pub data: Option<HeartRateData>,
}

/// Measurement payload of a [`HeartRateMessage`].
#[derive(Debug, Clone, Deserialize)]
pub struct HeartRateData {
    /// Beats per minute.
    #[serde(default)]
    pub heart_rate: Option<i64>,
}

impl HeartRateMessage {
    /// The heart rate carried by this frame, if any.
    pub fn heart_rate(&self) -> Option<i64> {
        self.data.as_ref().and_then(|d| d.heart_rate)
    }
}

/// Decode a text frame and extract the heart rate.
///
/// # Errors
/// Returns [`PulsoidError::MessageParse`] when the text is not JSON, the
/// nested `data.heart_rate` field is missing or not an integer, or the value
/// does not fit in an `i32`.
pub fn parse_heart_rate(text: &str) -> PulsoidResult<i32> {
    let message: HeartRateMessage =
        serde_json::from_str(text).map_err(|e| PulsoidError::MessageParse {
            reason: e.to_string(),
        })?;

    let raw = message.heart_rate().ok_or_else(|| PulsoidError::MessageParse {
        reason: "missing data.heart_rate".into(),
    })?;

    i32::try_from(raw).map_err(|_| PulsoidError::MessageParse {
        reason: format!("heart rate {raw} out of range"),
    })
}

/// Decoded implicit-grant fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthFragment {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl OAuthFragment {
    /// Parse a form-encoded fragment (with or without a leading `#`).
    pub fn parse(fragment: &str) -> Self {
        let fragment = fragment.trim().trim_start_matches('#');
        let mut parsed = Self::default();

        let Ok(mut url) = reqwest::Url::parse("http://localhost/") else {
            return parsed;
        };
        url.set_query(Some(fragment));

        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" => parsed.access_token = Some(value),
                "token_type" => parsed.token_type = Some(value),
                "expires_in" => parsed.expires_in = value.parse().ok(),
                "scope" => parsed.scope = Some(value),
                "state" => parsed.state = Some(value),
                "error" => parsed.error = Some(value),
                _ => {}
            }
        }

        parsed
    }

    /// The access token, or the provider's error when the user declined.
    ///
    /// # Errors
    /// Returns [`PulsoidError::InvalidToken`] when the fragment carries no token.
    pub fn into_token(self) -> PulsoidResult<String> {
        match self.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                if let Some(error) = self.error {
                    tracing::warn!(error = %error, "Authorization server returned an error");
                }
                Err(PulsoidError::InvalidToken)
            }
        }
    }
}
