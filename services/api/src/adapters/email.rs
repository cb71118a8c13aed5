//! services/api/src/adapters/email.rs
//!
//! This module contains the delivery adapter that emails finished recordings
//! through the Resend HTTP API. It implements the `DeliveryService` port from the
//! `core` crate.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use twin_capture_core::domain::{AudioArtifact, DeliveryReceipt};
use twin_capture_core::ports::{DeliveryService, PortError, PortResult};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `DeliveryService` port by sending an email
/// with the recording attached.
#[derive(Clone)]
pub struct ResendDeliveryAdapter {
    client: reqwest::Client,
    api_key: String,
    from: String,
    to: String,
    endpoint: String,
}

impl ResendDeliveryAdapter {
    /// Creates a new `ResendDeliveryAdapter`.
    pub fn new(client: reqwest::Client, api_key: String, from: String, to: String) -> Self {
        Self {
            client,
            api_key,
            from,
            to,
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    /// Points the adapter at another Resend-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

//=========================================================================================
// Message Formatting
//=========================================================================================

/// `m:ss`, the way the recording's length is shown to people.
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// The attachment name, with `:` replaced so it is a valid file name everywhere.
pub fn attachment_name(timestamp: DateTime<Utc>) -> String {
    format!(
        "gravacao_{}.wav",
        timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true).replace(':', "-")
    )
}

fn display_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%d/%m/%Y, %H:%M:%S").to_string()
}

fn email_body(duration_seconds: u64, timestamp: DateTime<Utc>) -> String {
    format!(
        "<h2>Nova Gravação de Áudio</h2>\
         <p><strong>Data/Hora:</strong> {}</p>\
         <p><strong>Duração:</strong> {}</p>\
         <p>A gravação de áudio está anexada a este email.</p>\
         <br><p>Gravação gerada automaticamente pelo sistema.</p>",
        display_timestamp(timestamp),
        format_duration(duration_seconds)
    )
}

//=========================================================================================
// `DeliveryService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DeliveryService for ResendDeliveryAdapter {
    async fn deliver(
        &self,
        artifact: &AudioArtifact,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    ) -> PortResult<DeliveryReceipt> {
        let payload = json!({
            "from": self.from,
            "to": [self.to],
            "subject": format!("Nova Gravação de Áudio - {}", display_timestamp(timestamp)),
            "html": email_body(duration_seconds, timestamp),
            "attachments": [{
                "filename": attachment_name(timestamp),
                "content": base64::engine::general_purpose::STANDARD.encode(&artifact.data),
            }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Email provider rejected the delivery with {}: {}",
                status, body
            )));
        }

        let parsed: ResendResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        info!(
            email_id = parsed.id.as_deref().unwrap_or("unknown"),
            duration_seconds, "Recording emailed"
        );
        Ok(DeliveryReceipt { id: parsed.id })
    }
}
