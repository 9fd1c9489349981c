//! Administrative notifications
//!
//! Two templates: the continuity-mismatch warning (start-of-week value does
//! not match the previous end-of-week value) and the week-close summary.
//! Photos are attached best-effort; a missing or unreadable photo is skipped
//! with a warning. Send failures are returned to the caller, which logs them
//! and carries on: a notification is never part of a submission's success.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cuentakm_common::config::NotificationConfig;
use cuentakm_common::db::{Agent, Reading};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::photo_store::PhotoStore;

const USER_AGENT: &str = concat!("cuentakm/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("No recipients configured for {0} messages")]
    NoRecipients(&'static str),

    #[error("Mail service unreachable: {0}")]
    Transport(String),

    #[error("Mail service rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A composed message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Message delivery seam
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &AdminMessage) -> Result<(), NotificationError>;
}

/// Transactional mail over HTTP (Brevo v3 `smtp/email` API)
pub struct MailApiNotifier {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender_email: String,
    sender_name: String,
}

impl MailApiNotifier {
    pub fn new(config: &NotificationConfig, api_key: String) -> Result<Self, NotificationError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key,
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
        })
    }
}

#[async_trait]
impl Notifier for MailApiNotifier {
    async fn send(&self, message: &AdminMessage) -> Result<(), NotificationError> {
        let to: Vec<_> = message.to.iter().map(|email| json!({ "email": email })).collect();
        let attachments: Vec<_> = message
            .attachments
            .iter()
            .map(|a| json!({ "name": a.filename, "content": BASE64.encode(&a.content) }))
            .collect();

        let mut body = json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": to,
            "subject": message.subject,
            "textContent": message.body,
        });
        if !attachments.is_empty() {
            body["attachment"] = json!(attachments);
        }

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Used when mail is disabled or no API key is configured
#[derive(Debug, Default)]
pub struct LogOnlyNotifier;

#[async_trait]
impl Notifier for LogOnlyNotifier {
    async fn send(&self, message: &AdminMessage) -> Result<(), NotificationError> {
        info!(
            to = ?message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "Mail delivery disabled; notification logged only"
        );
        Ok(())
    }
}

fn stamp(reading: &Reading) -> String {
    reading.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn km(reading: &Reading) -> String {
    reading
        .odometer_km
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// Mismatch warning body (attachments added by the dispatcher)
pub fn mismatch_message(
    agent: &Agent,
    prior_end: &Reading,
    new_start: &Reading,
    warning: &str,
    to: Vec<String>,
) -> AdminMessage {
    let subject = format!("[Cuentakm][AVISO] Posible uso fin de semana – {}", agent.name);
    let body = [
        format!("Comercial: {}", agent.name),
        String::new(),
        format!("Fin semana anterior: {} km  ({})", km(prior_end), stamp(prior_end)),
        format!("Inicio semana nueva: {} km  ({})", km(new_start), stamp(new_start)),
        String::new(),
        format!("AVISO: {}", warning),
    ]
    .join("\n");

    AdminMessage {
        to,
        subject,
        body,
        attachments: Vec::new(),
    }
}

/// Week-close summary body (attachments added by the dispatcher)
pub fn week_close_message(
    agent: &Agent,
    start: &Reading,
    end: &Reading,
    distance_km: i64,
    warning: Option<&str>,
    to: Vec<String>,
) -> AdminMessage {
    let subject = format!("[Cuentakm] {} – Semana {}/{}", agent.name, end.week, end.year);
    let mut lines = vec![
        format!("Comercial: {}", agent.name),
        format!("Semana: {}/{}", end.week, end.year),
        String::new(),
        format!("Inicio de semana: {} km  ({})", km(start), stamp(start)),
        format!("Fin de semana:    {} km  ({})", km(end), stamp(end)),
        String::new(),
        format!("Kilómetros realizados: {} km", distance_km),
    ];
    if let Some(warning) = warning {
        lines.push(String::new());
        lines.push(format!("AVISO: {}", warning));
    }

    AdminMessage {
        to,
        subject,
        body: lines.join("\n"),
        attachments: Vec::new(),
    }
}

/// Composes messages, attaches photos, hands them to the [`Notifier`]
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    photos: PhotoStore,
    week_close_recipients: Vec<String>,
    mismatch_recipients: Vec<String>,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        photos: PhotoStore,
        week_close_recipients: Vec<String>,
        mismatch_recipients: Vec<String>,
    ) -> Self {
        Self {
            notifier,
            photos,
            week_close_recipients,
            mismatch_recipients,
        }
    }

    pub async fn notify_mismatch(
        &self,
        agent: &Agent,
        prior_end: &Reading,
        new_start: &Reading,
        warning: &str,
    ) -> Result<(), NotificationError> {
        if self.mismatch_recipients.is_empty() {
            return Err(NotificationError::NoRecipients("mismatch"));
        }
        let mut message =
            mismatch_message(agent, prior_end, new_start, warning, self.mismatch_recipients.clone());
        self.attach_photos(
            &mut message,
            &[(prior_end, "fin_anterior"), (new_start, "inicio_nueva")],
        )
        .await;

        self.notifier.send(&message).await?;
        info!(agent_id = agent.id, "Sent continuity mismatch warning");
        Ok(())
    }

    pub async fn notify_week_close(
        &self,
        agent: &Agent,
        start: &Reading,
        end: &Reading,
        distance_km: i64,
        warning: Option<&str>,
    ) -> Result<(), NotificationError> {
        if self.week_close_recipients.is_empty() {
            return Err(NotificationError::NoRecipients("week-close"));
        }
        let mut message = week_close_message(
            agent,
            start,
            end,
            distance_km,
            warning,
            self.week_close_recipients.clone(),
        );
        self.attach_photos(&mut message, &[(start, "inicio"), (end, "fin")])
            .await;

        self.notifier.send(&message).await?;
        info!(
            agent_id = agent.id,
            week = end.week,
            year = end.year,
            "Sent week-close summary"
        );
        Ok(())
    }

    async fn attach_photos(&self, message: &mut AdminMessage, photos: &[(&Reading, &str)]) {
        for (reading, label) in photos {
            let Some(reference) = reading.photo_ref.as_deref() else {
                continue;
            };
            match self.photos.read(reference).await {
                Ok(content) => {
                    let extension = Path::new(reference)
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("jpg");
                    message.attachments.push(Attachment {
                        filename: format!("{}-{}-{}.{}", label, reading.week, reading.year, extension),
                        content,
                    });
                }
                Err(e) => {
                    warn!(
                        reading_id = reading.id,
                        photo = %label,
                        error = %e,
                        "Could not attach photo"
                    );
                }
            }
        }
    }
}
