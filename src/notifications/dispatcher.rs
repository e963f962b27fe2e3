//! Delivers completion notifications, either directly or through the web app.

use super::content::{self, NotificationContent};
use crate::job_store::{in_transaction, JobStore};
use crate::orchestrator::JobPaths;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use rand_distr::Alphanumeric;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Length of the one-time key written to `.key` for the callback.
pub const CALLBACK_KEY_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub recipients: Vec<String>,
    pub sender: Option<String>,
    pub reply_to: Option<String>,
    pub org: Option<String>,
    pub content: NotificationContent,
}

/// Something able to actually send a mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Mailer that only records outgoing mails in the log.
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send_mail(&self, mail: &OutgoingMail) -> Result<()> {
        info!(
            "Mail to {:?}: {}\n{}",
            mail.recipients, mail.content.subject, mail.content.text
        );
        Ok(())
    }
}

pub enum DeliveryMode {
    Direct(Arc<dyn Mailer>),
    /// POST `<web_url>/send-mail/<id>` with the key, the web app sends the mail.
    Callback(reqwest::Client),
}

impl DeliveryMode {
    pub fn callback() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(DeliveryMode::Callback(client))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SenderIdentity {
    pub status_sender: Option<String>,
    pub reply_to: Option<String>,
    pub org: Option<String>,
}

pub fn generate_callback_key() -> String {
    let rng = rand::rng();
    rng.sample_iter(&Alphanumeric)
        .take(CALLBACK_KEY_LENGTH)
        .map(char::from)
        .collect()
}

pub struct NotificationDispatcher {
    store: Arc<dyn JobStore>,
    data_dir: PathBuf,
    web_url: String,
    mode: DeliveryMode,
    identity: SenderIdentity,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        data_dir: impl Into<PathBuf>,
        web_url: impl Into<String>,
        mode: DeliveryMode,
        identity: SenderIdentity,
    ) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
            web_url: web_url.into().trim_end_matches('/').to_string(),
            mode,
            identity,
        }
    }

    /// Notify about the current state of `job_id`. Never fails: problems are logged.
    pub async fn notify(&self, job_id: &str) {
        if let Err(e) = self.try_notify(job_id).await {
            error!("Job {}: send mail failed: {:#}", job_id, e);
        }
    }

    async fn try_notify(&self, job_id: &str) -> Result<()> {
        let job = in_transaction(self.store.as_ref(), |tx| tx.get(job_id))?
            .with_context(|| format!("Job {} not found", job_id))?;

        match &self.mode {
            DeliveryMode::Direct(mailer) => {
                let Some(email) = job.email.clone().filter(|e| !e.is_empty()) else {
                    debug!("Job {}: no email address, skipping notification", job_id);
                    return Ok(());
                };
                let mail = OutgoingMail {
                    recipients: vec![email],
                    sender: self.identity.status_sender.clone(),
                    reply_to: self.identity.reply_to.clone(),
                    org: self.identity.org.clone(),
                    content: content::compose(&job, &self.web_url),
                };
                mailer.send_mail(&mail).await?;
                info!("Job {}: notification sent ({})", job_id, job.status);
            }
            DeliveryMode::Callback(client) => {
                let key = generate_callback_key();
                let key_path = JobPaths::new(&self.data_dir, job_id).key_file();
                tokio::fs::write(&key_path, &key)
                    .await
                    .with_context(|| format!("Failed to write {:?}", key_path))?;

                let url = format!("{}/send-mail/{}", self.web_url, job_id);
                let response = client
                    .post(&url)
                    .form(&[("key", key.as_str())])
                    .send()
                    .await
                    .with_context(|| format!("Failed to reach {}", url))?;
                if response.status() != reqwest::StatusCode::OK {
                    warn!("Job {}: send-mail callback answered {}", job_id, response.status());
                    bail!("Callback returned status {}", response.status());
                }
                info!("Job {}: send-mail callback accepted", job_id);
            }
        }
        Ok(())
    }
}
