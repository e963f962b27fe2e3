//! Wiring of the orchestrator from a resolved configuration.

use crate::acquisition::{FileAcquirer, HttpFetcher};
use crate::config::{AppConfig, MailMode};
use crate::execution::{ExecutionRunner, RunnerSettings};
use crate::job_store::JobStore;
use crate::notifications::{DeliveryMode, Mailer, NotificationDispatcher, SenderIdentity};
use crate::orchestrator::{JobOrchestrator, OrchestratorSettings, TaskSubmitter};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Build an orchestrator for `config`. `mailer` is only used in direct mail mode.
pub fn build_orchestrator(
    config: &AppConfig,
    store: Arc<dyn JobStore>,
    submitter: Arc<dyn TaskSubmitter>,
    mailer: Arc<dyn Mailer>,
) -> Result<JobOrchestrator> {
    let fetcher = HttpFetcher::new(config.download_timeout)
        .context("Failed to set up remote file fetcher")?;
    let acquirer = FileAcquirer::new(Arc::new(fetcher));

    let runner = ExecutionRunner::new(
        store.clone(),
        RunnerSettings {
            wrapper_path: config.wrapper_path.clone(),
            aligner_path: config.aligner_path.clone(),
            threads: config.threads,
            timeout: config.aligner_timeout,
        },
    );

    let dispatcher = if config.mail.enabled {
        let mode = match config.mail.mode {
            MailMode::Direct => DeliveryMode::Direct(mailer),
            MailMode::Callback => DeliveryMode::callback()?,
        };
        info!("Notifications enabled ({:?} mode)", config.mail.mode);
        Some(NotificationDispatcher::new(
            store.clone(),
            &config.data_dir,
            &config.web_url,
            mode,
            SenderIdentity {
                status_sender: config.mail.status_sender.clone(),
                reply_to: config.mail.reply_to.clone(),
                org: config.mail.org.clone(),
            },
        ))
    } else {
        None
    };

    Ok(JobOrchestrator::new(
        store,
        acquirer,
        runner,
        dispatcher,
        submitter,
        OrchestratorSettings {
            data_dir: config.data_dir.clone(),
            batch_system: config.batch_system,
            start_delay: config.start_delay,
        },
    ))
}
