//! Test job harness
//!
//! Each test gets an isolated data directory, database and fake wrapper.
//! Phases are recorded instead of being scheduled, and [`TestJobs::drive`]
//! runs them in submission order, so tests observe every intermediate state.

use super::constants::{OWNER_EMAIL, WEB_URL};
use super::fixtures::{create_fake_wrapper, stage_sequence, WrapperMode};
use anyhow::Result;
use async_trait::async_trait;
use genome_map_jobs::app::build_orchestrator;
use genome_map_jobs::config::{AppConfig, CliConfig, FileConfig, MailConfig};
use genome_map_jobs::job_store::{in_transaction, Job, JobStore, SequenceReference, SqliteJobStore};
use genome_map_jobs::notifications::{Mailer, OutgoingMail};
use genome_map_jobs::orchestrator::{JobOrchestrator, LaunchRequest, RecordingSubmitter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Mailer keeping every mail it is asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(&self, mail: &OutgoingMail) -> Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub struct TestJobs {
    pub data_dir: TempDir,
    pub uploads: TempDir,
    _tools: TempDir,
    pub config: AppConfig,
    pub store: Arc<SqliteJobStore>,
    pub submitter: Arc<RecordingSubmitter>,
    pub mailer: Arc<RecordingMailer>,
    pub orchestrator: JobOrchestrator,
}

impl TestJobs {
    pub fn spawn(mode: WrapperMode) -> Self {
        Self::spawn_with(mode, |_| {})
    }

    /// Like [`TestJobs::spawn`], with a chance to adjust the file config first.
    pub fn spawn_with(mode: WrapperMode, tweak: impl FnOnce(&mut FileConfig)) -> Self {
        let data_dir = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        let wrapper = create_fake_wrapper(tools.path());

        let mut file_config = FileConfig {
            data_dir: Some(data_dir.path().to_string_lossy().to_string()),
            aligner_path: Some(mode.as_arg().to_string()),
            wrapper_path: Some(wrapper.to_string_lossy().to_string()),
            threads: Some(2),
            web_url: Some(format!("{}/", WEB_URL)),
            start_delay_ms: Some(0),
            download_timeout_secs: Some(10),
            aligner_timeout_secs: Some(10),
            mail: Some(MailConfig {
                enabled: Some(true),
                mode: Some("direct".to_string()),
                status_sender: Some("status@dgenies.test".to_string()),
                reply_to: Some("support@dgenies.test".to_string()),
                org: Some("Test Lab".to_string()),
            }),
            ..Default::default()
        };
        tweak(&mut file_config);
        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();

        let store = Arc::new(SqliteJobStore::new(&config.db_path).unwrap());
        let submitter = Arc::new(RecordingSubmitter::new());
        let mailer = Arc::new(RecordingMailer::default());
        let orchestrator =
            build_orchestrator(&config, store.clone(), submitter.clone(), mailer.clone()).unwrap();

        Self {
            data_dir,
            uploads,
            _tools: tools,
            config,
            store,
            submitter,
            mailer,
            orchestrator,
        }
    }

    /// Simulate a process restart: reopen the database and rebuild the
    /// orchestrator. Pending recorded phases are lost.
    pub fn restart(self) -> Self {
        let TestJobs {
            data_dir,
            uploads,
            _tools,
            config,
            store,
            orchestrator,
            ..
        } = self;
        drop(orchestrator);
        drop(store);

        let store = Arc::new(SqliteJobStore::new(&config.db_path).unwrap());
        let submitter = Arc::new(RecordingSubmitter::new());
        let mailer = Arc::new(RecordingMailer::default());
        let orchestrator =
            build_orchestrator(&config, store.clone(), submitter.clone(), mailer.clone()).unwrap();

        Self {
            data_dir,
            uploads,
            _tools,
            config,
            store,
            submitter,
            mailer,
            orchestrator,
        }
    }

    /// Stage an uploaded sequence and return its path.
    pub fn upload(&self, name: &str, contents: &str) -> String {
        stage_sequence(self.uploads.path(), name, contents)
            .to_string_lossy()
            .to_string()
    }

    /// Launch `job_id` with the owner's address. Inputs are paths or URLs.
    pub fn launch(&self, job_id: &str, target: Option<&str>, query: Option<&str>) {
        self.orchestrator
            .launch(LaunchRequest {
                job_id: job_id.to_string(),
                email: Some(OWNER_EMAIL.to_string()),
                target: target.map(SequenceReference::from_input),
                query: query.map(SequenceReference::from_input),
            })
            .unwrap();
    }

    /// Run recorded phases, including the ones they submit, until none is left.
    pub async fn drive(&self) {
        loop {
            let tasks = self.submitter.take();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                self.orchestrator.execute(task).await;
            }
        }
    }

    pub fn job(&self, job_id: &str) -> Job {
        in_transaction(self.store.as_ref() as &dyn JobStore, |tx| tx.get(job_id))
            .unwrap()
            .unwrap_or_else(|| panic!("job {} not found", job_id))
    }

    pub fn job_file(&self, job_id: &str, name: &str) -> PathBuf {
        self.orchestrator.result_dir(job_id).join(name)
    }

    pub fn read_job_file(&self, job_id: &str, name: &str) -> String {
        std::fs::read_to_string(self.job_file(job_id, name)).unwrap()
    }
}
