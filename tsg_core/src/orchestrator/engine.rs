use crate::models::{AuthSession, InstanceTemplate, ServiceGroup};
use crate::orchestrator::jobspec::{JobRenderer, OrchestratorJob};
use crate::orchestrator::nomad::{JobsApi, NomadJob};
use crate::store::Store;
use crate::{Error, Result};
use std::sync::Arc;

/// Drives the external job orchestrator for service groups.
///
/// Every operation is a fixed sequence of Nomad calls with no retry and no
/// rollback: the first failing step aborts the sequence and is returned.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    jobs: Arc<dyn JobsApi>,
    renderer: JobRenderer,
    tsg_cli_version: String,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        jobs: Arc<dyn JobsApi>,
        tsg_cli_version: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            jobs,
            renderer: JobRenderer::new()?,
            tsg_cli_version: tsg_cli_version.into(),
        })
    }

    /// Register the scaling job for a new group and run it once straight away.
    #[tracing::instrument(level = "info", skip_all, fields(account_id = %session.account_id, group = %group.group_name))]
    pub async fn submit(&self, session: &AuthSession, group: &ServiceGroup) -> Result<()> {
        let template = self.find_template(session, group).await?;
        let job = self.prepare_job(session, &template, group).await?;
        self.register_job(&job).await?;
        tracing::info!(job_id = job.id(), "orchestrator: submitted job");
        Ok(())
    }

    /// Replace the group's job with one rendered from the current group state.
    #[tracing::instrument(level = "info", skip_all, fields(account_id = %session.account_id, group = %group.group_name))]
    pub async fn update(&self, session: &AuthSession, group: &ServiceGroup) -> Result<()> {
        let template = self.find_template(session, group).await?;
        let job = self.prepare_job(session, &template, group).await?;

        // The old job always goes first.
        self.deregister_job(job.id()).await?;
        self.register_job(&job).await?;
        tracing::info!(job_id = job.id(), "orchestrator: updated job");
        Ok(())
    }

    /// Scale the group to zero, let that run once, then remove the job.
    #[tracing::instrument(level = "info", skip_all, fields(account_id = %session.account_id, group = %group.group_name))]
    pub async fn delete(&self, session: &AuthSession, group: &ServiceGroup) -> Result<()> {
        let template = self.find_template(session, group).await?;

        let mut drained = group.clone();
        drained.capacity = 0;
        let job = self.prepare_job(session, &template, &drained).await?;

        self.deregister_job(job.id()).await?;
        self.register_job(&job).await?;
        self.deregister_job(job.id()).await?;
        tracing::info!(job_id = job.id(), "orchestrator: deleted job");
        Ok(())
    }

    async fn find_template(
        &self,
        session: &AuthSession,
        group: &ServiceGroup,
    ) -> Result<InstanceTemplate> {
        self.store
            .get_template(session.account_id, group.template_id)
            .await?
            .ok_or_else(|| {
                let err = Error::NotFound(format!("template {}", group.template_id));
                tracing::error!(error = %err, "orchestrator: error finding template by id");
                err
            })
    }

    /// Render the job for `group` and have Nomad parse it into its canonical form.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn prepare_job(
        &self,
        session: &AuthSession,
        template: &InstanceTemplate,
        group: &ServiceGroup,
    ) -> Result<NomadJob> {
        let details = self.job_details(session, template, group).await?;
        let hcl = self.renderer.render(&details)?;
        self.jobs.parse(&hcl).await.map_err(|e| {
            tracing::error!(error = %e, job_name = %details.job_name, "orchestrator: failed to parse job");
            Error::orchestrator("parse nomad job", e)
        })
    }

    /// Everything the template needs, including the account's Triton credentials.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn job_details(
        &self,
        session: &AuthSession,
        template: &InstanceTemplate,
        group: &ServiceGroup,
    ) -> Result<OrchestratorJob> {
        let mut details = OrchestratorJob::from_template(template, group);
        details.datacenter = session.datacenter.clone();
        details.tsg_cli_version = self.tsg_cli_version.clone();

        let account = self
            .store
            .get_account(session.account_id)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "orchestrator: account lookup failed"))?
            .ok_or_else(|| Error::NotFound(format!("account {}", session.account_id)))?;

        let credential = self
            .store
            .get_triton_credential(account.account_id)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "orchestrator: credential lookup failed"))?
            .ok_or_else(|| {
                Error::NotFound(format!("triton credential for account {}", account.account_id))
            })?;

        tracing::debug!(
            account_id = %account.account_id,
            account_name = %account.account_name,
            fingerprint = %credential.key_id,
            "orchestrator: found triton credentials for account"
        );

        details.triton_key_material = credential.key_material;
        details.triton_account = credential.account_name;
        details.triton_key_id = credential.key_id;
        details.triton_url = session.triton_url.clone();
        details.job_name = format!("{}_{}", details.service_group_name, account.triton_uuid);

        Ok(details)
    }

    async fn register_job(&self, job: &NomadJob) -> Result<()> {
        self.jobs.validate(job).await.map_err(|e| {
            tracing::error!(error = %e, job_id = job.id(), "orchestrator: job validation failed");
            Error::orchestrator("validate nomad job", e)
        })?;

        self.jobs.register(job).await.map_err(|e| {
            tracing::error!(error = %e, job_id = job.id(), "orchestrator: job register failed");
            Error::orchestrator("register job with nomad", e)
        })?;

        self.jobs.periodic_force(job.id()).await.map_err(|e| {
            tracing::error!(error = %e, job_id = job.id(), "orchestrator: periodic force failed");
            Error::orchestrator("trigger a periodic instance of job", e)
        })?;

        Ok(())
    }

    async fn deregister_job(&self, job_id: &str) -> Result<()> {
        self.jobs.deregister(job_id, true).await.map_err(|e| {
            tracing::error!(error = %e, job_id, "orchestrator: job deregister failed");
            Error::orchestrator("deregister job with nomad", e)
        })?;
        Ok(())
    }
}
