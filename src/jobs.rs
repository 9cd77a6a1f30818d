// Background jobs
//
// Two periodic jobs: checking a release endpoint for a newer version and
// removing expired cashbacks. `JobScheduler` decides which ones are due from
// the `job_runs` table so intervals survive restarts.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CashbackError, Result};
use crate::service::CashbackService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Job {
    UpdateCheck,
    DeleteExpiredCashbacks,
}

impl Job {
    pub const ALL: [Job; 2] = [Job::UpdateCheck, Job::DeleteExpiredCashbacks];

    /// Key used in the `job_runs` table.
    pub fn name(&self) -> &'static str {
        match self {
            Job::UpdateCheck => "update_check",
            Job::DeleteExpiredCashbacks => "delete_expired_cashbacks",
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Job::UpdateCheck => Duration::hours(24),
            Job::DeleteExpiredCashbacks => Duration::hours(12),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase().replace('-', "_");
        Job::ALL.into_iter().find(|job| job.name() == key)
    }

    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            Some(last) => now - last >= self.interval(),
            None => true,
        }
    }
}

// ============================================================================
// UPDATE CHECK
// ============================================================================

/// Body served by the update endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    UpToDate,
    Available { version: String, link: String },
}

/// True if `remote` is a newer semantic version than `current`.
/// Unparseable versions never count as newer.
pub fn is_newer_version(current: &str, remote: &str) -> bool {
    let clean = |v: &str| v.trim().trim_start_matches('v').to_string();
    match (
        semver::Version::parse(&clean(current)),
        semver::Version::parse(&clean(remote)),
    ) {
        (Ok(curr), Ok(rem)) => rem > curr,
        _ => false,
    }
}

pub fn evaluate_release(current_version: &str, release: ReleaseInfo) -> UpdateStatus {
    if is_newer_version(current_version, &release.version) {
        UpdateStatus::Available {
            version: release.version.trim_start_matches('v').to_string(),
            link: release.link,
        }
    } else {
        UpdateStatus::UpToDate
    }
}

/// Ask `endpoint` for the latest release and compare it to `current_version`.
pub fn check_for_update(endpoint: &str, current_version: &str) -> Result<UpdateStatus> {
    let response = minreq::get(endpoint)
        .with_header("User-Agent", concat!("cashbacks/", env!("CARGO_PKG_VERSION")))
        .with_timeout(10)
        .send()
        .map_err(|e| CashbackError::Update(format!("Failed to reach update server: {}", e)))?;

    if !(200..300).contains(&response.status_code) {
        return Err(CashbackError::Update(format!(
            "Update server returned status {}",
            response.status_code
        )));
    }

    let release: ReleaseInfo = response
        .json()
        .map_err(|e| CashbackError::Update(format!("Failed to parse update information: {}", e)))?;

    Ok(evaluate_release(current_version, release))
}

// ============================================================================
// EXPIRED CASHBACKS
// ============================================================================

/// Delete expired cashbacks if the user enabled it. `None` means the
/// setting is off and nothing was touched.
pub fn delete_expired(service: &CashbackService, today: NaiveDate) -> Result<Option<usize>> {
    let settings = service.get_settings()?;
    if !settings.auto_delete_expired_cashbacks {
        debug!("auto-delete of expired cashbacks is disabled");
        return Ok(None);
    }
    service.delete_expired_cashbacks(today).map(Some)
}

// ============================================================================
// SCHEDULER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Ran too recently.
    NotDue,
    /// Turned off by settings or configuration.
    Disabled(String),
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobReport {
    pub entries: Vec<(Job, JobOutcome)>,
}

impl JobReport {
    pub fn outcome(&self, job: Job) -> Option<&JobOutcome> {
        self.entries
            .iter()
            .find(|(j, _)| *j == job)
            .map(|(_, outcome)| outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, outcome)| matches!(outcome, JobOutcome::Failed(_)))
    }
}

#[derive(Clone)]
pub struct JobScheduler {
    service: CashbackService,
    update_endpoint: Option<String>,
    current_version: String,
}

impl JobScheduler {
    pub fn new(service: CashbackService, update_endpoint: Option<String>) -> Self {
        JobScheduler {
            service,
            update_endpoint,
            current_version: crate::VERSION.to_string(),
        }
    }

    /// Run every job whose interval has elapsed.
    pub fn run_due(&self, now: DateTime<Utc>) -> JobReport {
        self.run(now, false)
    }

    /// Run every job regardless of when it last ran.
    pub fn run_all(&self, now: DateTime<Utc>) -> JobReport {
        self.run(now, true)
    }

    fn run(&self, now: DateTime<Utc>, force: bool) -> JobReport {
        let mut report = JobReport::default();

        for job in Job::ALL {
            let outcome = if force {
                self.execute(job, now)
            } else {
                match self.service.last_job_run(job.name()) {
                    Ok(last) if !job.is_due(last, now) => JobOutcome::NotDue,
                    Ok(_) => self.execute(job, now),
                    Err(err) => JobOutcome::Failed(err.to_string()),
                }
            };
            report.entries.push((job, outcome));
        }

        report
    }

    fn execute(&self, job: Job, now: DateTime<Utc>) -> JobOutcome {
        let result = match job {
            Job::UpdateCheck => self.update_check(),
            Job::DeleteExpiredCashbacks => self.cleanup(),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job = job.name(), error = %err, "job failed");
                return JobOutcome::Failed(err.to_string());
            }
        };

        // Failed runs are not recorded so the next tick retries them
        if let Err(err) = self.service.record_job_run(job.name(), now) {
            warn!(job = job.name(), error = %err, "could not record job run");
        }
        outcome
    }

    fn update_check(&self) -> Result<JobOutcome> {
        let Some(endpoint) = self.update_endpoint.as_deref() else {
            return Ok(JobOutcome::Disabled("no update endpoint configured".to_string()));
        };

        match check_for_update(endpoint, &self.current_version)? {
            UpdateStatus::UpToDate => Ok(JobOutcome::Completed(format!(
                "version {} is up to date",
                self.current_version
            ))),
            UpdateStatus::Available { version, link } => {
                info!(%version, %link, "new version available");
                Ok(JobOutcome::Completed(format!("version {} is available: {}", version, link)))
            }
        }
    }

    // `now` is UTC and only drives the interval bookkeeping; expiry is judged
    // against the user's calendar day
    fn cleanup(&self) -> Result<JobOutcome> {
        match delete_expired(&self.service, self.service.today())? {
            Some(deleted) => Ok(JobOutcome::Completed(format!(
                "deleted {} expired cashback(s)",
                deleted
            ))),
            None => Ok(JobOutcome::Disabled(
                "auto-delete of expired cashbacks is off".to_string(),
            )),
        }
    }
}
