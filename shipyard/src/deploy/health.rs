//! Health verification after a rebuild

use std::time::Duration;

use tokio::time::Instant;

use crate::errors::ShipyardError;
use crate::models::project::{HealthCheck, Project};
use crate::remote::{commands, RemoteError, RemoteSession};
use crate::storage::settings::EngineSettings;
use crate::utils::calc_exp_backoff;

/// Extra time a probe gets on top of its own timeout before it is abandoned
const PROBE_GRACE: Duration = Duration::from_secs(5);

/// Run one probe from the host
pub async fn probe(
    session: &dyn RemoteSession,
    project: &Project,
    check: &HealthCheck,
    timeout: Duration,
) -> Result<String, String> {
    let run = async {
        match check {
            HealthCheck::Url(url) => {
                let output = session
                    .run(&commands::http_probe(url.as_str(), timeout.as_secs()))
                    .await
                    .map_err(|e| e.to_string())?;
                match commands::parse_http_code(&output.stdout) {
                    Some(code) if commands::is_healthy_http_code(code) => {
                        Ok(format!("{} answered {}", url, code))
                    }
                    Some(code) => Err(format!("{} answered {}", url, code)),
                    None => Err(format!("{} is unreachable", url)),
                }
            }
            HealthCheck::Command(command) => {
                match session
                    .run(&commands::health_command(&project.path, command))
                    .await
                {
                    Ok(_) => Ok(format!("`{}` succeeded", command)),
                    Err(RemoteError::Command { exit_code, output, .. }) => Err(format!(
                        "`{}` exited with {}: {}",
                        command,
                        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                        output
                    )),
                    Err(e) => Err(e.to_string()),
                }
            }
        }
    };

    match tokio::time::timeout(timeout + PROBE_GRACE, run).await {
        Ok(result) => result,
        Err(_) => Err(format!("probe timed out after {:?}", timeout)),
    }
}

/// Poll until healthy or the budget runs out.
///
/// At least one probe always runs. Retries back off exponentially and never
/// start after the deadline. `on_retry` sees each failed probe.
pub async fn wait_healthy<F>(
    session: &dyn RemoteSession,
    project: &Project,
    check: &HealthCheck,
    settings: &EngineSettings,
    on_retry: F,
) -> Result<String, ShipyardError>
where
    F: Fn(u32, &str),
{
    let budget = settings.health_timeout();
    let deadline = Instant::now() + budget;
    let backoff = settings.health_backoff();

    tokio::time::sleep(settings.health_initial_delay().min(budget)).await;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let reason = match probe(session, project, check, settings.health_probe_timeout()).await {
            Ok(message) => {
                return Ok(format!("Healthy after {} probe(s): {}", attempt, message));
            }
            Err(reason) => reason,
        };
        on_retry(attempt, &reason);

        let delay = calc_exp_backoff(&backoff, attempt - 1);
        if Instant::now() + delay >= deadline {
            return Err(ShipyardError::HealthCheckError(format!(
                "not healthy after {} probe(s) within {:?}: {}",
                attempt, budget, reason
            )));
        }
        tokio::time::sleep(delay).await;
    }
}
