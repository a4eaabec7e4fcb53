// =============================================================================
// runner.rs - ONE DRIVER FOR EVERY COLLECTION MODULE
// =============================================================================
//
// A run walks four phases, strictly in order:
//
//   Loading   -> module.load(); nothing to work with means we are done, badly
//   Fetching  -> module.seed() then module.fetch() until the pending queue
//                drains (bounded by max_fetch_passes)
//   Reporting -> one registry bump and one syslog datagram per finding, in
//                the order the module produced them
//   Finished  -> "finished successfully" or "finished with errors"
//
// The registry message is updated when a phase is entered, before any of the
// phase's work, so a status query always shows what the run is doing now.
// Collaborator errors never escape a run: they are logged and turned into a
// PartialFailure record. The shutdown watch is checked between phases,
// between fetch passes and between reported findings.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ReactorError, Result};
use crate::models::{Outcome, Phase};
use crate::modules::CollectionModule;
use crate::registry::JobRegistry;
use crate::syslog::SyslogEmitter;

#[derive(Debug, Clone)]
pub struct RunLimits {
    pub max_fetch_passes: u32,
    pub pass_delay: Duration,
    /// 0 means unlimited.
    pub max_events: u64,
}

impl RunLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_fetch_passes: config.max_fetch_passes,
            pass_delay: config.pass_delay,
            max_events: config.siem_max,
        }
    }
}

/// Everything a run needs besides the module itself.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub registry: Arc<JobRegistry>,
    pub emitter: Arc<SyslogEmitter>,
    pub limits: RunLimits,
}

fn check_cancelled(shutdown: &watch::Receiver<bool>) -> Result<()> {
    if *shutdown.borrow() {
        Err(ReactorError::Cancelled)
    } else {
        Ok(())
    }
}

fn enter(ctx: &RunContext, module: &dyn CollectionModule, phase: Phase) -> Result<()> {
    let message = module.describe(phase);
    debug!(module = module.name(), phase = ?phase, "{}", message);
    ctx.registry.set_message(module.name(), message)
}

/// Execute one run of `module`.
///
/// Returns `Err` only when the run could not start because the module is
/// already running; every other failure ends in a finished record with
/// `Outcome::PartialFailure`.
pub async fn run(
    module: &dyn CollectionModule,
    ctx: &RunContext,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Outcome> {
    let name = module.name().to_string();
    let record = ctx.registry.begin(&name)?;
    info!(module = %name, run_id = ?record.run_id, "launching {} module", name);

    let outcome = match drive(module, ctx, shutdown).await {
        Ok(true) => Outcome::Success,
        Ok(false) => Outcome::PartialFailure,
        Err(ReactorError::Cancelled) => {
            warn!(module = %name, "run cancelled by shutdown");
            Outcome::PartialFailure
        }
        Err(e @ (ReactorError::ConfigMissing { .. } | ReactorError::EmptyInput { .. })) => {
            error!(module = %name, error = %e, "load phase failed");
            Outcome::PartialFailure
        }
        Err(e) => {
            warn!(module = %name, error = %e, "run aborted");
            Outcome::PartialFailure
        }
    };

    match ctx.registry.finish(&name, outcome) {
        Ok(record) => info!(
            module = %name,
            events = record.events,
            "{} - {}",
            name,
            outcome.message()
        ),
        Err(e) => error!(module = %name, error = %e, "could not record finished run"),
    }
    Ok(outcome)
}

/// Phases 1-3. `Ok(false)` means the run got to the end but something
/// along the way failed softly.
async fn drive(
    module: &dyn CollectionModule,
    ctx: &RunContext,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let name = module.name();
    let mut clean = true;

    // Loading
    check_cancelled(shutdown)?;
    enter(ctx, module, Phase::Loading)?;
    let inputs = module.load().await?;
    if inputs.is_empty() {
        return Err(ReactorError::EmptyInput {
            module: name.to_string(),
        });
    }
    debug!(module = name, inputs = inputs.len(), "inputs loaded");

    // Fetching
    check_cancelled(shutdown)?;
    enter(ctx, module, Phase::Fetching)?;
    let mut work = module.seed(&inputs).await?;
    let mut findings = Vec::new();
    let mut passes: u32 = 0;

    loop {
        check_cancelled(shutdown)?;
        passes += 1;
        let pass = module.fetch(&inputs, work).await?;
        debug!(
            module = name,
            pass = passes,
            findings = pass.findings.len(),
            pending = pass.pending.len(),
            failures = pass.failures,
            "fetch pass complete"
        );

        findings.extend(pass.findings);
        if pass.failures > 0 {
            warn!(module = name, failures = pass.failures, "items failed during fetch");
            clean = false;
        }
        if pass.pending.is_empty() {
            break;
        }
        if passes >= ctx.limits.max_fetch_passes {
            warn!(
                module = name,
                passes = passes,
                pending = pass.pending.len(),
                "pending queue did not drain, giving up on the rest"
            );
            clean = false;
            break;
        }

        ctx.registry.set_message(
            name,
            format!(
                "{} ({} pending, pass {})",
                module.describe(Phase::Fetching),
                pass.pending.len(),
                passes + 1
            ),
        )?;
        if !ctx.limits.pass_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(ctx.limits.pass_delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        work = pass.pending;
    }

    // Reporting
    check_cancelled(shutdown)?;
    enter(ctx, module, Phase::Reporting)?;
    for (reported, finding) in findings.iter().enumerate() {
        check_cancelled(shutdown)?;
        if ctx.limits.max_events > 0 && reported as u64 >= ctx.limits.max_events {
            warn!(
                module = name,
                max = ctx.limits.max_events,
                dropped = findings.len() - reported,
                "event limit reached, dropping remaining findings"
            );
            break;
        }

        ctx.registry.increment_events(name)?;
        let event = module.to_event(finding).to_string();
        if let Err(e) = ctx.emitter.send(&event).await {
            warn!(module = name, src = %finding.source, error = %e, "syslog event not delivered");
        }
    }

    Ok(clean)
}
