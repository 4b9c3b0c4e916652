//! Structured logging integration for events
//!
//! Converts domain events received from the library crates into tracing
//! records with structured fields. Levels follow [`AppEvent::log_level`].

use kiln_events::{AppEvent, BuildEvent, EventMessage, FetchEvent, GeneralEvent, OutputStream};
use tracing::{debug, error, info, warn};

/// Log an event using the tracing infrastructure with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    let meta = &message.meta;
    let correlation = meta.correlation_id.as_deref().unwrap_or("");

    match &message.event {
        AppEvent::General(event) => match event {
            GeneralEvent::Warning { message, context } => {
                warn!(
                    source = meta.source.as_str(),
                    correlation,
                    context = ?context,
                    "{message}"
                );
            }
            GeneralEvent::DebugLog { message } => {
                debug!(source = meta.source.as_str(), correlation, "{message}");
            }
        },

        AppEvent::Build(event) => log_build_event(event, correlation),

        AppEvent::Fetch(event) => match event {
            FetchEvent::Started { url, total_bytes } => {
                info!(url = %url, total_bytes = ?total_bytes, "Download started");
            }
            FetchEvent::Progress {
                url,
                bytes,
                total_bytes,
            } => {
                debug!(url = %url, bytes, total_bytes = ?total_bytes, "Download progress");
            }
            FetchEvent::Verified {
                url,
                bytes,
                checksum,
            } => {
                info!(url = %url, bytes, checksum = %checksum, "Download verified");
            }
            FetchEvent::CacheHit { url, checksum } => {
                info!(url = %url, checksum = %checksum, "Source cached");
            }
            FetchEvent::Extracted { url, artifact } => {
                info!(url = %url, artifact = %artifact, "Source extracted");
            }
            FetchEvent::Failed { url, failure } => {
                error!(
                    url = %url,
                    code = ?failure.code,
                    retryable = failure.retryable,
                    "Fetch failed: {}",
                    failure.message
                );
            }
        },
    }
}

fn log_build_event(event: &BuildEvent, correlation: &str) {
    match event {
        BuildEvent::Started {
            recipe,
            version,
            key,
            build,
            host,
            target,
        } => {
            info!(
                recipe = %recipe,
                version = %version,
                key = %key,
                build = %build,
                host = %host,
                target = %target,
                "Build started"
            );
        }
        BuildEvent::LockWaiting { recipe, key } => {
            debug!(recipe = %recipe, key = %key, "Waiting for concurrent build");
        }
        BuildEvent::CacheHit {
            recipe,
            key,
            artifact,
        } => {
            info!(recipe = %recipe, key = %key, artifact = %artifact, "Build cached");
        }
        BuildEvent::DependencyReady {
            recipe,
            dependency,
            artifact,
        } => {
            info!(
                recipe = %recipe,
                dependency = %dependency,
                artifact = %artifact,
                "Dependency ready"
            );
        }
        BuildEvent::PhaseStarted {
            recipe,
            phase,
            command,
        } => {
            info!(recipe = %recipe, phase = %phase, command = %command, "Phase started");
        }
        BuildEvent::PhaseCompleted {
            recipe,
            phase,
            duration,
        } => {
            info!(
                recipe = %recipe,
                phase = %phase,
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "Phase completed"
            );
        }
        BuildEvent::PhaseSkipped {
            recipe,
            phase,
            reason,
        } => {
            debug!(recipe = %recipe, phase = %phase, reason = %reason, "Phase skipped");
        }
        BuildEvent::Output {
            recipe,
            phase,
            stream,
            line,
        } => {
            let stream = match stream {
                OutputStream::Stdout => "stdout",
                OutputStream::Stderr => "stderr",
            };
            debug!(recipe = %recipe, phase = %phase, stream, "{line}");
        }
        BuildEvent::AssertionPassed { recipe, check } => {
            info!(recipe = %recipe, check = %check, "Assertion passed");
        }
        BuildEvent::Completed {
            recipe,
            artifact,
            path,
            duration,
        } => {
            info!(
                recipe = %recipe,
                artifact = %artifact,
                path = %path.display(),
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "Build completed"
            );
        }
        BuildEvent::Failed {
            recipe,
            phase,
            failure,
        } => {
            error!(
                recipe = %recipe,
                phase = ?phase,
                correlation,
                code = ?failure.code,
                hint = ?failure.hint,
                "Build failed: {}",
                failure.message
            );
        }
    }
}
