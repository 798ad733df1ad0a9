use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::context::AgentContext;

/// Orchestrator loop: select the enabled component set, dispatch each on
/// the configured frequency, aggregate results, and report health.
///
/// Running a component's own check logic is out of scope for this core
/// (spec.md §1 non-goals); this loop only owns selection, scheduling,
/// dispatch and aggregation.
pub async fn run(ctx: &AgentContext) -> Result<()> {
    let daemon_config: Option<monokit_config::DaemonConfig> = if monokit_config::exists("daemon") {
        Some(monokit_config::load_or_default("daemon").context("loading daemon config")?)
    } else {
        None
    };

    let frequency = daemon_config
        .as_ref()
        .map(|c| c.frequency_seconds)
        .unwrap_or(60);

    loop {
        let disabled: Option<Vec<String>> = daemon_config.as_ref().map(|c| {
            c.components
                .iter()
                .filter(|(_, v)| v.enabled == Some(false))
                .map(|(k, _)| k.clone())
                .collect()
        });

        let enabled = ctx.registry.select_enabled(disabled.as_deref());
        info!(count = enabled.len(), "dispatching enabled components");

        let mut results = Vec::with_capacity(enabled.len());
        for name in &enabled {
            if let Some(remote) = &ctx.remote {
                match remote.check_service_status(name, &ctx.version).await {
                    Ok(monokit_remote::StatusDecision::Disabled) => {
                        info!(component = %name, "server marked service disabled, skipping");
                        continue;
                    }
                    Ok(monokit_remote::StatusDecision::UpdateThen(target)) => {
                        warn!(component = %name, target = %target, "server requested self-update");
                    }
                    Ok(monokit_remote::StatusDecision::Continue) => {}
                    Err(e) => warn!(component = %name, error = %e, "status check failed, proceeding"),
                }
            }

            let outcome = dispatch_one(ctx, name).await;
            if let Err(e) = &outcome {
                error!(component = %name, error = %e, "component dispatch failed");
            }
            results.push((name.clone(), outcome));
        }

        if let Some(remote) = &ctx.remote {
            for (name, outcome) in &results {
                let payload = serde_json::json!({
                    "ok": outcome.is_ok(),
                    "error": outcome.as_ref().err().map(|e| e.to_string()),
                });
                let snapshot = monokit_remote::HealthSnapshot { tool: name.clone(), payload };
                if let Err(e) = remote.submit_health(&snapshot).await {
                    warn!(component = %name, error = %e, "failed to submit health snapshot");
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(frequency)).await;
    }
}

async fn dispatch_one(ctx: &AgentContext, name: &str) -> Result<()> {
    let Some(descriptor) = ctx.registry.get(name) else {
        anyhow::bail!("component {name} vanished from the registry between selection and dispatch");
    };
    if descriptor.is_plugin {
        let plugin = monokit_plugin::PluginDescriptor {
            name: descriptor.name.clone(),
            version: String::new(),
            install_path: descriptor.entry.command.clone().into(),
            release_url: String::new(),
        };
        let output = monokit_plugin::collect(&plugin, &ctx.identifier).await?;
        info!(component = %name, bytes = output.len(), "plugin collected");
    } else {
        info!(component = %name, "in-process component dispatch is a domain-specific consumer of this core");
    }
    Ok(())
}
