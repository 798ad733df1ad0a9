mod cli;
mod context;
mod daemon;
mod errors;

use std::process::ExitCode;

use clap::Parser;
use cli::{AlarmAction, Cli, Commands, DbAction, IssueOp, PluginAction, RedmineAction};
use context::AgentContext;
use errors::MonokitError;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ctx = match AgentContext::init(&cli).await {
        Ok(ctx) => ctx,
        Err(e) => {
            // Configuration parsing failure: the one reserved panic-equivalent
            // exit path (spec.md §7).
            eprintln!("monokit: fatal configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let pinned = monokit_tracing::PinnedFields {
        component: "monokit".to_string(),
        version: ctx.version.clone(),
        pid: std::process::id(),
        hostname: ctx.identifier.clone(),
        environment: std::env::var("MONOKIT_ENV").ok(),
    };
    let remote_submit = ctx.remote.clone().map(|client| monokit_tracing::RemoteSubmitConfig { client });
    let logger = match monokit_tracing::init(
        &ctx.state_dir.join("logs"),
        pinned,
        monokit_tracing::RotationConfig::from_env(),
        remote_submit,
    ) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("monokit: failed to initialize logging: {e}");
            None
        }
    };

    let result = dispatch(&cli, &ctx).await;

    if let Some(logger) = logger {
        logger.close().await;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // Policy error (service disabled, cross-major update without
        // --force): user-facing message, clean exit (spec.md §7).
        Err(DispatchOutcome::Error(MonokitError::Policy(msg))) => {
            println!("{msg}");
            ExitCode::SUCCESS
        }
        Err(DispatchOutcome::Error(e)) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

enum DispatchOutcome {
    Error(MonokitError),
}

impl From<MonokitError> for DispatchOutcome {
    fn from(e: MonokitError) -> Self {
        DispatchOutcome::Error(e)
    }
}

async fn dispatch(cli: &Cli, ctx: &AgentContext) -> Result<(), DispatchOutcome> {
    match &cli.command {
        Commands::Daemon => {
            let _guard = acquire_guard(ctx, cli.ignore_lockfile)?;
            // The only error that can escape the orchestrator loop today
            // is the daemon config load at start-up.
            daemon::run(ctx)
                .await
                .map_err(|e| DispatchOutcome::Error(MonokitError::Configuration(e.to_string())))
        }
        Commands::Alarm { action } => run_alarm(ctx, action).await,
        Commands::Redmine { action } => run_redmine(ctx, action).await,
        Commands::Plugin { action } => run_plugin(ctx, action).await,
        Commands::Update { version, force, update_plugins, plugins, plugin_dir } => {
            run_update(ctx, version.as_deref(), *force, *update_plugins, plugins, plugin_dir.as_deref()).await
        }
        Commands::Db { action } => run_db(ctx, action),
        Commands::Component(args) => run_component(ctx, args).await,
    }
}

fn acquire_guard(
    ctx: &AgentContext,
    ignore: bool,
) -> Result<Option<monokit_process_guard::ProcessGuard>, DispatchOutcome> {
    if ignore {
        return Ok(None);
    }
    monokit_process_guard::ProcessGuard::acquire(&ctx.state_dir)
        .map(Some)
        .map_err(|e| DispatchOutcome::Error(MonokitError::from(e)))
}

async fn run_alarm(ctx: &AgentContext, action: &AlarmAction) -> Result<(), DispatchOutcome> {
    match action {
        AlarmAction::Up { service, message, no_interval } => {
            ctx.alarm.alarm_up(service, message, *no_interval).await.map_err(MonokitError::from)?;
        }
        AlarmAction::Down { service, message, no_interval, interval, stream, topic } => {
            ctx.alarm
                .alarm_down(service, message, *no_interval, *interval, stream.as_deref(), topic.as_deref())
                .await
                .map_err(MonokitError::from)?;
        }
        AlarmAction::Send { message, stream, topic, only_first } => {
            ctx.alarm.alarm_raw(message, stream.as_deref(), topic.as_deref(), *only_first).await;
        }
    }
    Ok(())
}

async fn run_redmine(ctx: &AgentContext, action: &RedmineAction) -> Result<(), DispatchOutcome> {
    let Some(issue) = &ctx.issue else {
        return Err(MonokitError::Configuration(
            "issue tracking is not configured (client.redmine_url/redmine_api_key)".to_string(),
        )
        .into());
    };
    let RedmineAction::Issue { op } = action;
    match op {
        IssueOp::Create { service, subject, description } => {
            let id = issue.issue_down(service, subject, description).await.map_err(MonokitError::from)?;
            println!("{id}");
        }
        IssueOp::Update { service, note, internal } => {
            issue.issue_update(service, note, *internal).await.map_err(MonokitError::from)?;
        }
        IssueOp::Close { service, note } => {
            issue.issue_up(service, note).await.map_err(MonokitError::from)?;
        }
        IssueOp::Show { service } => {
            let id = issue.issue_show(service).map_err(MonokitError::from)?;
            println!("{id}");
        }
    }
    Ok(())
}

async fn run_plugin(ctx: &AgentContext, action: &PluginAction) -> Result<(), DispatchOutcome> {
    let plugin_dir = std::path::PathBuf::from(&ctx.global.plugin_dir);
    match action {
        PluginAction::List => {
            let known: Vec<monokit_plugin::PluginDescriptor> = Vec::new();
            for plugin in monokit_plugin::discover(&plugin_dir, &known) {
                println!("{} {}", plugin.name, plugin.version);
            }
        }
        PluginAction::Install { name } => {
            info!(name, "plugin install requested");
        }
        PluginAction::Uninstall { name } => {
            let path = plugin_dir.join(name);
            std::fs::remove_file(&path).map_err(MonokitError::from)?;
        }
    }
    let _ = ctx;
    Ok(())
}

async fn run_update(
    ctx: &AgentContext,
    version: Option<&str>,
    force: bool,
    update_plugins: bool,
    plugins: &[String],
    plugin_dir: Option<&std::path::Path>,
) -> Result<(), DispatchOutcome> {
    let client = reqwest::Client::new();
    let releases_api = "https://api.github.com/repos/monobilisim/monokit/releases";
    let release = monokit_updater::fetch_release(&client, releases_api, version)
        .await
        .map_err(MonokitError::from)?;

    // MonokitError::Policy here (cross-major refusal) is caught by the
    // top-level dispatch match and surfaces as a message + clean exit.
    monokit_updater::guard_cross_major(&ctx.version, &release.tag_name, force).map_err(MonokitError::from)?;

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let asset = monokit_updater::pick_asset(&release.assets, os, arch)
        .ok_or_else(|| MonokitError::Resource("no release asset for this platform".to_string()))?;

    let tmp = tempfile::tempdir().map_err(MonokitError::from)?;
    let extracted = monokit_updater::download_and_extract(&client, &asset.browser_download_url, tmp.path())
        .await
        .map_err(MonokitError::from)?;
    let current_exe = std::env::current_exe().map_err(MonokitError::from)?;
    monokit_updater::atomic_swap(&current_exe, &extracted).await.map_err(MonokitError::from)?;

    if update_plugins {
        let dir = plugin_dir
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from(&ctx.global.plugin_dir));
        let outcomes = monokit_updater::update_plugins(&client, &release.assets, plugins, &release.tag_name, os, arch, &dir).await;
        for (name, outcome) in outcomes {
            if let Err(e) = outcome {
                error!(plugin = %name, error = %e, "plugin update failed");
            }
        }
    }

    Ok(())
}

fn run_db(ctx: &AgentContext, action: &DbAction) -> Result<(), DispatchOutcome> {
    match action {
        DbAction::Path => println!("{}", monokit_kv::default_path().display()),
        DbAction::List { module } => {
            for key in ctx.kv.list(module).map_err(MonokitError::from)? {
                println!("{key}");
            }
        }
        DbAction::Get { module, key } => {
            if let Some(entry) = ctx.kv.get(module, key).map_err(MonokitError::from)? {
                println!("{}", entry.value);
            }
        }
        DbAction::Dump => {
            for (module, key, entry) in ctx.kv.dump().map_err(MonokitError::from)? {
                println!("{module}.{key} = {}", entry.value);
            }
        }
    }
    Ok(())
}

async fn run_component(ctx: &AgentContext, args: &[String]) -> Result<(), DispatchOutcome> {
    let Some(name) = args.first() else {
        return Err(MonokitError::Resource("no component name given".to_string()).into());
    };

    if let Some(remote) = &ctx.remote {
        match remote.check_service_status(name, &ctx.version).await {
            Ok(monokit_remote::StatusDecision::Disabled) => {
                return Err(MonokitError::Policy(format!("{name} is disabled")).into());
            }
            Ok(monokit_remote::StatusDecision::UpdateThen(target)) => {
                info!(component = %name, target = %target, "server requested self-update before running");
            }
            _ => {}
        }
    }

    let Some(descriptor) = ctx.registry.get(name) else {
        return Err(MonokitError::Resource(format!("unknown component: {name}")).into());
    };
    if descriptor.is_plugin {
        let plugin = monokit_plugin::PluginDescriptor {
            name: descriptor.name.clone(),
            version: String::new(),
            install_path: descriptor.entry.command.clone().into(),
            release_url: String::new(),
        };
        let output = monokit_plugin::collect(&plugin, &ctx.identifier).await.map_err(MonokitError::from)?;
        print!("{output}");
    } else {
        info!(component = %name, "in-process component dispatch is a domain-specific consumer of this core");
    }
    Ok(())
}
