use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::Cli;

/// Dependency-injection container threaded through the orchestrator and
/// CLI, replacing the teacher's global mutable state (spec.md §9).
pub struct AgentContext {
    pub identifier: String,
    pub version: String,
    pub global: monokit_config::GlobalConfig,
    pub client: Option<monokit_config::ClientConfig>,
    pub registry: Arc<monokit_registry::Registry>,
    pub kv: Arc<monokit_kv::KvStore>,
    pub alarm: monokit_alarm::AlarmEngine,
    pub issue: Option<monokit_issue::IssueEngine>,
    pub remote: Option<Arc<monokit_remote::RemoteClient>>,
    pub state_dir: PathBuf,
}

impl AgentContext {
    /// Builds the context from the fixed config search path. Fatal
    /// configuration failures are the caller's responsibility to turn
    /// into the single `Init`-time exit path (spec.md §7).
    pub async fn init(cli: &Cli) -> Result<Self> {
        if let Some(dir) = &cli.config {
            std::env::set_var("MONOKIT_CONFIG_DIR", dir);
        }

        let global: monokit_config::GlobalConfig =
            monokit_config::load_or_default("global").context("loading global config")?;

        // `client.yml` is optional (remote reporting is off without it),
        // but if present it must parse: a malformed required config is
        // fatal at Init, not a silent fallback to "remote disabled".
        let client: Option<monokit_config::ClientConfig> = if monokit_config::exists("client") {
            Some(monokit_config::load_required("client").context("loading client config")?)
        } else {
            None
        };

        let identifier = client
            .as_ref()
            .and_then(|c| c.identifier.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_default());

        let version = env!("CARGO_PKG_VERSION").to_string();

        let state_dir = monokit_process_guard::default_tmp_dir("monokit");
        let kv = Arc::new(
            monokit_kv::KvStore::open(&monokit_kv::default_path()).context("opening kv store")?,
        );

        let registry = monokit_registry::Registry::new();
        registry.register(monokit_registry::ComponentDescriptor {
            name: monokit_registry::OS_HEALTH.to_string(),
            entry: monokit_registry::EntryPoint {
                command: "monokit".to_string(),
                args: vec!["component".to_string(), monokit_registry::OS_HEALTH.to_string()],
            },
            platform: monokit_registry::Platform::Any,
            auto_detect: None,
            run_as_user: None,
            is_plugin: false,
        });
        let plugin_dir = PathBuf::from(&global.plugin_dir);
        let plugins = monokit_plugin::discover(&plugin_dir, &[]);
        monokit_plugin::bridge_into_registry(&registry, &plugins);
        let registry = Arc::new(registry);

        let alarm_store = monokit_alarm::FileAlarmStore::new(state_dir.clone());
        let webhooks = global.alarm_webhooks.clone();
        let alarm = monokit_alarm::AlarmEngine::new(
            Box::new(alarm_store),
            webhooks,
            "monokit",
            identifier.clone(),
        );

        let issue = client.as_ref().and_then(|c| {
            let base_url = c.redmine_url.clone()?;
            let api_key = c.redmine_api_key.clone()?;
            let store = monokit_issue::FileIssueStore::new(state_dir.clone());
            Some(monokit_issue::IssueEngine::new(Box::new(store), base_url, api_key, &version))
        });

        let remote = match (&client, read_host_key(&state_dir, &identifier)) {
            (Some(c), Some(host_key)) if c.is_configured() => Some(Arc::new(monokit_remote::RemoteClient::new(
                c.url.clone().unwrap_or_default(),
                identifier.clone(),
                host_key,
                &version,
            ))),
            _ => None,
        };

        Ok(Self {
            identifier,
            version,
            global,
            client,
            registry,
            kv,
            alarm,
            issue,
            remote,
            state_dir,
        })
    }
}

fn read_host_key(state_dir: &std::path::Path, identifier: &str) -> Option<String> {
    let path = PathBuf::from("/var/lib/mono/api/hostkey").join(identifier);
    std::fs::read_to_string(&path)
        .ok()
        .or_else(|| std::fs::read_to_string(state_dir.join("api/hostkey").join(identifier)).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
