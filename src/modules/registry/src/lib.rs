//! Component registration and the ordered-enabled-set selection algorithm.
//!
//! Registering and dispatching a component's own check logic is out of
//! scope here (spec.md §1 non-goals); this crate only owns descriptors
//! and the algorithm that turns a registry + config into an enabled set.

use std::collections::HashMap;
use std::sync::RwLock;

use indexmap::IndexMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Any,
    Linux,
    Darwin,
    Windows,
}

impl Platform {
    fn matches_current(self) -> bool {
        match self {
            Platform::Any => true,
            Platform::Linux => std::env::consts::OS == "linux",
            Platform::Darwin => std::env::consts::OS == "macos",
            Platform::Windows => std::env::consts::OS == "windows",
        }
    }
}

/// The command a component would be invoked with; the orchestrator is
/// responsible for actually running it, this crate only carries it.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Clone)]
pub struct ComponentDescriptor {
    pub name: String,
    pub entry: EntryPoint,
    pub platform: Platform,
    /// Auto-detect predicate; absent means "no auto-detection".
    pub auto_detect: Option<std::sync::Arc<dyn Fn() -> bool + Send + Sync>>,
    pub run_as_user: Option<String>,
    /// Set by the plugin host for bridged components so the CLI layer
    /// can tell proxies apart from in-process providers (spec.md §4.4).
    pub is_plugin: bool,
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("platform", &self.platform)
            .field("auto_detect", &self.auto_detect.is_some())
            .field("run_as_user", &self.run_as_user)
            .field("is_plugin", &self.is_plugin)
            .finish()
    }
}

pub const OS_HEALTH: &str = "osHealth";

/// Process-wide registration map. Write-once-per-name: re-registering an
/// existing name overwrites it in place and logs a warning (spec.md §3).
///
/// Backed by an `IndexMap` rather than a `HashMap`: `select_enabled`'s
/// output order must be a deterministic function of registration order
/// alone, not of the per-process `RandomState` hash seed, so that two
/// independently-built `Registry` instances (e.g. across daemon
/// restarts) that register the same components in the same order
/// produce the same enabled-set order.
#[derive(Default)]
pub struct Registry {
    components: RwLock<IndexMap<String, ComponentDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ComponentDescriptor) {
        let mut components = self.components.write().expect("registry lock poisoned");
        if components.contains_key(&descriptor.name) {
            warn!(name = %descriptor.name, "overwriting previously registered component");
        }
        components.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<ComponentDescriptor> {
        self.components.read().expect("registry lock poisoned").get(name).cloned()
    }

    fn all(&self) -> Vec<ComponentDescriptor> {
        self.components
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Runs the selection algorithm from spec.md §4.3. `disabled_in_config`
    /// is `None` when the daemon config file does not exist (branch 1),
    /// `Some(set)` when it does (branch 2).
    pub fn select_enabled(&self, disabled_in_config: Option<&[String]>) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut push = |name: &str| {
            if seen.insert(name.to_string()) {
                ordered.push(name.to_string());
            }
        };

        let all = self.all();
        let by_name: HashMap<&str, &ComponentDescriptor> =
            all.iter().map(|d| (d.name.as_str(), d)).collect();

        match disabled_in_config {
            None => {
                if let Some(os_health) = by_name.get(OS_HEALTH) {
                    if os_health.platform.matches_current() {
                        push(OS_HEALTH);
                    }
                } else {
                    push(OS_HEALTH);
                }
                for d in &all {
                    if d.name == OS_HEALTH || !d.platform.matches_current() {
                        continue;
                    }
                    let auto = d.auto_detect.as_ref().map(|f| f()).unwrap_or(false);
                    let run_as_user_linux = d.run_as_user.is_some() && d.platform == Platform::Linux;
                    if auto || run_as_user_linux {
                        push(&d.name);
                    }
                }
            }
            Some(disabled) => {
                let is_disabled = |name: &str| disabled.iter().any(|d| d == name);

                if !is_disabled(OS_HEALTH) {
                    let platform_ok = by_name
                        .get(OS_HEALTH)
                        .map(|d| d.platform.matches_current())
                        .unwrap_or(true);
                    if platform_ok {
                        push(OS_HEALTH);
                    }
                }

                for d in &all {
                    if d.name == OS_HEALTH {
                        continue;
                    }
                    if is_disabled(&d.name) || !d.platform.matches_current() {
                        continue;
                    }
                    let include = match &d.auto_detect {
                        Some(f) => f(),
                        None => d.run_as_user.is_some() && d.platform == Platform::Linux,
                    };
                    if include {
                        push(&d.name);
                    }
                }
            }
        }

        ordered
    }
}

/// Serializes an enabled set as `::`-joined, for remote registration.
pub fn serialize_enabled(enabled: &[String]) -> String {
    enabled.join("::")
}

/// Membership test against a `::`-joined enabled-set string.
pub fn is_enabled(serialized: &str, name: &str) -> bool {
    serialized.split("::").any(|n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn descriptor(name: &str, platform: Platform) -> ComponentDescriptor {
        ComponentDescriptor {
            name: name.to_string(),
            entry: EntryPoint { command: name.to_string(), args: vec![] },
            platform,
            auto_detect: None,
            run_as_user: None,
            is_plugin: false,
        }
    }

    #[test]
    fn os_health_present_by_default_without_daemon_config() {
        let registry = Registry::new();
        let enabled = registry.select_enabled(None);
        assert_eq!(enabled, vec![OS_HEALTH.to_string()]);
    }

    #[test]
    fn auto_detect_components_included_without_daemon_config() {
        let registry = Registry::new();
        let mut k8s = descriptor("k8sHealth", Platform::Any);
        k8s.auto_detect = Some(Arc::new(|| true));
        registry.register(k8s);
        let enabled = registry.select_enabled(None);
        assert!(enabled.contains(&"k8sHealth".to_string()));
    }

    #[test]
    fn disabled_component_excluded_with_daemon_config_present() {
        let registry = Registry::new();
        let mut k8s = descriptor("k8sHealth", Platform::Any);
        k8s.auto_detect = Some(Arc::new(|| true));
        registry.register(k8s);
        let disabled = vec!["k8sHealth".to_string()];
        let enabled = registry.select_enabled(Some(&disabled));
        assert_eq!(enabled, vec![OS_HEALTH.to_string()]);
    }

    #[test]
    fn platform_mismatch_is_always_skipped() {
        let registry = Registry::new();
        registry.register(descriptor("winTool", Platform::Windows));
        let enabled_no_cfg = registry.select_enabled(None);
        assert!(!enabled_no_cfg.contains(&"winTool".to_string()));
        let enabled_with_cfg = registry.select_enabled(Some(&[]));
        assert!(!enabled_with_cfg.contains(&"winTool".to_string()));
    }

    #[test]
    fn selection_is_deterministic_for_same_inputs() {
        let registry = Registry::new();
        registry.register(descriptor("a", Platform::Any));
        registry.register(descriptor("b", Platform::Any));
        let first = registry.select_enabled(Some(&[]));
        let second = registry.select_enabled(Some(&[]));
        assert_eq!(first, second);
    }

    #[test]
    fn selection_order_is_deterministic_across_independent_registries() {
        // Same registration sequence in two separately constructed
        // registries (e.g. across a daemon restart) must yield the same
        // order, not just the same order when queried twice on one
        // instance.
        let names = ["c", "a", "b", "k8sHealth", "dbHealth"];
        let build = || {
            let registry = Registry::new();
            for name in names {
                let mut d = descriptor(name, Platform::Any);
                d.auto_detect = Some(Arc::new(|| true));
                registry.register(d);
            }
            registry
        };
        let first = build().select_enabled(Some(&[]));
        let second = build().select_enabled(Some(&[]));
        assert_eq!(first, second);
        assert_eq!(first, vec![OS_HEALTH, "c", "a", "b", "k8sHealth", "dbHealth"]);
    }

    #[test]
    fn serialize_and_is_enabled_round_trip() {
        let enabled = vec!["osHealth".to_string(), "k8sHealth".to_string()];
        let serialized = serialize_enabled(&enabled);
        assert_eq!(serialized, "osHealth::k8sHealth");
        assert!(is_enabled(&serialized, "k8sHealth"));
        assert!(!is_enabled(&serialized, "dbHealth"));
    }

    #[test]
    fn reregistering_a_name_overwrites_last_writer_wins() {
        let registry = Registry::new();
        registry.register(descriptor("x", Platform::Linux));
        registry.register(descriptor("x", Platform::Any));
        assert_eq!(registry.get("x").unwrap().platform, Platform::Any);
    }
}
