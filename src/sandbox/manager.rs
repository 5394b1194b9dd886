use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{debug, info};

use crate::{
    config::InstrumentationConfiguration,
    loader::{ClassBytesProvider, SystemClassLoader},
    sandbox::{Sandbox, SandboxConfig},
    shadow::{ShadowClass, ShadowMap},
    Result,
};

/// What one test needs from its sandbox on top of the manager's base configuration.
#[derive(Debug, Clone, Default)]
pub struct SandboxRequest {
    /// SDK level; the manager's configured level when `None`.
    pub sdk: Option<u32>,
    /// Shadows added to the base shadow map. Later entries take precedence.
    pub shadows: Vec<Arc<ShadowClass>>,
    /// Package prefixes instrumented in addition to the base configuration.
    pub instrumented_packages: Vec<String>,
}

impl SandboxRequest {
    /// A request for the base configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an SDK level.
    #[must_use]
    pub fn sdk(mut self, sdk: u32) -> Self {
        self.sdk = Some(sdk);
        self
    }

    /// Adds a shadow.
    #[must_use]
    pub fn shadow(mut self, shadow: Arc<ShadowClass>) -> Self {
        self.shadows.push(shadow);
        self
    }

    /// Instruments an additional package prefix.
    #[must_use]
    pub fn instrumented_package(mut self, prefix: &str) -> Self {
        self.instrumented_packages.push(prefix.to_string());
        self
    }
}

/// Which cache slot a request lands in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SandboxKey {
    instrumentation: InstrumentationConfiguration,
    sdk: u32,
}

/// The sandbox of one slot and the shadow map it was built with.
struct CachedSandbox {
    shadow_map: ShadowMap,
    sandbox: Arc<Sandbox>,
}

/// Hands out sandboxes, reusing one whenever a request resolves to the same
/// instrumentation rules, SDK level and shadow map as an earlier one.
///
/// The manager keeps one sandbox per instrumentation rules and SDK level. A request
/// whose shadow map invalidates any class of the cached sandbox's map replaces that
/// sandbox with a fresh one; the replaced sandbox lives on while callers hold it.
///
/// All sandboxes of a manager share one [`SystemClassLoader`], so the host library
/// is defined once.
pub struct SandboxManager {
    instrumentation: InstrumentationConfiguration,
    shadow_map: ShadowMap,
    config: SandboxConfig,
    provider: Arc<dyn ClassBytesProvider>,
    parent: Arc<SystemClassLoader>,
    sandboxes: Mutex<HashMap<SandboxKey, CachedSandbox>>,
}

impl SandboxManager {
    /// Creates a manager.
    ///
    /// # Arguments
    ///
    /// * `instrumentation` - Base rules every request extends
    /// * `shadow_map` - Base shadows every request extends
    /// * `config` - Settings of every sandbox; `sdk` is the default level
    /// * `provider` - Bytes of acquired classes
    ///
    /// # Errors
    ///
    /// Returns an error if the host library cannot be defined.
    pub fn new(
        instrumentation: InstrumentationConfiguration,
        shadow_map: ShadowMap,
        config: SandboxConfig,
        provider: Arc<dyn ClassBytesProvider>,
    ) -> Result<Self> {
        Ok(SandboxManager {
            instrumentation,
            shadow_map,
            config,
            provider,
            parent: SystemClassLoader::new(None)?,
            sandboxes: Mutex::new(HashMap::new()),
        })
    }

    /// The sandbox for `request`, built on first use of its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a new sandbox cannot be built.
    pub fn sandbox_for(&self, request: SandboxRequest) -> Result<Arc<Sandbox>> {
        let (key, shadow_map) = self.key_for(request);

        let mut sandboxes = self.sandboxes.lock().expect("sandbox cache lock poisoned");
        if let Some(cached) = sandboxes.get(&key) {
            let invalidated = shadow_map.invalidated_classes(&cached.shadow_map);
            if invalidated.is_empty() {
                debug!("Reusing sandbox for SDK {}", key.sdk);
                return Ok(Arc::clone(&cached.sandbox));
            }
            debug!(
                "Shadow map change invalidates {} classes, rebuilding sandbox for SDK {}",
                invalidated.len(),
                key.sdk
            );
        }
        let sandbox = Sandbox::builder()
            .instrumentation(key.instrumentation.clone())
            .shadow_map(shadow_map.clone())
            .config(self.config.clone())
            .sdk(key.sdk)
            .bytes_provider(Arc::clone(&self.provider))
            .parent_loader(Arc::clone(&self.parent))
            .build()?;
        info!("Created sandbox for SDK {} with {} shadowed classes", key.sdk, shadow_map.len());
        sandboxes.insert(
            key,
            CachedSandbox {
                shadow_map,
                sandbox: Arc::clone(&sandbox),
            },
        );
        Ok(sandbox)
    }

    /// Number of cached sandboxes, one per instrumentation rules and SDK level.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sandboxes.lock().expect("sandbox cache lock poisoned").len()
    }

    /// Returns `true` if no sandbox is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all cached sandboxes.
    pub fn clear(&self) {
        self.sandboxes.lock().expect("sandbox cache lock poisoned").clear();
    }

    /// The loader shared by all sandboxes of this manager.
    #[must_use]
    pub fn system_loader(&self) -> &Arc<SystemClassLoader> {
        &self.parent
    }

    fn key_for(&self, request: SandboxRequest) -> (SandboxKey, ShadowMap) {
        let instrumentation = if request.instrumented_packages.is_empty() {
            self.instrumentation.clone()
        } else {
            request
                .instrumented_packages
                .iter()
                .fold(self.instrumentation.to_builder(), |builder, prefix| {
                    builder.add_instrumented_package(prefix)
                })
                .build()
        };
        let shadow_map = if request.shadows.is_empty() {
            self.shadow_map.clone()
        } else {
            self.shadow_map
                .to_builder()
                .add_shadow_classes(request.shadows)
                .build()
        };
        let key = SandboxKey {
            instrumentation,
            sdk: request.sdk.unwrap_or(self.config.sdk),
        };
        (key, shadow_map)
    }
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("sandboxes", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loader::MapBytesProvider, test::instrumenting};

    fn manager() -> SandboxManager {
        SandboxManager::new(
            instrumenting("com.example."),
            ShadowMap::empty(),
            SandboxConfig::default(),
            Arc::new(MapBytesProvider::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_equal_requests_share_a_sandbox() {
        let manager = manager();
        let a = manager.sandbox_for(SandboxRequest::new()).unwrap();
        let b = manager.sandbox_for(SandboxRequest::new().sdk(34)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
        assert!(Arc::ptr_eq(a.system_loader(), manager.system_loader()));
    }

    #[test]
    fn test_rebuilt_shadow_replaces_sandbox() {
        let manager = manager();
        let first = ShadowClass::builder("ShadowFoo", "com.example.Foo").build().unwrap();
        let second = ShadowClass::builder("ShadowFoo", "com.example.Foo").build().unwrap();
        let a = manager.sandbox_for(SandboxRequest::new().shadow(first)).unwrap();
        let b = manager.sandbox_for(SandboxRequest::new().shadow(second)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_changed_configuration_builds_a_new_sandbox() {
        let manager = manager();
        let base = manager.sandbox_for(SandboxRequest::new()).unwrap();
        let old_sdk = manager.sandbox_for(SandboxRequest::new().sdk(21)).unwrap();
        let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo").build().unwrap();
        let shadowed = manager
            .sandbox_for(SandboxRequest::new().shadow(Arc::clone(&shadow)))
            .unwrap();
        let extra = manager
            .sandbox_for(SandboxRequest::new().instrumented_package("org.sample."))
            .unwrap();

        assert!(!Arc::ptr_eq(&base, &old_sdk));
        assert!(!Arc::ptr_eq(&base, &shadowed));
        assert!(!Arc::ptr_eq(&base, &extra));
        assert_eq!(old_sdk.config().sdk, 21);
        assert!(extra.loader().should_acquire("org.sample.Thing"));
        assert_eq!(manager.len(), 3);

        let again = manager.sandbox_for(SandboxRequest::new().shadow(shadow)).unwrap();
        assert!(Arc::ptr_eq(&shadowed, &again));

        // The shadowed sandbox took the slot of the base one.
        let base_again = manager.sandbox_for(SandboxRequest::new()).unwrap();
        assert!(!Arc::ptr_eq(&base, &base_again));
        assert_eq!(manager.len(), 3);
        manager.clear();
        assert!(manager.is_empty());
    }
}
