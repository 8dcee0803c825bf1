//! Deployment registry.
//!
//! Tracks registered process servers and the deployments configured on
//! them, and owns the global index of deployed task names. A deployed task
//! name has at most one owning deployment across all process servers.
//!
//! The registry is mutated from a single control thread; it does no
//! locking of its own. Every mutation validates fully before writing, so a
//! failed call leaves the registry exactly as it was.

mod filter;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{ConfiguredDeployment, ProcessServerConfig};
use crate::ports::{ProcessBackend, RegistryError};

pub use filter::NameFilter;

/// Registry of process servers, deployments and deployed task names.
#[derive(Debug, Default)]
pub struct DeploymentRegistry {
    /// Registered process servers keyed by name
    process_servers: BTreeMap<String, ProcessServerConfig>,
    /// Deployments per process server, in registration order
    deployments: BTreeMap<String, Vec<Arc<ConfiguredDeployment>>>,
    /// Deployed task name -> owning deployment
    deployed_tasks: HashMap<String, Arc<ConfiguredDeployment>>,
}

impl DeploymentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process server.
    ///
    /// Any deployment already known for this server is reloaded from the
    /// new client's model loader.
    pub fn register_process_server(
        &mut self,
        name: impl Into<String>,
        client: Arc<dyn ProcessBackend>,
        log_dir: Option<PathBuf>,
        host_id: impl Into<String>,
    ) -> Result<ProcessServerConfig, RegistryError> {
        let name = name.into();
        if self.process_servers.contains_key(&name) {
            return Err(RegistryError::DuplicateServer(name));
        }

        let config = ProcessServerConfig::new(name.clone(), client, log_dir, host_id);
        info!(server = %name, kind = %config.kind(), host = %config.host_id, "Registered process server");
        self.process_servers.insert(name.clone(), config.clone());
        self.deployments.entry(name.clone()).or_default();
        self.reload_deployments_for(&name)?;
        Ok(config)
    }

    /// Remove a process server, its deployments and its simulation twin.
    ///
    /// The backend client is disconnected. If a `<name>-sim` server is
    /// registered it is removed the same way.
    pub fn remove_process_server(&mut self, name: &str) -> Result<ProcessServerConfig, RegistryError> {
        let config = self
            .process_servers
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownServer(name.to_owned()))?;

        config.client.disconnect();
        let dropped = self.clear_deployments_of(name);
        info!(server = %name, deployments = dropped, "Removed process server");

        let sim_name = ProcessServerConfig::simulation_name_for(name);
        if self.process_servers.contains_key(&sim_name) {
            self.remove_process_server(&sim_name)?;
        }

        Ok(config)
    }

    /// Register a configured deployment and claim its deployed task names.
    ///
    /// Fails with [`RegistryError::DuplicateDeployment`] if another
    /// deployment on the same server has the same name, and with
    /// [`RegistryError::TaskNameAlreadyInUse`] if any of the names is owned
    /// by a different deployment; nothing is written in either case.
    /// Registering the same deployment twice is a no-op.
    pub fn register_configured_deployment(
        &mut self,
        deployment: impl Into<Arc<ConfiguredDeployment>>,
    ) -> Result<Arc<ConfiguredDeployment>, RegistryError> {
        let deployment = deployment.into();
        let server = deployment.process_server_name();
        if !self.process_servers.contains_key(server) {
            return Err(RegistryError::UnknownServer(server.to_owned()));
        }
        let name = deployment.deployment_name();
        if self.deployments.get(server).is_some_and(|set| {
            set.iter()
                .any(|d| d.id() != deployment.id() && d.deployment_name() == name)
        }) {
            return Err(RegistryError::DuplicateDeployment {
                name: name.to_owned(),
                server: server.to_owned(),
            });
        }

        let names = deployment.deployed_task_names();
        let mut claimed = HashSet::with_capacity(names.len());
        for name in &names {
            if !claimed.insert(name.as_str()) {
                return Err(RegistryError::TaskNameAlreadyInUse {
                    task: name.clone(),
                    owner: deployment.deployment_name().to_owned(),
                });
            }
            if let Some(owner) = self.deployed_tasks.get(name) {
                if owner.id() != deployment.id() {
                    return Err(RegistryError::TaskNameAlreadyInUse {
                        task: name.clone(),
                        owner: owner.deployment_name().to_owned(),
                    });
                }
            }
        }

        for name in names {
            self.deployed_tasks.insert(name, Arc::clone(&deployment));
        }
        let set = self.deployments.entry(server.to_owned()).or_default();
        if !set.iter().any(|d| d.id() == deployment.id()) {
            set.push(Arc::clone(&deployment));
        }

        debug!(
            server = %server,
            deployment = %deployment.deployment_name(),
            tasks = ?deployment.deployed_task_names(),
            "Registered deployment"
        );
        Ok(deployment)
    }

    /// Deregister a deployment.
    ///
    /// Only index entries that still point at `deployment` are removed; a
    /// name claimed by a later registration is left alone.
    pub fn deregister_configured_deployment(
        &mut self,
        deployment: &ConfiguredDeployment,
    ) -> Result<(), RegistryError> {
        let unknown = || RegistryError::UnknownDeployment(deployment.deployment_name().to_owned());
        let set = self
            .deployments
            .get_mut(deployment.process_server_name())
            .ok_or_else(unknown)?;
        let position = set
            .iter()
            .position(|d| d.id() == deployment.id())
            .ok_or_else(unknown)?;
        set.remove(position);
        self.release_task_names(deployment);

        debug!(deployment = %deployment.deployment_name(), "Deregistered deployment");
        Ok(())
    }

    /// Deployments whose process server matches `on` and not `except_on`.
    pub fn each_configured_deployment<'a>(
        &'a self,
        on: &'a NameFilter,
        except_on: &'a NameFilter,
    ) -> impl Iterator<Item = &'a Arc<ConfiguredDeployment>> + 'a {
        self.deployments
            .iter()
            .filter(move |(server, _)| on.matches(server) && !except_on.matches(server))
            .flat_map(|(_, set)| set.iter())
    }

    /// Swap every deployment of `server_name` for an instance built on a
    /// freshly loaded model.
    ///
    /// Deployments whose project can no longer be resolved, or whose fresh
    /// task names now collide with another deployment, are dropped with a
    /// warning. Returns the deployments that survived.
    pub fn reload_deployments_for(
        &mut self,
        server_name: &str,
    ) -> Result<Vec<Arc<ConfiguredDeployment>>, RegistryError> {
        let server = self
            .process_servers
            .get(server_name)
            .ok_or_else(|| RegistryError::UnknownServer(server_name.to_owned()))?;
        let current = self.deployments.get(server_name).cloned().unwrap_or_default();
        if current.is_empty() {
            return Ok(Vec::new());
        }

        let loader = server.client.model_loader();
        let mut fresh = Vec::with_capacity(current.len());
        for deployment in &current {
            let model = deployment.model();
            match loader.load_deployment(&model.project, &model.name) {
                Ok(model) => fresh.push(deployment.reloaded_with(model)),
                Err(e) => warn!(
                    server = %server_name,
                    deployment = %deployment.deployment_name(),
                    error = %e,
                    "Dropping deployment that cannot be reloaded"
                ),
            }
        }

        self.clear_deployments_of(server_name);

        let mut reloaded = Vec::with_capacity(fresh.len());
        for deployment in fresh {
            let name = deployment.deployment_name().to_owned();
            match self.register_configured_deployment(deployment) {
                Ok(deployment) => reloaded.push(deployment),
                Err(e) => warn!(
                    server = %server_name,
                    deployment = %name,
                    error = %e,
                    "Dropping reloaded deployment"
                ),
            }
        }

        debug!(server = %server_name, kept = reloaded.len(), total = current.len(), "Reloaded deployments");
        Ok(reloaded)
    }

    /// Remove every process server and deployment.
    pub fn clear(&mut self) {
        let names: Vec<String> = self.process_servers.keys().cloned().collect();
        for name in names {
            // A paired simulation server may already be gone.
            if self.process_servers.contains_key(&name) {
                let _ = self.remove_process_server(&name);
            }
        }
        self.deployments.clear();
        self.deployed_tasks.clear();
    }

    pub fn process_server(&self, name: &str) -> Option<&ProcessServerConfig> {
        self.process_servers.get(name)
    }

    pub fn has_process_server(&self, name: &str) -> bool {
        self.process_servers.contains_key(name)
    }

    pub fn process_servers(&self) -> impl Iterator<Item = &ProcessServerConfig> {
        self.process_servers.values()
    }

    pub fn process_server_names(&self) -> Vec<String> {
        self.process_servers.keys().cloned().collect()
    }

    /// Deployments registered on one process server.
    pub fn deployments_on(&self, server: &str) -> &[Arc<ConfiguredDeployment>] {
        self.deployments.get(server).map_or(&[], Vec::as_slice)
    }

    /// Deployment owning a deployed task name.
    pub fn task_owner(&self, deployed_task: &str) -> Option<&Arc<ConfiguredDeployment>> {
        self.deployed_tasks.get(deployed_task)
    }

    /// Deployment started under `deployment_name`, on any process server.
    pub fn find_deployment(&self, deployment_name: &str) -> Option<&Arc<ConfiguredDeployment>> {
        self.deployments
            .values()
            .flat_map(|set| set.iter())
            .find(|d| d.deployment_name() == deployment_name)
    }

    /// Number of registered deployments.
    pub fn len(&self) -> usize {
        self.deployments.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of claimed deployed task names.
    pub fn task_count(&self) -> usize {
        self.deployed_tasks.len()
    }

    fn release_task_names(&mut self, deployment: &ConfiguredDeployment) {
        for name in deployment.deployed_task_names() {
            let still_owned = self
                .deployed_tasks
                .get(&name)
                .is_some_and(|owner| owner.id() == deployment.id());
            if still_owned {
                self.deployed_tasks.remove(&name);
            }
        }
    }

    fn clear_deployments_of(&mut self, server: &str) -> usize {
        let set = self.deployments.remove(server).unwrap_or_default();
        for deployment in &set {
            self.release_task_names(deployment);
        }
        if self.process_servers.contains_key(server) {
            self.deployments.insert(server.to_owned(), Vec::new());
        }
        set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeploymentModel, NameMappings, SpawnOptions};
    use crate::testing::MemoryBackend;

    fn registry_with(servers: &[&str]) -> (DeploymentRegistry, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::remote());
        let mut registry = DeploymentRegistry::new();
        for name in servers {
            registry
                .register_process_server(*name, backend.clone(), None, "localhost")
                .unwrap();
        }
        (registry, backend)
    }

    fn deployment(server: &str, name: &str, tasks: &[&str]) -> ConfiguredDeployment {
        let model = Arc::new(DeploymentModel::new("test", name, tasks.iter().copied()));
        ConfiguredDeployment::new(server, model, NameMappings::new(), SpawnOptions::default())
    }

    #[test]
    fn duplicate_server_is_rejected() {
        let (mut registry, backend) = registry_with(&["local"]);
        let err = registry
            .register_process_server("local", backend, None, "localhost")
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateServer("local".into()));
    }

    #[test]
    fn deployment_on_unknown_server_is_rejected() {
        let (mut registry, _) = registry_with(&[]);
        let err = registry
            .register_configured_deployment(deployment("nowhere", "d", &["a"]))
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownServer("nowhere".into()));
    }

    #[test]
    fn registering_twice_is_a_no_op() {
        let (mut registry, _) = registry_with(&["local"]);
        let cd = registry
            .register_configured_deployment(deployment("local", "d", &["a"]))
            .unwrap();
        registry.register_configured_deployment(cd.clone()).unwrap();
        assert_eq!(registry.deployments_on("local").len(), 1);
        assert_eq!(registry.task_count(), 1);
    }

    #[test]
    fn deregister_leaves_names_claimed_by_others() {
        let (mut registry, _) = registry_with(&["local"]);
        let first = registry
            .register_configured_deployment(deployment("local", "first", &["a"]))
            .unwrap();

        // Simulate an index entry overwritten by a later registration.
        let second = Arc::new(deployment("local", "second", &["a"]));
        registry.deployed_tasks.insert("a".into(), second.clone());

        registry.deregister_configured_deployment(&first).unwrap();
        assert_eq!(registry.task_owner("a").map(|d| d.id()), Some(second.id()));
    }

    #[test]
    fn deregister_unknown_deployment_fails() {
        let (mut registry, _) = registry_with(&["local"]);
        let cd = deployment("local", "ghost", &["a"]);
        assert!(matches!(
            registry.deregister_configured_deployment(&cd),
            Err(RegistryError::UnknownDeployment(_))
        ));
    }

    #[test]
    fn intra_deployment_collision_is_rejected() {
        let (mut registry, _) = registry_with(&["local"]);
        let model = Arc::new(DeploymentModel::new("test", "d", ["a", "b"]));
        let mut mappings = NameMappings::new();
        mappings.insert("b".into(), "a".into());
        let cd = ConfiguredDeployment::new("local", model, mappings, SpawnOptions::default());

        assert!(matches!(
            registry.register_configured_deployment(cd),
            Err(RegistryError::TaskNameAlreadyInUse { .. })
        ));
        assert_eq!(registry.task_count(), 0);
    }

    #[test]
    fn enumeration_filters_on_server_name() {
        let (mut registry, _) = registry_with(&["local", "local-sim", "remote"]);
        registry
            .register_configured_deployment(deployment("local", "l", &["l0"]))
            .unwrap();
        registry
            .register_configured_deployment(deployment("local-sim", "s", &["s0"]))
            .unwrap();
        registry
            .register_configured_deployment(deployment("remote", "r", &["r0"]))
            .unwrap();

        let all: Vec<_> = registry
            .each_configured_deployment(&NameFilter::Any, &NameFilter::Nothing)
            .collect();
        assert_eq!(all.len(), 3);

        let sim = NameFilter::pattern("-sim$").unwrap();
        let real: Vec<&str> = registry
            .each_configured_deployment(&NameFilter::Any, &sim)
            .map(|d| d.deployment_name())
            .collect();
        assert_eq!(real, vec!["l", "r"]);

        let remote = NameFilter::exact("remote");
        let only_remote: Vec<&str> = registry
            .each_configured_deployment(&remote, &NameFilter::Nothing)
            .map(|d| d.deployment_name())
            .collect();
        assert_eq!(only_remote, vec!["r"]);
    }

    #[test]
    fn find_deployment_by_deployed_name() {
        let (mut registry, _) = registry_with(&["local"]);
        registry
            .register_configured_deployment(deployment("local", "d", &["a"]))
            .unwrap();
        assert!(registry.find_deployment("d").is_some());
        assert!(registry.find_deployment("other").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_disconnects_everything() {
        let (mut registry, backend) = registry_with(&["local", "local-sim"]);
        registry
            .register_configured_deployment(deployment("local", "d", &["a"]))
            .unwrap();

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.task_count(), 0);
        assert!(registry.process_server_names().is_empty());
        assert_eq!(backend.disconnect_count(), 2);
    }
}
