//! Deployment models and their configured (deployed) instances.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Rename table from declared names to deployed names.
///
/// Keys are names as declared in the [`DeploymentModel`] (the deployment
/// name itself or one of its task names). Names without an entry are
/// deployed under their declared name.
pub type NameMappings = BTreeMap<String, String>;

/// Identity of one [`ConfiguredDeployment`] instance.
///
/// Two configured deployments with identical contents are still distinct
/// owners in the registry; ownership checks compare ids, not contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deployment as described by its project: a named unit bundling
/// component tasks that are started together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentModel {
    /// Project the deployment is loaded from.
    pub project: String,
    /// Declared deployment name.
    pub name: String,
    /// Declared task names, in declaration order, without duplicates.
    pub tasks: Vec<String>,
}

impl DeploymentModel {
    /// Create a deployment model. Duplicate task names are dropped,
    /// keeping the first occurrence.
    pub fn new<I, S>(project: impl Into<String>, name: impl Into<String>, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let tasks = tasks
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| seen.insert(t.clone()))
            .collect();
        Self {
            project: project.into(),
            name: name.into(),
            tasks,
        }
    }

    /// Whether `task` is one of the declared task names.
    pub fn declares(&self, task: &str) -> bool {
        self.tasks.iter().any(|t| t == task)
    }
}

/// Options forwarded to the process backend when the deployment is started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    /// Working directory of the spawned process.
    pub working_directory: Option<PathBuf>,
    /// Extra command line arguments.
    pub cmdline_args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
}

/// A deployment model bound to a process server, with its rename table.
///
/// Immutable once built. Reloading produces a new instance through
/// [`ConfiguredDeployment::reloaded_with`].
#[derive(Debug, Clone)]
pub struct ConfiguredDeployment {
    id: DeploymentId,
    process_server_name: String,
    model: Arc<DeploymentModel>,
    name_mappings: NameMappings,
    spawn_options: SpawnOptions,
}

impl ConfiguredDeployment {
    /// Create a configured deployment with a fresh identity.
    pub fn new(
        process_server_name: impl Into<String>,
        model: Arc<DeploymentModel>,
        name_mappings: NameMappings,
        spawn_options: SpawnOptions,
    ) -> Self {
        Self {
            id: DeploymentId::fresh(),
            process_server_name: process_server_name.into(),
            model,
            name_mappings,
            spawn_options,
        }
    }

    /// Build a rename table that prefixes the deployment name and every
    /// declared task name with `prefix`.
    pub fn prefix_mappings(prefix: &str, model: &DeploymentModel) -> NameMappings {
        std::iter::once(&model.name)
            .chain(model.tasks.iter())
            .map(|name| (name.clone(), format!("{prefix}{name}")))
            .collect()
    }

    pub const fn id(&self) -> DeploymentId {
        self.id
    }

    pub fn process_server_name(&self) -> &str {
        &self.process_server_name
    }

    pub fn model(&self) -> &Arc<DeploymentModel> {
        &self.model
    }

    pub const fn name_mappings(&self) -> &NameMappings {
        &self.name_mappings
    }

    pub const fn spawn_options(&self) -> &SpawnOptions {
        &self.spawn_options
    }

    /// Name the deployment (the process) is started under.
    pub fn deployment_name(&self) -> &str {
        self.mapped(&self.model.name)
    }

    /// Deployed name of a declared task, if the model declares it.
    pub fn deployed_task_name(&self, declared: &str) -> Option<&str> {
        self.model
            .tasks
            .iter()
            .find(|t| *t == declared)
            .map(|t| self.mapped(t))
    }

    /// Deployed names of every declared task, in declaration order.
    pub fn deployed_task_names(&self) -> Vec<String> {
        self.model
            .tasks
            .iter()
            .map(|t| self.mapped(t).to_owned())
            .collect()
    }

    /// Whether `deployed` is the deployed name of one of this deployment's tasks.
    pub fn deploys_task(&self, deployed: &str) -> bool {
        self.model.tasks.iter().any(|t| self.mapped(t) == deployed)
    }

    /// True when every entry of the rename table maps a name onto itself.
    pub fn has_identity_mappings(&self) -> bool {
        self.name_mappings.iter().all(|(from, to)| from == to)
    }

    /// Entries of the rename table that actually rename something.
    pub fn non_identity_mappings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.name_mappings
            .iter()
            .filter(|(from, to)| from != to)
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }

    /// Same deployment, bound to a freshly loaded model instance.
    ///
    /// The result has a new identity: the registry treats it as a
    /// different owner than `self`.
    #[must_use]
    pub fn reloaded_with(&self, model: Arc<DeploymentModel>) -> Self {
        Self {
            id: DeploymentId::fresh(),
            process_server_name: self.process_server_name.clone(),
            model,
            name_mappings: self.name_mappings.clone(),
            spawn_options: self.spawn_options.clone(),
        }
    }

    fn mapped<'a>(&'a self, declared: &'a str) -> &'a str {
        self.name_mappings
            .get(declared)
            .map_or(declared, String::as_str)
    }
}

impl PartialEq for ConfiguredDeployment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConfiguredDeployment {}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_model() -> Arc<DeploymentModel> {
        Arc::new(DeploymentModel::new(
            "drivers",
            "camera_deployment",
            ["cam0", "cam1", "cam0"],
        ))
    }

    #[test]
    fn model_drops_duplicate_tasks_in_order() {
        let model = camera_model();
        assert_eq!(model.tasks, vec!["cam0", "cam1"]);
        assert!(model.declares("cam1"));
        assert!(!model.declares("cam2"));
    }

    #[test]
    fn unmapped_names_deploy_under_declared_name() {
        let cd = ConfiguredDeployment::new("local", camera_model(), NameMappings::new(), SpawnOptions::default());
        assert_eq!(cd.deployment_name(), "camera_deployment");
        assert_eq!(cd.deployed_task_names(), vec!["cam0", "cam1"]);
        assert!(cd.has_identity_mappings());
    }

    #[test]
    fn prefix_mappings_rename_deployment_and_tasks() {
        let model = camera_model();
        let mappings = ConfiguredDeployment::prefix_mappings("left_", &model);
        let cd = ConfiguredDeployment::new("local", model, mappings, SpawnOptions::default());

        assert_eq!(cd.deployment_name(), "left_camera_deployment");
        assert_eq!(cd.deployed_task_name("cam1"), Some("left_cam1"));
        assert_eq!(cd.deployed_task_name("missing"), None);
        assert!(cd.deploys_task("left_cam0"));
        assert!(!cd.deploys_task("cam0"));
        assert!(!cd.has_identity_mappings());
        assert_eq!(cd.non_identity_mappings().count(), 3);
    }

    #[test]
    fn reload_keeps_configuration_but_not_identity() {
        let cd = ConfiguredDeployment::new("local", camera_model(), NameMappings::new(), SpawnOptions::default());
        let reloaded = cd.reloaded_with(camera_model());

        assert_ne!(cd, reloaded);
        assert_eq!(reloaded.process_server_name(), "local");
        assert_eq!(reloaded.deployed_task_names(), cd.deployed_task_names());
    }

    #[test]
    fn spawn_options_deserialize_with_defaults() {
        let opts: SpawnOptions = serde_json::from_str(r#"{"cmdline_args":["--verbose"]}"#).unwrap();
        assert_eq!(opts.cmdline_args, vec!["--verbose"]);
        assert!(opts.env.is_empty());
        assert!(opts.working_directory.is_none());
    }
}
