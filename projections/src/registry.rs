//! Registry of running async actualizers.
//!
//! Applications register once with everything their actualizers need. After
//! that, partitions are deployed and undeployed as a unit: deploying starts
//! one actualizer per registered projector, undeploying stops them and waits
//! for them to finish.
//!
//! Each application has its own lock, so deploying partitions of different
//! applications never contends.

use crate::async_actualizer::{AsyncActualizer, AsyncActualizerDeps};
use crate::cancel::child_shutdown;
use crate::config::AsyncActualizerConfig;
use plogview_core::{AppQName, PartitionId, ProjectorFactory, QName};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Error type for registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The application was never registered.
    #[error("Application is not registered: {0}")]
    UnknownApp(AppQName),

    /// The application is registered already.
    #[error("Application is already registered: {0}")]
    AlreadyRegistered(AppQName),
}

/// Everything needed to run an application's async actualizers.
#[derive(Clone)]
pub struct AppDeployment {
    /// Configuration template; the partition is set per deployment.
    pub config: AsyncActualizerConfig,
    /// Shared collaborators.
    pub deps: AsyncActualizerDeps,
    /// One factory per async projector.
    pub factories: Vec<ProjectorFactory>,
}

struct RunningActualizer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RunningActualizer {
    async fn stop(self, app: &AppQName, partition: PartitionId, projector: &QName) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::error!(
                app = %app,
                partition = %partition,
                projector = %projector,
                error = %e,
                "Actualizer task failed"
            );
        }
    }
}

struct AppEntry {
    deployment: AppDeployment,
    running: BTreeMap<(PartitionId, QName), RunningActualizer>,
}

/// Tracks running actualizers per application, partition and projector.
///
/// # Example
///
/// ```ignore
/// let (shutdown, rx) = tokio::sync::watch::channel(false);
/// let registry = ActualizerRegistry::new(rx);
///
/// registry.register_app(app.clone(), AppDeployment { config, deps, factories })?;
/// registry.deploy_partition(&app, PartitionId::new(1)).await?;
/// // ...
/// registry.undeploy_partition(&app, PartitionId::new(1)).await?;
/// ```
pub struct ActualizerRegistry {
    apps: RwLock<HashMap<AppQName, Arc<Mutex<AppEntry>>>>,
    shutdown: watch::Receiver<bool>,
}

impl ActualizerRegistry {
    /// Create a registry whose actualizers stop when `shutdown` turns `true`.
    #[must_use]
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Register an application.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `app` is registered.
    pub fn register_app(&self, app: AppQName, deployment: AppDeployment) -> Result<(), RegistryError> {
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        if apps.contains_key(&app) {
            return Err(RegistryError::AlreadyRegistered(app));
        }
        tracing::info!(
            app = %app,
            projectors = deployment.factories.len(),
            "Application registered"
        );
        apps.insert(
            app,
            Arc::new(Mutex::new(AppEntry {
                deployment,
                running: BTreeMap::new(),
            })),
        );
        Ok(())
    }

    /// Stop every actualizer of `app` and forget it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownApp`] if `app` is not registered.
    pub async fn unregister_app(&self, app: &AppQName) -> Result<(), RegistryError> {
        let entry = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app)
            .ok_or_else(|| RegistryError::UnknownApp(app.clone()))?;

        let mut entry = entry.lock().await;
        let running = std::mem::take(&mut entry.running);
        for ((partition, projector), actualizer) in running {
            actualizer.stop(app, partition, &projector).await;
        }
        tracing::info!(app = %app, "Application unregistered");
        Ok(())
    }

    /// Start every actualizer of `app` on `partition`.
    ///
    /// Pairs already running are left alone; pairs whose task has ended are
    /// started again. Returns how many actualizers were started.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownApp`] if `app` is not registered.
    pub async fn deploy_partition(&self, app: &AppQName, partition: PartitionId) -> Result<usize, RegistryError> {
        let entry = self.entry(app)?;
        let mut entry = entry.lock().await;
        let AppEntry {
            deployment,
            running,
        } = &mut *entry;

        let mut started = 0;
        for factory in &deployment.factories {
            let actualizer = AsyncActualizer::new(
                deployment.config.for_partition(partition),
                factory.clone(),
                deployment.deps.clone(),
            );
            let key = (partition, actualizer.projector().clone());
            if running.get(&key).is_some_and(|r| !r.task.is_finished()) {
                continue;
            }

            let (stop, shutdown) = child_shutdown(&self.shutdown);
            let task = tokio::spawn(actualizer.run(shutdown));
            running.insert(key, RunningActualizer { stop, task });
            started += 1;
        }

        tracing::info!(
            app = %app,
            partition = %partition,
            started,
            "Partition deployed"
        );
        Ok(started)
    }

    /// Stop every actualizer of `app` on `partition` and wait for them.
    ///
    /// Returns how many actualizers were stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownApp`] if `app` is not registered.
    pub async fn undeploy_partition(&self, app: &AppQName, partition: PartitionId) -> Result<usize, RegistryError> {
        let entry = self.entry(app)?;
        let mut entry = entry.lock().await;

        let keys: Vec<_> = entry
            .running
            .keys()
            .filter(|(p, _)| *p == partition)
            .cloned()
            .collect();
        let mut stopped = 0;
        for key in keys {
            if let Some(actualizer) = entry.running.remove(&key) {
                actualizer.stop(app, partition, &key.1).await;
                stopped += 1;
            }
        }

        tracing::info!(
            app = %app,
            partition = %partition,
            stopped,
            "Partition undeployed"
        );
        Ok(stopped)
    }

    /// Names of the projectors running for `app` on `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownApp`] if `app` is not registered.
    pub async fn running(&self, app: &AppQName, partition: PartitionId) -> Result<Vec<QName>, RegistryError> {
        let entry = self.entry(app)?;
        let entry = entry.lock().await;
        Ok(entry
            .running
            .iter()
            .filter(|((p, _), actualizer)| *p == partition && !actualizer.task.is_finished())
            .map(|((_, projector), _)| projector.clone())
            .collect())
    }

    /// Partitions of `app` with at least one running actualizer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownApp`] if `app` is not registered.
    pub async fn deployed_partitions(&self, app: &AppQName) -> Result<Vec<PartitionId>, RegistryError> {
        let entry = self.entry(app)?;
        let entry = entry.lock().await;
        let partitions: BTreeSet<_> = entry
            .running
            .iter()
            .filter(|(_, actualizer)| !actualizer.task.is_finished())
            .map(|((p, _), _)| *p)
            .collect();
        Ok(partitions.into_iter().collect())
    }

    /// Stop every actualizer of every application.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self
            .apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(app, entry)| (app.clone(), entry.clone()))
            .collect();

        for (app, entry) in entries {
            let mut entry = entry.lock().await;
            let running = std::mem::take(&mut entry.running);
            for ((partition, projector), actualizer) in running {
                actualizer.stop(&app, partition, &projector).await;
            }
        }
        tracing::info!("Actualizer registry shut down");
    }

    fn entry(&self, app: &AppQName) -> Result<Arc<Mutex<AppEntry>>, RegistryError> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownApp(app.clone()))
    }
}
