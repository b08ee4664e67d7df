//! Datasource instance management.
//!
//! Each configured datasource (identified by its `uid`) gets one instance: a
//! connection string, a guarded driver, and a health probe. Instances are
//! created on first use and replaced when the host delivers newer settings.

use crate::config::PoolOptions;
use crate::db::{ConnectionPoolGuard, Driver, HealthProbe, SqlxDriver};
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionString, DataSourceInstanceSettings, DataSourceOptions, DatabaseType, PluginContext,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Creates the driver for a datasource instance.
pub trait DriverFactory: Send + Sync + 'static {
    type Driver: Driver;

    fn create_driver(
        &self,
        settings: &DataSourceInstanceSettings,
        options: &DataSourceOptions,
    ) -> DbResult<Self::Driver>;

    /// Health probe matching the instance's backend dialect.
    fn health_probe(&self, options: &DataSourceOptions) -> HealthProbe {
        HealthProbe::for_database(options.driver)
    }
}

/// Factory for the sqlx-backed driver.
#[derive(Debug, Clone, Default)]
pub struct SqlxDriverFactory {
    pool_options: PoolOptions,
}

impl SqlxDriverFactory {
    pub fn new(pool_options: PoolOptions) -> Self {
        Self { pool_options }
    }
}

impl DriverFactory for SqlxDriverFactory {
    type Driver = SqlxDriver;

    fn create_driver(
        &self,
        _settings: &DataSourceInstanceSettings,
        options: &DataSourceOptions,
    ) -> DbResult<SqlxDriver> {
        Ok(SqlxDriver::new(options.driver, self.pool_options.clone()))
    }
}

/// One live datasource instance.
pub struct DataSourceInstance<D: Driver> {
    uid: String,
    name: String,
    db_type: DatabaseType,
    updated: DateTime<Utc>,
    pool: ConnectionPoolGuard<D>,
    probe: HealthProbe,
}

impl<D: Driver> std::fmt::Debug for DataSourceInstance<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceInstance")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("updated", &self.updated)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<D: Driver> DataSourceInstance<D> {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Settings version this instance was built from.
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    pub fn pool(&self) -> &ConnectionPoolGuard<D> {
        &self.pool
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    /// Close the instance's pools.
    pub async fn dispose(&self) {
        info!(uid = %self.uid, name = %self.name, "Disposing datasource instance");
        self.pool.close().await;
    }
}

/// Cache of datasource instances keyed by uid.
pub struct InstanceManager<F: DriverFactory> {
    factory: F,
    instances: RwLock<HashMap<String, Arc<DataSourceInstance<F::Driver>>>>,
}

impl<F: DriverFactory> InstanceManager<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the instance for the calling context.
    ///
    /// A cached instance is reused while its settings are unchanged. Newer
    /// settings replace it, and the replaced instance is disposed in the background.
    pub async fn get(&self, ctx: &PluginContext) -> DbResult<Arc<DataSourceInstance<F::Driver>>> {
        let settings = ctx.data_source_instance_settings.as_ref().ok_or_else(|| {
            DbError::settings("Plugin context carries no datasource instance settings")
        })?;

        // Early check for a current instance
        {
            let instances = self.instances.read().await;
            if let Some(instance) = instances
                .get(&settings.uid)
                .filter(|i| i.updated == settings.updated)
            {
                return Ok(Arc::clone(instance));
            }
        }

        let instance = Arc::new(self.create_instance(settings)?);

        // Re-check after creation to prevent TOCTOU race
        let replaced = {
            let mut instances = self.instances.write().await;
            if let Some(existing) = instances
                .get(&settings.uid)
                .filter(|i| i.updated == settings.updated)
            {
                debug!(uid = %settings.uid, "Concurrent instance creation detected, using existing");
                return Ok(Arc::clone(existing));
            }
            instances.insert(settings.uid.clone(), Arc::clone(&instance))
        }; // Lock released here

        if let Some(old) = replaced {
            info!(uid = %old.uid, "Datasource settings changed, replacing instance");
            spawn_dispose(old);
        }

        Ok(instance)
    }

    /// Number of cached instances.
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    /// Dispose every instance.
    pub async fn dispose_all(&self) {
        let mut instances = self.instances.write().await;
        for (_, instance) in instances.drain() {
            instance.dispose().await;
        }
        info!("All datasource instances disposed");
    }

    fn create_instance(
        &self,
        settings: &DataSourceInstanceSettings,
    ) -> DbResult<DataSourceInstance<F::Driver>> {
        let options = settings.options()?;
        let connection_string = ConnectionString::from_settings(settings)?;
        let driver = self.factory.create_driver(settings, &options)?;
        let probe = self.factory.health_probe(&options);

        info!(
            uid = %settings.uid,
            name = %settings.name,
            db_type = %options.driver,
            connection = %connection_string.masked(),
            "Created datasource instance"
        );

        Ok(DataSourceInstance {
            uid: settings.uid.clone(),
            name: settings.name.clone(),
            db_type: options.driver,
            updated: settings.updated,
            pool: ConnectionPoolGuard::new(driver, connection_string),
            probe,
        })
    }
}

impl<F: DriverFactory + std::fmt::Debug> std::fmt::Debug for InstanceManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

fn spawn_dispose<D: Driver>(instance: Arc<DataSourceInstance<D>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { instance.dispose().await });
        }
        Err(_) => warn!(uid = %instance.uid, "No runtime available to dispose replaced instance"),
    }
}
