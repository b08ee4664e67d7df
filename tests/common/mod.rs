//! Shared test doubles: a scripted, fault-injecting driver that counts every
//! acquire, release, and cursor it hands out.
//!
//! A backend built with [`StubBackend::with_capacity`] also behaves like a
//! bounded pool: checkouts wait for a free slot and closing waits until every
//! connection has come back.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db_frame_datasource::datasource::DriverFactory;
use db_frame_datasource::db::{
    ColumnDescriptor, Connection, Cursor, Driver, LifetimeHint, PoolHandle, RawRow, RawValue,
    Statement,
};
use db_frame_datasource::error::{DbError, DbResult};
use db_frame_datasource::models::{
    ConnectionString, DataSourceInstanceSettings, DataSourceOptions, PluginContext,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Statement the stub answers with the current timestamp.
pub const HEALTH_SQL: &str = "SELECT CURRENT_TIMESTAMP";

/// Stage at which a scripted statement fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultStage {
    #[default]
    None,
    Prepare,
    Execute,
    Columns,
    /// Fail when the row with this index is fetched
    Scan(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<RawRow>,
    pub fault: FaultStage,
}

impl Script {
    pub fn new(columns: &[(&str, &str)], rows: Vec<RawRow>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnDescriptor::new(*name, *ty))
                .collect(),
            rows,
            fault: FaultStage::None,
        }
    }

    pub fn failing_at(mut self, fault: FaultStage) -> Self {
        self.fault = fault;
        self
    }
}

/// Everything the stub observed.
#[derive(Debug, Default)]
pub struct Counters {
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    pub prepares: AtomicUsize,
    pub cursors_opened: AtomicUsize,
    pub cursors_closed: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn cursors_opened(&self) -> usize {
        self.cursors_opened.load(Ordering::SeqCst)
    }

    pub fn cursors_closed(&self) -> usize {
        self.cursors_closed.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Scripted backend shared by every stub driver and connection.
#[derive(Debug, Default)]
pub struct StubBackend {
    scripts: Mutex<HashMap<String, Script>>,
    hints: Mutex<Vec<LifetimeHint>>,
    fail_acquire: AtomicBool,
    capacity: Option<(Arc<Semaphore>, u32)>,
    pub counters: Counters,
}

impl StubBackend {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// A backend that hands out at most `max_connections` at a time.
    pub fn with_capacity(max_connections: u32) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(max_connections as usize));
        Self::build(Some((slots, max_connections)))
    }

    fn build(capacity: Option<(Arc<Semaphore>, u32)>) -> Arc<Self> {
        let backend = Arc::new(Self {
            capacity,
            ..Self::default()
        });
        backend.script(
            HEALTH_SQL,
            Script::new(
                &[("CURRENT_TIMESTAMP", "timestamp")],
                vec![vec!["2024-06-01 12:00:00".into()]],
            ),
        );
        backend
    }

    /// Answer `sql` with a script. Unscripted statements fail at execution.
    pub fn script(&self, sql: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(sql.to_string(), script);
    }

    pub fn fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn hints(&self) -> Vec<LifetimeHint> {
        self.hints.lock().unwrap().clone()
    }

    fn lookup(&self, sql: &str) -> Option<Script> {
        self.scripts.lock().unwrap().get(sql).cloned()
    }
}

pub struct StubDriver {
    backend: Arc<StubBackend>,
}

impl StubDriver {
    pub fn new(backend: Arc<StubBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Driver for StubDriver {
    type Connection = StubConnection;
    type Pool = StubPool;

    async fn pool(
        &mut self,
        _connection_string: &ConnectionString,
        hint: LifetimeHint,
    ) -> DbResult<StubPool> {
        self.backend.hints.lock().unwrap().push(hint);
        Ok(StubPool {
            backend: Arc::clone(&self.backend),
        })
    }

    async fn release(&mut self, _connection: StubConnection) {
        self.backend.counters.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn take_pools(&mut self) -> Vec<StubPool> {
        vec![StubPool {
            backend: Arc::clone(&self.backend),
        }]
    }
}

#[derive(Clone)]
pub struct StubPool {
    backend: Arc<StubBackend>,
}

#[async_trait]
impl PoolHandle for StubPool {
    type Connection = StubConnection;

    async fn checkout(&self) -> DbResult<StubConnection> {
        if self.backend.fail_acquire.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                "connection refused",
                "Check that the server is running",
            ));
        }
        let slot = match &self.backend.capacity {
            Some((slots, _)) => Some(
                Arc::clone(slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| DbError::connection("pool closed", "Recreate the pool"))?,
            ),
            None => None,
        };
        self.backend.counters.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(StubConnection {
            backend: Arc::clone(&self.backend),
            _slot: slot,
        })
    }

    async fn close(&self) {
        if let Some((slots, max_connections)) = &self.backend.capacity {
            // Resolves only once every checked-out connection is back
            if let Ok(all) = slots.acquire_many(*max_connections).await {
                all.forget();
                slots.close();
            }
        }
        self.backend.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct StubConnection {
    backend: Arc<StubBackend>,
    _slot: Option<OwnedSemaphorePermit>,
}

impl StubConnection {
    pub fn new(backend: Arc<StubBackend>) -> Self {
        Self {
            backend,
            _slot: None,
        }
    }
}

#[async_trait]
impl Connection for StubConnection {
    async fn prepare<'c>(&'c mut self, sql: &'c str) -> DbResult<Box<dyn Statement<'c> + 'c>> {
        self.backend.counters.prepares.fetch_add(1, Ordering::SeqCst);
        let script = match self.backend.lookup(sql) {
            Some(script) => script,
            None => {
                return Ok(Box::new(StubStatement {
                    script: Script::default().failing_at(FaultStage::Execute),
                    backend: Arc::clone(&self.backend),
                }));
            }
        };
        if script.fault == FaultStage::Prepare {
            return Err(DbError::database(
                "syntax error at or near \"SELEC\"",
                Some("42601".to_string()),
                "Check the SQL syntax and referenced objects",
            ));
        }
        Ok(Box::new(StubStatement {
            script,
            backend: Arc::clone(&self.backend),
        }))
    }
}

struct StubStatement {
    script: Script,
    backend: Arc<StubBackend>,
}

#[async_trait]
impl<'c> Statement<'c> for StubStatement {
    async fn query(self: Box<Self>) -> DbResult<Box<dyn Cursor + 'c>> {
        if self.script.fault == FaultStage::Execute {
            return Err(DbError::database(
                "relation \"missing_table\" does not exist",
                Some("42P01".to_string()),
                "Check the SQL syntax and referenced objects",
            ));
        }
        self.backend
            .counters
            .cursors_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubCursor {
            script: self.script,
            backend: self.backend,
            position: 0,
        }))
    }
}

struct StubCursor {
    script: Script,
    backend: Arc<StubBackend>,
    position: usize,
}

#[async_trait]
impl Cursor for StubCursor {
    fn columns(&self) -> DbResult<Vec<ColumnDescriptor>> {
        if self.script.fault == FaultStage::Columns {
            return Err(DbError::internal("column metadata unavailable"));
        }
        Ok(self.script.columns.clone())
    }

    async fn next_row(&mut self) -> DbResult<Option<RawRow>> {
        if self.script.fault == FaultStage::Scan(self.position) {
            return Err(DbError::scan(self.position, "connection reset while fetching"));
        }
        let row = self.script.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.backend
            .counters
            .cursors_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing every instance a driver over the same backend.
#[derive(Debug, Clone)]
pub struct StubFactory {
    pub backend: Arc<StubBackend>,
}

impl StubFactory {
    pub fn new(backend: Arc<StubBackend>) -> Self {
        Self { backend }
    }
}

impl DriverFactory for StubFactory {
    type Driver = StubDriver;

    fn create_driver(
        &self,
        _settings: &DataSourceInstanceSettings,
        _options: &DataSourceOptions,
    ) -> DbResult<StubDriver> {
        Ok(StubDriver::new(Arc::clone(&self.backend)))
    }
}

pub fn settings(uid: &str, updated: DateTime<Utc>) -> DataSourceInstanceSettings {
    DataSourceInstanceSettings {
        id: 1,
        uid: uid.to_string(),
        name: format!("{uid}-name"),
        json_data: serde_json::json!({
            "host": "db.local",
            "port": 5432,
            "database": "metrics",
            "user": "reader"
        }),
        decrypted_secure_json_data: HashMap::from([(
            "password".to_string(),
            "s3cret".to_string(),
        )]),
        updated,
    }
}

pub fn context(settings: DataSourceInstanceSettings) -> PluginContext {
    PluginContext {
        org_id: 1,
        data_source_instance_settings: Some(settings),
    }
}

pub fn text(value: &str) -> RawValue {
    RawValue::Text(value.to_string())
}
