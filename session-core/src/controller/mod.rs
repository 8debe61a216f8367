//! Session controller.
//!
//! Runs the seven user commands on top of the client factory, the catalog
//! browser and the query session. Every change produces a new
//! [`SessionSnapshot`] on a watch channel; failures of the backing service
//! become output text and never fail the command itself.

mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex, RwLock};
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{ConnectionProfile, QueryPage, SessionInputRequest};
use common::utils::parse_limit;

use crate::catalog::CatalogBrowser;
use crate::client::{ClientConnector, DocumentClient};
use crate::factory::ClientFactory;
use crate::query_session::{FetchState, QuerySession};
use crate::store::ConnectionStore;

pub use snapshot::{Command, CommandBoard, CommandState, SessionSnapshot};
use snapshot::status_line;

/// Figures of the last page that was fetched successfully.
#[derive(Debug, Default, Clone, Copy)]
struct PageStats {
    request_charge: f64,
    loaded: usize,
}

/// Orchestrates one user session.
pub struct SessionController {
    store: Arc<dyn ConnectionStore>,
    connector: Arc<dyn ClientConnector>,
    factory: RwLock<Option<Arc<ClientFactory>>>,
    session: QuerySession,
    last_page: Mutex<PageStats>,
    /// Bumped by every command that resets the selection.
    resets: AtomicU64,
    state: watch::Sender<SessionSnapshot>,
}

/// Clears a command's running flag when the command returns.
struct RunningGuard<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
    command: Command,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let command = self.command;
        self.state.send_modify(|s| {
            s.set_running(command, false);
            s.revision += 1;
        });
    }
}

/// Publishes a cancelled Execute if its future is dropped mid-fetch.
struct PendingExecute<'a> {
    controller: &'a SessionController,
    resets: u64,
    settled: bool,
}

impl Drop for PendingExecute<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::info!("execute dropped");
        let resets = self.resets;
        self.controller.update_unless_reset(resets, |s| {
            s.output_log = format!("{}\n", AppError::Cancelled);
            s.fetch_state = FetchState::Cancelled;
        });
    }
}

impl SessionController {
    /// Loads the saved connections; the first one becomes the input.
    pub async fn new(
        store: Arc<dyn ConnectionStore>,
        connector: Arc<dyn ClientConnector>,
    ) -> AppResult<Self> {
        let saved = store.list_all().await?;
        tracing::info!(saved = saved.len(), "session controller started");

        let mut initial = SessionSnapshot {
            connection_string: saved.first().cloned().unwrap_or_default(),
            connection_strings: saved,
            ..Default::default()
        };
        initial.recompute();
        let (state, _) = watch::channel(initial);

        Ok(Self {
            store,
            connector,
            factory: RwLock::new(None),
            session: QuerySession::new(),
            last_page: Mutex::new(PageStats::default()),
            resets: AtomicU64::new(0),
            state,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    fn update(&self, change: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_modify(|s| {
            change(s);
            s.recompute();
            s.revision += 1;
        });
    }

    /// Applies `change` only if no reset happened since `resets` was read.
    /// Returns whether it was applied.
    fn update_unless_reset(&self, resets: u64, change: impl FnOnce(&mut SessionSnapshot)) -> bool {
        self.state.send_if_modified(|s| {
            if self.is_reset_since(resets) {
                return false;
            }
            change(s);
            s.recompute();
            s.revision += 1;
            true
        })
    }

    fn begin_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks `command` as running, or rejects it when disabled.
    fn begin(&self, command: Command) -> AppResult<RunningGuard<'_>> {
        let mut accepted = false;
        self.state.send_if_modified(|s| {
            if !s.is_enabled(command) {
                return false;
            }
            s.set_running(command, true);
            s.revision += 1;
            accepted = true;
            true
        });
        if !accepted {
            tracing::debug!(command = command.name(), "command rejected");
            return Err(AppError::CommandDisabled(command.name()));
        }
        Ok(RunningGuard {
            state: &self.state,
            command,
        })
    }

    async fn client(&self) -> AppResult<Arc<dyn DocumentClient>> {
        let factory = self
            .factory
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Connection("not connected".into()))?;
        factory.get_client().await
    }

    pub fn set_connection_string(&self, value: impl Into<String>) {
        let value = value.into();
        self.update(|s| s.connection_string = value);
    }

    pub async fn set_query(&self, text: impl Into<String>) {
        let text = text.into();
        self.session.set_query(text.clone()).await;
        self.update(|s| s.query = text);
    }

    pub async fn set_limit(&self, text: impl Into<String>) {
        let text = text.into();
        self.session.set_limit(parse_limit(Some(&text))).await;
        self.update(|s| s.limit = text);
    }

    /// Applies whichever inputs the request carries.
    pub async fn apply_input(&self, input: SessionInputRequest) -> AppResult<()> {
        input.validate()?;
        if let Some(connection_string) = input.connection_string {
            self.set_connection_string(connection_string);
        }
        if let Some(query) = input.query {
            self.set_query(query).await;
        }
        if let Some(limit) = input.limit {
            self.set_limit(limit).await;
        }
        Ok(())
    }

    /// Saves the connection string input, without its trailing `;`.
    pub async fn save_connection(&self) -> AppResult<()> {
        let _running = self.begin(Command::SaveConnection)?;
        let profile = ConnectionProfile::parse(&self.snapshot().connection_string)?;

        self.store.append(profile.as_str()).await?;
        tracing::info!("connection string saved");
        self.update(|s| s.connection_strings.push(profile.into_inner()));
        Ok(())
    }

    pub async fn delete_connection(&self) -> AppResult<()> {
        let _running = self.begin(Command::DeleteConnection)?;
        let input = self.snapshot().connection_string;
        let saved = ConnectionProfile::normalize(&input).to_string();

        self.store.remove(&saved).await?;
        tracing::info!("connection string deleted");
        self.update(|s| {
            if let Some(index) = s.connection_strings.iter().position(|c| *c == saved) {
                s.connection_strings.remove(index);
            }
        });
        Ok(())
    }

    /// Resets the session, replaces the client and lists the databases.
    pub async fn connect(&self) -> AppResult<()> {
        let _running = self.begin(Command::Connect)?;
        let connection_string = self.snapshot().connection_string;

        self.begin_reset();
        self.session.clear().await;
        *self.last_page.lock().await = PageStats::default();
        self.update(|s| {
            s.reset_downstream();
            s.output_log = format!("Connecting to\n\"{connection_string}\"\n\n");
        });

        let factory = Arc::new(ClientFactory::new(
            connection_string,
            Arc::clone(&self.connector),
        ));
        let previous = self.factory.write().await.replace(Arc::clone(&factory));
        if let Some(previous) = previous {
            previous.dispose().await;
        }

        let listed = match factory.get_client().await {
            Ok(client) => CatalogBrowser::new(client).list_databases().await,
            Err(e) => Err(e),
        };
        match listed {
            Ok(databases) => {
                let count = databases.len();
                tracing::info!(endpoint = factory.endpoint(), databases = count, "connected");
                self.update(|s| {
                    s.output_log.push_str(&format!("Loaded {count} database(s)\n\n"));
                    s.databases = databases;
                });
            }
            Err(e) => {
                tracing::warn!(endpoint = factory.endpoint(), error = %e, "connect failed");
                self.update(|s| s.output_log.push_str(&format!("{e}\n")));
            }
        }
        Ok(())
    }

    /// Selects a database and lists its containers.
    pub async fn select_database(&self, id: &str) -> AppResult<()> {
        let _running = self.begin(Command::SelectDatabase)?;
        if !self.snapshot().databases.iter().any(|db| db.id == id) {
            return Err(AppError::Validation(format!("unknown database '{id}'")));
        }

        self.begin_reset();
        self.session.clear().await;
        self.update(|s| {
            s.database = Some(id.to_string());
            s.container = None;
            s.containers.clear();
            s.fetch_state = FetchState::Idle;
            s.output_log.push_str(&format!("Retrieving '{id}' containers\n"));
        });

        let listed = match self.client().await {
            Ok(client) => CatalogBrowser::new(client).list_containers(id).await,
            Err(e) => Err(e),
        };
        match listed {
            Ok(containers) => {
                let count = containers.len();
                tracing::info!(database = id, containers = count, "database selected");
                self.update(|s| {
                    s.output_log.push_str(&format!("Loaded {count} container(s)\n\n"));
                    s.containers = containers;
                });
            }
            Err(e) => {
                tracing::warn!(database = id, error = %e, "container listing failed");
                self.update(|s| s.output_log.push_str(&format!("{e}\n")));
            }
        }
        Ok(())
    }

    /// Points the query session at a container of the selected database.
    pub async fn select_container(&self, id: &str) -> AppResult<()> {
        let _running = self.begin(Command::SelectContainer)?;
        let snapshot = self.snapshot();
        let database = match snapshot.database {
            Some(database) if snapshot.containers.iter().any(|c| c.id == id) => database,
            _ => return Err(AppError::Validation(format!("unknown container '{id}'"))),
        };

        self.begin_reset();
        self.session.select(database.as_str(), id).await;
        *self.last_page.lock().await = PageStats::default();
        tracing::info!(database = %database, container = id, "container selected");
        self.update(|s| {
            s.container = Some(id.to_string());
            s.fetch_state = FetchState::Idle;
            s.output_log.push_str(&format!("'{id}' selected\n"));
        });
        Ok(())
    }

    /// Fetches the next page and renders it into the output.
    pub async fn execute(&self) -> AppResult<()> {
        let _running = self.begin(Command::Execute)?;
        let started = Instant::now();
        let mut pending = PendingExecute {
            controller: self,
            resets: self.resets.load(Ordering::SeqCst),
            settled: false,
        };
        self.update(|s| {
            s.output_log = "Loading Documents".into();
            s.status_output.clear();
            s.fetch_state = FetchState::Fetching;
        });

        let result = match self.client().await {
            Ok(client) => self.session.execute(client.as_ref()).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        let stats = {
            let mut last_page = self.last_page.lock().await;
            if let (Ok(page), false) = (&result, self.is_reset_since(pending.resets)) {
                *last_page = PageStats {
                    request_charge: page.request_charge,
                    loaded: page.len(),
                };
            }
            *last_page
        };
        let output = match &result {
            Ok(page) => render(page),
            Err(e) => format!("{e}\n"),
        };
        let fetch_state = self.session.fetch_state().await;
        pending.settled = true;

        match &result {
            Ok(page) => tracing::info!(
                returned = page.len(),
                request_charge = page.request_charge,
                elapsed_ms = elapsed.as_millis() as u64,
                "execute finished"
            ),
            Err(e) if e.is_cancelled() => tracing::info!("execute cancelled"),
            Err(e) => tracing::warn!(error = %e, "execute failed"),
        }

        let published = self.update_unless_reset(pending.resets, |s| {
            s.output_log = output;
            s.status_output = status_line(elapsed, stats.request_charge, stats.loaded);
            s.fetch_state = fetch_state;
        });
        if !published {
            tracing::debug!("execute superseded by a reset");
        }
        Ok(())
    }

    fn is_reset_since(&self, resets: u64) -> bool {
        self.resets.load(Ordering::SeqCst) != resets
    }

    /// Signals the running fetch to stop at its next page boundary.
    pub async fn cancel_execution(&self) -> AppResult<()> {
        let _running = self.begin(Command::CancelExecution)?;
        let cancelled = self.session.cancel().await;
        tracing::debug!(cancelled, "cancel requested");
        Ok(())
    }

    /// Ends the session: stops any fetch and releases the client.
    pub async fn shutdown(&self) {
        self.session.cancel().await;
        if let Some(factory) = self.factory.write().await.take() {
            factory.dispose().await;
        }
        tracing::info!("session controller shut down");
    }
}

fn render(page: &QueryPage) -> String {
    match serde_json::to_string_pretty(&page.items) {
        Ok(json) => json + "\n",
        Err(e) => format!("{e}\n"),
    }
}
