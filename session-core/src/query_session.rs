//! Query session: one page of documents at a time.
//!
//! The session remembers the selected container, the query text, the page
//! size and where the last successful page ended. Fetches never overlap:
//! a new [`QuerySession::execute`] cancels the running one and waits for it
//! to settle before touching the service.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use common::errors::{AppError, AppResult};
use common::models::QueryPage;
use common::utils::{build_effective_query, DEFAULT_PAGE_SIZE};

use crate::client::{DocumentClient, DocumentQuery, ServiceError};

/// Lifecycle of the session's fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum FetchState {
    #[default]
    Idle,
    Fetching,
    /// The last fetch was superseded or cancelled.
    Cancelled,
}

/// Position in the current result set.
///
/// The service only speaks in optional continuation tokens, where `None`
/// means both "not started" and "exhausted". This keeps the two apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cursor {
    #[default]
    Start,
    Continue(String),
    Exhausted,
}

impl Cursor {
    /// Token to resume from. Exhausted restarts from the first page.
    pub fn token(&self) -> Option<String> {
        match self {
            Cursor::Continue(token) => Some(token.clone()),
            Cursor::Start | Cursor::Exhausted => None,
        }
    }

    fn after(continuation: Option<String>) -> Self {
        match continuation {
            Some(token) => Cursor::Continue(token),
            None => Cursor::Exhausted,
        }
    }
}

struct ActiveFetch {
    id: Uuid,
    token: CancellationToken,
}

struct SessionState {
    database_id: Option<String>,
    container_id: Option<String>,
    query_text: String,
    limit: u32,
    cursor: Cursor,
    fetch_state: FetchState,
    /// Newest registered fetch, running or waiting for its turn.
    active: Option<ActiveFetch>,
}

impl SessionState {
    fn cancel_active(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                tracing::debug!(fetch = %active.id, "cancelling fetch");
                active.token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Paged query execution against the selected container.
pub struct QuerySession {
    // Never held across an await.
    state: Mutex<SessionState>,
    // Held for the whole duration of a fetch.
    turn: tokio::sync::Mutex<()>,
}

/// Settles a fetch whose future is dropped before it finishes.
struct FetchGuard<'a> {
    session: &'a QuerySession,
    fetch_id: Uuid,
    started: bool,
    settled: bool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.session.lock();
        let current = state.active.as_ref().is_some_and(|a| a.id == self.fetch_id);
        clear_if_current(&mut state, self.fetch_id);
        if self.started || current {
            tracing::debug!(fetch = %self.fetch_id, "fetch dropped");
            state.fetch_state = FetchState::Cancelled;
        }
    }
}

impl Default for QuerySession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                database_id: None,
                container_id: None,
                query_text: String::new(),
                limit: DEFAULT_PAGE_SIZE,
                cursor: Cursor::Start,
                fetch_state: FetchState::Idle,
                active: None,
            }),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Selects the container to query and rewinds the cursor.
    pub async fn select(&self, database_id: impl Into<String>, container_id: impl Into<String>) {
        let mut state = self.lock();
        state.cancel_active();
        state.database_id = Some(database_id.into());
        state.container_id = Some(container_id.into());
        state.cursor = Cursor::Start;
    }

    /// Forgets the selection and rewinds the cursor.
    pub async fn clear(&self) {
        let mut state = self.lock();
        state.cancel_active();
        state.database_id = None;
        state.container_id = None;
        state.cursor = Cursor::Start;
    }

    /// Sets the user's query text. A different text rewinds the cursor,
    /// since a continuation token only resumes the query that produced it.
    pub async fn set_query(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.lock();
        if build_effective_query(&state.query_text) != build_effective_query(&text) {
            state.cursor = Cursor::Start;
        }
        state.query_text = text;
    }

    /// Sets the page size; zero falls back to the default.
    pub async fn set_limit(&self, limit: u32) {
        self.lock().limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
    }

    /// Requests cancellation of the running fetch, if any.
    pub async fn cancel(&self) -> bool {
        self.lock().cancel_active()
    }

    pub async fn fetch_state(&self) -> FetchState {
        self.lock().fetch_state
    }

    pub async fn cursor(&self) -> Cursor {
        self.lock().cursor.clone()
    }

    #[cfg(test)]
    async fn active_fetch_id(&self) -> Option<Uuid> {
        self.lock().active.as_ref().map(|active| active.id)
    }

    pub async fn selection(&self) -> Option<(String, String)> {
        let state = self.lock();
        state.database_id.clone().zip(state.container_id.clone())
    }

    /// Fetches the next page of the current query.
    ///
    /// Any fetch still running is cancelled first and this call waits until
    /// it has settled. The cursor moves only on success.
    ///
    /// # Errors
    /// `AppError::Cancelled` when superseded or cancelled, `AppError::Query`
    /// when nothing is selected or the service rejects the query.
    pub async fn execute(&self, client: &dyn DocumentClient) -> AppResult<QueryPage> {
        let fetch_id = Uuid::new_v4();
        let token = CancellationToken::new();
        {
            let mut state = self.lock();
            state.cancel_active();
            state.active = Some(ActiveFetch {
                id: fetch_id,
                token: token.clone(),
            });
        }
        let mut guard = FetchGuard {
            session: self,
            fetch_id,
            started: false,
            settled: false,
        };

        let _turn = self.turn.lock().await;

        let (database_id, container_id, query, limit, continuation) = {
            let mut state = self.lock();
            if token.is_cancelled() {
                tracing::debug!(fetch = %fetch_id, "superseded before start");
                state.fetch_state = FetchState::Cancelled;
                guard.settled = true;
                return Err(AppError::Cancelled);
            }
            let (Some(database_id), Some(container_id)) =
                (state.database_id.clone(), state.container_id.clone())
            else {
                clear_if_current(&mut state, fetch_id);
                guard.settled = true;
                return Err(AppError::Query("no container selected".into()));
            };
            state.fetch_state = FetchState::Fetching;
            guard.started = true;
            (
                database_id,
                container_id,
                build_effective_query(&state.query_text),
                state.limit,
                state.cursor.token(),
            )
        };

        let span = tracing::info_span!("fetch", fetch = %fetch_id, container = %container_id);
        let result = execute_page(
            client,
            &database_id,
            &container_id,
            &query,
            limit,
            continuation,
            &token,
        )
        .instrument(span)
        .await;

        let mut state = self.lock();
        guard.settled = true;
        clear_if_current(&mut state, fetch_id);
        // A reset may have landed between the last page read and this lock.
        let result = match result {
            Ok(_) if token.is_cancelled() => Err(AppError::Cancelled),
            other => other,
        };
        match &result {
            Ok(page) => {
                // The query was edited mid-fetch: its token belongs to the old text.
                if build_effective_query(&state.query_text) == query {
                    state.cursor = Cursor::after(page.continuation_token.clone());
                } else {
                    tracing::debug!(fetch = %fetch_id, "query changed during fetch");
                }
                state.fetch_state = FetchState::Idle;
            }
            Err(AppError::Cancelled) => state.fetch_state = FetchState::Cancelled,
            Err(_) => state.fetch_state = FetchState::Idle,
        }
        result
    }
}

fn clear_if_current(state: &mut SessionState, fetch_id: Uuid) {
    if state.active.as_ref().is_some_and(|active| active.id == fetch_id) {
        state.active = None;
    }
}

/// Runs `query` against one container and returns a single page.
///
/// The whole result set is counted first; when it is empty no bounded fetch
/// is issued. The returned request charge covers only the bounded fetch.
/// Cancellation is checked before and after every page read, so a read
/// already on the wire completes but its result is dropped.
pub async fn execute_page(
    client: &dyn DocumentClient,
    database_id: &str,
    container_id: &str,
    query: &str,
    limit: u32,
    continuation: Option<String>,
    cancel: &CancellationToken,
) -> AppResult<QueryPage> {
    let started = Instant::now();
    let unbounded = DocumentQuery {
        database_id,
        container_id,
        query,
        max_item_count: None,
    };

    let (count, precheck_charge) = count_documents(client, unbounded, cancel).await?;
    if count == 0 {
        tracing::debug!(query, precheck_charge, "query matches no documents");
        return Ok(QueryPage::empty());
    }

    ensure_live(cancel)?;
    let page = client
        .query_documents(
            DocumentQuery {
                max_item_count: Some(limit),
                ..unbounded
            },
            continuation,
        )
        .await
        .map_err(query_error)?;
    ensure_live(cancel)?;

    tracing::debug!(
        query,
        limit,
        count,
        returned = page.items.len(),
        request_charge = page.request_charge,
        precheck_charge,
        has_more = page.continuation.is_some(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "page fetched"
    );
    Ok(QueryPage {
        items: page.items,
        continuation_token: page.continuation,
        request_charge: page.request_charge,
    })
}

/// Counts every document the query returns, reading all pages.
async fn count_documents(
    client: &dyn DocumentClient,
    query: DocumentQuery<'_>,
    cancel: &CancellationToken,
) -> AppResult<(usize, f64)> {
    let mut count = 0;
    let mut charge = 0.0;
    let mut continuation = None;
    loop {
        ensure_live(cancel)?;
        let page = client
            .query_documents(query, continuation.take())
            .await
            .map_err(query_error)?;
        count += page.items.len();
        charge += page.request_charge;
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => return Ok((count, charge)),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> AppResult<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

fn query_error(err: ServiceError) -> AppError {
    AppError::Query(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeDocumentClient, PAGE_CHARGE};

    fn client_with_docs(count: usize) -> Arc<FakeDocumentClient> {
        let client = FakeDocumentClient::new();
        client.add_database("shop");
        client.add_container("shop", "orders");
        client.add_documents("shop", "orders", count);
        client
    }

    async fn selected_session() -> QuerySession {
        let session = QuerySession::new();
        session.select("shop", "orders").await;
        session
    }

    #[tokio::test]
    async fn test_empty_result_skips_bounded_fetch() {
        let client = client_with_docs(0);
        let session = selected_session().await;
        session.set_limit(5).await;

        let page = session.execute(client.as_ref()).await.unwrap();

        assert_eq!(page, QueryPage::empty());
        assert!(page.continuation_token.is_none());
        assert_eq!(page.request_charge, 0.0);
        assert!(client.bounded_queries().is_empty());
        assert_eq!(client.queries().len(), 1);
        assert_eq!(client.queries()[0].query, "SELECT * FROM c");
    }

    #[tokio::test]
    async fn test_pages_through_results() {
        let client = client_with_docs(7);
        let session = selected_session().await;
        session.set_limit(3).await;

        let first = session.execute(client.as_ref()).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first.continuation_token.as_deref(), Some("3"));
        assert_eq!(session.cursor().await, Cursor::Continue("3".into()));

        let second = session.execute(client.as_ref()).await.unwrap();
        assert_eq!(second.items[0]["n"], 3);

        let third = session.execute(client.as_ref()).await.unwrap();
        assert_eq!(third.len(), 1);
        assert!(third.continuation_token.is_none());
        assert_eq!(session.cursor().await, Cursor::Exhausted);

        // Exhausted restarts from the first page.
        let again = session.execute(client.as_ref()).await.unwrap();
        assert_eq!(again.items[0]["n"], 0);

        let continuations: Vec<_> = client
            .bounded_queries()
            .into_iter()
            .map(|q| q.continuation)
            .collect();
        assert_eq!(continuations, vec![None, Some("3".into()), Some("6".into()), None]);
    }

    #[tokio::test]
    async fn test_charge_excludes_precheck() {
        let client = client_with_docs(10);
        let session = selected_session().await;

        let page = session.execute(client.as_ref()).await.unwrap();

        assert_eq!(page.len(), 10);
        assert_eq!(page.request_charge, PAGE_CHARGE);
        // 10 documents at the service page size of 3 take four unbounded reads.
        let unbounded = client.queries().iter().filter(|q| q.max_item_count.is_none()).count();
        assert_eq!(unbounded, 4);
    }

    #[tokio::test]
    async fn test_fragment_and_limit_reach_the_service() {
        let client = client_with_docs(4);
        let session = selected_session().await;
        session.set_query("WHERE c.type = 'order'").await;
        session.set_limit(2).await;

        session.execute(client.as_ref()).await.unwrap();

        let bounded = client.bounded_queries();
        assert_eq!(bounded[0].query, "SELECT * FROM c WHERE c.type = 'order'");
        assert_eq!(bounded[0].max_item_count, Some(2));
    }

    #[tokio::test]
    async fn test_changing_query_rewinds_cursor() {
        let client = client_with_docs(5);
        let session = selected_session().await;
        session.set_limit(2).await;
        session.execute(client.as_ref()).await.unwrap();
        assert_eq!(session.cursor().await, Cursor::Continue("2".into()));

        session.set_query("").await;
        assert_eq!(session.cursor().await, Cursor::Continue("2".into()));

        session.set_query("ORDER BY c.n").await;
        assert_eq!(session.cursor().await, Cursor::Start);
    }

    #[tokio::test]
    async fn test_failure_keeps_cursor() {
        let client = client_with_docs(5);
        let session = selected_session().await;
        session.set_limit(2).await;
        session.execute(client.as_ref()).await.unwrap();

        client.fail_queries("Syntax error, incorrect syntax near 'WHER'.");
        let err = session.execute(client.as_ref()).await.unwrap_err();

        assert!(matches!(err, AppError::Query(message) if message.contains("WHER")));
        assert_eq!(session.cursor().await, Cursor::Continue("2".into()));
        assert_eq!(session.fetch_state().await, FetchState::Idle);
    }

    #[tokio::test]
    async fn test_without_selection_is_query_error() {
        let client = client_with_docs(1);
        let session = QuerySession::new();
        let err = session.execute(client.as_ref()).await.unwrap_err();
        assert!(matches!(err, AppError::Query(_)));
        assert!(client.queries().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_cursor() {
        let client = client_with_docs(6);
        let session = Arc::new(selected_session().await);
        session.set_limit(2).await;
        session.execute(client.as_ref()).await.unwrap();
        let before = session.cursor().await;

        let gate = client.gate_bounded_fetches();
        let running = {
            let session = Arc::clone(&session);
            let client = Arc::clone(&client);
            tokio::spawn(async move { session.execute(client.as_ref()).await })
        };
        client.wait_until_gated().await;
        assert_eq!(session.fetch_state().await, FetchState::Fetching);

        assert!(session.cancel().await);
        gate.add_permits(1);

        let err = running.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(session.cursor().await, before);
        assert_eq!(session.fetch_state().await, FetchState::Cancelled);
        assert!(!session.cancel().await);
    }

    #[tokio::test]
    async fn test_new_execute_supersedes_running_fetch() {
        let client = client_with_docs(6);
        let session = Arc::new(selected_session().await);
        session.set_limit(2).await;
        let gate = client.gate_bounded_fetches();

        let first = {
            let session = Arc::clone(&session);
            let client = Arc::clone(&client);
            tokio::spawn(async move { session.execute(client.as_ref()).await })
        };
        client.wait_until_gated().await;
        let first_id = session.active_fetch_id().await;

        let second = {
            let session = Arc::clone(&session);
            let client = Arc::clone(&client);
            tokio::spawn(async move { session.execute(client.as_ref()).await })
        };
        // Wait for the second call to register and queue behind the first.
        while session.active_fetch_id().await == first_id {
            tokio::task::yield_now().await;
        }
        gate.add_permits(2);

        let first = first.await.unwrap();
        let second = second.await.unwrap().unwrap();

        assert!(matches!(first, Err(AppError::Cancelled)));
        assert_eq!(second.items[0]["n"], 0);
        assert_eq!(session.cursor().await, Cursor::Continue("2".into()));
        assert_eq!(session.fetch_state().await, FetchState::Idle);
        assert_eq!(client.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_query_edit_during_fetch_keeps_cursor_at_start() {
        let client = client_with_docs(5);
        let session = Arc::new(selected_session().await);
        session.set_limit(2).await;
        let gate = client.gate_bounded_fetches();

        let running = {
            let session = Arc::clone(&session);
            let client = Arc::clone(&client);
            tokio::spawn(async move { session.execute(client.as_ref()).await })
        };
        client.wait_until_gated().await;
        session.set_query("ORDER BY c.n DESC").await;
        gate.add_permits(1);

        let page = running.await.unwrap().unwrap();
        assert_eq!(page.continuation_token.as_deref(), Some("2"));
        assert_eq!(session.cursor().await, Cursor::Start);

        gate.add_permits(1);
        session.execute(client.as_ref()).await.unwrap();
        let last = client.bounded_queries().pop().unwrap();
        assert_eq!(last.query, "SELECT * FROM c ORDER BY c.n DESC");
        assert_eq!(last.continuation, None);
    }

    #[tokio::test]
    async fn test_dropped_fetch_settles_session() {
        let client = client_with_docs(6);
        let session = Arc::new(selected_session().await);
        session.set_limit(2).await;
        let gate = client.gate_bounded_fetches();

        let running = {
            let session = Arc::clone(&session);
            let client = Arc::clone(&client);
            tokio::spawn(async move { session.execute(client.as_ref()).await })
        };
        client.wait_until_gated().await;
        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());

        assert_eq!(session.fetch_state().await, FetchState::Cancelled);
        assert_eq!(session.active_fetch_id().await, None);
        assert!(!session.cancel().await);
        assert_eq!(session.cursor().await, Cursor::Start);

        gate.add_permits(1);
        let page = session.execute(client.as_ref()).await.unwrap();
        assert_eq!(page.items[0]["n"], 0);
        assert_eq!(session.fetch_state().await, FetchState::Idle);
    }

    #[tokio::test]
    async fn test_select_cancels_running_fetch() {
        let client = client_with_docs(6);
        client.add_container("shop", "archive");
        let session = Arc::new(selected_session().await);
        let gate = client.gate_bounded_fetches();

        let running = {
            let session = Arc::clone(&session);
            let client = Arc::clone(&client);
            tokio::spawn(async move { session.execute(client.as_ref()).await })
        };
        client.wait_until_gated().await;
        session.select("shop", "archive").await;
        gate.add_permits(1);

        assert!(running.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(session.cursor().await, Cursor::Start);
        assert_eq!(
            session.selection().await,
            Some(("shop".to_string(), "archive".to_string()))
        );
    }
}
