//! Request handlers, independent of the transport.
//!
//! Every handler resolves the caller's identity for the table first, then
//! calls into the engine. Handlers block (the engine waits on the table
//! lock), so async transports run them on a blocking thread.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use rowsync_engine::{DataManager, Identity, PermissionResolver, SyncEngine};
use rowsync_protocol::{
    ChangeSetList, ChangeSetRowsRequest, ChangeSetsSinceRequest, ColumnDefinition, DataETag,
    ResolveRequest, Row, RowETag, RowList, RowOutcomeList, RowResourceList, RowsSinceRequest,
    TableResource,
};
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Engine shared by every request.
    pub engine: SyncEngine,
    resolver: Arc<dyn PermissionResolver>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        engine: SyncEngine,
        resolver: Arc<dyn PermissionResolver>,
    ) -> Self {
        Self {
            config,
            engine,
            resolver,
        }
    }

    fn identity(&self, user_id: &str, table_id: &str) -> ServerResult<Identity> {
        if user_id.is_empty() {
            return Err(ServerError::MissingIdentity);
        }
        Ok(self.resolver.resolve(user_id, table_id)?)
    }
}

/// Handler for sync requests.
#[derive(Clone)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The shared context.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    fn data(&self, user_id: &str, table_id: &str) -> ServerResult<DataManager<'_>> {
        let identity = self.context.identity(user_id, table_id)?;
        Ok(self.context.engine.data(table_id, identity)?)
    }

    /// Lists every table.
    pub fn handle_list_tables(&self, user_id: &str) -> ServerResult<Vec<TableResource>> {
        let identity = self.context.identity(user_id, "")?;
        Ok(self.context.engine.tables(&identity).list_tables()?)
    }

    /// Creates a table.
    pub fn handle_create_table(
        &self,
        user_id: &str,
        table_id: &str,
        columns: Vec<ColumnDefinition>,
    ) -> ServerResult<TableResource> {
        let identity = self.context.identity(user_id, table_id)?;
        Ok(self
            .context
            .engine
            .tables(&identity)
            .create_table(table_id, columns)?)
    }

    /// Describes a table.
    pub fn handle_get_table(&self, user_id: &str, table_id: &str) -> ServerResult<TableResource> {
        let identity = self.context.identity(user_id, table_id)?;
        Ok(self.context.engine.tables(&identity).get_table(table_id)?)
    }

    /// Deletes a table.
    pub fn handle_delete_table(&self, user_id: &str, table_id: &str) -> ServerResult<()> {
        let identity = self.context.identity(user_id, table_id)?;
        Ok(self.context.engine.tables(&identity).delete_table(table_id)?)
    }

    /// Handles a rows-since request.
    pub fn handle_rows_since(
        &self,
        user_id: &str,
        table_id: &str,
        request: RowsSinceRequest,
    ) -> ServerResult<RowResourceList> {
        let data = self.data(user_id, table_id)?;
        Ok(data.rows_since(
            request.data_etag.as_ref(),
            request.cursor.as_deref(),
            request.fetch_limit,
        )?)
    }

    /// Handles a changesets-since request.
    pub fn handle_change_sets_since(
        &self,
        user_id: &str,
        table_id: &str,
        request: ChangeSetsSinceRequest,
    ) -> ServerResult<ChangeSetList> {
        let data = self.data(user_id, table_id)?;
        Ok(data.change_sets_since(request.data_etag.as_ref(), request.sequence_value)?)
    }

    /// Handles a changeset-rows request.
    pub fn handle_change_set_rows(
        &self,
        user_id: &str,
        table_id: &str,
        request: ChangeSetRowsRequest,
    ) -> ServerResult<RowResourceList> {
        let data = self.data(user_id, table_id)?;
        Ok(data.change_set_rows(
            &request.data_etag,
            request.active_only,
            request.cursor.as_deref(),
            request.fetch_limit,
        )?)
    }

    /// Lists live rows.
    pub fn handle_get_rows(
        &self,
        user_id: &str,
        table_id: &str,
        cursor: Option<&str>,
        fetch_limit: Option<usize>,
    ) -> ServerResult<RowResourceList> {
        Ok(self.data(user_id, table_id)?.get_rows(cursor, fetch_limit)?)
    }

    /// Reads one row.
    pub fn handle_get_row(&self, user_id: &str, table_id: &str, row_id: &str) -> ServerResult<Row> {
        Ok(self.data(user_id, table_id)?.get_row(row_id)?)
    }

    /// Writes one row.
    pub fn handle_put_row(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
        row: Row,
    ) -> ServerResult<Row> {
        if row.row_id != row_id {
            return Err(ServerError::InvalidRequest(format!(
                "body row {} does not match path row {row_id}",
                row.row_id
            )));
        }
        Ok(self.data(user_id, table_id)?.insert_or_update_row(row)?)
    }

    /// Writes a batch of rows as one changeset.
    pub fn handle_put_rows(
        &self,
        user_id: &str,
        table_id: &str,
        request: RowList,
    ) -> ServerResult<RowOutcomeList> {
        let max = self.context.config.max_push_batch;
        if request.rows.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many rows: {} > {max}",
                request.rows.len()
            )));
        }
        let data = self.data(user_id, table_id)?;
        Ok(data.insert_or_update_rows(request.rows, request.data_etag.as_ref())?)
    }

    /// Deletes one row.
    pub fn handle_delete_row(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
        row_etag: Option<RowETag>,
    ) -> ServerResult<DataETag> {
        Ok(self
            .data(user_id, table_id)?
            .delete_row(row_id, row_etag.as_ref())?)
    }

    /// Acknowledges rows a client has synced.
    pub fn handle_acknowledge(
        &self,
        user_id: &str,
        table_id: &str,
        through: &DataETag,
    ) -> ServerResult<usize> {
        Ok(self.data(user_id, table_id)?.acknowledge_synced(through)?)
    }

    /// Confirms files referenced by a row.
    pub fn handle_confirm_files(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
        files: &[String],
    ) -> ServerResult<Row> {
        Ok(self.data(user_id, table_id)?.confirm_files(row_id, files)?)
    }

    /// Resolves a conflicted row.
    pub fn handle_resolve(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
        request: ResolveRequest,
    ) -> ServerResult<Row> {
        Ok(self
            .data(user_id, table_id)?
            .resolve_conflict(row_id, request.resolution, request.row)?)
    }

    /// Purges tombstones up to a changeset.
    pub fn handle_purge(
        &self,
        user_id: &str,
        table_id: &str,
        through: &DataETag,
    ) -> ServerResult<usize> {
        Ok(self.data(user_id, table_id)?.purge_tombstones(through)?)
    }

    /// The table's current dataETag, for the response `ETag` header.
    pub fn current_data_etag(&self, table_id: &str) -> Option<DataETag> {
        // identity is irrelevant for the tag itself
        self.context
            .engine
            .data(table_id, Identity::new(""))
            .and_then(|data| data.data_etag())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_engine::{AclTable, Role};
    use rowsync_protocol::{ConflictResolution, OutcomeKind, Scope};
    use rowsync_storage::{InMemoryBackend, InMemoryLockTable};

    fn create_handler() -> RequestHandler {
        let engine = SyncEngine::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryLockTable::new()),
        );
        let acl = AclTable::new()
            .with_grant(Scope::User("admin".into()), Role::Administer)
            .with_grant(Scope::Default, Role::Synchronize);
        let context = Arc::new(HandlerContext::new(
            ServerConfig::default().with_max_push_batch(3),
            engine,
            Arc::new(acl),
        ));
        let handler = RequestHandler::new(context);
        handler
            .handle_create_table("admin", "people", vec![ColumnDefinition::new("name")])
            .unwrap();
        handler
    }

    #[test]
    fn missing_identity_is_rejected() {
        let handler = create_handler();
        let err = handler.handle_get_row("", "people", "r1").unwrap_err();
        assert!(matches!(err, ServerError::MissingIdentity));
    }

    #[test]
    fn only_admins_create_tables() {
        let handler = create_handler();
        let err = handler
            .handle_create_table("bob", "other", vec![])
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(handler.handle_list_tables("bob").unwrap().len(), 1);
    }

    #[test]
    fn write_then_diff() {
        let handler = create_handler();
        let row = handler
            .handle_put_row("bob", "people", "r1", Row::new("r1").with_value("name", "x"))
            .unwrap();
        assert!(row.row_etag.is_some());

        let page = handler
            .handle_rows_since("bob", "people", RowsSinceRequest::default())
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(handler.current_data_etag("people"), page.data_etag);
    }

    #[test]
    fn path_and_body_row_must_agree() {
        let handler = create_handler();
        let err = handler
            .handle_put_row("bob", "people", "r1", Row::new("r2"))
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn bulk_size_is_capped() {
        let handler = create_handler();
        let current = handler.current_data_etag("people");
        let request = RowList {
            rows: (0..4).map(|i| Row::new(format!("r{i}"))).collect(),
            data_etag: current.clone(),
        };
        assert!(handler.handle_put_rows("bob", "people", request).is_err());

        let request = RowList {
            rows: vec![Row::new("a"), Row::new("b")],
            data_etag: current,
        };
        let outcome = handler.handle_put_rows("bob", "people", request).unwrap();
        assert!(outcome.rows.iter().all(|o| o.outcome == OutcomeKind::Success));
    }

    #[test]
    fn resolve_requires_conflict() {
        let handler = create_handler();
        handler
            .handle_put_row("bob", "people", "r1", Row::new("r1"))
            .unwrap();
        let err = handler
            .handle_resolve(
                "bob",
                "people",
                "r1",
                ResolveRequest {
                    resolution: ConflictResolution::AcceptRemote,
                    row: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }
}
