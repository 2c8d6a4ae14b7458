//! HTTP binding.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/tables` | list tables |
//! | GET, PUT, DELETE | `/tables/:table_id` | describe, create, delete a table |
//! | GET | `/tables/:table_id/diff` | rows since a dataETag |
//! | GET | `/tables/:table_id/diff/changeSets` | changesets since a point |
//! | GET | `/tables/:table_id/diff/changeSets/:data_etag` | rows of one changeset |
//! | GET, PUT | `/tables/:table_id/rows` | list rows, bulk write |
//! | GET, PUT, DELETE | `/tables/:table_id/rows/:row_id` | read, write, delete a row |
//! | POST | `/tables/:table_id/rows/:row_id/files` | confirm files |
//! | POST | `/tables/:table_id/rows/:row_id/resolve` | resolve a conflict |
//! | POST | `/tables/:table_id/ack` | acknowledge a sync |
//! | POST | `/tables/:table_id/purge` | purge tombstones |
//!
//! The caller is named by the `X-Rowsync-User` header. Every response
//! carries `X-Rowsync-Version`; responses about a table carry its current
//! dataETag in `ETag`.

use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rowsync_protocol::{
    ChangeSetRowsRequest, ChangeSetsSinceRequest, ColumnDefinition, DataETag, ResolveRequest, Row,
    RowETag, RowList, RowsSinceRequest, PROTOCOL_VERSION, USER_HEADER, VERSION_HEADER,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Builds the router over `handler`.
pub fn router(handler: RequestHandler) -> Router {
    Router::new()
        .route("/tables", get(list_tables))
        .route(
            "/tables/:table_id",
            get(get_table).put(create_table).delete(delete_table),
        )
        .route("/tables/:table_id/diff", get(rows_since))
        .route("/tables/:table_id/diff/changeSets", get(change_sets_since))
        .route(
            "/tables/:table_id/diff/changeSets/:data_etag",
            get(change_set_rows),
        )
        .route("/tables/:table_id/rows", get(get_rows).put(put_rows))
        .route(
            "/tables/:table_id/rows/:row_id",
            get(get_row).put(put_row).delete(delete_row),
        )
        .route("/tables/:table_id/rows/:row_id/files", post(confirm_files))
        .route("/tables/:table_id/rows/:row_id/resolve", post(resolve))
        .route("/tables/:table_id/ack", post(acknowledge))
        .route("/tables/:table_id/purge", post(purge))
        .layer(middleware::from_fn(protocol_version))
        .with_state(handler)
}

/// Rejects requests for another protocol version and stamps every
/// response with ours.
async fn protocol_version(request: Request, next: Next) -> Response {
    if let Some(version) = request.headers().get(VERSION_HEADER) {
        if version.as_bytes() != PROTOCOL_VERSION.as_bytes() {
            let found = String::from_utf8_lossy(version.as_bytes()).into_owned();
            return ServerError::ProtocolMismatch(format!(
                "server speaks {PROTOCOL_VERSION}, request has {found}"
            ))
            .into_response();
        }
    }
    let mut response = next.run(request).await;
    if let Ok(name) = HeaderName::try_from(VERSION_HEADER) {
        response
            .headers_mut()
            .insert(name, HeaderValue::from_static(PROTOCOL_VERSION));
    }
    response
}

/// The calling user, from the `X-Rowsync-User` header.
pub struct Caller(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ServerError::MissingIdentity)?;
        Ok(Caller(user.to_string()))
    }
}

/// Runs a blocking handler off the async runtime.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("handler task failed: {e}")))?
}

fn tagged<T: Serialize>(status: StatusCode, data_etag: Option<&DataETag>, body: &T) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(value) = data_etag.and_then(|t| HeaderValue::from_str(t.as_str()).ok()) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> ServerResult<T> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))
}

fn body<T>(body: Result<Json<T>, JsonRejection>) -> ServerResult<T> {
    body.map(|Json(b)| b)
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))
}

fn etag_param(value: Option<String>) -> Option<DataETag> {
    value.filter(|v| !v.is_empty()).map(DataETag::new)
}

#[derive(Debug, Default, Deserialize)]
struct DiffQuery {
    data_etag: Option<String>,
    cursor: Option<String>,
    fetch_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeSetsQuery {
    data_etag: Option<String>,
    sequence_value: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeSetRowsQuery {
    #[serde(default)]
    active_only: bool,
    cursor: Option<String>,
    fetch_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    cursor: Option<String>,
    fetch_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    row_etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThroughQuery {
    data_etag: String,
}

#[derive(Debug, Deserialize)]
struct CreateTableBody {
    #[serde(default)]
    columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Deserialize)]
struct ConfirmFilesBody {
    files: Vec<String>,
}

async fn list_tables(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
) -> ServerResult<Response> {
    let tables = blocking(move || handler.handle_list_tables(&user)).await?;
    Ok(tagged(StatusCode::OK, None, &tables))
}

async fn get_table(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
) -> ServerResult<Response> {
    let table = blocking(move || handler.handle_get_table(&user, &table_id)).await?;
    Ok(tagged(StatusCode::OK, table.data_etag.as_ref(), &table))
}

async fn create_table(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    request: Result<Json<CreateTableBody>, JsonRejection>,
) -> ServerResult<Response> {
    let request = body(request)?;
    let table =
        blocking(move || handler.handle_create_table(&user, &table_id, request.columns)).await?;
    Ok(tagged(StatusCode::OK, table.data_etag.as_ref(), &table))
}

async fn delete_table(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
) -> ServerResult<StatusCode> {
    blocking(move || handler.handle_delete_table(&user, &table_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rows_since(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    params: Result<Query<DiffQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let params = query(params)?;
    let request = RowsSinceRequest {
        data_etag: etag_param(params.data_etag),
        cursor: params.cursor,
        fetch_limit: params.fetch_limit,
    };
    let page = blocking(move || handler.handle_rows_since(&user, &table_id, request)).await?;
    Ok(tagged(StatusCode::OK, page.data_etag.as_ref(), &page))
}

async fn change_sets_since(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    params: Result<Query<ChangeSetsQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let params = query(params)?;
    let request = ChangeSetsSinceRequest {
        data_etag: etag_param(params.data_etag),
        sequence_value: params.sequence_value,
    };
    let list =
        blocking(move || handler.handle_change_sets_since(&user, &table_id, request)).await?;
    Ok(tagged(StatusCode::OK, list.data_etag.as_ref(), &list))
}

async fn change_set_rows(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path((table_id, data_etag)): Path<(String, String)>,
    params: Result<Query<ChangeSetRowsQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let params = query(params)?;
    let request = ChangeSetRowsRequest {
        data_etag: DataETag::new(data_etag),
        active_only: params.active_only,
        cursor: params.cursor,
        fetch_limit: params.fetch_limit,
    };
    let page =
        blocking(move || handler.handle_change_set_rows(&user, &table_id, request)).await?;
    Ok(tagged(StatusCode::OK, page.data_etag.as_ref(), &page))
}

async fn get_rows(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    params: Result<Query<PageQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let params = query(params)?;
    let page = blocking(move || {
        handler.handle_get_rows(&user, &table_id, params.cursor.as_deref(), params.fetch_limit)
    })
    .await?;
    Ok(tagged(StatusCode::OK, page.data_etag.as_ref(), &page))
}

async fn put_rows(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    request: Result<Json<RowList>, JsonRejection>,
) -> ServerResult<Response> {
    let request = body(request)?;
    let outcome = blocking(move || handler.handle_put_rows(&user, &table_id, request)).await?;
    Ok(tagged(StatusCode::OK, outcome.data_etag.as_ref(), &outcome))
}

async fn get_row(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path((table_id, row_id)): Path<(String, String)>,
) -> ServerResult<Response> {
    let (row, tag) = blocking(move || {
        let row = handler.handle_get_row(&user, &table_id, &row_id)?;
        Ok((row, handler.current_data_etag(&table_id)))
    })
    .await?;
    Ok(tagged(StatusCode::OK, tag.as_ref(), &row))
}

async fn put_row(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path((table_id, row_id)): Path<(String, String)>,
    request: Result<Json<Row>, JsonRejection>,
) -> ServerResult<Response> {
    let row = body(request)?;
    let (row, tag) = blocking(move || {
        let row = handler.handle_put_row(&user, &table_id, &row_id, row)?;
        Ok((row, handler.current_data_etag(&table_id)))
    })
    .await?;
    Ok(tagged(StatusCode::OK, tag.as_ref(), &row))
}

async fn delete_row(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path((table_id, row_id)): Path<(String, String)>,
    params: Result<Query<DeleteQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let params = query(params)?;
    let row_etag = params.row_etag.filter(|e| !e.is_empty()).map(RowETag::new);
    let tag =
        blocking(move || handler.handle_delete_row(&user, &table_id, &row_id, row_etag)).await?;
    Ok(tagged(StatusCode::OK, Some(&tag), &json!({ "dataETag": tag })))
}

async fn confirm_files(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path((table_id, row_id)): Path<(String, String)>,
    request: Result<Json<ConfirmFilesBody>, JsonRejection>,
) -> ServerResult<Response> {
    let request = body(request)?;
    let row = blocking(move || {
        handler.handle_confirm_files(&user, &table_id, &row_id, &request.files)
    })
    .await?;
    Ok(tagged(StatusCode::OK, None, &row))
}

async fn resolve(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path((table_id, row_id)): Path<(String, String)>,
    request: Result<Json<ResolveRequest>, JsonRejection>,
) -> ServerResult<Response> {
    let request = body(request)?;
    let (row, tag) = blocking(move || {
        let row = handler.handle_resolve(&user, &table_id, &row_id, request)?;
        Ok((row, handler.current_data_etag(&table_id)))
    })
    .await?;
    Ok(tagged(StatusCode::OK, tag.as_ref(), &row))
}

async fn acknowledge(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    params: Result<Query<ThroughQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let through = DataETag::new(query(params)?.data_etag);
    let acknowledged =
        blocking(move || handler.handle_acknowledge(&user, &table_id, &through)).await?;
    Ok(tagged(
        StatusCode::OK,
        None,
        &json!({ "acknowledged": acknowledged }),
    ))
}

async fn purge(
    State(handler): State<RequestHandler>,
    Caller(user): Caller,
    Path(table_id): Path<String>,
    params: Result<Query<ThroughQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let through = DataETag::new(query(params)?.data_etag);
    let purged = blocking(move || handler.handle_purge(&user, &table_id, &through)).await?;
    Ok(tagged(StatusCode::OK, None, &json!({ "purged": purged })))
}
