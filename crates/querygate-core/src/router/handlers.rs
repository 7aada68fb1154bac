//! Per-query-kind execution behavior.
//!
//! One dispatch site switches on the query kind: SELECT consults and feeds
//! the cache, writes invalidate the tables they touch, EXECUTE is an opaque
//! pass-through, PING answers without a backend round trip, and BATCH runs
//! its members sequentially on the one leased connection.

use querygate_error::GatewayError;
use tracing::debug;

use super::tables::extract_tables;
use crate::cache::QueryCache;
use crate::pooling::ConnectionLease;
use crate::protocol::{parse_query_type, QueryRequest, QueryResponse, QueryType, StatusCode};

/// Resources a handler may draw on.
pub(crate) struct HandlerContext<'a> {
    pub cache: Option<&'a QueryCache>,
    /// Cache key the router derived for a SELECT that missed; the handler
    /// feeds the cache under it on success.
    pub select_cache_key: Option<String>,
}

/// Execute `request` on the leased connection (if any) per its kind.
pub(crate) async fn dispatch(
    request: &QueryRequest,
    lease: Option<&ConnectionLease>,
    ctx: &HandlerContext<'_>,
) -> QueryResponse {
    let request_id = request.header.message_id;

    if request.query_type == QueryType::Ping {
        return handle_ping(request_id, lease).await;
    }

    let Some(lease) = lease else {
        // The router leases before dispatch for every non-ping kind.
        return QueryResponse::error(
            request_id,
            StatusCode::Error,
            "no connection leased for query",
        );
    };

    match request.query_type {
        QueryType::Select => handle_select(request, lease, ctx).await,
        QueryType::Insert | QueryType::Update | QueryType::Delete => {
            handle_write(request, request.query_type, &request.sql, lease, ctx).await
        }
        QueryType::Execute => handle_execute(request_id, &request.sql, lease).await,
        QueryType::Batch => handle_batch(request, lease, ctx).await,
        QueryType::Ping => unreachable!("ping handled above"),
    }
}

async fn handle_select(
    request: &QueryRequest,
    lease: &ConnectionLease,
    ctx: &HandlerContext<'_>,
) -> QueryResponse {
    let request_id = request.header.message_id;

    // The router already probed the cache; reaching this point means a miss
    // (or a disabled cache, in which case no key was derived).
    let cache = ctx.cache.filter(|c| c.is_enabled());

    match lease.resilient().select_query(&request.sql).await {
        Ok(result) => {
            let mut response = QueryResponse::success(request_id);
            if request.options.include_metadata {
                response.columns = result.columns;
            }
            response.rows = result.rows;
            if request.options.max_rows > 0 {
                response.rows.truncate(request.options.max_rows as usize);
            }

            if let (Some(cache), Some(key)) = (cache, ctx.select_cache_key.clone()) {
                cache.put(
                    key,
                    response.clone(),
                    extract_tables(&request.sql, QueryType::Select),
                );
            }
            response
        }
        Err(e) => failure_response(request_id, lease, &e),
    }
}

async fn handle_write(
    request: &QueryRequest,
    kind: QueryType,
    sql: &str,
    lease: &ConnectionLease,
    ctx: &HandlerContext<'_>,
) -> QueryResponse {
    let request_id = request.header.message_id;

    let result = match kind {
        QueryType::Insert => lease.resilient().insert_query(sql).await,
        QueryType::Update => lease.resilient().update_query(sql).await,
        QueryType::Delete => lease.resilient().delete_query(sql).await,
        _ => unreachable!("write handler on non-write kind"),
    };

    match result {
        Ok(affected) => {
            invalidate_for_write(ctx.cache, sql, kind);
            let mut response = QueryResponse::success(request_id);
            response.affected_rows = affected;
            response
        }
        Err(e) => failure_response(request_id, lease, &e),
    }
}

async fn handle_execute(
    request_id: u64,
    sql: &str,
    lease: &ConnectionLease,
) -> QueryResponse {
    match lease.resilient().execute_query(sql).await {
        Ok(()) => QueryResponse::success(request_id),
        Err(e) => failure_response(request_id, lease, &e),
    }
}

async fn handle_ping(request_id: u64, lease: Option<&ConnectionLease>) -> QueryResponse {
    if let Some(lease) = lease {
        if let Err(e) = lease.resilient().check_health().await {
            return failure_response(request_id, lease, &e);
        }
    }
    QueryResponse::success(request_id)
}

/// Run `;`-separated member statements sequentially on one connection.
///
/// Write members invalidate their tables on success; `affected_rows`
/// accumulates across writes and the rows of the last SELECT member are
/// carried. Execution stops at the first non-OK member, whose status the
/// composite response takes.
async fn handle_batch(
    request: &QueryRequest,
    lease: &ConnectionLease,
    ctx: &HandlerContext<'_>,
) -> QueryResponse {
    let request_id = request.header.message_id;
    let mut response = QueryResponse::success(request_id);

    for statement in request.sql.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        let kind = classify_statement(statement);
        match kind {
            QueryType::Select => match lease.resilient().select_query(statement).await {
                Ok(result) => {
                    if request.options.include_metadata {
                        response.columns = result.columns;
                    }
                    response.rows = result.rows;
                }
                Err(e) => return batch_failure(response, lease, &e),
            },
            QueryType::Insert | QueryType::Update | QueryType::Delete => {
                let result = match kind {
                    QueryType::Insert => lease.resilient().insert_query(statement).await,
                    QueryType::Update => lease.resilient().update_query(statement).await,
                    _ => lease.resilient().delete_query(statement).await,
                };
                match result {
                    Ok(affected) => {
                        response.affected_rows += affected;
                        invalidate_for_write(ctx.cache, statement, kind);
                    }
                    Err(e) => return batch_failure(response, lease, &e),
                }
            }
            _ => match lease.resilient().execute_query(statement).await {
                Ok(()) => {}
                Err(e) => return batch_failure(response, lease, &e),
            },
        }
    }

    response
}

/// Kind of a batch member, judged from its leading keyword.
fn classify_statement(statement: &str) -> QueryType {
    statement
        .split_whitespace()
        .next()
        .and_then(parse_query_type)
        .unwrap_or(QueryType::Execute)
}

fn invalidate_for_write(cache: Option<&QueryCache>, sql: &str, kind: QueryType) {
    let Some(cache) = cache.filter(|c| c.is_enabled()) else {
        return;
    };

    if cache.config().invalidate_all_on_write {
        cache.invalidate_all();
        return;
    }
    for table in extract_tables(sql, kind) {
        let removed = cache.invalidate(&table);
        if removed > 0 {
            debug!(table, removed, "write invalidated cached selects");
        }
    }
}

/// Map an execution error onto a wire response, flagging the connection
/// when the error is connection-level so the pool discards it on release.
fn failure_response(
    request_id: u64,
    lease: &ConnectionLease,
    error: &GatewayError,
) -> QueryResponse {
    if matches!(error, GatewayError::ConnectionFailed { .. }) {
        lease.mark_unhealthy();
    }
    QueryResponse::error(request_id, StatusCode::from(error), error.to_string())
}

fn batch_failure(
    partial: QueryResponse,
    lease: &ConnectionLease,
    error: &GatewayError,
) -> QueryResponse {
    let mut response = failure_response(partial.header.message_id, lease, error);
    // Keep the work completed before the failing member visible.
    response.affected_rows = partial.affected_rows;
    response.rows = partial.rows;
    response.columns = partial.columns;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statement() {
        assert_eq!(classify_statement("SELECT 1"), QueryType::Select);
        assert_eq!(
            classify_statement("insert into t values (1)"),
            QueryType::Insert
        );
        assert_eq!(classify_statement("UPDATE t SET x=1"), QueryType::Update);
        assert_eq!(classify_statement("DELETE FROM t"), QueryType::Delete);
        assert_eq!(classify_statement("CALL my_proc()"), QueryType::Execute);
    }
}
