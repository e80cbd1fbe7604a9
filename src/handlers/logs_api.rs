//! Log viewer HTTP API
//!
//! GET /api/v1/logs?level=error&start_date=2024-03-01&end_date=2024-03-07&limit=50&order_by=elapsed_time&direction=desc

use crate::error::ServiceError;
use crate::logger::Logger;
use crate::query::{LogFilter, LogPage, LogQueryParams, Pagination};
use axum::extract::{Query, State};
use axum::response::Json;

const DEFAULT_LIMIT: u64 = 100;

/// GET /api/v1/logs - Filtered, paginated log records with the total match count
pub async fn get_logs(
    State(logger): State<Logger>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<LogPage>, ServiceError> {
    let (filter, mut page) = <(LogFilter, Pagination)>::try_from(&params)?;
    if page.limit.is_none() {
        page.limit = Some(DEFAULT_LIMIT);
    }

    let result = logger
        .query(&filter, &page)
        .await
        .ok_or_else(|| ServiceError::system("Log query failed"))?;

    Ok(Json(result))
}
