//! Filtered, paginated log queries
//!
//! A query becomes two statements sharing one WHERE clause: the page of rows
//! and the total match count. Only allow-listed columns and directions can
//! appear in statement text; every caller-supplied value is a bound
//! parameter.

use crate::error::ServiceError;
use crate::record::{Level, LogRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Allow-listed filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub level: Option<Level>,
    /// Inclusive, by calendar day of the record timestamp
    pub start_date: Option<NaiveDate>,
    /// Inclusive, by calendar day of the record timestamp
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    #[default]
    Timestamp,
    Level,
    Component,
    Context,
    ElapsedTime,
    Id,
}

impl SortColumn {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortColumn::Timestamp => "timestamp",
            SortColumn::Level => "level",
            SortColumn::Component => "component",
            SortColumn::Context => "context",
            SortColumn::ElapsedTime => "elapsed_time",
            SortColumn::Id => "id",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unknown sort column: {0}")]
    UnknownSortColumn(String),
    #[error("unknown sort direction: {0}")]
    UnknownSortDirection(String),
    #[error("invalid level: {0}")]
    InvalidLevel(String),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("start_date {start} is after end_date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

impl From<QueryError> for ServiceError {
    fn from(err: QueryError) -> Self {
        ServiceError::validation(err.to_string())
    }
}

impl FromStr for SortColumn {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(SortColumn::Timestamp),
            "level" => Ok(SortColumn::Level),
            "component" => Ok(SortColumn::Component),
            "context" => Ok(SortColumn::Context),
            "elapsed_time" => Ok(SortColumn::ElapsedTime),
            "id" => Ok(SortColumn::Id),
            _ => Err(QueryError::UnknownSortColumn(s.to_string())),
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(QueryError::UnknownSortDirection(s.to_string())),
        }
    }
}

/// Paging and ordering; everything optional
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub sort: SortColumn,
    pub direction: SortDirection,
}

/// A bound statement parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Text(String),
    Int(i64),
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryParam::Text(s) => write!(f, "{}", s),
            QueryParam::Int(i) => write!(f, "{}", i),
        }
    }
}

/// SELECT and COUNT statements for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub select_sql: String,
    pub count_sql: String,
    /// Bound in both statements
    pub filter_params: Vec<QueryParam>,
    /// Bound after the filter params, SELECT only
    pub page_params: Vec<QueryParam>,
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl QueryPlan {
    /// `table` must already be a validated identifier.
    pub fn build(table: &str, filter: &LogFilter, page: &Pagination) -> Self {
        let mut criteria = Vec::new();
        let mut filter_params = Vec::new();

        if let Some(level) = filter.level {
            criteria.push("level = ?");
            filter_params.push(QueryParam::Text(level.as_str().to_string()));
        }
        if let Some(start) = filter.start_date {
            criteria.push("DATE(timestamp) >= ?");
            filter_params.push(QueryParam::Text(start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = filter.end_date {
            criteria.push("DATE(timestamp) <= ?");
            filter_params.push(QueryParam::Text(end.format("%Y-%m-%d").to_string()));
        }

        let where_clause = if criteria.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", criteria.join(" AND "))
        };

        let mut select_sql = format!(
            "SELECT * FROM {}{} ORDER BY {} {}",
            table,
            where_clause,
            page.sort.as_sql(),
            page.direction.as_sql()
        );
        // Ties on the sort column resolve newest-inserted first.
        if page.sort != SortColumn::Id {
            select_sql.push_str(", id DESC");
        }

        let mut page_params = Vec::new();
        match (page.limit, page.offset) {
            (Some(limit), Some(offset)) => {
                select_sql.push_str(" LIMIT ? OFFSET ?");
                page_params.push(QueryParam::Int(clamp_i64(limit)));
                page_params.push(QueryParam::Int(clamp_i64(offset)));
            }
            (Some(limit), None) => {
                select_sql.push_str(" LIMIT ?");
                page_params.push(QueryParam::Int(clamp_i64(limit)));
            }
            (None, Some(offset)) => {
                select_sql.push_str(" LIMIT -1 OFFSET ?");
                page_params.push(QueryParam::Int(clamp_i64(offset)));
            }
            (None, None) => {}
        }

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", table, where_clause);

        Self {
            select_sql,
            count_sql,
            filter_params,
            page_params,
        }
    }
}

/// One page of rows plus the total number of matches
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogPage {
    pub total: u64,
    pub rows: Vec<LogRecord>,
}

/// Query string shape accepted by the viewer API and the CLI
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogQueryParams {
    pub level: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub order_by: Option<String>,
    pub direction: Option<String>,
}

fn parse_date(raw: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| QueryError::InvalidDate(raw.to_string()))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl TryFrom<&LogQueryParams> for (LogFilter, Pagination) {
    type Error = QueryError;

    fn try_from(params: &LogQueryParams) -> Result<Self, Self::Error> {
        let level = non_blank(&params.level)
            .map(|raw| {
                raw.parse::<Level>()
                    .map_err(|_| QueryError::InvalidLevel(raw.to_string()))
            })
            .transpose()?;
        let start_date = non_blank(&params.start_date).map(parse_date).transpose()?;
        let end_date = non_blank(&params.end_date).map(parse_date).transpose()?;

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(QueryError::InvertedRange { start, end });
            }
        }

        let sort = non_blank(&params.order_by)
            .map(str::parse::<SortColumn>)
            .transpose()?
            .unwrap_or_default();
        let direction = non_blank(&params.direction)
            .map(str::parse::<SortDirection>)
            .transpose()?
            .unwrap_or_default();

        Ok((
            LogFilter {
                level,
                start_date,
                end_date,
            },
            Pagination {
                offset: params.offset,
                limit: params.limit,
                sort,
                direction,
            },
        ))
    }
}
