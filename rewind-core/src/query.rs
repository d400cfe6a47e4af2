/*!
Filtering, sorting and pagination of snapshot history.

Backends only filter (see [`SnapshotFilter::matches`]); ordering and paging
happen once in the store via [`sort_and_paginate`] so every backend returns
identical pages for identical data.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::model::{ExecutionStatus, SnapshotListItem};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Filter part of a query; every present field must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    /// Inclusive lower bound on `started_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `started_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl SnapshotFilter {
    pub fn for_workflow<S: Into<String>>(workflow_id: S) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &SnapshotListItem) -> bool {
        if let Some(workflow_id) = &self.workflow_id {
            if &item.workflow_id != workflow_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if item.started_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if item.started_at > end {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.workflow_id.is_none()
            && self.status.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }
}

/// Sortable list fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    StartedAt,
    DurationMs,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Full history query: filter plus ordering and paging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    /// 1-based page number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl SnapshotQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow<S: Into<String>>(mut self, workflow_id: S) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = Some(field);
        self.sort_order = Some(order);
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn filter(&self) -> SnapshotFilter {
        SnapshotFilter {
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    pub fn effective_sort_by(&self) -> SortField {
        self.sort_by.unwrap_or_default()
    }

    pub fn effective_sort_order(&self) -> SortOrder {
        self.sort_order.unwrap_or_default()
    }

    pub fn effective_page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn effective_page_size(&self) -> usize {
        match self.page_size {
            Some(0) | None => DEFAULT_PAGE_SIZE,
            Some(size) => size,
        }
    }
}

/// Order items in place by `field`; missing keys always sort last
pub fn sort_items(items: &mut [SnapshotListItem], field: SortField, order: SortOrder) {
    items.sort_by(|a, b| {
        let primary = match field {
            SortField::StartedAt => directed(a.started_at.cmp(&b.started_at), order),
            SortField::Status => directed(a.status.as_str().cmp(b.status.as_str()), order),
            SortField::DurationMs => match (a.duration_ms, b.duration_ms) {
                (Some(x), Some(y)) => directed(x.cmp(&y), order),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| a.execution_id.cmp(&b.execution_id))
    });
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Sort then slice out the requested page; pages past the end are empty
pub fn sort_and_paginate(
    mut items: Vec<SnapshotListItem>,
    query: &SnapshotQuery,
) -> Vec<SnapshotListItem> {
    sort_items(
        &mut items,
        query.effective_sort_by(),
        query.effective_sort_order(),
    );

    let page_size = query.effective_page_size();
    let offset = (query.effective_page() - 1).saturating_mul(page_size);
    items.into_iter().skip(offset).take(page_size).collect()
}
