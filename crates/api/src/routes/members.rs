//! Read endpoints: aggregate stats and the member listing

use axum::{
    extract::{Query, State},
    Json,
};
use donorsync_membership::{MemberStats, MemberStatus, MemberSummary};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<MemberStats>> {
    let stats = state.store.stats().await?;
    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMembersQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

impl ListMembersQuery {
    /// Blank means no filter; anything else must name a real status
    fn status_filter(&self) -> ApiResult<Option<MemberStatus>> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Ok(Some(raw.parse::<MemberStatus>()?)),
        }
    }
}

/// Newest-updated first, at most 100 rows
pub async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<ListMembersQuery>,
) -> ApiResult<Json<Vec<MemberSummary>>> {
    let status = query.status_filter()?;
    let limit = donorsync_membership::store::clamp_limit(query.limit);

    let members = state.store.list_members(status, limit).await?;
    Ok(Json(members))
}
