use actix_web::{
    HttpRequest, HttpResponse, delete, get, post, put,
    web::{self, Path},
};
use tracing::{Instrument, instrument};

use crate::{
    api::{
        rest::{
            GroupAddRequest, GroupDetailResponse, GroupListResponse, GroupUpdateRequest, GroupsListRequest, PaginationQuery, SiteAddRequest, SiteDetailResponse, SiteListResponse,
            SiteUpdateRequest, SitesListRequest,
        },
        state::AppState,
    },
    model::{
        apperror::ApplicationError,
        models::{GroupAddInputType, GroupListInputType, GroupUpdateInputType, PaginationInput, SiteAddInputType, SiteListInputType, SiteUpdateInputType},
    },
};

/**
 * Endpoint to retrieve a filtered list of sites.
 */
#[instrument(level = "info", skip(http_request, request_body, app_state), fields(service = "listSites", trace_id = get_trace_id(&http_request), result))]
#[post("/api/services/v1_0/sites:list")]
pub async fn sites_list(
    http_request: HttpRequest,
    request_body: web::Json<SitesListRequest>,
    pagination: web::Query<PaginationQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let pagination_input = PaginationInput::from(pagination).validate()?;
    let filter_params = SiteListInputType::try_from(request_body)?;
    let output = app_state.site_service.get_site_list(pagination_input, filter_params).instrument(span).await?;
    Ok(HttpResponse::Ok().json(SiteListResponse::from(output)))
}

/**
 * Endpoint to create a site.
 */
#[instrument(level = "info", skip(http_request, request_body, app_state), fields(service = "addSite", trace_id = get_trace_id(&http_request), result))]
#[post("/api/services/v1_0/sites")]
pub async fn site_add(http_request: HttpRequest, request_body: web::Json<SiteAddRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let site_add_input = SiteAddInputType::try_from(request_body)?;
    let site = app_state.site_service.create_site(site_add_input).instrument(span).await?;
    Ok(HttpResponse::Created().json(SiteDetailResponse::from(site)))
}

/**
 * Endpoint to retrieve a site by id.
 */
#[instrument(skip(http_request, app_state), fields(service = "getSite", trace_id = get_trace_id(&http_request), result))]
#[get("/api/services/v1_0/sites/{siteId}")]
pub async fn site_get(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let site_id = path.into_inner();
    let site = app_state.site_service.get_site(site_id).instrument(span).await?;
    Ok(HttpResponse::Ok().json(SiteDetailResponse::from(site)))
}

/**
 * Endpoint to update a site. Absent fields keep their persisted value.
 */
#[instrument(skip(http_request, request_body, app_state), fields(service = "updateSite", trace_id = get_trace_id(&http_request), result))]
#[put("/api/services/v1_0/sites/{siteId}")]
pub async fn site_update(path: Path<i64>, http_request: HttpRequest, request_body: web::Json<SiteUpdateRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let site_id = path.into_inner();
    let site_update_input = SiteUpdateInputType::try_from(request_body)?;
    let site = app_state.site_service.update_site(site_id, site_update_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(SiteDetailResponse::from(site)))
}

/**
 * Endpoint to delete a site, its extension and its group associations.
 */
#[instrument(skip(http_request, app_state), fields(service = "deleteSite", trace_id = get_trace_id(&http_request), result))]
#[delete("/api/services/v1_0/sites/{siteId}")]
pub async fn site_delete(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let site_id = path.into_inner();
    app_state.site_service.delete_site(site_id).instrument(span).await?;
    Ok(HttpResponse::NoContent().finish())
}

/**
 * Endpoint to associate a site with a group.
 */
#[instrument(skip(http_request, app_state), fields(service = "addSiteToGroup", trace_id = get_trace_id(&http_request), result))]
#[post("/api/services/v1_0/sites/{siteId}/groups/{groupId}")]
pub async fn site_group_add(path: Path<(i64, i64)>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let (site_id, group_id) = path.into_inner();
    app_state.site_service.add_site_to_group(site_id, group_id).instrument(span).await?;
    Ok(HttpResponse::Created().finish())
}

/**
 * Endpoint to remove a site/group association.
 */
#[instrument(skip(http_request, app_state), fields(service = "removeSiteFromGroup", trace_id = get_trace_id(&http_request), result))]
#[delete("/api/services/v1_0/sites/{siteId}/groups/{groupId}")]
pub async fn site_group_remove(path: Path<(i64, i64)>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let (site_id, group_id) = path.into_inner();
    app_state.site_service.remove_site_from_group(site_id, group_id).instrument(span).await?;
    Ok(HttpResponse::NoContent().finish())
}

/**
 * Endpoint to retrieve a filtered list of groups.
 */
#[instrument(level = "info", skip(http_request, request_body, app_state), fields(service = "listGroups", trace_id = get_trace_id(&http_request), result))]
#[post("/api/services/v1_0/groups:list")]
pub async fn groups_list(
    http_request: HttpRequest,
    request_body: web::Json<GroupsListRequest>,
    pagination: web::Query<PaginationQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let pagination_input = PaginationInput::from(pagination).validate()?;
    let filter_params = GroupListInputType::try_from(request_body)?;
    let output = app_state.group_service.get_group_list(pagination_input, filter_params).instrument(span).await?;
    Ok(HttpResponse::Ok().json(GroupListResponse::from(output)))
}

/**
 * Endpoint to create a group.
 */
#[instrument(level = "info", skip(http_request, request_body, app_state), fields(service = "addGroup", trace_id = get_trace_id(&http_request), result))]
#[post("/api/services/v1_0/groups")]
pub async fn group_add(http_request: HttpRequest, request_body: web::Json<GroupAddRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let group_add_input = GroupAddInputType::try_from(request_body)?;
    let group = app_state.group_service.create_group(group_add_input).instrument(span).await?;
    Ok(HttpResponse::Created().json(GroupDetailResponse::from(group)))
}

/**
 * Endpoint to retrieve a group by id.
 */
#[instrument(skip(http_request, app_state), fields(service = "getGroup", trace_id = get_trace_id(&http_request), result))]
#[get("/api/services/v1_0/groups/{groupId}")]
pub async fn group_get(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let group_id = path.into_inner();
    let group = app_state.group_service.get_group(group_id).instrument(span).await?;
    Ok(HttpResponse::Ok().json(GroupDetailResponse::from(group)))
}

/**
 * Endpoint to update a group.
 */
#[instrument(skip(http_request, request_body, app_state), fields(service = "updateGroup", trace_id = get_trace_id(&http_request), result))]
#[put("/api/services/v1_0/groups/{groupId}")]
pub async fn group_update(path: Path<i64>, http_request: HttpRequest, request_body: web::Json<GroupUpdateRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let group_id = path.into_inner();
    let group_update_input = GroupUpdateInputType::try_from(request_body)?;
    let group = app_state.group_service.update_group(group_id, group_update_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(GroupDetailResponse::from(group)))
}

/**
 * Endpoint to delete a group and every association referencing it.
 */
#[instrument(skip(http_request, app_state), fields(service = "deleteGroup", trace_id = get_trace_id(&http_request), result))]
#[delete("/api/services/v1_0/groups/{groupId}")]
pub async fn group_delete(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let group_id = path.into_inner();
    app_state.group_service.delete_group(group_id).instrument(span).await?;
    Ok(HttpResponse::NoContent().finish())
}

/**
 * Endpoint to add a group as a member of another group.
 */
#[instrument(skip(http_request, app_state), fields(service = "addGroupMember", trace_id = get_trace_id(&http_request), result))]
#[post("/api/services/v1_0/groups/{groupId}/members/{memberId}")]
pub async fn group_member_add(path: Path<(i64, i64)>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let (parent_id, member_id) = path.into_inner();
    app_state.group_service.add_member(parent_id, member_id).instrument(span).await?;
    Ok(HttpResponse::Created().finish())
}

/**
 * Endpoint to remove a group membership edge.
 */
#[instrument(skip(http_request, app_state), fields(service = "removeGroupMember", trace_id = get_trace_id(&http_request), result))]
#[delete("/api/services/v1_0/groups/{groupId}/members/{memberId}")]
pub async fn group_member_remove(path: Path<(i64, i64)>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let (parent_id, member_id) = path.into_inner();
    app_state.group_service.remove_member(parent_id, member_id).instrument(span).await?;
    Ok(HttpResponse::NoContent().finish())
}

/**
 * Retrieves the trace ID from the HTTP request headers.
 * If the trace ID is not present, a new UUID is generated.
 */
fn get_trace_id(http_request: &HttpRequest) -> String {
    http_request.headers().get("X-Trace-ID").and_then(|v| v.to_str().ok().map(std::string::ToString::to_string)).unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[actix_web::test]
    async fn test_get_trace_id_exists() {
        let request = TestRequest::default().insert_header(("X-Trace-ID", "test")).to_http_request();
        let trace_id = get_trace_id(&request);
        assert_eq!(trace_id, "test");
    }

    #[actix_web::test]
    async fn test_get_trace_id_not_exists() {
        let request = TestRequest::default().to_http_request();
        let trace_id = get_trace_id(&request);
        assert!(!trace_id.is_empty());
    }
}
