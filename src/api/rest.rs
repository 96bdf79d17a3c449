use std::str::FromStr;

use actix_web::{HttpResponse, ResponseError, http::StatusCode, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{
        Country, ExtensionFieldsType, GroupAddInputType, GroupDetailType, GroupListInputType, GroupListOutputType, GroupSortKey, GroupType, GroupUpdateInputType, PaginationInput,
        PaginationOutput, SiteAddInputType, SiteDetailType, SiteListInputType, SiteListOutputType, SiteSortKey, SiteUpdateInputType, SortOrder,
    },
};

/***************** Site models *********************/

/**
 * Request structure for creating a site. Country-specific fields are
 * optional here; the country registry decides which are required for the
 * declared country.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteAddRequest {
    pub name: String,
    pub country: String,
    pub installation_date: NaiveDate,
    pub max_power_megawatt: f64,
    pub min_power_megawatt: f64,
    pub useful_energy_at_1_megawatt: Option<f64>,
    pub efficiency: Option<f64>,
}

impl TryFrom<web::Json<SiteAddRequest>> for SiteAddInputType {
    type Error = ApplicationError;

    fn try_from(request: web::Json<SiteAddRequest>) -> Result<Self, Self::Error> {
        let request = request.into_inner();
        Ok(SiteAddInputType {
            name: request.name,
            country: Country::from_str(&request.country)?,
            installation_date: request.installation_date,
            max_power_megawatt: request.max_power_megawatt,
            min_power_megawatt: request.min_power_megawatt,
            extension_fields: ExtensionFieldsType { useful_energy_at_1_megawatt: request.useful_energy_at_1_megawatt, efficiency: request.efficiency },
        })
    }
}

/**
 * Request structure for updating a site. Absent fields keep their persisted
 * value.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUpdateRequest {
    pub name: Option<String>,
    pub country: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub max_power_megawatt: Option<f64>,
    pub min_power_megawatt: Option<f64>,
    pub useful_energy_at_1_megawatt: Option<f64>,
    pub efficiency: Option<f64>,
}

impl TryFrom<web::Json<SiteUpdateRequest>> for SiteUpdateInputType {
    type Error = ApplicationError;

    fn try_from(request: web::Json<SiteUpdateRequest>) -> Result<Self, Self::Error> {
        let request = request.into_inner();
        Ok(SiteUpdateInputType {
            name: request.name,
            country: request.country.as_deref().map(Country::from_str).transpose()?,
            installation_date: request.installation_date,
            max_power_megawatt: request.max_power_megawatt,
            min_power_megawatt: request.min_power_megawatt,
            extension_fields: ExtensionFieldsType { useful_energy_at_1_megawatt: request.useful_energy_at_1_megawatt, efficiency: request.efficiency },
        })
    }
}

/**
 * Request structure for listing sites.
 *
 * This structure is used to filter the sites based on name, country and
 * installation date range.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitesListRequest {
    pub name: Option<String>,
    pub country: Option<String>,
    pub installation_date_from: Option<NaiveDate>,
    pub installation_date_to: Option<NaiveDate>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl TryFrom<web::Json<SitesListRequest>> for SiteListInputType {
    type Error = ApplicationError;

    fn try_from(request: web::Json<SitesListRequest>) -> Result<Self, Self::Error> {
        let request = request.into_inner();
        Ok(SiteListInputType {
            name: request.name,
            country: request.country.as_deref().map(Country::from_str).transpose()?,
            installation_date_from: request.installation_date_from,
            installation_date_to: request.installation_date_to,
            sort_by: request.sort_by.as_deref().map(SiteSortKey::from_str).transpose()?,
            sort_order: request.sort_order.as_deref().map(SortOrder::from_str).transpose()?,
        })
    }
}

/**
 * Response structure for a single site.
 */
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDetailResponse {
    pub id: i64,
    pub name: String,
    pub country: String,
    pub installation_date: NaiveDate,
    pub max_power_megawatt: f64,
    pub min_power_megawatt: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub useful_energy_at_1_megawatt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
}

impl From<SiteDetailType> for SiteDetailResponse {
    fn from(site: SiteDetailType) -> Self {
        let fields = site.extension.to_fields();
        SiteDetailResponse {
            id: site.id,
            name: site.name,
            country: site.country.as_str().to_string(),
            installation_date: site.installation_date,
            max_power_megawatt: site.max_power_megawatt,
            min_power_megawatt: site.min_power_megawatt,
            useful_energy_at_1_megawatt: fields.useful_energy_at_1_megawatt,
            efficiency: fields.efficiency,
        }
    }
}

/**
 * Response structure for listing sites.
 */
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteListResponse {
    /**
     * The sites on this page.
     */
    sites: Vec<SiteDetailResponse>,
    /**
     * Pagination information for the response.
     */
    pagination: PaginationResponse,
}

impl From<SiteListOutputType> for SiteListResponse {
    fn from(output: SiteListOutputType) -> Self {
        let sites: Vec<SiteDetailResponse> = output.sites.into_iter().map(SiteDetailResponse::from).collect();
        SiteListResponse { sites, pagination: PaginationResponse::from(output.pagination) }
    }
}

/***************** Group models *********************/

/**
 * Request structure for creating a group.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAddRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
}

impl TryFrom<web::Json<GroupAddRequest>> for GroupAddInputType {
    type Error = ApplicationError;

    fn try_from(request: web::Json<GroupAddRequest>) -> Result<Self, Self::Error> {
        let request = request.into_inner();
        Ok(GroupAddInputType { name: request.name, group_type: GroupType::from_str(&request.group_type)? })
    }
}

/**
 * Request structure for updating a group. Absent fields keep their persisted
 * value.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdateRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub group_type: Option<String>,
}

impl TryFrom<web::Json<GroupUpdateRequest>> for GroupUpdateInputType {
    type Error = ApplicationError;

    fn try_from(request: web::Json<GroupUpdateRequest>) -> Result<Self, Self::Error> {
        let request = request.into_inner();
        Ok(GroupUpdateInputType { name: request.name, group_type: request.group_type.as_deref().map(GroupType::from_str).transpose()? })
    }
}

/**
 * Request structure for listing groups.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsListRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub group_type: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl TryFrom<web::Json<GroupsListRequest>> for GroupListInputType {
    type Error = ApplicationError;

    fn try_from(request: web::Json<GroupsListRequest>) -> Result<Self, Self::Error> {
        let request = request.into_inner();
        Ok(GroupListInputType {
            name: request.name,
            group_type: request.group_type.as_deref().map(GroupType::from_str).transpose()?,
            sort_by: request.sort_by.as_deref().map(GroupSortKey::from_str).transpose()?,
            sort_order: request.sort_order.as_deref().map(SortOrder::from_str).transpose()?,
        })
    }
}

/**
 * Response structure for a single group.
 */
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetailResponse {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
}

impl From<GroupDetailType> for GroupDetailResponse {
    fn from(group: GroupDetailType) -> Self {
        GroupDetailResponse { id: group.id, name: group.name, group_type: group.group_type.as_str().to_string() }
    }
}

/**
 * Response structure for listing groups.
 */
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupListResponse {
    /**
     * The groups on this page.
     */
    groups: Vec<GroupDetailResponse>,
    /**
     * Pagination information for the response.
     */
    pagination: PaginationResponse,
}

impl From<GroupListOutputType> for GroupListResponse {
    fn from(output: GroupListOutputType) -> Self {
        let groups: Vec<GroupDetailResponse> = output.groups.into_iter().map(GroupDetailResponse::from).collect();
        GroupListResponse { groups, pagination: PaginationResponse::from(output.pagination) }
    }
}

/***************** Error models *********************/

/**
 * Custom error response for the application.
 */
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /**
     * The error code associated with the error type.
     */
    pub code: u16,
    /**
     * A human-readable message describing the error.
     */
    pub message: String,
}

impl ResponseError for ApplicationError {
    /**
     * Generates an error response for the application error.
     */
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse { code: get_error_code(&self.error_type), message: self.message.clone() };
        HttpResponse::build(get_statuscode(&self.error_type)).json(&error_response)
    }
}

/**
* Maps application errors to HTTP status codes. Domain-rule violations map
* to 422 so the caller can tell a rule rejection from a malformed request.
*
* # Arguments
* `application_error`: The type of error that occurred.
*
* # Returns
* The corresponding HTTP status code.
*/
fn get_statuscode(application_error: &ErrorType) -> StatusCode {
    match application_error {
        ErrorType::Validation | ErrorType::SchemaMismatch | ErrorType::UnknownCountry | ErrorType::InvalidRange => StatusCode::BAD_REQUEST,
        ErrorType::DuplicateInstallationDate | ErrorType::InvalidInstallationDay | ErrorType::ForbiddenGroupType | ErrorType::GroupCycle => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorType::NotFound => StatusCode::NOT_FOUND,
        ErrorType::ConstraintViolation => StatusCode::CONFLICT,
        ErrorType::Initialization | ErrorType::DatabaseError | ErrorType::Application => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/**
 * Maps application errors to error codes.
 *
 * # Arguments
 * `application_error`: The type of error that occurred.
 *
 * # Returns
 * The corresponding error code.
 */
fn get_error_code(application_error: &ErrorType) -> u16 {
    match application_error {
        ErrorType::Initialization => 1001,
        ErrorType::Validation => 1002,
        ErrorType::DatabaseError => 1003,
        ErrorType::Application => 1004,
        ErrorType::NotFound => 1005,
        ErrorType::ConstraintViolation => 1006,
        ErrorType::SchemaMismatch => 1010,
        ErrorType::UnknownCountry => 1011,
        ErrorType::InvalidRange => 1012,
        ErrorType::DuplicateInstallationDate => 1013,
        ErrorType::InvalidInstallationDay => 1014,
        ErrorType::ForbiddenGroupType => 1015,
        ErrorType::GroupCycle => 1016,
    }
}

/***************** Common models *********************/

/**
 * Pagination query parameters for API requests.
 */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationQuery {
    /**
     * The index of the first item to return.
     */
    pub start_index: Option<i64>,
    /**
     * The size of the page to return.
     */
    pub page_size: Option<i64>,
}

impl From<web::Query<PaginationQuery>> for PaginationInput {
    fn from(query: web::Query<PaginationQuery>) -> Self {
        PaginationInput { start_index: query.start_index.unwrap_or(0), page_size: query.page_size.unwrap_or(10) }
    }
}

/**
 * Pagination response structure.
 */
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResponse {
    /**
     * The starting index of the returned items.
     */
    pub start_index: Option<i64>,
    /**
     * The size of the page.
     */
    pub page_size: Option<i64>,
    /**
     * Indicates if there are more items available.
     */
    pub has_more_elements: bool,
}

impl From<PaginationOutput> for PaginationResponse {
    fn from(pagination_output: PaginationOutput) -> Self {
        PaginationResponse { start_index: Some(pagination_output.start_index), page_size: Some(pagination_output.page_size), has_more_elements: pagination_output.has_more }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::models::CountryExtension;

    #[test]
    fn test_statuscode_mapping() {
        assert_eq!(get_statuscode(&ErrorType::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(get_statuscode(&ErrorType::InvalidRange), StatusCode::BAD_REQUEST);
        assert_eq!(get_statuscode(&ErrorType::SchemaMismatch), StatusCode::BAD_REQUEST);
        assert_eq!(get_statuscode(&ErrorType::DuplicateInstallationDate), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(get_statuscode(&ErrorType::InvalidInstallationDay), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(get_statuscode(&ErrorType::ForbiddenGroupType), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(get_statuscode(&ErrorType::GroupCycle), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(get_statuscode(&ErrorType::DatabaseError), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let codes = [
            get_error_code(&ErrorType::Initialization),
            get_error_code(&ErrorType::Validation),
            get_error_code(&ErrorType::DatabaseError),
            get_error_code(&ErrorType::Application),
            get_error_code(&ErrorType::NotFound),
            get_error_code(&ErrorType::ConstraintViolation),
            get_error_code(&ErrorType::SchemaMismatch),
            get_error_code(&ErrorType::UnknownCountry),
            get_error_code(&ErrorType::InvalidRange),
            get_error_code(&ErrorType::DuplicateInstallationDate),
            get_error_code(&ErrorType::InvalidInstallationDay),
            get_error_code(&ErrorType::ForbiddenGroupType),
            get_error_code(&ErrorType::GroupCycle),
        ];
        let distinct: std::collections::HashSet<u16> = codes.iter().copied().collect();
        assert_eq!(distinct.len(), codes.len());
    }

    #[test]
    fn test_site_add_request_conversion() {
        let request = web::Json(SiteAddRequest {
            name: "Site A".to_string(),
            country: "france".to_string(),
            installation_date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            max_power_megawatt: 5.0,
            min_power_megawatt: 1.0,
            useful_energy_at_1_megawatt: Some(2.0),
            efficiency: None,
        });
        let input = SiteAddInputType::try_from(request).unwrap();
        assert_eq!(input.country, Country::France);
        assert_eq!(input.extension_fields.useful_energy_at_1_megawatt, Some(2.0));
    }

    #[test]
    fn test_site_add_request_unknown_country() {
        let request = web::Json(SiteAddRequest {
            name: "Site A".to_string(),
            country: "spain".to_string(),
            installation_date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            max_power_megawatt: 5.0,
            min_power_megawatt: 1.0,
            useful_energy_at_1_megawatt: None,
            efficiency: None,
        });
        let err = SiteAddInputType::try_from(request).unwrap_err();
        assert_eq!(err.error_type, ErrorType::UnknownCountry);
    }

    #[test]
    fn test_sites_list_request_sort_conversion() {
        let request = web::Json(SitesListRequest {
            name: None,
            country: None,
            installation_date_from: None,
            installation_date_to: None,
            sort_by: Some("installationDate".to_string()),
            sort_order: Some("asc".to_string()),
        });
        let input = SiteListInputType::try_from(request).unwrap();
        assert_eq!(input.sort_by, Some(SiteSortKey::InstallationDate));
        assert_eq!(input.sort_order, Some(SortOrder::Ascending));
    }

    #[test]
    fn test_sites_list_request_unknown_sort_key() {
        let request = web::Json(SitesListRequest {
            name: None,
            country: None,
            installation_date_from: None,
            installation_date_to: None,
            sort_by: Some("country; DROP TABLE sites".to_string()),
            sort_order: None,
        });
        let err = SiteListInputType::try_from(request).unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
    }

    #[test]
    fn test_groups_list_request_sort_conversion() {
        let request = web::Json(GroupsListRequest { name: None, group_type: None, sort_by: Some("type".to_string()), sort_order: Some("desc".to_string()) });
        let input = GroupListInputType::try_from(request).unwrap();
        assert_eq!(input.sort_by, Some(GroupSortKey::GroupType));
        assert_eq!(input.sort_order, Some(SortOrder::Descending));
    }

    #[test]
    fn test_site_detail_response_carries_extension_fields() {
        let site = SiteDetailType::new(
            7,
            "Site A".to_string(),
            Country::Italy,
            NaiveDate::from_ymd_opt(2024, 3, 16).unwrap(),
            5.0,
            1.0,
            CountryExtension::Italy { efficiency: 0.8 },
        );
        let response = SiteDetailResponse::from(site);
        assert_eq!(response.country, "italy");
        assert_eq!(response.efficiency, Some(0.8));
        assert_eq!(response.useful_energy_at_1_megawatt, None);
    }
}
