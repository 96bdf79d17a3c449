use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Country discriminator for a site. Selects which extension record the site
 * owns and which country-specific rules apply.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    France,
    Italy,
}

impl Country {
    /**
     * Returns the discriminator value as stored in the database.
     */
    pub fn as_str(&self) -> &'static str {
        match self {
            Country::France => "france",
            Country::Italy => "italy",
        }
    }
}

impl FromStr for Country {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "france" => Ok(Country::France),
            "italy" => Ok(Country::Italy),
            other => Err(ApplicationError::new(ErrorType::UnknownCountry, format!("Unknown country discriminator: {other}"))),
        }
    }
}

/**
 * Group type. Sites must never be associated with a group of type `Group3`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Group1,
    Group2,
    Group3,
}

impl GroupType {
    /**
     * Returns the group type value as stored in the database.
     */
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::Group1 => "group1",
            GroupType::Group2 => "group2",
            GroupType::Group3 => "group3",
        }
    }
}

impl FromStr for GroupType {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "group1" => Ok(GroupType::Group1),
            "group2" => Ok(GroupType::Group2),
            "group3" => Ok(GroupType::Group3),
            other => Err(ApplicationError::new(ErrorType::Validation, format!("Unknown group type: {other}"))),
        }
    }
}

/**
 * Country-specific extension record. Exactly one variant exists per site,
 * matching the site's country discriminator.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum CountryExtension {
    France { useful_energy_at_1_megawatt: f64 },
    Italy { efficiency: f64 },
}

impl CountryExtension {
    /**
     * The country this extension record belongs to.
     */
    pub fn country(&self) -> Country {
        match self {
            CountryExtension::France { .. } => Country::France,
            CountryExtension::Italy { .. } => Country::Italy,
        }
    }

    /**
     * Decomposes the extension into the raw optional field set, used when
     * merging an update patch onto the persisted state.
     */
    pub fn to_fields(&self) -> ExtensionFieldsType {
        match self {
            CountryExtension::France { useful_energy_at_1_megawatt } => {
                ExtensionFieldsType { useful_energy_at_1_megawatt: Some(*useful_energy_at_1_megawatt), efficiency: None }
            }
            CountryExtension::Italy { efficiency } => ExtensionFieldsType { useful_energy_at_1_megawatt: None, efficiency: Some(*efficiency) },
        }
    }
}

/**
 * Raw country extension fields as received from the API, before the country
 * registry has resolved them into a typed extension record.
 */
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtensionFieldsType {
    pub useful_energy_at_1_megawatt: Option<f64>,
    pub efficiency: Option<f64>,
}

impl ExtensionFieldsType {
    /**
     * Merges patch fields onto existing fields, patch values winning.
     */
    pub fn merged_onto(&self, existing: &ExtensionFieldsType) -> ExtensionFieldsType {
        ExtensionFieldsType {
            useful_energy_at_1_megawatt: self.useful_energy_at_1_megawatt.or(existing.useful_energy_at_1_megawatt),
            efficiency: self.efficiency.or(existing.efficiency),
        }
    }
}

/**
 * A persisted site with its country extension record.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct SiteDetailType {
    pub id: i64,
    pub name: String,
    pub country: Country,
    pub installation_date: NaiveDate,
    pub max_power_megawatt: f64,
    pub min_power_megawatt: f64,
    pub extension: CountryExtension,
}

impl SiteDetailType {
    pub fn new(id: i64, name: String, country: Country, installation_date: NaiveDate, max_power_megawatt: f64, min_power_megawatt: f64, extension: CountryExtension) -> Self {
        SiteDetailType { id, name, country, installation_date, max_power_megawatt, min_power_megawatt, extension }
    }
}

/**
 * One page of sites together with its pagination information.
 */
pub struct SiteListOutputType {
    pub sites: Vec<SiteDetailType>,
    pub pagination: PaginationOutput,
}

impl SiteListOutputType {
    pub fn new(sites: Vec<SiteDetailType>, pagination: PaginationOutput) -> Self {
        SiteListOutputType { sites, pagination }
    }
}

/**
 * Input for creating a site. Extension fields are carried raw; the country
 * registry resolves them against the declared country.
 */
#[derive(Debug, Clone)]
pub struct SiteAddInputType {
    pub name: String,
    pub country: Country,
    pub installation_date: NaiveDate,
    pub max_power_megawatt: f64,
    pub min_power_megawatt: f64,
    pub extension_fields: ExtensionFieldsType,
}

impl SiteAddInputType {
    /**
     * Validates the structural (non cross-row) constraints of the input.
     *
     * # Returns
     * The validated input or an `ApplicationError` describing the first
     * violated constraint.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        validate_site_fields(&self.name, self.min_power_megawatt, self.max_power_megawatt)?;
        Ok(self)
    }
}

/**
 * Input for updating a site. All fields are optional; absent fields keep
 * their persisted value.
 */
#[derive(Debug, Clone, Default)]
pub struct SiteUpdateInputType {
    pub name: Option<String>,
    pub country: Option<Country>,
    pub installation_date: Option<NaiveDate>,
    pub max_power_megawatt: Option<f64>,
    pub min_power_megawatt: Option<f64>,
    pub extension_fields: ExtensionFieldsType,
}

impl SiteUpdateInputType {
    /**
     * Merges the patch onto the persisted site, producing the full proposed
     * state to validate and persist. When the patch changes the country the
     * extension fields are taken from the patch alone, since the persisted
     * extension belongs to the previous country.
     *
     * # Arguments
     * `current`: The persisted site the patch applies to.
     *
     * # Returns
     * The proposed state as a `SiteAddInputType`, structurally validated.
     */
    pub fn apply_to(&self, current: &SiteDetailType) -> Result<SiteAddInputType, ApplicationError> {
        let country = self.country.unwrap_or(current.country);
        let extension_fields = if country == current.country { self.extension_fields.merged_onto(&current.extension.to_fields()) } else { self.extension_fields };
        SiteAddInputType {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            country,
            installation_date: self.installation_date.unwrap_or(current.installation_date),
            max_power_megawatt: self.max_power_megawatt.unwrap_or(current.max_power_megawatt),
            min_power_megawatt: self.min_power_megawatt.unwrap_or(current.min_power_megawatt),
            extension_fields,
        }
        .validate()
    }
}

/**
 * Filter parameters for listing sites. All filters are optional and are
 * passed through to the persistence layer unchanged.
 */
#[derive(Debug, Clone, Default)]
pub struct SiteListInputType {
    pub name: Option<String>,
    pub country: Option<Country>,
    pub installation_date_from: Option<NaiveDate>,
    pub installation_date_to: Option<NaiveDate>,
    pub sort_by: Option<SiteSortKey>,
    pub sort_order: Option<SortOrder>,
}

/**
 * Sort direction for list queries.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "asc" => Ok(SortOrder::Ascending),
            "desc" => Ok(SortOrder::Descending),
            other => Err(ApplicationError::new(ErrorType::Validation, format!("Unknown sort order: {other}"))),
        }
    }
}

/**
 * Sortable columns for site list queries. Restricting sorting to a fixed
 * key set keeps the sort input out of the SQL text.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteSortKey {
    Id,
    Name,
    InstallationDate,
    MaxPowerMegawatt,
    MinPowerMegawatt,
}

impl FromStr for SiteSortKey {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "id" => Ok(SiteSortKey::Id),
            "name" => Ok(SiteSortKey::Name),
            "installationDate" => Ok(SiteSortKey::InstallationDate),
            "maxPowerMegawatt" => Ok(SiteSortKey::MaxPowerMegawatt),
            "minPowerMegawatt" => Ok(SiteSortKey::MinPowerMegawatt),
            other => Err(ApplicationError::new(ErrorType::Validation, format!("Unknown site sort key: {other}"))),
        }
    }
}

/**
 * Sortable columns for group list queries.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSortKey {
    Id,
    Name,
    GroupType,
}

impl FromStr for GroupSortKey {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "id" => Ok(GroupSortKey::Id),
            "name" => Ok(GroupSortKey::Name),
            "type" => Ok(GroupSortKey::GroupType),
            other => Err(ApplicationError::new(ErrorType::Validation, format!("Unknown group sort key: {other}"))),
        }
    }
}

/**
 * A persisted group.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDetailType {
    pub id: i64,
    pub name: String,
    pub group_type: GroupType,
}

impl GroupDetailType {
    pub fn new(id: i64, name: String, group_type: GroupType) -> Self {
        GroupDetailType { id, name, group_type }
    }
}

/**
 * One page of groups together with its pagination information.
 */
pub struct GroupListOutputType {
    pub groups: Vec<GroupDetailType>,
    pub pagination: PaginationOutput,
}

impl GroupListOutputType {
    pub fn new(groups: Vec<GroupDetailType>, pagination: PaginationOutput) -> Self {
        GroupListOutputType { groups, pagination }
    }
}

/**
 * Input for creating a group.
 */
#[derive(Debug, Clone)]
pub struct GroupAddInputType {
    pub name: String,
    pub group_type: GroupType,
}

impl GroupAddInputType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.name.trim().is_empty() {
            return Err(ApplicationError::new(ErrorType::Validation, "Group name must not be empty".to_string()));
        }
        Ok(self)
    }
}

/**
 * Input for updating a group. Absent fields keep their persisted value.
 */
#[derive(Debug, Clone, Default)]
pub struct GroupUpdateInputType {
    pub name: Option<String>,
    pub group_type: Option<GroupType>,
}

/**
 * Filter parameters for listing groups.
 */
#[derive(Debug, Clone, Default)]
pub struct GroupListInputType {
    pub name: Option<String>,
    pub group_type: Option<GroupType>,
    pub sort_by: Option<GroupSortKey>,
    pub sort_order: Option<SortOrder>,
}

/**
 * Pagination input for list queries.
 */
#[derive(Debug, Clone, Copy)]
pub struct PaginationInput {
    pub start_index: i64,
    pub page_size: i64,
}

impl PaginationInput {
    /**
     * Validates the pagination input.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.start_index < 0 {
            return Err(ApplicationError::new(ErrorType::Validation, "Start index must not be negative".to_string()));
        }
        if self.page_size <= 0 {
            return Err(ApplicationError::new(ErrorType::Validation, "Page size must be positive".to_string()));
        }
        Ok(self)
    }
}

/**
 * Pagination information returned with list results.
 */
pub struct PaginationOutput {
    pub start_index: i64,
    pub page_size: i64,
    pub has_more: bool,
}

impl PaginationOutput {
    pub fn new(start_index: i64, page_size: i64, has_more: bool) -> Self {
        PaginationOutput { start_index, page_size, has_more }
    }
}

/**
 * Shared structural checks for site create and update inputs.
 *
 * # Arguments
 * `name`: Proposed site name.
 * `min_power_megawatt`: Proposed minimum power.
 * `max_power_megawatt`: Proposed maximum power.
 *
 * # Returns
 * Ok if all structural constraints hold, otherwise the first violation.
 */
fn validate_site_fields(name: &str, min_power_megawatt: f64, max_power_megawatt: f64) -> Result<(), ApplicationError> {
    if name.trim().is_empty() {
        return Err(ApplicationError::new(ErrorType::Validation, "Site name must not be empty".to_string()));
    }
    if min_power_megawatt < 0.0 || max_power_megawatt < 0.0 {
        return Err(ApplicationError::new(ErrorType::Validation, "Power values must not be negative".to_string()));
    }
    if min_power_megawatt > max_power_megawatt {
        return Err(ApplicationError::new(
            ErrorType::InvalidRange,
            format!("Minimum power {min_power_megawatt} exceeds maximum power {max_power_megawatt}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn site_input(min: f64, max: f64) -> SiteAddInputType {
        SiteAddInputType {
            name: "Site A".to_string(),
            country: Country::France,
            installation_date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            max_power_megawatt: max,
            min_power_megawatt: min,
            extension_fields: ExtensionFieldsType { useful_energy_at_1_megawatt: Some(2.0), efficiency: None },
        }
    }

    fn persisted_site(country: Country, extension: CountryExtension) -> SiteDetailType {
        SiteDetailType::new(1, "Site A".to_string(), country, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(), 5.0, 1.0, extension)
    }

    #[test]
    fn test_country_from_str() {
        assert_eq!(Country::from_str("france").unwrap(), Country::France);
        assert_eq!(Country::from_str("italy").unwrap(), Country::Italy);
        let err = Country::from_str("spain").unwrap_err();
        assert_eq!(err.error_type, ErrorType::UnknownCountry);
    }

    #[test]
    fn test_group_type_roundtrip() {
        for group_type in [GroupType::Group1, GroupType::Group2, GroupType::Group3] {
            assert_eq!(GroupType::from_str(group_type.as_str()).unwrap(), group_type);
        }
    }

    #[test]
    fn test_site_input_valid() {
        assert!(site_input(1.0, 5.0).validate().is_ok());
    }

    #[test]
    fn test_site_input_min_exceeds_max() {
        let err = site_input(5.0, 1.0).validate().unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidRange);
    }

    #[test]
    fn test_site_input_negative_power() {
        let err = site_input(-1.0, 5.0).validate().unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
    }

    #[test]
    fn test_site_input_empty_name() {
        let mut input = site_input(1.0, 5.0);
        input.name = "  ".to_string();
        let err = input.validate().unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
    }

    #[test]
    fn test_update_merges_onto_current() {
        let current = persisted_site(Country::France, CountryExtension::France { useful_energy_at_1_megawatt: 2.0 });
        let patch = SiteUpdateInputType { max_power_megawatt: Some(6.0), ..SiteUpdateInputType::default() };
        let merged = patch.apply_to(&current).unwrap();
        assert_eq!(merged.max_power_megawatt, 6.0);
        assert_eq!(merged.min_power_megawatt, 1.0);
        assert_eq!(merged.extension_fields.useful_energy_at_1_megawatt, Some(2.0));
    }

    #[test]
    fn test_update_country_change_drops_old_extension_fields() {
        let current = persisted_site(Country::France, CountryExtension::France { useful_energy_at_1_megawatt: 2.0 });
        let patch = SiteUpdateInputType {
            country: Some(Country::Italy),
            extension_fields: ExtensionFieldsType { useful_energy_at_1_megawatt: None, efficiency: Some(0.8) },
            ..SiteUpdateInputType::default()
        };
        let merged = patch.apply_to(&current).unwrap();
        assert_eq!(merged.country, Country::Italy);
        assert_eq!(merged.extension_fields.useful_energy_at_1_megawatt, None);
        assert_eq!(merged.extension_fields.efficiency, Some(0.8));
    }

    #[test]
    fn test_update_violating_range_rejected() {
        let current = persisted_site(Country::France, CountryExtension::France { useful_energy_at_1_megawatt: 2.0 });
        let patch = SiteUpdateInputType { min_power_megawatt: Some(7.0), ..SiteUpdateInputType::default() };
        let err = patch.apply_to(&current).unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidRange);
    }

    #[test]
    fn test_sort_key_from_str() {
        assert_eq!(SiteSortKey::from_str("installationDate").unwrap(), SiteSortKey::InstallationDate);
        assert_eq!(GroupSortKey::from_str("type").unwrap(), GroupSortKey::GroupType);
        assert_eq!(SortOrder::from_str("asc").unwrap(), SortOrder::Ascending);
        assert!(SiteSortKey::from_str("country").is_err());
        assert!(SortOrder::from_str("up").is_err());
    }

    #[test]
    fn test_pagination_validate() {
        assert!(PaginationInput { start_index: 0, page_size: 10 }.validate().is_ok());
        assert!(PaginationInput { start_index: -1, page_size: 10 }.validate().is_err());
        assert!(PaginationInput { start_index: 0, page_size: 0 }.validate().is_err());
    }
}
