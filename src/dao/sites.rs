use std::borrow::Cow;
use std::str::FromStr;

use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{Country, CountryExtension, PaginationInput, PaginationOutput, SiteAddInputType, SiteDetailType, SiteListInputType, SiteListOutputType, SiteSortKey, SortOrder},
};

/**
 * Database response type for querying a site with its extension row.
 */
pub type QuerySiteDbResp = (i64, String, String, NaiveDate, f64, f64, Option<f64>, Option<f64>);

/**
 * SQL query to insert a site base row.
 */
const INSERT_SITE: &str = "INSERT INTO sites (name, country, installation_date, max_power_megawatt, min_power_megawatt) VALUES ($1, $2, $3, $4, $5) RETURNING id";

/**
 * SQL query to insert a site extension row.
 */
const INSERT_EXTENSION: &str = "INSERT INTO site_extensions (site_id, useful_energy_at_1_megawatt, efficiency) VALUES ($1, $2, $3)";

/**
 * SQL query to update a site base row.
 */
const UPDATE_SITE: &str = "UPDATE sites SET name = $1, country = $2, installation_date = $3, max_power_megawatt = $4, min_power_megawatt = $5 WHERE id = $6";

/**
 * SQL query to update a site extension row.
 */
const UPDATE_EXTENSION: &str = "UPDATE site_extensions SET useful_energy_at_1_megawatt = $1, efficiency = $2 WHERE site_id = $3";

/**
 * SQL query to retrieve a site with its extension row.
 */
const QUERY_SITE: &str = "SELECT s.id, s.name, s.country, s.installation_date, s.max_power_megawatt, s.min_power_megawatt, e.useful_energy_at_1_megawatt, e.efficiency
                          FROM sites s JOIN site_extensions e ON e.site_id = s.id
                          WHERE s.id = $1";

/**
 * Same as `QUERY_SITE` but locking the base row for the duration of the
 * transaction, used on the update and delete paths.
 */
const QUERY_SITE_FOR_UPDATE: &str = "SELECT s.id, s.name, s.country, s.installation_date, s.max_power_megawatt, s.min_power_megawatt, e.useful_energy_at_1_megawatt, e.efficiency
                                     FROM sites s JOIN site_extensions e ON e.site_id = s.id
                                     WHERE s.id = $1 FOR UPDATE OF s";

/**
 * SQL query to retrieve a filtered list of sites.
 */
const QUERY_SITES_LIST: &str = "SELECT s.id, s.name, s.country, s.installation_date, s.max_power_megawatt, s.min_power_megawatt, e.useful_energy_at_1_megawatt, e.efficiency
                                FROM sites s JOIN site_extensions e ON e.site_id = s.id
                                WHERE ($1::text IS NULL OR s.name ILIKE '%' || $1 || '%') AND
                                      ($2::text IS NULL OR s.country = $2) AND
                                      ($3::date IS NULL OR s.installation_date >= $3) AND
                                      ($4::date IS NULL OR s.installation_date <= $4)";

/**
 * SQL query to lock and list the sites of one country sharing an
 * installation date. Locking the rows keeps two concurrent writes from both
 * passing the per-day uniqueness check.
 */
const QUERY_SAME_DAY_SITE_IDS: &str = "SELECT id FROM sites WHERE country = $1 AND installation_date = $2 FOR UPDATE";

/**
 * SQL query to delete a site's group associations.
 */
const DELETE_SITE_ASSOCIATIONS: &str = "DELETE FROM site_group WHERE site_id = $1";

/**
 * SQL query to delete a site's extension row.
 */
const DELETE_EXTENSION: &str = "DELETE FROM site_extensions WHERE site_id = $1";

/**
 * SQL query to delete a site base row.
 */
const DELETE_SITE: &str = "DELETE FROM sites WHERE id = $1";

/**
 * SQL query to associate a site with a group.
 */
const INSERT_SITE_GROUP: &str = "INSERT INTO site_group (site_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING";

/**
 * SQL query to remove a site/group association.
 */
const DELETE_SITE_GROUP: &str = "DELETE FROM site_group WHERE site_id = $1 AND group_id = $2";

impl TryFrom<QuerySiteDbResp> for SiteDetailType {
    type Error = ApplicationError;

    /**
     * Converts a database row into a site detail, resolving the country
     * discriminator and the matching extension column.
     */
    fn try_from(row: QuerySiteDbResp) -> Result<Self, Self::Error> {
        let (id, name, country, installation_date, max_power_megawatt, min_power_megawatt, useful_energy_at_1_megawatt, efficiency) = row;
        let country = Country::from_str(&country)?;
        let extension = match country {
            Country::France => CountryExtension::France {
                useful_energy_at_1_megawatt: useful_energy_at_1_megawatt
                    .ok_or_else(|| ApplicationError::new(ErrorType::Application, format!("Site {id} is missing its French extension data")))?,
            },
            Country::Italy => CountryExtension::Italy {
                efficiency: efficiency.ok_or_else(|| ApplicationError::new(ErrorType::Application, format!("Site {id} is missing its Italian extension data")))?,
            },
        };
        Ok(SiteDetailType::new(id, name, country, installation_date, max_power_megawatt, min_power_megawatt, extension))
    }
}

/**
 * DAO for site-related database operations.
 */
pub struct SiteDao {}

impl SiteDao {
    /**
     * Creates a new instance of `SiteDao`.
     */
    pub fn new() -> Self {
        SiteDao {}
    }

    /**
     * Inserts a site base row and its extension row.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the queries within.
     * `site_add_input`: The validated site fields.
     * `extension`: The resolved country extension record.
     *
     * # Returns
     * The id of the inserted site or an `ApplicationError`.
     */
    #[instrument(skip(self, transaction, site_add_input, extension), fields(result))]
    pub async fn add_site(&self, transaction: &mut PgConnection, site_add_input: &SiteAddInputType, extension: &CountryExtension) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let (site_id,): (i64,) = sqlx::query_as(INSERT_SITE)
            .bind(&site_add_input.name)
            .bind(site_add_input.country.as_str())
            .bind(site_add_input.installation_date)
            .bind(site_add_input.max_power_megawatt)
            .bind(site_add_input.min_power_megawatt)
            .fetch_one(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        let (useful_energy_at_1_megawatt, efficiency) = extension_columns(extension);
        sqlx::query(INSERT_EXTENSION)
            .bind(site_id)
            .bind(useful_energy_at_1_megawatt)
            .bind(efficiency)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        Ok(site_id)
    }

    /**
     * Updates a site base row and its extension row.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the queries within.
     * `site_id`: The id of the site to update.
     * `site_update`: The merged proposed site state.
     * `extension`: The resolved country extension record.
     *
     * # Returns
     * A result indicating success or failure of the operation.
     */
    #[instrument(skip(self, transaction, site_update, extension), fields(result))]
    pub async fn update_site(&self, transaction: &mut PgConnection, site_id: i64, site_update: &SiteAddInputType, extension: &CountryExtension) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_SITE)
            .bind(&site_update.name)
            .bind(site_update.country.as_str())
            .bind(site_update.installation_date)
            .bind(site_update.max_power_megawatt)
            .bind(site_update.min_power_megawatt)
            .bind(site_id)
            .execute(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Site with id {} not found for update", site_id);
            return Err(ApplicationError::new(ErrorType::NotFound, "Site not found".to_string()));
        }
        let (useful_energy_at_1_megawatt, efficiency) = extension_columns(extension);
        sqlx::query(UPDATE_EXTENSION)
            .bind(useful_energy_at_1_megawatt)
            .bind(efficiency)
            .bind(site_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        Ok(())
    }

    /**
     * Retrieves a site with its extension by id.
     *
     * # Arguments
     * `connection`: The database connection.
     * `site_id`: The id of the site.
     * `for_update`: Whether to lock the base row for the transaction.
     *
     * # Returns
     * The site detail or a `NotFound` error.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_site(&self, connection: &mut PgConnection, site_id: i64, for_update: bool) -> Result<SiteDetailType, ApplicationError> {
        let span = tracing::Span::current();
        let query = if for_update { QUERY_SITE_FOR_UPDATE } else { QUERY_SITE };
        let row: Option<QuerySiteDbResp> = sqlx::query_as(query)
            .bind(site_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get site: {err}")))?;
        let row = row.ok_or_else(|| ApplicationError::new(ErrorType::NotFound, "Site not found".to_string()))?;
        SiteDetailType::try_from(row)
    }

    /**
     * Retrieves a filtered list of sites based on the provided pagination
     * input.
     *
     * # Arguments
     * `connection`: The database connection.
     * `pagination_input`: `PaginationInput` containing pagination information.
     * `filter_params`: The optional site filters.
     *
     * # Returns
     * A Result containing `SiteListOutputType` or an `ApplicationError`.
     */
    #[instrument(skip(self, connection, filter_params), fields(result))]
    pub async fn get_site_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput, filter_params: SiteListInputType) -> Result<SiteListOutputType, ApplicationError> {
        let span = tracing::Span::current();
        let query = format!("{QUERY_SITES_LIST} ORDER BY {} LIMIT $5 OFFSET $6", Self::get_order_clause(filter_params.sort_by, filter_params.sort_order));
        let results: Vec<QuerySiteDbResp> = sqlx::query_as(&query)
            .bind(&filter_params.name)
            .bind(filter_params.country.map(|country| country.as_str()))
            .bind(filter_params.installation_date_from)
            .bind(filter_params.installation_date_to)
            .bind(pagination_input.page_size + 1)
            .bind(pagination_input.start_index)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get site list: {err}")))?;
        let mut sites: Vec<SiteDetailType> = results.into_iter().map(SiteDetailType::try_from).collect::<Result<Vec<_>, _>>()?;
        let pagination_output = Self::get_pagination_output(
            &pagination_input,
            i64::try_from(sites.len()).map_err(|err| ApplicationError::new(ErrorType::Validation, format!("Failed to get pagination output: {err}")))?,
        );
        sites.truncate(usize::try_from(pagination_input.page_size).map_err(|err| ApplicationError::new(ErrorType::Validation, format!("Failed to truncate elements: {err}")))?);
        Ok(SiteListOutputType::new(sites, pagination_output))
    }

    /**
     * Locks and returns the ids of sites of one country sharing an
     * installation date. Must run inside the write transaction so the
     * per-day uniqueness check holds under concurrent creates.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `country`: The country discriminator.
     * `installation_date`: The proposed installation date.
     *
     * # Returns
     * The ids of persisted sites with the same country and date.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn find_same_day_site_ids(&self, transaction: &mut PgConnection, country: Country, installation_date: NaiveDate) -> Result<Vec<i64>, ApplicationError> {
        let span = tracing::Span::current();
        let rows: Vec<(i64,)> = sqlx::query_as(QUERY_SAME_DAY_SITE_IDS)
            .bind(country.as_str())
            .bind(installation_date)
            .fetch_all(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query for same day sites: {err}")))?;
        Ok(rows.into_iter().map(|(site_id,)| site_id).collect())
    }

    /**
     * Deletes a site, its extension row and all its group associations.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the queries within.
     * `site_id`: The id of the site to delete.
     *
     * # Returns
     * A result indicating success or failure of the operation.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_site(&self, transaction: &mut PgConnection, site_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(DELETE_SITE_ASSOCIATIONS)
            .bind(site_id)
            .execute(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete site associations: {err}")))?;
        sqlx::query(DELETE_EXTENSION)
            .bind(site_id)
            .execute(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete site extension: {err}")))?;
        let result = sqlx::query(DELETE_SITE)
            .bind(site_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete site: {err}")))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Site with id {} not found for deletion", site_id);
            return Err(ApplicationError::new(ErrorType::NotFound, "Site not found".to_string()));
        }
        if result.rows_affected() > 1 {
            tracing::warn!("Multiple sites attempted deleted. Rolled back");
            return Err(ApplicationError::new(ErrorType::Application, "Multiple sites attempted deleted. Rolled back".to_string()));
        }
        Ok(())
    }

    /**
     * Associates a site with a group. Inserting an existing association is a
     * no-op.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `site_id`: The id of the site.
     * `group_id`: The id of the group.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_group_association(&self, transaction: &mut PgConnection, site_id: i64, group_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(INSERT_SITE_GROUP)
            .bind(site_id)
            .bind(group_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        Ok(())
    }

    /**
     * Removes a site/group association.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `site_id`: The id of the site.
     * `group_id`: The id of the group.
     *
     * # Returns
     * `NotFound` when the association does not exist.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn remove_group_association(&self, transaction: &mut PgConnection, site_id: i64, group_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_SITE_GROUP)
            .bind(site_id)
            .bind(group_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete site/group association: {err}")))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Association between site {} and group {} not found for deletion", site_id, group_id);
            return Err(ApplicationError::new(ErrorType::NotFound, "Association not found".to_string()));
        }
        Ok(())
    }

    /**
     * Maps a validated sort key and direction onto an ORDER BY clause. The
     * key is restricted to a fixed column set so no request text reaches
     * the SQL. Without a key the listing stays ordered by id.
     *
     * # Arguments
     * `sort_by`: The requested sort column, if any.
     * `sort_order`: The requested direction, descending when absent.
     *
     * # Returns
     * The ORDER BY clause body.
     */
    fn get_order_clause(sort_by: Option<SiteSortKey>, sort_order: Option<SortOrder>) -> String {
        let Some(sort_by) = sort_by else {
            return "s.id".to_string();
        };
        let column = match sort_by {
            SiteSortKey::Id => "s.id",
            SiteSortKey::Name => "s.name",
            SiteSortKey::InstallationDate => "s.installation_date",
            SiteSortKey::MaxPowerMegawatt => "s.max_power_megawatt",
            SiteSortKey::MinPowerMegawatt => "s.min_power_megawatt",
        };
        let direction = match sort_order.unwrap_or(SortOrder::Descending) {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        format!("{column} {direction}, s.id")
    }

    /**
     * Constructs a `PaginationOutput` based on the pagination input and the
     * number of elements.
     *
     * # Arguments
     * `pagination_input`: The input containing pagination parameters.
     * `elements_size`: The number of elements retrieved from the database.
     *
     * # Returns
     * A `PaginationOutput` instance containing pagination details.
     */
    fn get_pagination_output(pagination_input: &PaginationInput, elements_size: i64) -> PaginationOutput {
        let has_more_elements = elements_size > pagination_input.page_size;
        PaginationOutput::new(pagination_input.start_index, pagination_input.page_size, has_more_elements)
    }

    /**
     * Handles database errors and maps them to application errors.
     *
     * # Arguments
     * `error`: The database error to handle.
     *
     * # Returns
     * An `ApplicationError` corresponding to the database error.
     */
    fn handle_database_error(error: Option<&dyn sqlx::error::DatabaseError>) -> ApplicationError {
        if let Some(db_error) = error {
            tracing::debug!("Database error: {}", db_error);
            if db_error.code() == Some(Cow::Borrowed("23505")) {
                // Unique violation. The partial index on French installation
                // dates is the concurrency backstop for the per-day rule.
                if db_error.constraint() == Some("sites_france_installation_date_idx") {
                    return ApplicationError::new(ErrorType::DuplicateInstallationDate, "A French site with this installation date already exists".to_string());
                }
                return ApplicationError::new(ErrorType::ConstraintViolation, "Already exists".to_string());
            } else if db_error.code() == Some(Cow::Borrowed("23503")) {
                // Foreign key violation
                return ApplicationError::new(ErrorType::ConstraintViolation, "Missing parent value".to_string());
            } else if db_error.code() == Some(Cow::Borrowed("23514")) {
                // Check violation
                return ApplicationError::new(ErrorType::InvalidRange, "Minimum power exceeds maximum power".to_string());
            } else if db_error.code() == Some(Cow::Borrowed("22001")) {
                // Value too long
                return ApplicationError::new(ErrorType::Validation, "Value too long".to_string());
            }
            tracing::error!("Unhandled database error: {}", db_error);
            return ApplicationError::new(ErrorType::DatabaseError, "Unhandled database error".to_string());
        }
        ApplicationError::new(ErrorType::DatabaseError, "Failed to execute database operation".to_string())
    }
}

/**
 * Maps an extension record to the nullable extension table columns.
 */
fn extension_columns(extension: &CountryExtension) -> (Option<f64>, Option<f64>) {
    match extension {
        CountryExtension::France { useful_energy_at_1_megawatt } => (Some(*useful_energy_at_1_megawatt), None),
        CountryExtension::Italy { efficiency } => (None, Some(*efficiency)),
    }
}
