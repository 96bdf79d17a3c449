use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    dao::{groups::GroupDao, sites::SiteDao},
    model::{
        apperror::{ApplicationError, ErrorType},
        country::{CountryRegistry, SiteRule},
        models::{CountryExtension, PaginationInput, SiteAddInputType, SiteDetailType, SiteListInputType, SiteListOutputType, SiteUpdateInputType},
    },
    service::validators,
};

/**
 * Represents the service for managing sites. The only writer of site rows;
 * every write sequences structural validation, country schema resolution and
 * the domain rules before persisting inside a single transaction.
 */
pub struct SiteService {
    /**
     * The DAO for site operations.
     */
    site_dao: SiteDao,
    /**
     * The DAO for group operations, needed for association checks.
     */
    group_dao: GroupDao,
    /**
     * The country extension registry. Read-only after startup.
     */
    registry: CountryRegistry,
    /**
     * Optional connection pool for database operations. Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl SiteService {
    /**
     * Creates a new instance of `SiteService`.
     *
     * # Arguments
     * `site_dao`: The DAO for site operations.
     * `group_dao`: The DAO for group operations.
     * `registry`: The country extension registry.
     * `connection_pool`: Optional connection pool for database operations.
     *
     * # Returns
     * A new instance of `SiteService`.
     */
    pub fn new(site_dao: SiteDao, group_dao: GroupDao, registry: CountryRegistry, connection_pool: Option<Pool<Postgres>>) -> Self {
        SiteService { site_dao, group_dao, registry, connection_pool }
    }

    /**
     * Creates a site: structural validation, country schema resolution,
     * domain rules against persisted state, then base row plus extension row
     * as one atomic unit.
     *
     * # Arguments
     * `site_add_input`: The proposed site.
     *
     * # Returns
     * The persisted site or the first failing check.
     */
    pub async fn create_site(&self, site_add_input: SiteAddInputType) -> Result<SiteDetailType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let site_add_input = site_add_input.validate()?;
        let spec = self.registry.lookup(site_add_input.country)?;
        let extension = spec.resolve_extension(&site_add_input.extension_fields)?;
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = self.persist_checked(&mut transaction, &site_add_input, &extension, None).await;
        match result {
            Ok(site_id) => {
                transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?;
                Ok(SiteDetailType::new(
                    site_id,
                    site_add_input.name,
                    site_add_input.country,
                    site_add_input.installation_date,
                    site_add_input.max_power_megawatt,
                    site_add_input.min_power_megawatt,
                    extension,
                ))
            }
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                Err(err)
            }
        }
    }

    /**
     * Updates a site. The patch is merged onto the persisted state and the
     * full proposed state re-runs every applicable check, excluding the
     * site's own row from conflict checks.
     *
     * # Arguments
     * `site_id`: The id of the site to update.
     * `site_update_input`: The patch.
     *
     * # Returns
     * The updated site or the first failing check.
     */
    pub async fn update_site(&self, site_id: i64, site_update_input: SiteUpdateInputType) -> Result<SiteDetailType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = self.update_checked(&mut transaction, site_id, &site_update_input).await;
        match result {
            Ok(site) => {
                transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?;
                Ok(site)
            }
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                Err(err)
            }
        }
    }

    /**
     * Retrieves a site by id.
     *
     * # Arguments
     * `site_id`: The id of the site.
     *
     * # Returns
     * The site detail or a `NotFound` error.
     */
    pub async fn get_site(&self, site_id: i64) -> Result<SiteDetailType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut connection = connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))?;
        self.site_dao.get_site(&mut connection, site_id, false).await
    }

    /**
     * Retrieves a filtered list of sites.
     *
     * # Arguments
     * `pagination_input`: `PaginationInput` containing pagination information.
     * `filter_params`: The optional site filters.
     *
     * # Returns
     * A Result containing `SiteListOutputType` or an `ApplicationError`.
     */
    pub async fn get_site_list(&self, pagination_input: PaginationInput, filter_params: SiteListInputType) -> Result<SiteListOutputType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut connection = connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))?;
        self.site_dao.get_site_list(&mut connection, pagination_input, filter_params).await
    }

    /**
     * Deletes a site, its extension row and all its group associations as
     * one atomic unit.
     *
     * # Arguments
     * `site_id`: The id of the site to delete.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError`.
     */
    pub async fn delete_site(&self, site_id: i64) -> Result<(), ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        match self.site_dao.delete_site(&mut transaction, site_id).await {
            Ok(()) => transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?,
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                return Err(err);
            }
        }
        Ok(())
    }

    /**
     * Associates a site with a group, after checking the group's type
     * against the association rule.
     *
     * # Arguments
     * `site_id`: The id of the site.
     * `group_id`: The id of the group.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError`.
     */
    pub async fn add_site_to_group(&self, site_id: i64, group_id: i64) -> Result<(), ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = self.associate_checked(&mut transaction, site_id, group_id).await;
        match result {
            Ok(()) => transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?,
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                return Err(err);
            }
        }
        Ok(())
    }

    /**
     * Removes a site/group association.
     *
     * # Arguments
     * `site_id`: The id of the site.
     * `group_id`: The id of the group.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError`.
     */
    pub async fn remove_site_from_group(&self, site_id: i64, group_id: i64) -> Result<(), ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        match self.site_dao.remove_group_association(&mut transaction, site_id, group_id).await {
            Ok(()) => transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?,
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                return Err(err);
            }
        }
        Ok(())
    }

    /**
     * Runs the country rules for the proposed site state against the
     * persisted state inside the transaction, then persists it.
     *
     * # Arguments
     * `transaction`: The write transaction.
     * `site_input`: The full proposed site state, structurally validated.
     * `extension`: The resolved country extension record.
     * `exclude_site_id`: The site's own id on the update path.
     *
     * # Returns
     * The id of the persisted site.
     */
    async fn persist_checked(&self, transaction: &mut PgConnection, site_input: &SiteAddInputType, extension: &CountryExtension, exclude_site_id: Option<i64>) -> Result<i64, ApplicationError> {
        let spec = self.registry.lookup(site_input.country)?;
        for rule in spec.rules {
            match rule {
                SiteRule::UniqueInstallationDate => {
                    let same_day_site_ids = self.site_dao.find_same_day_site_ids(transaction, site_input.country, site_input.installation_date).await?;
                    validators::validate_unique_installation_date(site_input.installation_date, &same_day_site_ids, exclude_site_id)?;
                }
                SiteRule::WeekendInstallation => validators::validate_weekend_installation(site_input.installation_date)?,
            }
        }
        match exclude_site_id {
            None => self.site_dao.add_site(transaction, site_input, extension).await,
            Some(site_id) => {
                self.site_dao.update_site(transaction, site_id, site_input, extension).await?;
                Ok(site_id)
            }
        }
    }

    /**
     * Update path: locks and loads the persisted site, merges the patch,
     * re-resolves the country schema and re-runs the rules.
     */
    async fn update_checked(&self, transaction: &mut PgConnection, site_id: i64, site_update_input: &SiteUpdateInputType) -> Result<SiteDetailType, ApplicationError> {
        let current = self.site_dao.get_site(transaction, site_id, true).await?;
        let merged = site_update_input.apply_to(&current)?;
        let spec = self.registry.lookup(merged.country)?;
        let extension = spec.resolve_extension(&merged.extension_fields)?;
        self.persist_checked(transaction, &merged, &extension, Some(site_id)).await?;
        Ok(SiteDetailType::new(site_id, merged.name, merged.country, merged.installation_date, merged.max_power_megawatt, merged.min_power_megawatt, extension))
    }

    /**
     * Association path: both sides must exist and the group must not be of
     * type group3.
     */
    async fn associate_checked(&self, transaction: &mut PgConnection, site_id: i64, group_id: i64) -> Result<(), ApplicationError> {
        let group = self.group_dao.get_group(transaction, group_id, true).await?;
        validators::validate_group_association(group.group_type)?;
        self.site_dao.get_site(transaction, site_id, false).await?;
        self.site_dao.add_group_association(transaction, site_id, group_id).await
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use super::*;
    use crate::model::models::{Country, ExtensionFieldsType, GroupAddInputType, GroupType, GroupUpdateInputType};
    use crate::service::groups::GroupService;
    use chrono::NaiveDate;
    use sqlx::PgPool;

    fn site_service(pool: &PgPool) -> SiteService {
        SiteService::new(SiteDao::new(), GroupDao::new(), CountryRegistry::with_defaults(), Some(pool.clone()))
    }

    fn group_service(pool: &PgPool) -> GroupService {
        GroupService::new(GroupDao::new(), Some(pool.clone()))
    }

    fn french_input(name: &str, date: NaiveDate) -> SiteAddInputType {
        SiteAddInputType {
            name: name.to_string(),
            country: Country::France,
            installation_date: date,
            max_power_megawatt: 5.0,
            min_power_megawatt: 1.0,
            extension_fields: ExtensionFieldsType { useful_energy_at_1_megawatt: Some(2.0), efficiency: None },
        }
    }

    fn italian_input(name: &str, date: NaiveDate) -> SiteAddInputType {
        SiteAddInputType {
            name: name.to_string(),
            country: Country::Italy,
            installation_date: date,
            max_power_megawatt: 5.0,
            min_power_megawatt: 1.0,
            extension_fields: ExtensionFieldsType { useful_energy_at_1_megawatt: None, efficiency: Some(0.8) },
        }
    }

    #[sqlx::test]
    async fn test_create_site_then_get_returns_same_state() {
        let pool = init_db().await;
        let service = site_service(&pool);
        let created = service.create_site(french_input("Roundtrip", NaiveDate::from_ymd_opt(2031, 2, 3).unwrap())).await.unwrap();
        let fetched = service.get_site(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.extension, CountryExtension::France { useful_energy_at_1_megawatt: 2.0 });
        service.delete_site(created.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_only_one_french_site_per_day() {
        let pool = init_db().await;
        let service = site_service(&pool);
        let date = NaiveDate::from_ymd_opt(2031, 3, 10).unwrap();
        let first = service.create_site(french_input("First", date)).await.unwrap();
        let err = service.create_site(french_input("Second", date)).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::DuplicateInstallationDate);
        service.delete_site(first.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_italian_site_requires_weekend() {
        let pool = init_db().await;
        let service = site_service(&pool);
        // 2031-03-10 is a Monday, 2031-03-15 a Saturday.
        let err = service.create_site(italian_input("Weekday", NaiveDate::from_ymd_opt(2031, 3, 10).unwrap())).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidInstallationDay);
        let site = service.create_site(italian_input("Weekend", NaiveDate::from_ymd_opt(2031, 3, 15).unwrap())).await.unwrap();
        service.delete_site(site.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_update_excludes_own_row_from_date_conflict() {
        let pool = init_db().await;
        let service = site_service(&pool);
        let date = NaiveDate::from_ymd_opt(2031, 4, 1).unwrap();
        let site = service.create_site(french_input("Stable", date)).await.unwrap();
        // Re-submitting the same date for the same site must pass.
        let patch = SiteUpdateInputType { installation_date: Some(date), ..SiteUpdateInputType::default() };
        assert!(service.update_site(site.id, patch).await.is_ok());
        service.delete_site(site.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_group3_association_rejected() {
        let pool = init_db().await;
        let sites = site_service(&pool);
        let groups = group_service(&pool);
        let site = sites.create_site(italian_input("Member", NaiveDate::from_ymd_opt(2031, 3, 16).unwrap())).await.unwrap();
        let group = groups.create_group(GroupAddInputType { name: "Forbidden".to_string(), group_type: GroupType::Group3 }).await.unwrap();
        let err = sites.add_site_to_group(site.id, group.id).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::ForbiddenGroupType);
        groups.delete_group(group.id).await.unwrap();
        sites.delete_site(site.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_group_type_change_with_members_rejected() {
        let pool = init_db().await;
        let sites = site_service(&pool);
        let groups = group_service(&pool);
        let site = sites.create_site(italian_input("Member", NaiveDate::from_ymd_opt(2031, 3, 22).unwrap())).await.unwrap();
        let group = groups.create_group(GroupAddInputType { name: "Allowed".to_string(), group_type: GroupType::Group1 }).await.unwrap();
        sites.add_site_to_group(site.id, group.id).await.unwrap();
        let patch = GroupUpdateInputType { group_type: Some(GroupType::Group3), ..GroupUpdateInputType::default() };
        let err = groups.update_group(group.id, patch).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::ForbiddenGroupType);
        sites.delete_site(site.id).await.unwrap();
        groups.delete_group(group.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_delete_site_removes_extension_and_associations() {
        let pool = init_db().await;
        let sites = site_service(&pool);
        let groups = group_service(&pool);
        let site = sites.create_site(french_input("Doomed", NaiveDate::from_ymd_opt(2031, 5, 1).unwrap())).await.unwrap();
        let group = groups.create_group(GroupAddInputType { name: "Holder".to_string(), group_type: GroupType::Group2 }).await.unwrap();
        sites.add_site_to_group(site.id, group.id).await.unwrap();
        sites.delete_site(site.id).await.unwrap();
        let err = sites.get_site(site.id).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::NotFound);
        groups.delete_group(group.id).await.unwrap();
    }

    /**
     * Initialize the database connection pool.
     */
    async fn init_db() -> PgPool {
        dotenv::from_filename("./sqlx-postgresql-migration/.env-test").ok();
        let pool = PgPool::connect(dotenv::var("DATABASE_URL").unwrap().as_str()).await.unwrap();
        sqlx::migrate!("./sqlx-postgresql-migration/migrations").run(&pool).await.unwrap();
        pool
    }
}
