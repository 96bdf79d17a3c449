use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    dao::groups::GroupDao,
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{GroupAddInputType, GroupDetailType, GroupListInputType, GroupListOutputType, GroupType, GroupUpdateInputType, PaginationInput},
    },
    service::validators,
};

/**
 * Represents the service for managing groups and the group hierarchy.
 */
pub struct GroupService {
    /**
     * The DAO for group operations.
     */
    group_dao: GroupDao,
    /**
     * Optional connection pool for database operations. Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl GroupService {
    /**
     * Creates a new instance of `GroupService`.
     *
     * # Arguments
     * `group_dao`: The DAO for group operations.
     * `connection_pool`: Optional connection pool for database operations.
     *
     * # Returns
     * A new instance of `GroupService`.
     */
    pub fn new(group_dao: GroupDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        GroupService { group_dao, connection_pool }
    }

    /**
     * Creates a group.
     *
     * # Arguments
     * `group_add_input`: The proposed group.
     *
     * # Returns
     * The persisted group or an `ApplicationError`.
     */
    pub async fn create_group(&self, group_add_input: GroupAddInputType) -> Result<GroupDetailType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let group_add_input = group_add_input.validate()?;
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = self.group_dao.add_group(&mut transaction, &group_add_input).await;
        match result {
            Ok(group_id) => {
                transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?;
                Ok(GroupDetailType::new(group_id, group_add_input.name, group_add_input.group_type))
            }
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                Err(err)
            }
        }
    }

    /**
     * Updates a group. Changing the type to group3 is rejected while sites
     * are associated with the group.
     *
     * # Arguments
     * `group_id`: The id of the group to update.
     * `group_update_input`: The patch.
     *
     * # Returns
     * The updated group or the first failing check.
     */
    pub async fn update_group(&self, group_id: i64, group_update_input: GroupUpdateInputType) -> Result<GroupDetailType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = self.update_checked(&mut transaction, group_id, &group_update_input).await;
        match result {
            Ok(group) => {
                transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?;
                Ok(group)
            }
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                Err(err)
            }
        }
    }

    /**
     * Retrieves a group by id.
     *
     * # Arguments
     * `group_id`: The id of the group.
     *
     * # Returns
     * The group detail or a `NotFound` error.
     */
    pub async fn get_group(&self, group_id: i64) -> Result<GroupDetailType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut connection = connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))?;
        self.group_dao.get_group(&mut connection, group_id, false).await
    }

    /**
     * Retrieves a filtered list of groups.
     *
     * # Arguments
     * `pagination_input`: `PaginationInput` containing pagination information.
     * `filter_params`: The optional group filters.
     *
     * # Returns
     * A Result containing `GroupListOutputType` or an `ApplicationError`.
     */
    pub async fn get_group_list(&self, pagination_input: PaginationInput, filter_params: GroupListInputType) -> Result<GroupListOutputType, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut connection = connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))?;
        self.group_dao.get_group_list(&mut connection, pagination_input, filter_params).await
    }

    /**
     * Deletes a group and every association referencing it as one atomic
     * unit.
     *
     * # Arguments
     * `group_id`: The id of the group to delete.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError`.
     */
    pub async fn delete_group(&self, group_id: i64) -> Result<(), ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        match self.group_dao.delete_group(&mut transaction, group_id).await {
            Ok(()) => transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?,
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                return Err(err);
            }
        }
        Ok(())
    }

    /**
     * Adds a group as a member of another group, keeping the membership
     * graph acyclic.
     *
     * # Arguments
     * `parent_id`: The containing group.
     * `member_id`: The member group.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError`.
     */
    pub async fn add_member(&self, parent_id: i64, member_id: i64) -> Result<(), ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = self.add_member_checked(&mut transaction, parent_id, member_id).await;
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
     * Removes a group membership edge.
     *
     * # Arguments
     * `parent_id`: The containing group.
     * `member_id`: The member group.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError`.
     */
    pub async fn remove_member(&self, parent_id: i64, member_id: i64) -> Result<(), ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut transaction = connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        match self.group_dao.remove_membership(&mut transaction, parent_id, member_id).await {
            Ok(()) => transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?,
            Err(err) => {
                transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
                return Err(err);
            }
        }
        Ok(())
    }

    /**
     * Update path: locks and loads the persisted group, merges the patch and
     * checks the site-membership guard before persisting.
     */
    async fn update_checked(&self, transaction: &mut PgConnection, group_id: i64, group_update_input: &GroupUpdateInputType) -> Result<GroupDetailType, ApplicationError> {
        let current = self.group_dao.get_group(transaction, group_id, true).await?;
        let name = group_update_input.name.clone().unwrap_or(current.name);
        if name.trim().is_empty() {
            return Err(ApplicationError::new(ErrorType::Validation, "Group name must not be empty".to_string()));
        }
        let group_type = group_update_input.group_type.unwrap_or(current.group_type);
        if group_type == GroupType::Group3 {
            let site_member_count = self.group_dao.count_site_members(transaction, group_id).await?;
            validators::validate_group_type_change(group_type, site_member_count)?;
        }
        self.group_dao.update_group(transaction, group_id, &name, group_type).await?;
        Ok(GroupDetailType::new(group_id, name, group_type))
    }

    /**
     * Member-add path: both groups must exist and the new edge must keep the
     * membership graph acyclic. Both rows are locked in ascending id order
     * before the edge snapshot is read, so two transactions adding edges
     * between the same groups serialize instead of both reading a
     * pre-insert snapshot.
     */
    async fn add_member_checked(&self, transaction: &mut PgConnection, parent_id: i64, member_id: i64) -> Result<(), ApplicationError> {
        let (first, second) = if parent_id <= member_id { (parent_id, member_id) } else { (member_id, parent_id) };
        self.group_dao.get_group(transaction, first, true).await?;
        if second != first {
            self.group_dao.get_group(transaction, second, true).await?;
        }
        let edges = self.group_dao.get_membership_edges(transaction).await?;
        validators::validate_acyclic_membership(&edges, parent_id, member_id)?;
        self.group_dao.add_membership(transaction, parent_id, member_id).await
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use super::*;
    use sqlx::PgPool;

    fn group_service(pool: &PgPool) -> GroupService {
        GroupService::new(GroupDao::new(), Some(pool.clone()))
    }

    fn group_input(name: &str, group_type: GroupType) -> GroupAddInputType {
        GroupAddInputType { name: name.to_string(), group_type }
    }

    #[sqlx::test]
    async fn test_create_update_then_delete_group() {
        let pool = init_db().await;
        let service = group_service(&pool);
        let group = service.create_group(group_input("Region North", GroupType::Group1)).await.unwrap();
        let patch = GroupUpdateInputType { name: Some("Region South".to_string()), ..GroupUpdateInputType::default() };
        let updated = service.update_group(group.id, patch).await.unwrap();
        assert_eq!(updated.name, "Region South");
        assert_eq!(updated.group_type, GroupType::Group1);
        service.delete_group(group.id).await.unwrap();
        let err = service.get_group(group.id).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::NotFound);
    }

    #[sqlx::test]
    async fn test_membership_cycle_rejected() {
        let pool = init_db().await;
        let service = group_service(&pool);
        let outer = service.create_group(group_input("Outer", GroupType::Group1)).await.unwrap();
        let inner = service.create_group(group_input("Inner", GroupType::Group2)).await.unwrap();
        service.add_member(outer.id, inner.id).await.unwrap();
        let err = service.add_member(inner.id, outer.id).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::GroupCycle);
        let err = service.add_member(outer.id, outer.id).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::GroupCycle);
        service.delete_group(inner.id).await.unwrap();
        service.delete_group(outer.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_concurrent_swapped_member_adds_leave_graph_acyclic() {
        let pool = init_db().await;
        let service = group_service(&pool);
        let first = service.create_group(group_input("First", GroupType::Group1)).await.unwrap();
        let second = service.create_group(group_input("Second", GroupType::Group2)).await.unwrap();
        // Two writers racing to add the same edge in opposite directions.
        // The row locks serialize them, so the loser sees the winner's edge.
        let service_a = group_service(&pool);
        let service_b = group_service(&pool);
        let (result_a, result_b) = tokio::join!(service_a.add_member(first.id, second.id), service_b.add_member(second.id, first.id));
        assert!(result_a.is_err() || result_b.is_err());
        if let Err(err) = &result_a {
            assert_eq!(err.error_type, ErrorType::GroupCycle);
        }
        if let Err(err) = &result_b {
            assert_eq!(err.error_type, ErrorType::GroupCycle);
        }
        service.delete_group(first.id).await.unwrap();
        service.delete_group(second.id).await.unwrap();
    }

    #[sqlx::test]
    async fn test_add_member_missing_group() {
        let pool = init_db().await;
        let service = group_service(&pool);
        let group = service.create_group(group_input("Lonely", GroupType::Group1)).await.unwrap();
        let err = service.add_member(group.id, i64::MAX).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::NotFound);
        service.delete_group(group.id).await.unwrap();
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
