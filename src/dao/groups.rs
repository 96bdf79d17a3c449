use std::borrow::Cow;
use std::str::FromStr;

use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{GroupAddInputType, GroupDetailType, GroupListInputType, GroupListOutputType, GroupSortKey, GroupType, PaginationInput, PaginationOutput, SortOrder},
};

/**
 * Database response type for querying a group row.
 */
pub type QueryGroupDbResp = (i64, String, String);

/**
 * SQL query to insert a group.
 */
const INSERT_GROUP: &str = "INSERT INTO groups (name, group_type) VALUES ($1, $2) RETURNING id";

/**
 * SQL query to update a group.
 */
const UPDATE_GROUP: &str = "UPDATE groups SET name = $1, group_type = $2 WHERE id = $3";

/**
 * SQL query to retrieve a group by id.
 */
const QUERY_GROUP: &str = "SELECT id, name, group_type FROM groups WHERE id = $1";

/**
 * Same as `QUERY_GROUP` but locking the row for the duration of the
 * transaction.
 */
const QUERY_GROUP_FOR_UPDATE: &str = "SELECT id, name, group_type FROM groups WHERE id = $1 FOR UPDATE";

/**
 * SQL query to retrieve a filtered list of groups.
 */
const QUERY_GROUPS_LIST: &str = "SELECT id, name, group_type FROM groups
                                 WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%') AND
                                       ($2::text IS NULL OR group_type = $2)";

/**
 * SQL query to count the sites associated with a group.
 */
const COUNT_SITE_MEMBERS: &str = "SELECT COUNT(*) FROM site_group WHERE group_id = $1";

/**
 * SQL query to read the full group membership edge set. Runs inside the
 * write transaction so the cycle check sees a consistent snapshot.
 */
const QUERY_MEMBERSHIP_EDGES: &str = "SELECT parent_id, member_id FROM group_member";

/**
 * SQL query to add a group membership edge.
 */
const INSERT_MEMBERSHIP: &str = "INSERT INTO group_member (parent_id, member_id) VALUES ($1, $2) ON CONFLICT DO NOTHING";

/**
 * SQL query to remove a group membership edge.
 */
const DELETE_MEMBERSHIP: &str = "DELETE FROM group_member WHERE parent_id = $1 AND member_id = $2";

/**
 * SQL queries to delete a group and every association referencing it.
 */
const DELETE_GROUP_SITE_ASSOCIATIONS: &str = "DELETE FROM site_group WHERE group_id = $1";
const DELETE_GROUP_MEMBERSHIPS: &str = "DELETE FROM group_member WHERE parent_id = $1 OR member_id = $1";
const DELETE_GROUP: &str = "DELETE FROM groups WHERE id = $1";

impl TryFrom<QueryGroupDbResp> for GroupDetailType {
    type Error = ApplicationError;

    fn try_from(row: QueryGroupDbResp) -> Result<Self, Self::Error> {
        let (id, name, group_type) = row;
        Ok(GroupDetailType::new(id, name, GroupType::from_str(&group_type)?))
    }
}

/**
 * DAO for group-related database operations.
 */
pub struct GroupDao {}

impl GroupDao {
    /**
     * Creates a new instance of `GroupDao`.
     */
    pub fn new() -> Self {
        GroupDao {}
    }

    /**
     * Inserts a group.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `group_add_input`: The validated group fields.
     *
     * # Returns
     * The id of the inserted group or an `ApplicationError`.
     */
    #[instrument(skip(self, transaction, group_add_input), fields(result))]
    pub async fn add_group(&self, transaction: &mut PgConnection, group_add_input: &GroupAddInputType) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let (group_id,): (i64,) = sqlx::query_as(INSERT_GROUP)
            .bind(&group_add_input.name)
            .bind(group_add_input.group_type.as_str())
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        Ok(group_id)
    }

    /**
     * Updates a group.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `group_id`: The id of the group to update.
     * `name`: The new group name.
     * `group_type`: The new group type.
     *
     * # Returns
     * A result indicating success or failure of the operation.
     */
    #[instrument(skip(self, transaction, name), fields(result))]
    pub async fn update_group(&self, transaction: &mut PgConnection, group_id: i64, name: &str, group_type: GroupType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_GROUP)
            .bind(name)
            .bind(group_type.as_str())
            .bind(group_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Group with id {} not found for update", group_id);
            return Err(ApplicationError::new(ErrorType::NotFound, "Group not found".to_string()));
        }
        Ok(())
    }

    /**
     * Retrieves a group by id.
     *
     * # Arguments
     * `connection`: The database connection.
     * `group_id`: The id of the group.
     * `for_update`: Whether to lock the row for the transaction.
     *
     * # Returns
     * The group detail or a `NotFound` error.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_group(&self, connection: &mut PgConnection, group_id: i64, for_update: bool) -> Result<GroupDetailType, ApplicationError> {
        let span = tracing::Span::current();
        let query = if for_update { QUERY_GROUP_FOR_UPDATE } else { QUERY_GROUP };
        let row: Option<QueryGroupDbResp> = sqlx::query_as(query)
            .bind(group_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get group: {err}")))?;
        let row = row.ok_or_else(|| ApplicationError::new(ErrorType::NotFound, "Group not found".to_string()))?;
        GroupDetailType::try_from(row)
    }

    /**
     * Retrieves a filtered list of groups based on the provided pagination
     * input.
     *
     * # Arguments
     * `connection`: The database connection.
     * `pagination_input`: `PaginationInput` containing pagination information.
     * `filter_params`: The optional group filters.
     *
     * # Returns
     * A Result containing `GroupListOutputType` or an `ApplicationError`.
     */
    #[instrument(skip(self, connection, filter_params), fields(result))]
    pub async fn get_group_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput, filter_params: GroupListInputType) -> Result<GroupListOutputType, ApplicationError> {
        let span = tracing::Span::current();
        let query = format!("{QUERY_GROUPS_LIST} ORDER BY {} LIMIT $3 OFFSET $4", Self::get_order_clause(filter_params.sort_by, filter_params.sort_order));
        let results: Vec<QueryGroupDbResp> = sqlx::query_as(&query)
            .bind(&filter_params.name)
            .bind(filter_params.group_type.map(|group_type| group_type.as_str()))
            .bind(pagination_input.page_size + 1)
            .bind(pagination_input.start_index)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get group list: {err}")))?;
        let mut groups: Vec<GroupDetailType> = results.into_iter().map(GroupDetailType::try_from).collect::<Result<Vec<_>, _>>()?;
        let pagination_output = Self::get_pagination_output(
            &pagination_input,
            i64::try_from(groups.len()).map_err(|err| ApplicationError::new(ErrorType::Validation, format!("Failed to get pagination output: {err}")))?,
        );
        groups.truncate(usize::try_from(pagination_input.page_size).map_err(|err| ApplicationError::new(ErrorType::Validation, format!("Failed to truncate elements: {err}")))?);
        Ok(GroupListOutputType::new(groups, pagination_output))
    }

    /**
     * Counts the sites associated with a group.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `group_id`: The id of the group.
     *
     * # Returns
     * The number of associated sites.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn count_site_members(&self, transaction: &mut PgConnection, group_id: i64) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let (count,): (i64,) = sqlx::query_as(COUNT_SITE_MEMBERS)
            .bind(group_id)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to count site members: {err}")))?;
        Ok(count)
    }

    /**
     * Reads the full group membership edge set.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     *
     * # Returns
     * The directed (parent, member) edges.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn get_membership_edges(&self, transaction: &mut PgConnection) -> Result<Vec<(i64, i64)>, ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query_as(QUERY_MEMBERSHIP_EDGES)
            .fetch_all(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get membership edges: {err}")))
    }

    /**
     * Adds a group membership edge. Inserting an existing edge is a no-op.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `parent_id`: The containing group.
     * `member_id`: The member group.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_membership(&self, transaction: &mut PgConnection, parent_id: i64, member_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(INSERT_MEMBERSHIP)
            .bind(parent_id)
            .bind(member_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(err.as_database_error()))?;
        Ok(())
    }

    /**
     * Removes a group membership edge.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `parent_id`: The containing group.
     * `member_id`: The member group.
     *
     * # Returns
     * `NotFound` when the edge does not exist.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn remove_membership(&self, transaction: &mut PgConnection, parent_id: i64, member_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_MEMBERSHIP)
            .bind(parent_id)
            .bind(member_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete membership: {err}")))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Membership of group {} in group {} not found for deletion", member_id, parent_id);
            return Err(ApplicationError::new(ErrorType::NotFound, "Membership not found".to_string()));
        }
        Ok(())
    }

    /**
     * Deletes a group and every association referencing it.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the queries within.
     * `group_id`: The id of the group to delete.
     *
     * # Returns
     * A result indicating success or failure of the operation.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_group(&self, transaction: &mut PgConnection, group_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(DELETE_GROUP_SITE_ASSOCIATIONS)
            .bind(group_id)
            .execute(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete group site associations: {err}")))?;
        sqlx::query(DELETE_GROUP_MEMBERSHIPS)
            .bind(group_id)
            .execute(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete group memberships: {err}")))?;
        let result = sqlx::query(DELETE_GROUP)
            .bind(group_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete group: {err}")))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Group with id {} not found for deletion", group_id);
            return Err(ApplicationError::new(ErrorType::NotFound, "Group not found".to_string()));
        }
        if result.rows_affected() > 1 {
            tracing::warn!("Multiple groups attempted deleted. Rolled back");
            return Err(ApplicationError::new(ErrorType::Application, "Multiple groups attempted deleted. Rolled back".to_string()));
        }
        Ok(())
    }

    /**
     * Maps a validated sort key and direction onto an ORDER BY clause. The
     * key is restricted to a fixed column set so no request text reaches
     * the SQL. Without a key the listing stays ordered by id.
     */
    fn get_order_clause(sort_by: Option<GroupSortKey>, sort_order: Option<SortOrder>) -> String {
        let Some(sort_by) = sort_by else {
            return "id".to_string();
        };
        let column = match sort_by {
            GroupSortKey::Id => "id",
            GroupSortKey::Name => "name",
            GroupSortKey::GroupType => "group_type",
        };
        let direction = match sort_order.unwrap_or(SortOrder::Descending) {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        format!("{column} {direction}, id")
    }

    /**
     * Constructs a `PaginationOutput` based on the pagination input and the
     * number of elements.
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
                // Unique violation
                return ApplicationError::new(ErrorType::ConstraintViolation, "Already exists".to_string());
            } else if db_error.code() == Some(Cow::Borrowed("23503")) {
                // Foreign key violation
                return ApplicationError::new(ErrorType::ConstraintViolation, "Missing parent value".to_string());
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let row: QueryGroupDbResp = (1, "Group A".to_string(), "group1".to_string());
        let group = GroupDetailType::try_from(row).unwrap();
        assert_eq!(group.group_type, GroupType::Group1);
    }

    #[test]
    fn test_row_conversion_unknown_type() {
        let row: QueryGroupDbResp = (1, "Group A".to_string(), "group9".to_string());
        assert!(GroupDetailType::try_from(row).is_err());
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(GroupDao::get_order_clause(None, None), "id");
        assert_eq!(GroupDao::get_order_clause(Some(GroupSortKey::Name), Some(SortOrder::Ascending)), "name ASC, id");
        assert_eq!(GroupDao::get_order_clause(Some(GroupSortKey::GroupType), None), "group_type DESC, id");
    }

    #[test]
    fn test_pagination_output() {
        let pagination_input = PaginationInput { start_index: 5, page_size: 10 };
        let pagination_output = GroupDao::get_pagination_output(&pagination_input, 11);
        assert_eq!(pagination_output.start_index, 5);
        assert!(pagination_output.has_more);
    }
}
