use chrono::{Datelike, NaiveDate, Weekday};

use crate::model::apperror::{ApplicationError, ErrorType};
use crate::model::models::GroupType;

/**
 * Checks that no other site of the same country is installed on the proposed
 * date. The caller supplies the ids of persisted sites sharing the country
 * and date; on update the site's own row is excluded here so the check works
 * identically for create and update.
 *
 * # Arguments
 * `installation_date`: The proposed installation date.
 * `same_day_site_ids`: Ids of persisted sites with the same country and date.
 * `exclude_site_id`: The id of the site being updated, if any.
 *
 * # Returns
 * Ok when the date is free, otherwise `DuplicateInstallationDate`.
 */
pub fn validate_unique_installation_date(installation_date: NaiveDate, same_day_site_ids: &[i64], exclude_site_id: Option<i64>) -> Result<(), ApplicationError> {
    let conflict = same_day_site_ids.iter().any(|site_id| Some(*site_id) != exclude_site_id);
    if conflict {
        return Err(ApplicationError::new(ErrorType::DuplicateInstallationDate, format!("A site with installation date {installation_date} already exists for this country")));
    }
    Ok(())
}

/**
 * Checks that the proposed installation date falls on a weekend. The date is
 * treated as a plain calendar date; no timezone conversion is performed.
 *
 * # Returns
 * Ok for Saturday or Sunday, otherwise `InvalidInstallationDay`.
 */
pub fn validate_weekend_installation(installation_date: NaiveDate) -> Result<(), ApplicationError> {
    match installation_date.weekday() {
        Weekday::Sat | Weekday::Sun => Ok(()),
        weekday => Err(ApplicationError::new(ErrorType::InvalidInstallationDay, format!("Installation date {installation_date} falls on a {weekday}, must be a Saturday or Sunday"))),
    }
}

/**
 * Checks that a site may be associated with a group of the given type.
 *
 * # Returns
 * Ok unless the group type is `Group3`, which yields `ForbiddenGroupType`.
 */
pub fn validate_group_association(group_type: GroupType) -> Result<(), ApplicationError> {
    if group_type == GroupType::Group3 {
        return Err(ApplicationError::new(ErrorType::ForbiddenGroupType, "Sites must not be associated with a group of type group3".to_string()));
    }
    Ok(())
}

/**
 * Checks that a group type change is allowed given the group's current site
 * membership. Changing a group to `Group3` while sites are associated would
 * retroactively violate the association rule.
 *
 * # Arguments
 * `group_type`: The proposed group type.
 * `site_member_count`: Number of sites currently associated with the group.
 *
 * # Returns
 * Ok unless the change is to `Group3` with existing site members.
 */
pub fn validate_group_type_change(group_type: GroupType, site_member_count: i64) -> Result<(), ApplicationError> {
    if group_type == GroupType::Group3 && site_member_count > 0 {
        return Err(ApplicationError::new(
            ErrorType::ForbiddenGroupType,
            format!("Cannot change group type to group3 while {site_member_count} site(s) are associated"),
        ));
    }
    Ok(())
}

/**
 * Checks that adding a membership edge from `parent_id` to `member_id` keeps
 * the group graph acyclic. The edge set is a consistent snapshot of the
 * persisted `group_member` table, read in the same transaction as the
 * insert.
 *
 * # Arguments
 * `edges`: Existing directed (parent, member) edges.
 * `parent_id`: The containing group of the proposed edge.
 * `member_id`: The member group of the proposed edge.
 *
 * # Returns
 * Ok when the graph stays acyclic, otherwise `GroupCycle`.
 */
pub fn validate_acyclic_membership(edges: &[(i64, i64)], parent_id: i64, member_id: i64) -> Result<(), ApplicationError> {
    if parent_id == member_id {
        return Err(ApplicationError::new(ErrorType::GroupCycle, format!("Group {parent_id} cannot contain itself")));
    }
    // The edge closes a cycle iff the member already reaches the parent.
    let mut stack = vec![member_id];
    let mut visited = std::collections::HashSet::new();
    while let Some(current) = stack.pop() {
        if current == parent_id {
            return Err(ApplicationError::new(ErrorType::GroupCycle, format!("Adding group {member_id} to group {parent_id} would create a cycle")));
        }
        if !visited.insert(current) {
            continue;
        }
        for (from, to) in edges {
            if *from == current {
                stack.push(*to);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_unique_installation_date_free() {
        assert!(validate_unique_installation_date(date(2024, 3, 11), &[], None).is_ok());
    }

    #[test]
    fn test_unique_installation_date_conflict() {
        let err = validate_unique_installation_date(date(2024, 3, 11), &[4], None).unwrap_err();
        assert_eq!(err.error_type, ErrorType::DuplicateInstallationDate);
    }

    #[test]
    fn test_unique_installation_date_own_row_excluded_on_update() {
        assert!(validate_unique_installation_date(date(2024, 3, 11), &[4], Some(4)).is_ok());
        let err = validate_unique_installation_date(date(2024, 3, 11), &[4, 5], Some(4)).unwrap_err();
        assert_eq!(err.error_type, ErrorType::DuplicateInstallationDate);
    }

    #[test]
    fn test_weekend_installation_monday_rejected() {
        // 2024-03-11 is a Monday.
        let err = validate_weekend_installation(date(2024, 3, 11)).unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidInstallationDay);
    }

    #[test]
    fn test_weekend_installation_saturday_and_sunday_accepted() {
        assert!(validate_weekend_installation(date(2024, 3, 16)).is_ok());
        assert!(validate_weekend_installation(date(2024, 3, 17)).is_ok());
    }

    #[test]
    fn test_group_association_group3_rejected() {
        assert!(validate_group_association(GroupType::Group1).is_ok());
        assert!(validate_group_association(GroupType::Group2).is_ok());
        let err = validate_group_association(GroupType::Group3).unwrap_err();
        assert_eq!(err.error_type, ErrorType::ForbiddenGroupType);
    }

    #[test]
    fn test_group_type_change_to_group3_with_members_rejected() {
        assert!(validate_group_type_change(GroupType::Group3, 0).is_ok());
        assert!(validate_group_type_change(GroupType::Group1, 3).is_ok());
        let err = validate_group_type_change(GroupType::Group3, 3).unwrap_err();
        assert_eq!(err.error_type, ErrorType::ForbiddenGroupType);
    }

    #[test]
    fn test_acyclic_membership_self_loop_rejected() {
        let err = validate_acyclic_membership(&[], 1, 1).unwrap_err();
        assert_eq!(err.error_type, ErrorType::GroupCycle);
    }

    #[test]
    fn test_acyclic_membership_direct_cycle_rejected() {
        let err = validate_acyclic_membership(&[(2, 1)], 1, 2).unwrap_err();
        assert_eq!(err.error_type, ErrorType::GroupCycle);
    }

    #[test]
    fn test_acyclic_membership_transitive_cycle_rejected() {
        let edges = [(2, 3), (3, 1)];
        let err = validate_acyclic_membership(&edges, 1, 2).unwrap_err();
        assert_eq!(err.error_type, ErrorType::GroupCycle);
    }

    #[test]
    fn test_acyclic_membership_diamond_allowed() {
        // 1 -> 2, 1 -> 3, 2 -> 4; adding 3 -> 4 shares a node but closes no cycle.
        let edges = [(1, 2), (1, 3), (2, 4)];
        assert!(validate_acyclic_membership(&edges, 3, 4).is_ok());
    }
}
