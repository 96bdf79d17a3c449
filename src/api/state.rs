use crate::service::{groups::GroupService, sites::SiteService};

/**
* Represents the application state shared across the Actix web application.
*/
pub struct AppState {
    /**
     * The site service for handling site-related operations.
     */
    pub site_service: SiteService,
    /**
     * The group service for handling group-related operations.
     */
    pub group_service: GroupService,
}

/**
 * Creates a new instance of `AppState`.
 *
 * # Arguments
 * `site_service`: The site service for handling site-related operations.
 * `group_service`: The group service for handling group-related operations.
 */
impl AppState {
    pub fn new(site_service: SiteService, group_service: GroupService) -> Self {
        AppState { site_service, group_service }
    }
}
