pub mod groups;
pub mod sites;
