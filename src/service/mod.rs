pub mod groups;
pub mod sites;
pub mod validators;
