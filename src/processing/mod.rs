pub mod artifact;
pub mod filters;
pub mod trial;
