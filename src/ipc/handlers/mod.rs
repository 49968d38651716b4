pub mod assessments;
pub mod attainment;
pub mod core;
pub mod grades;
pub mod mappings;
pub mod setup;
