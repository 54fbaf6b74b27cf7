pub mod errors;
pub mod models;

pub use errors::TangoError;
pub use models::{ Course, ImportSummary, NormalizedItem, StudyItem, Topic, TopicGroup, UserProgress };
