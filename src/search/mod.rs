pub mod query;
pub mod repository;

pub use query::{SearchHit, SearchItemType, SearchQuery};
pub use repository::{SearchIndex, SearchRepository};
