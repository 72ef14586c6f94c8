pub mod frontmatter;
pub mod parser;
pub mod schema;

pub use parser::EntityParser;
pub use schema::{EntityFrontmatter, EntityMarkdown, ParsedObservation, ParsedRelation};
