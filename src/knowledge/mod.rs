pub mod context;
pub mod entity;
pub mod entity_repository;
pub mod link_resolver;
pub mod permalink;
pub mod service;

pub use context::{ContextService, EntityContext, RelatedEntity};
pub use entity::{Entity, EntityDraft, Observation, ObservationDraft, Relation, RelationDraft};
pub use entity_repository::{EntityRepository, EntityStore, FileState};
pub use link_resolver::{DbLinkResolver, LinkResolver};
pub use permalink::permalink_from_path;
pub use service::KnowledgeService;
