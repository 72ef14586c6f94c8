//! Wiring: configuration in, a ready-to-use project engine out.

use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::db::{self, SqlDb};
use crate::files::{FileStore, FileWalker, IgnoreFilter, LocalFileStore};
use crate::knowledge::{
    ContextService, DbLinkResolver, EntityRepository, EntityStore, KnowledgeService, LinkResolver,
};
use crate::project::{Project, ProjectContext, ProjectRepository};
use crate::search::{SearchIndex, SearchRepository};
use crate::sync::SyncService;

use super::config::configuration::Configuration;
use super::logging::tracing::tracing_subscribe;

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Clone)]
pub struct Application {
    pub config: Arc<Configuration>,
    pub sql: SqlDb,
    pub project: Project,
    pub entities: Arc<dyn EntityStore>,
    pub sync: Arc<SyncService>,
    pub knowledge: Arc<KnowledgeService>,
    pub context: Arc<ContextService>,
    pub search: Arc<SearchRepository>,
}

impl Application {
    pub async fn initialize(config: Configuration) -> anyhow::Result<Self> {
        let root = tokio::fs::canonicalize(&config.root)
            .await
            .with_context(|| format!("project root {} is not accessible", config.root.display()))?;
        let name = config.resolved_project_name();

        let sql = db::sqlite::init(&config.db_path(&name)).await?;

        let projects = ProjectRepository::new(sql.clone());
        let project = projects
            .ensure(&name, &root.to_string_lossy())
            .await
            .context("cannot register project")?;

        let ctx = ProjectContext::new(project.id, root.clone(), config.sync_options());

        let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(root.clone()));
        let entities: Arc<dyn EntityStore> =
            Arc::new(EntityRepository::new(sql.clone(), project.id));
        let search = Arc::new(SearchRepository::new(sql.clone(), project.id));
        let resolver: Arc<dyn LinkResolver> = Arc::new(DbLinkResolver::new(entities.clone()));

        let ignore_filter = IgnoreFilter::build(&root)?;
        let walker = FileWalker::new(root, ignore_filter);

        let search_index: Arc<dyn SearchIndex> = search.clone();
        let sync = Arc::new(SyncService::new(
            ctx,
            files.clone(),
            entities.clone(),
            search_index,
            resolver.clone(),
            projects,
            walker,
        ));
        let knowledge = Arc::new(KnowledgeService::new(
            sync.clone(),
            files,
            entities.clone(),
            resolver,
        ));
        let context = Arc::new(ContextService::new(sql.clone(), project.id));

        info!(project = %name, project_id = project.id, "application initialized");

        Ok(Application {
            config: Arc::new(config),
            sql,
            project,
            entities,
            sync,
            knowledge,
            context,
            search,
        })
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !tracing_subscribe(config) {
            warn!("failed to install tracing subscriber; one is probably already registered");
        }

        if color_eyre::install().is_err() {
            warn!("failed to install color-eyre");
        }

        _ = LOGGER_INSTALLED.set(true);
    }
}
