//! Neighborhood traversal and dry-run status over a synced project.

mod common;

use common::testbed;
use memograph::knowledge::EntityStore as _;

async fn linked_project() -> common::TestBed {
    let bed = testbed().await;
    // a -> b -> c, plus d off on its own
    bed.write("a.md", "# A\n\n- leads_to [[b]]\n\n## Observations\n- [root] start here\n");
    bed.write("b.md", "# B\n\n- leads_to [[c]]\n");
    bed.write("c.md", "# C\n");
    bed.write("d.md", "# D\n");
    bed.app.sync.sync(false).await.unwrap();
    // second pass so a->b (synced before b existed) is resolved too
    bed.app.sync.sync(true).await.unwrap();
    bed
}

#[tokio::test]
async fn context_walks_relations_breadth_first() {
    let bed = linked_project().await;
    let a = bed.app.knowledge.get_entity("a").await.unwrap();

    let context = bed.app.context.build_context(&a, 2, None).await.unwrap();

    assert_eq!(context.primary.id, a.id);
    assert_eq!(context.observations.len(), 1);
    assert_eq!(context.observations[0].category.as_deref(), Some("root"));

    let mut related: Vec<(String, u32)> = context
        .related
        .iter()
        .map(|r| (r.entity.file_path.clone(), r.depth))
        .collect();
    related.sort();
    assert_eq!(
        related,
        vec![("b.md".to_string(), 1), ("c.md".to_string(), 2)]
    );
    assert_eq!(context.relations.len(), 2);
}

#[tokio::test]
async fn context_depth_limits_the_walk() {
    let bed = linked_project().await;
    let a = bed.app.knowledge.get_entity("a").await.unwrap();

    let context = bed.app.context.build_context(&a, 1, None).await.unwrap();
    assert_eq!(context.related.len(), 1);
    assert_eq!(context.related[0].entity.file_path, "b.md");
}

#[tokio::test]
async fn context_reaches_incoming_edges_too() {
    let bed = linked_project().await;
    let b = bed.app.knowledge.get_entity("b").await.unwrap();

    let context = bed.app.context.build_context(&b, 1, None).await.unwrap();
    let mut related: Vec<String> = context
        .related
        .iter()
        .map(|r| r.entity.file_path.clone())
        .collect();
    related.sort();
    // a links to b, b links to c: both are one hop away
    assert_eq!(related, vec!["a.md".to_string(), "c.md".to_string()]);
}

#[tokio::test]
async fn unresolved_edges_do_not_contribute_neighbours() {
    let bed = testbed().await;
    bed.write("solo.md", "- depends_on [[missing]]\n");
    bed.app.sync.sync(false).await.unwrap();

    let solo = bed.app.knowledge.get_entity("solo").await.unwrap();
    let context = bed.app.context.build_context(&solo, 2, None).await.unwrap();
    assert!(context.related.is_empty());
    assert!(context.relations.is_empty());
}

#[tokio::test]
async fn scan_status_reports_without_applying() {
    let bed = testbed().await;
    bed.write("seen.md", "# Seen\n");
    bed.app.sync.sync(false).await.unwrap();

    bed.write("pending.md", "# Pending\n");
    bed.remove("seen.md");

    let status = bed.app.sync.scan_status().await.unwrap();
    assert!(status.new.contains("pending.md"));
    assert!(status.deleted.contains("seen.md"));

    // nothing was applied
    assert!(bed.app.knowledge.get_entity("pending").await.is_err());
    assert!(bed.app.knowledge.get_entity("seen").await.is_ok());
    assert_eq!(bed.app.entities.entity_count().await.unwrap(), 1);

    // a full apply pass then agrees with the status
    let report = bed.app.sync.sync(true).await.unwrap();
    assert!(report.new.contains("pending.md"));
    assert!(report.deleted.contains("seen.md"));
}
