//! Search behaviour over the write-through FTS mirror.

mod common;

use chrono::{Duration, Utc};
use common::testbed;
use memograph::search::{SearchIndex as _, SearchItemType, SearchQuery};

async fn seeded() -> common::TestBed {
    let bed = testbed().await;
    bed.write(
        "coffee/brewing.md",
        "---\ntitle: Coffee Brewing\ntype: knowledge\n---\n\nPour-over technique notes.\n\n## Observations\n- [method] blooming improves extraction #technique\n\n## Relations\n- requires [[Coffee Beans]]\n",
    );
    bed.write(
        "coffee/beans.md",
        "---\ntitle: Coffee Beans\n---\n\nSingle origin only.\n",
    );
    bed.write("journal/2024.md", "# Journal\n\nUnrelated entry.\n");
    bed.app.sync.sync(false).await.unwrap();
    bed
}

#[tokio::test]
async fn free_text_is_prefix_matched() {
    let bed = seeded().await;

    let hits = bed.app.search.search(&SearchQuery::text("Coff")).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|h| h.title.to_lowercase().contains("coffee")
            || h.content.to_lowercase().contains("coffee")));

    let none = bed.app.search.search(&SearchQuery::text("zzzpqr")).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn observations_and_relations_are_mirrored() {
    let bed = seeded().await;

    let observations = bed
        .app
        .search
        .search(&SearchQuery {
            text: Some("blooming".to_string()),
            types: vec![SearchItemType::Observation],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].category.as_deref(), Some("method"));

    let relations = bed
        .app
        .search
        .search(&SearchQuery {
            types: vec![SearchItemType::Relation],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(relations.iter().any(|r| r.relation_type.as_deref() == Some("requires")));
}

#[tokio::test]
async fn permalink_exact_and_glob() {
    let bed = seeded().await;

    let exact = bed
        .app
        .search
        .search(&SearchQuery::permalink("coffee/brewing"))
        .await
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].item_type, SearchItemType::Entity);

    let glob = bed
        .app
        .search
        .search(&SearchQuery {
            permalink_glob: Some("coffee/*".to_string()),
            types: vec![SearchItemType::Entity],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(glob.len(), 2);
}

#[tokio::test]
async fn entity_type_and_date_filters() {
    let bed = seeded().await;

    let knowledge_only = bed
        .app
        .search
        .search(&SearchQuery {
            types: vec![SearchItemType::Entity],
            entity_types: vec!["knowledge".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(knowledge_only.len(), 1);
    assert_eq!(knowledge_only[0].permalink.as_deref(), Some("coffee/brewing"));

    let future = bed
        .app
        .search
        .search(&SearchQuery {
            after_date: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(future.is_empty());
}

#[tokio::test]
async fn slash_terms_match_literally() {
    let bed = seeded().await;

    let hits = bed
        .app
        .search
        .search(&SearchQuery::text("pour-over"))
        .await
        .unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn deleting_a_file_empties_its_mirror_rows() {
    let bed = seeded().await;
    let entity = bed.app.knowledge.get_entity("coffee/brewing").await.unwrap();

    bed.remove("coffee/brewing.md");
    bed.app.sync.sync(false).await.unwrap();

    let leftovers: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM search_index WHERE entity_id = ? OR from_id = ? OR to_id = ?",
    )
    .bind(entity.id)
    .bind(entity.id)
    .bind(entity.id)
    .fetch_one(bed.app.sql.as_ref())
    .await
    .unwrap();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn reindex_rebuilds_from_relational_tables() {
    let bed = seeded().await;

    sqlx::query("DELETE FROM search_index")
        .execute(bed.app.sql.as_ref())
        .await
        .unwrap();
    assert!(bed
        .app
        .search
        .search(&SearchQuery::permalink("coffee/brewing"))
        .await
        .unwrap()
        .is_empty());

    bed.app.sync.reindex_search().await.unwrap();

    let hits = bed
        .app
        .search
        .search(&SearchQuery::permalink("coffee/brewing"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}
