mod common;

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use show_scraper::error::ScraperError;
use show_scraper::scheduler::{Scheduler, Trigger};
use show_scraper::storage::{CacheStore, InMemoryCacheStore};
use show_scraper::types::{ShowFields, ShowRecord};

fn today_text() -> String {
    Local::now().format("%a %b %-d").to_string()
}

fn scheduler_for(renderer: FakeRenderer, store: &Arc<InMemoryCacheStore>) -> Arc<Scheduler> {
    let renderer = Arc::new(renderer);
    let store: Arc<dyn CacheStore> = store.clone();
    Arc::new(Scheduler::new(runner(&renderer), store, vec![row_venue("Bravo")]))
}

#[tokio::test]
async fn manual_run_replaces_the_cache() {
    let today = today_text();
    let store = Arc::new(InMemoryCacheStore::new());
    let renderer = FakeRenderer::new().page(
        &row_venue_url("Bravo"),
        row_listing(&[("Tonight", &today, "$8"), ("Someday", "Dec 32", "$8")]),
    );
    let scheduler = scheduler_for(renderer, &store);

    let summary = scheduler.run_and_store(Trigger::Manual).await.unwrap();

    assert_eq!(summary.records, 1);
    assert_eq!(summary.failed_venues, 0);
    let entry = store.get_latest().await.unwrap().unwrap();
    assert_eq!(Some(entry.timestamp), summary.cached_at);
    assert_eq!(entry.data[0].title, "Tonight");
}

#[tokio::test]
async fn all_venues_failing_keeps_the_previous_entry() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryCacheStore::new());
    let previous = ShowRecord::assemble(
        ShowFields { title: "Yesterday".into(), date: "Jun 11".into(), ..Default::default() },
        "Bravo",
        "https://bravo.test/",
    )
    .unwrap();
    let stored = store.put(&vec![previous]).await?;

    let scheduler = scheduler_for(FakeRenderer::new(), &store);
    let summary = scheduler.run_and_store(Trigger::Daily).await?;

    assert_eq!(summary.failed_venues, 1);
    assert!(summary.cached_at.is_none());
    assert_eq!(store.get_latest().await?, Some(stored));
    Ok(())
}

#[tokio::test]
async fn second_run_while_busy_is_rejected() {
    let store = Arc::new(InMemoryCacheStore::new());
    let renderer = FakeRenderer::new()
        .page(&row_venue_url("Bravo"), row_listing(&[("Tonight", &today_text(), "")]))
        .with_delay(Duration::from_millis(100));
    let scheduler = scheduler_for(renderer, &store);

    let running = scheduler.force().unwrap();
    assert!(scheduler.is_running());

    assert!(matches!(scheduler.force(), Err(ScraperError::Busy)));
    assert!(matches!(scheduler.run_and_store(Trigger::Daily).await, Err(ScraperError::Busy)));
    assert!(matches!(scheduler.run_fresh().await, Err(ScraperError::Busy)));

    running.await.unwrap();
    assert!(!scheduler.is_running());

    let entry = store.get_latest().await.unwrap().unwrap();
    assert_eq!(entry.data.len(), 1);
}

#[tokio::test]
async fn fresh_run_leaves_the_cache_alone() {
    let store = Arc::new(InMemoryCacheStore::new());
    let renderer = FakeRenderer::new().page(&row_venue_url("Bravo"), row_listing(&[("Tonight", &today_text(), "$5")]));
    let scheduler = scheduler_for(renderer, &store);

    let data = scheduler.run_fresh().await.unwrap();

    assert_eq!(data.len(), 1);
    assert!(store.get_latest().await.unwrap().is_none());
}
