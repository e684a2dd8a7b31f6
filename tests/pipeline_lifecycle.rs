//! End-to-end runs of the pipeline against HTTP-served feeds, using the real
//! fetcher, parser and cleaner.

use feedvoice::content::SpeechCleaner;
use feedvoice::events::PipelineEvent;
use feedvoice::feed::{http_client, HttpFetcher, StaticDirectory, FETCH_TIMEOUT};
use feedvoice::pipeline::{Pipeline, PipelineConfig};
use feedvoice::storage::{EntryStatus, Feed, FeedStatus, MemoryReadState};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PARAGRAPH: &str = "<p>The harbour reopened on Monday after a week of repairs, and the first ferries left on time.</p>";

fn rss(items: &[(&str, &str)]) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Local news</title>"#,
    );
    for (link, body) in items {
        doc.push_str(&format!(
            "<item><title>Story {link}</title><link>{link}</link><description><![CDATA[{body}]]></description></item>"
        ));
    }
    doc.push_str("</channel></rss>");
    doc
}

fn atom(count: usize) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?><feed xmlns="http://www.w3.org/2005/Atom"><title>Atom</title>"#,
    );
    for i in 0..count {
        doc.push_str(&format!(
            r#"<entry><title>Entry {i}</title><link href="https://atom.example.com/{i}"/><id>urn:entry:{i}</id><content type="html"><![CDATA[{PARAGRAPH}]]></content></entry>"#
        ));
    }
    doc.push_str("</feed>");
    doc
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn pipeline_for(feeds: Vec<Feed>) -> Pipeline {
    let fetcher = HttpFetcher::new(http_client(FETCH_TIMEOUT).unwrap());
    Pipeline::builder(
        Arc::new(StaticDirectory::new(feeds)),
        Arc::new(fetcher),
        Arc::new(SpeechCleaner::default()),
    )
    .build()
}

fn feed(server: &MockServer, id: &str) -> Feed {
    Feed::new(id, format!("{}/{id}.xml", server.uri()), id)
}

fn statuses(pipeline: &Pipeline, feed_id: &str) -> Vec<EntryStatus> {
    pipeline
        .get_entries_by_feed(feed_id)
        .iter()
        .map(|e| e.status)
        .collect()
}

#[tokio::test]
async fn test_two_feeds_one_rejected_entry() {
    let server = MockServer::start().await;
    serve(&server, "/one.xml", rss(&[("https://n.example.com/1", PARAGRAPH), ("https://n.example.com/2", PARAGRAPH)])).await;
    serve(&server, "/two.xml", rss(&[("https://n.example.com/3", PARAGRAPH), ("https://n.example.com/4", "<p>Read more</p>")])).await;

    let pipeline = pipeline_for(vec![feed(&server, "one"), feed(&server, "two")]);
    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    assert_eq!(pipeline.get_feed_state("one").unwrap().status, FeedStatus::Ready);
    assert_eq!(pipeline.get_feed_state("two").unwrap().status, FeedStatus::Ready);
    assert_eq!(statuses(&pipeline, "one"), vec![EntryStatus::Cleaned, EntryStatus::Cleaned]);
    assert_eq!(statuses(&pipeline, "two"), vec![EntryStatus::Cleaned, EntryStatus::Error]);

    let summary = pipeline.summary();
    assert_eq!(summary.entries, 4);
    assert_eq!(summary.entries_cleaned, 3);
    assert_eq!(summary.entries_rejected, 1);

    for entry in pipeline.entries() {
        match entry.status {
            EntryStatus::Cleaned => assert!(entry.cleaned_body.is_some()),
            _ => assert!(entry.cleaned_body.is_none()),
        }
    }
    let cleaned = pipeline.get_entry("https://n.example.com/1").unwrap();
    assert_eq!(
        cleaned.cleaned_body.as_deref(),
        Some("The harbour reopened on Monday after a week of repairs, and the first ferries left on time.")
    );
}

#[tokio::test]
async fn test_atom_document_falls_back_to_entries_and_is_capped() {
    let server = MockServer::start().await;
    serve(&server, "/atom.xml", atom(20)).await;

    let pipeline = pipeline_for(vec![feed(&server, "atom")]);
    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    let entries = pipeline.get_entries_by_feed("atom");
    assert_eq!(entries.len(), 15);
    assert_eq!(entries[0].id, "https://atom.example.com/0");
    assert_eq!(entries[14].id, "https://atom.example.com/14");
    assert!(entries.iter().all(|e| e.status == EntryStatus::Cleaned));
}

#[tokio::test]
async fn test_oversized_and_short_bodies_end_in_error() {
    let server = MockServer::start().await;
    let huge = format!("<p>{}</p>", "word ".repeat(120_000));
    serve(
        &server,
        "/mixed.xml",
        rss(&[
            ("https://m.example.com/huge", &huge),
            ("https://m.example.com/tiny", "<p>Ten chars</p>"),
            ("https://m.example.com/fine", PARAGRAPH),
        ]),
    )
    .await;

    let pipeline = pipeline_for(vec![feed(&server, "mixed")]);
    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    assert_eq!(
        statuses(&pipeline, "mixed"),
        vec![EntryStatus::Error, EntryStatus::Error, EntryStatus::Cleaned]
    );
    assert_eq!(pipeline.get_feed_state("mixed").unwrap().status, FeedStatus::Ready);
}

#[tokio::test]
async fn test_server_error_then_successful_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.xml"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, "/flaky.xml", rss(&[("https://f.example.com/1", PARAGRAPH)])).await;
    serve(&server, "/steady.xml", rss(&[("https://s.example.com/1", PARAGRAPH)])).await;

    let pipeline = pipeline_for(vec![feed(&server, "flaky"), feed(&server, "steady")]);
    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    let failed = pipeline.get_feed_state("flaky").unwrap();
    assert_eq!(failed.status, FeedStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("HTTP error: status 503"));
    let steady_before = pipeline.get_entries_by_feed("steady");

    let state = pipeline.retry_feed("flaky").await.unwrap();
    assert_eq!(state.status, FeedStatus::Ready);
    assert_eq!(state.error, None);
    assert_eq!(statuses(&pipeline, "flaky"), vec![EntryStatus::Cleaned]);
    assert_eq!(pipeline.get_entries_by_feed("steady"), steady_before);
}

#[tokio::test]
async fn test_updates_start_with_ordered_feed_list() {
    let server = MockServer::start().await;
    for id in ["a", "b", "c"] {
        serve(&server, &format!("/{id}.xml"), rss(&[])).await;
    }

    let pipeline = pipeline_for(vec![feed(&server, "a"), feed(&server, "b"), feed(&server, "c")]);
    let mut updates = pipeline.subscribe();
    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    match updates.recv().await.unwrap() {
        PipelineEvent::FeedsLoaded { feeds } => {
            let ids: Vec<_> = feeds.iter().map(|f| f.id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
        other => panic!("expected FeedsLoaded first, got {other:?}"),
    }
    let mut seeded = Vec::new();
    for _ in 0..3 {
        match updates.recv().await.unwrap() {
            PipelineEvent::FeedState { state } => {
                assert_eq!(state.status, FeedStatus::Idle);
                seeded.push(state.feed_id);
            }
            other => panic!("expected idle state, got {other:?}"),
        }
    }
    assert_eq!(seeded, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_feed_pool_size_is_respected() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (0..6).map(|i| format!("f{i}")).collect();
    for id in &ids {
        Mock::given(method("GET"))
            .and(path(format!("/{id}.xml")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[]))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .mount(&server)
            .await;
    }

    let fetcher = HttpFetcher::new(http_client(FETCH_TIMEOUT).unwrap());
    let pipeline = Pipeline::builder(
        Arc::new(StaticDirectory::new(ids.iter().map(|id| feed(&server, id)).collect())),
        Arc::new(fetcher),
        Arc::new(SpeechCleaner::default()),
    )
    .config(PipelineConfig {
        feed_workers: 2,
        ..PipelineConfig::default()
    })
    .build();
    let mut updates = pipeline.subscribe();

    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    let mut fetching = std::collections::HashSet::new();
    let mut peak = 0;
    while let Ok(event) = updates.try_recv() {
        if let PipelineEvent::FeedState { state } = event {
            match state.status {
                FeedStatus::Fetching => {
                    fetching.insert(state.feed_id);
                }
                _ => {
                    fetching.remove(&state.feed_id);
                }
            }
            peak = peak.max(fetching.len());
        }
    }
    assert_eq!(peak, 2);
    assert!(pipeline.summary().is_settled());
}

#[tokio::test]
async fn test_read_state_is_consulted_not_written() {
    let server = MockServer::start().await;
    serve(&server, "/r.xml", rss(&[("https://r.example.com/1", PARAGRAPH)])).await;

    let read_state = Arc::new(MemoryReadState::new(["https://r.example.com/1"]));
    let fetcher = HttpFetcher::new(http_client(FETCH_TIMEOUT).unwrap());
    let pipeline = Pipeline::builder(
        Arc::new(StaticDirectory::new(vec![feed(&server, "r")])),
        Arc::new(fetcher),
        Arc::new(SpeechCleaner::default()),
    )
    .read_state(read_state)
    .build();

    pipeline.initialize_feeds().await.unwrap();
    pipeline.wait().await;

    let entry = &pipeline.get_entries_by_feed("r")[0];
    assert!(pipeline.is_consumed(&entry.id).await);
    assert!(!pipeline.is_consumed("https://r.example.com/other").await);
}
