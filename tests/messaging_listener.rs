// tests/messaging_listener.rs
//
// TelegramListener against a local Bot API stub.
// - pushed messages are matched and stored; offsets advance
// - shutdown stops a listener blocked in a long poll
// - a rejected token stops the listener on its own

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::Query,
    http::StatusCode,
    routing::get,
    Router,
};
use serde::Deserialize;

use mention_monitor::error::FetchError;
use mention_monitor::ingest::providers::messaging::{MessagingOptions, TelegramListener};
use mention_monitor::ingest::scheduler::{spawn_subscription, Supervisor};
use mention_monitor::ingest::IngestPipeline;
use mention_monitor::matcher::AggregatorExemption;
use mention_monitor::model::{MentionFilter, Platform};
use mention_monitor::store::MentionStore;

const TOKEN: &str = "TESTTOKEN";

const FIRST_BATCH: &str = r#"{
  "ok": true,
  "result": [
    {"update_id": 10,
     "message": {"message_id": 501, "date": 1714464000,
                 "chat": {"id": -1009876, "title": "Acme Users"},
                 "from": {"id": 7, "first_name": "Ann", "username": "ann"},
                 "text": "has anyone tried the new Acme router?"}},
    {"update_id": 11,
     "message": {"message_id": 502, "date": 1714464005,
                 "chat": {"id": -1009876, "title": "Acme Users"},
                 "from": {"id": 8, "first_name": "Bob"},
                 "text": "good morning"}}
  ]
}"#;

#[derive(Deserialize)]
struct UpdatesQuery {
    offset: i64,
}

type Offsets = Arc<Mutex<Vec<i64>>>;

async fn serve(authorized: bool) -> (String, Offsets) {
    let offsets: Offsets = Arc::default();
    let log = offsets.clone();
    let app = Router::new().route(
        &format!("/bot{TOKEN}/getUpdates"),
        get(move |Query(q): Query<UpdatesQuery>| {
            log.lock().unwrap().push(q.offset);
            async move {
                if !authorized {
                    return (
                        StatusCode::UNAUTHORIZED,
                        r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
                    );
                }
                if q.offset == 0 {
                    return (StatusCode::OK, FIRST_BATCH);
                }
                // Stand-in for the server-side long-poll wait.
                tokio::time::sleep(Duration::from_millis(50)).await;
                (StatusCode::OK, r#"{"ok":true,"result":[]}"#)
            }
        }),
    )
    .route(
        &format!("/bot{TOKEN}/getMe"),
        get(move || async move {
            if authorized {
                (StatusCode::OK, r#"{"ok":true,"result":{"id":99,"username":"monitor_bot"}}"#)
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), offsets)
}

fn listener(base: &str) -> TelegramListener {
    let mut opts = MessagingOptions::new(TOKEN);
    opts.api_base = base.to_string();
    opts.long_poll = Duration::from_secs(1);
    TelegramListener::new(opts).unwrap()
}

async fn pipeline() -> Arc<IngestPipeline> {
    let store = MentionStore::open_in_memory().await.unwrap();
    store.add_keyword("acme").await.unwrap();
    Arc::new(IngestPipeline::new(store, AggregatorExemption::default()))
}

#[tokio::test]
async fn get_me_identifies_the_bot() {
    let (base, _) = serve(true).await;
    let bot = listener(&base).get_me().await.unwrap();
    assert_eq!(bot.id, 99);
    assert_eq!(bot.username.as_deref(), Some("monitor_bot"));
}

#[tokio::test]
async fn pushed_messages_are_stored_and_shutdown_is_clean() {
    let (base, offsets) = serve(true).await;
    let p = pipeline().await;

    let mut sup = Supervisor::new();
    let sub = spawn_subscription(Arc::new(listener(&base)), p.clone(), sup.token(), sup.tracker());
    sup.track("listener", sub.listener);
    sup.track("consumer", sub.consumer);

    let mut stored = 0;
    for _ in 0..100 {
        stored = p.store().count_mentions(Some(Platform::Messaging)).await.unwrap();
        if stored == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stored, 1);

    assert!(sup.shutdown(Duration::from_secs(3)).await);

    let mentions = p
        .store()
        .query_mentions(&MentionFilter {
            platform: Some(Platform::Messaging),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mentions[0].core.permalink, "https://t.me/c/9876/501");
    assert_eq!(mentions[0].core.author_handle, "ann");

    let offsets = offsets.lock().unwrap();
    assert_eq!(offsets[0], 0);
    assert!(offsets[1..].iter().all(|&o| o == 12), "{offsets:?}");

    let sources = p.store().list_active_sources(Some(Platform::Messaging)).await.unwrap();
    assert_eq!(sources[0].display_name, "Acme Users");
}

#[tokio::test]
async fn rejected_token_stops_the_listener() {
    let (base, offsets) = serve(false).await;
    let l = listener(&base);
    assert!(matches!(l.get_me().await, Err(FetchError::Auth(_))));

    let p = pipeline().await;
    let sup = Supervisor::new();
    let sub = spawn_subscription(Arc::new(l), p, sup.token(), sup.tracker());
    tokio::time::timeout(Duration::from_secs(5), sub.listener)
        .await
        .expect("listener stops without cancellation")
        .unwrap();
    assert_eq!(offsets.lock().unwrap().len(), 1);
}
