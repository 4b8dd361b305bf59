//! End-to-end relay runs: scripted mailbox → real Discord channel → local
//! Axum webhook stub, with state persisted through the JSON file store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use inbox_relay::channels::DiscordWebhook;
use inbox_relay::error::{AuthError, Error};
use inbox_relay::pipeline::dispatcher::{Dispatcher, RetryPolicy};
use inbox_relay::pipeline::processor::{Relay, RunSettings};
use inbox_relay::pipeline::rules::RuleSet;
use inbox_relay::pipeline::types::{CandidateMessage, Mailbox, MessageId};
use inbox_relay::store::{FileStore, ProcessedSet, ProcessedStore};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Mailbox that lists a fixed set, honoring `exclude` like a real one.
struct ScriptedMailbox {
    messages: Vec<CandidateMessage>,
    reject_login: bool,
}

#[async_trait]
impl Mailbox for ScriptedMailbox {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_unprocessed(
        &self,
        exclude: &ProcessedSet,
    ) -> inbox_relay::error::Result<Vec<CandidateMessage>> {
        if self.reject_login {
            return Err(AuthError::Mailbox {
                username: "me@example.com".into(),
                reason: "[AUTHENTICATIONFAILED] Invalid credentials".into(),
            }
            .into());
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| !exclude.contains(&m.id))
            .cloned()
            .collect())
    }
}

type Posts = Arc<Mutex<Vec<(String, Value)>>>;

/// Webhook stub: `/hooks/down` always 500s, `/hooks/gone` 404s, anything
/// else accepts.
async fn hook(
    State(posts): State<Posts>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    posts.lock().unwrap().push((name.clone(), body));
    match name.as_str() {
        "down" => StatusCode::INTERNAL_SERVER_ERROR,
        "gone" => StatusCode::NOT_FOUND,
        _ => StatusCode::NO_CONTENT,
    }
}

async fn start_webhooks() -> (String, Posts) {
    let posts: Posts = Arc::default();
    let app = Router::new()
        .route("/hooks/{name}", post(hook))
        .with_state(Arc::clone(&posts));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hooks"), posts)
}

fn rules(base: &str, invoice_hook: &str) -> RuleSet {
    RuleSet::from_json(&format!(
        r#"{{
            "keywords": [
                {{"keywords": ["invoice"], "webhook": "{base}/{invoice_hook}", "color": "green"}}
            ],
            "default_webhook": "{base}/w0"
        }}"#
    ))
    .unwrap()
}

fn inbox() -> Vec<CandidateMessage> {
    vec![
        CandidateMessage::new("m1", "Your Invoice #42", "billing@acme.com")
            .with_sender_name("ACME Billing")
            .with_snippet("Amount due: $10"),
        CandidateMessage::new("m2", "Hello", "friend@example.com"),
    ]
}

fn relay(
    rules: RuleSet,
    messages: Vec<CandidateMessage>,
    store: Arc<FileStore>,
    reject_login: bool,
) -> Relay {
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    let dispatcher = Dispatcher::new(
        Arc::new(DiscordWebhook::new()),
        policy,
        Duration::from_secs(5),
        4,
    );
    Relay::new(
        rules,
        Arc::new(ScriptedMailbox {
            messages,
            reject_login,
        }),
        dispatcher,
        store,
        RunSettings::default(),
    )
}

fn posts_to<'a>(posts: &'a [(String, Value)], hook: &str) -> Vec<&'a Value> {
    posts.iter().filter(|(h, _)| h == hook).map(|(_, b)| b).collect()
}

#[tokio::test]
async fn routes_by_keyword_and_persists_state() {
    let (base, posts) = start_webhooks().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path().join("processed.json")));

    let summary = tokio::time::timeout(
        TEST_TIMEOUT,
        relay(rules(&base, "w1"), inbox(), Arc::clone(&store), false).run_once(),
    )
    .await
    .expect("run timed out")
    .unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.fallback, 1);

    {
        let posts = posts.lock().unwrap();
        let w1 = posts_to(&posts, "w1");
        let w0 = posts_to(&posts, "w0");
        assert_eq!(w1.len(), 1);
        assert_eq!(w0.len(), 1);

        assert_eq!(w1[0]["embeds"][0]["title"], "📧 Your Invoice #42");
        assert_eq!(w1[0]["embeds"][0]["color"], 0x00FF00);
        assert_eq!(w1[0]["embeds"][0]["description"], "Amount due: $10");
        assert_eq!(w0[0]["embeds"][0]["title"], "📧 Hello");
        assert_eq!(w0[0]["embeds"][0]["color"], 0x7289DA);
    }

    let saved = store.load().await.unwrap();
    assert!(saved.contains(&MessageId::new("m1")));
    assert!(saved.contains(&MessageId::new("m2")));

    // Nothing new on the second run.
    let again = relay(rules(&base, "w1"), inbox(), Arc::clone(&store), false)
        .run_once()
        .await
        .unwrap();
    assert_eq!(again.fetched, 0);
    assert_eq!(again.delivered, 0);
    assert_eq!(posts.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_destination_leaves_message_unprocessed() {
    let (base, posts) = start_webhooks().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path().join("processed.json")));

    // "invoice" goes to a failing hook and to w1 via a second rule.
    let rules = RuleSet::from_json(&format!(
        r##"{{
            "keywords": [
                {{"keywords": ["invoice"], "webhook": "{base}/down"}},
                {{"keywords": ["acme"], "webhook": "{base}/w1", "color": "#123456"}}
            ],
            "default_webhook": "{base}/w0"
        }}"##
    ))
    .unwrap();

    let summary = relay(rules.clone(), inbox(), Arc::clone(&store), false)
        .run_once()
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].message_id, MessageId::new("m1"));
    assert!(summary.failures[0].destination.ends_with("/hooks/***"));
    assert_eq!(summary.failures[0].attempts, 2);

    let saved = store.load().await.unwrap();
    assert!(!saved.contains(&MessageId::new("m1")));
    assert!(saved.contains(&MessageId::new("m2")));

    // Transient 500s are retried up to max_attempts.
    assert_eq!(posts_to(&posts.lock().unwrap(), "down").len(), 2);

    // Next run redelivers m1 to every destination, including w1 again.
    let rerun = relay(rules, inbox(), Arc::clone(&store), false)
        .run_once()
        .await
        .unwrap();
    assert_eq!(rerun.fetched, 1);

    let posts = posts.lock().unwrap();
    let w1 = posts_to(&posts, "w1");
    assert_eq!(w1.len(), 2);
    assert_eq!(w1[1]["embeds"][0]["color"], 0x123456);
}

#[tokio::test]
async fn revoked_webhook_is_not_retried() {
    let (base, posts) = start_webhooks().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path().join("processed.json")));

    let summary = relay(rules(&base, "gone"), inbox(), store, false)
        .run_once()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failures[0].attempts, 1);
    assert_eq!(posts_to(&posts.lock().unwrap(), "gone").len(), 1);
}

#[tokio::test]
async fn login_rejection_aborts_without_writing_state() {
    let (base, posts) = start_webhooks().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processed.json");
    let store = Arc::new(FileStore::new(&path));

    let err = relay(rules(&base, "w1"), inbox(), store, true)
        .run_once()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(!path.exists());
    assert!(posts.lock().unwrap().is_empty());
}
