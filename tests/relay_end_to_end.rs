use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use mailsort::adapters::smtp::listener::{handle_connection, ListenerSettings};
use mailsort::adapters::smtp::{Delivery, MailTransaction, MessageHandler};
use mailsort::adapters::sqlite::{self, DbPool};
use mailsort::services::categorizer::{Categorizer, HashingEmbedder, LogRegFitter};
use mailsort::services::relay::{MailRelay, RelaySettings};
use mailsort::types::error::MailsortError;
use mailsort::types::Page;

const SHIPPED: &str = "From: Amazon <shipping@amazon.com>\r\n\
To: alice@example.com\r\n\
Subject: Your Order Has Shipped\r\n\
Message-ID: <order-123@amazon.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Your package is on its way and will arrive Thursday.\r\n";

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
    fail: bool,
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, from: &str, to: &[String], data: &[u8]) -> Result<(), MailsortError> {
        if self.fail {
            return Err(MailsortError::Relay("downstream refused connection".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_vec(), data.to_vec()));
        Ok(())
    }
}

fn relay_with(delivery: Arc<RecordingDelivery>) -> (Arc<MailRelay>, DbPool, tempfile::TempDir) {
    let pool = sqlite::pool::in_memory().unwrap();
    relay_over(pool, delivery)
}

fn relay_over(
    pool: DbPool,
    delivery: Arc<RecordingDelivery>,
) -> (Arc<MailRelay>, DbPool, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    sqlite::folder_mappings::ensure_defaults(&pool, "alice@example.com").unwrap();
    let categorizer = Arc::new(Categorizer::new(
        pool.clone(),
        Arc::new(HashingEmbedder::default()),
        Arc::new(LogRegFitter::default()),
        dir.path().join("classifier.json"),
        Duration::from_secs(30),
    ));
    let relay = Arc::new(MailRelay::new(
        pool.clone(),
        categorizer,
        delivery,
        RelaySettings {
            confidence_threshold: 0.3,
            max_examples: 10_000,
            footer_base_url: None,
        },
    ));
    (relay, pool, dir)
}

fn shipped_transaction() -> MailTransaction {
    MailTransaction {
        mail_from: "shipping@amazon.com".into(),
        rcpt_to: vec!["alice@example.com".into()],
        data: SHIPPED.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn shipped_order_is_classified_stamped_and_relayed_once() {
    let delivery = Arc::new(RecordingDelivery::default());
    let (relay, pool, _dir) = relay_with(delivery.clone());

    let reply = relay.handle_message(shipped_transaction()).await;
    assert_eq!(reply.code, 250);
    assert_eq!(reply.message(), "Message accepted for delivery");

    let records = sqlite::classifications::list_recent(&pool, Page::default()).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.message_id, "<order-123@amazon.com>");
    assert_eq!(record.account, "alice@example.com");
    assert_eq!(record.subject, "Your Order Has Shipped");
    assert_eq!(record.category, "personal");
    assert_eq!(record.confidence, 0.5);
    assert_eq!(record.sender_domain.as_deref(), Some("amazon.com"));
    assert_eq!(sqlite::training::count(&pool).unwrap(), 1);

    {
        let sent = delivery.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (from, to, data) = &sent[0];
        assert_eq!(from, "shipping@amazon.com");
        assert_eq!(to, &vec!["alice@example.com".to_string()]);

        let text = String::from_utf8(data.clone()).unwrap();
        let (headers, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(headers.contains("X-Email-Category: personal\r\n"));
        assert!(headers.contains("X-Classification-Confidence: 0.500\r\n"));
        assert!(headers.contains("X-Classifier-Time: "));
        assert!(!headers.contains("X-Classification-Low-Confidence"));
        assert_eq!(body, "Your package is on its way and will arrive Thursday.\r\n");
    }

    let again = relay.handle_message(shipped_transaction()).await;
    assert_eq!(again.code, 250);
    let decision = relay.process(&shipped_transaction()).await.unwrap();
    assert!(decision.cached);
    assert_eq!(decision.classification_id, record.id);

    let records = sqlite::classifications::list_recent(&pool, Page::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(delivery.sent.lock().unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_duplicates_share_one_classification() {
    let store = tempfile::tempdir().unwrap();
    let pool = sqlite::pool::initialize(&store.path().join("mailsort.db")).unwrap();
    let delivery = Arc::new(RecordingDelivery::default());
    let (relay, pool, _dir) = relay_over(pool, delivery.clone());

    let submissions: Vec<_> = (0..32)
        .map(|_| {
            let relay = relay.clone();
            tokio::spawn(async move { relay.handle_message(shipped_transaction()).await })
        })
        .collect();
    for submission in submissions {
        assert_eq!(submission.await.unwrap().code, 250);
    }

    let records = sqlite::classifications::list_recent(&pool, Page::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_id, "<order-123@amazon.com>");
    assert_eq!(sqlite::training::count(&pool).unwrap(), 1);
    assert_eq!(delivery.sent.lock().unwrap().len(), 32);
}

#[tokio::test]
async fn downstream_failure_is_a_temporary_rejection() {
    let delivery = Arc::new(RecordingDelivery {
        fail: true,
        ..RecordingDelivery::default()
    });
    let (relay, _pool, _dir) = relay_with(delivery);

    let reply = relay.handle_message(shipped_transaction()).await;
    assert_eq!(reply.code, 451);
}

#[tokio::test]
async fn full_smtp_conversation() {
    let delivery = Arc::new(RecordingDelivery::default());
    let (relay, pool, _dir) = relay_with(delivery.clone());
    let settings = ListenerSettings {
        hostname: "mailsort.test".into(),
        max_message_bytes: 1024 * 1024,
    };

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let server_task = tokio::spawn(async move {
        let stop = CancellationToken::new();
        handle_connection(server, &settings, relay.as_ref(), &stop).await
    });

    let mut script = String::from(
        "EHLO sender.example\r\nMAIL FROM:<shipping@amazon.com>\r\nRCPT TO:<alice@example.com>\r\nDATA\r\n",
    );
    script.push_str(SHIPPED);
    script.push_str(".\r\nQUIT\r\n");
    client.write_all(script.as_bytes()).await.unwrap();

    let mut transcript = String::new();
    client.read_to_string(&mut transcript).await.unwrap();
    server_task.await.unwrap().unwrap();

    let codes: Vec<&str> = transcript
        .lines()
        .filter(|l| l.len() >= 4 && &l[3..4] == " ")
        .map(|l| &l[..3])
        .collect();
    assert_eq!(codes, vec!["220", "250", "250", "250", "354", "250", "221"]);
    assert!(transcript.contains("250 Message accepted for delivery"));

    assert_eq!(delivery.sent.lock().unwrap().len(), 1);
    assert_eq!(
        sqlite::classifications::list_recent(&pool, Page::default())
            .unwrap()
            .len(),
        1
    );
}
