//! Per-message pipeline behind the SMTP listener: dedup, classify, record,
//! stamp, relay. Every failure ends in a temporary SMTP reply.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::adapters::smtp::{Delivery, MailTransaction, MessageHandler, SmtpResponse};
use crate::adapters::sqlite::{self, DbPool};
use crate::services::categorizer::Categorizer;
use crate::services::logger::fmt_ms;
use crate::services::message::{self, FooterInfo, ParsedMessage};
use crate::types::error::MailsortError;
use crate::types::{ClassificationRecord, TrainingExample};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub confidence_threshold: f64,
    pub max_examples: u32,
    /// Dashboard base URL; `None` disables the footer.
    pub footer_base_url: Option<String>,
}

/// The classification a relayed message went out with.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayDecision {
    pub classification_id: i64,
    pub account: String,
    pub message_id: String,
    pub category: String,
    pub confidence: f64,
    pub latency_secs: f64,
    /// Reused from an earlier delivery of the same message
    pub cached: bool,
}

pub struct MailRelay {
    pool: DbPool,
    categorizer: Arc<Categorizer>,
    delivery: Arc<dyn Delivery>,
    settings: RelaySettings,
}

impl MailRelay {
    pub fn new(
        pool: DbPool,
        categorizer: Arc<Categorizer>,
        delivery: Arc<dyn Delivery>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            pool,
            categorizer,
            delivery,
            settings,
        }
    }

    /// Runs the whole pipeline for one message and delivers it downstream.
    pub async fn process(&self, transaction: &MailTransaction) -> Result<RelayDecision, MailsortError> {
        let started = Instant::now();
        let account = transaction
            .rcpt_to
            .first()
            .map(|r| r.trim().to_lowercase())
            .ok_or_else(|| MailsortError::InvalidInput("message has no recipient".into()))?;

        let parsed = message::parse(&transaction.data);
        let message_id = if parsed.message_id.is_empty() {
            message::content_message_id(&account, &transaction.data)
        } else {
            parsed.message_id.clone()
        };

        let pool = self.pool.clone();
        let categorizer = self.categorizer.clone();
        let cap = self.settings.max_examples;
        let decision = tokio::task::spawn_blocking(move || {
            decide(&pool, &categorizer, cap, &parsed, message_id, account, started)
        })
        .await??;

        let low_confidence = decision.confidence < self.settings.confidence_threshold;
        let headers = message::classification_headers(
            &decision.category,
            decision.confidence,
            decision.latency_secs,
            low_confidence,
        );
        let mut outgoing = message::stamp_headers(&transaction.data, &headers);

        if let Some(base_url) = &self.settings.footer_base_url {
            let info = FooterInfo {
                classification_id: decision.classification_id,
                category: &decision.category,
                confidence: decision.confidence,
                base_url,
            };
            match message::append_footer(&outgoing, &info) {
                Ok(with_footer) => outgoing = with_footer,
                Err(e) => warn!(message_id = %decision.message_id, error = %e, "Footer skipped"),
            }
        }

        self.delivery
            .deliver(&transaction.mail_from, &transaction.rcpt_to, &outgoing)
            .await?;

        info!(
            account = %decision.account,
            message_id = %decision.message_id,
            category = %decision.category,
            confidence = decision.confidence,
            cached = decision.cached,
            elapsed = %fmt_ms(started.elapsed()),
            "Relayed message"
        );
        Ok(decision)
    }
}

/// Reuses the stored decision for (message_id, account) or makes and records a new one.
fn decide(
    pool: &DbPool,
    categorizer: &Categorizer,
    cap: u32,
    parsed: &ParsedMessage,
    message_id: String,
    account: String,
    started: Instant,
) -> Result<RelayDecision, MailsortError> {
    if let Some(existing) = sqlite::classifications::find_existing(pool, &message_id, &account)? {
        return Ok(from_record(existing, true));
    }

    let classification = categorizer.classify_parsed(parsed, Some(&account), started);
    let now = Utc::now().timestamp_millis();
    let record = ClassificationRecord {
        id: 0,
        message_id: message_id.clone(),
        account: account.clone(),
        subject: classification.subject.clone(),
        category: classification.category.clone(),
        confidence: classification.confidence,
        probabilities: (!classification.probabilities.is_empty())
            .then(|| classification.probabilities.clone()),
        sender_domain: (!classification.sender_domain.is_empty())
            .then(|| classification.sender_domain.clone()),
        processing_time: classification.latency_secs,
        created_at: now,
    };

    let (stored, inserted) = sqlite::classifications::insert_or_get(pool, &record)?;
    if !inserted {
        // Lost a race with a concurrent delivery of the same message
        return Ok(from_record(stored, true));
    }

    // Examples only carry categories the account has a folder for
    let known = sqlite::folder_mappings::categories_for_account(pool, &account)?;
    if known.contains(&stored.category) {
        let example = TrainingExample {
            message_id,
            account,
            subject: parsed.subject.clone(),
            body: parsed.body_excerpt(),
            category: stored.category.clone(),
            created_at: now,
        };
        sqlite::training::upsert_example(pool, &example, cap)?;
    } else {
        warn!(
            account = %account,
            category = %stored.category,
            "No folder for this category in the account, training example skipped"
        );
    }

    Ok(from_record(stored, false))
}

fn from_record(record: ClassificationRecord, cached: bool) -> RelayDecision {
    RelayDecision {
        classification_id: record.id,
        account: record.account,
        message_id: record.message_id,
        category: record.category,
        confidence: record.confidence,
        latency_secs: record.processing_time,
        cached,
    }
}

#[async_trait]
impl MessageHandler for MailRelay {
    async fn handle_message(&self, transaction: MailTransaction) -> SmtpResponse {
        match self.process(&transaction).await {
            Ok(_) => SmtpResponse::accepted(),
            Err(e) => {
                error!(
                    from = %transaction.mail_from,
                    recipients = ?transaction.rcpt_to,
                    error = %e,
                    "Message not relayed"
                );
                SmtpResponse::temporary_failure()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::categorizer::{HashingEmbedder, LogRegFitter};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Captured {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Delivery for Captured {
        async fn deliver(&self, _from: &str, _to: &[String], data: &[u8]) -> Result<(), MailsortError> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    fn relay(footer: Option<&str>, threshold: f64) -> (MailRelay, Arc<Captured>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite::pool::in_memory().unwrap();
        sqlite::folder_mappings::ensure_defaults(&pool, "alice@example.com").unwrap();
        let categorizer = Arc::new(Categorizer::new(
            pool.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(LogRegFitter::default()),
            dir.path().join("model.json"),
            Duration::from_secs(30),
        ));
        let captured = Arc::new(Captured::default());
        let relay = MailRelay::new(
            pool,
            categorizer,
            captured.clone(),
            RelaySettings {
                confidence_threshold: threshold,
                max_examples: 100,
                footer_base_url: footer.map(str::to_string),
            },
        );
        (relay, captured, dir)
    }

    fn transaction(body: &str) -> MailTransaction {
        MailTransaction {
            mail_from: "news@shop.example".into(),
            rcpt_to: vec!["Alice@Example.com".into(), "bob@example.com".into()],
            data: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_first_recipient_is_account() {
        let (relay, _, _dir) = relay(None, 0.7);
        let decision = relay
            .process(&transaction("Subject: Sale\r\nMessage-ID: <s1@shop>\r\n\r\n50% off\r\n"))
            .await
            .unwrap();
        assert_eq!(decision.account, "alice@example.com");
        assert_eq!(decision.message_id, "<s1@shop>");
    }

    #[tokio::test]
    async fn test_low_confidence_header() {
        let (relay, captured, _dir) = relay(None, 0.7);
        relay
            .process(&transaction("Subject: Hi\r\nMessage-ID: <h1@x>\r\n\r\nhello\r\n"))
            .await
            .unwrap();
        let sent = String::from_utf8(captured.sent.lock().unwrap()[0].clone()).unwrap();
        assert!(sent.contains("X-Classification-Low-Confidence: true\r\n"));
    }

    #[tokio::test]
    async fn test_missing_message_id_is_stable() {
        let (relay, _, _dir) = relay(None, 0.0);
        let tx = transaction("Subject: No id\r\n\r\nbody\r\n");
        let first = relay.process(&tx).await.unwrap();
        let second = relay.process(&tx).await.unwrap();
        assert!(first.message_id.starts_with("<generated-alice@example.com-"));
        assert_eq!(first.classification_id, second.classification_id);
        assert!(second.cached);
    }

    #[tokio::test]
    async fn test_footer_links_classification() {
        let (relay, captured, _dir) = relay(Some("http://dash.local/"), 0.0);
        let decision = relay
            .process(&transaction(
                "Subject: Hi\r\nMessage-ID: <f1@x>\r\nContent-Type: text/plain\r\n\r\nhello\r\n",
            ))
            .await
            .unwrap();
        let sent = String::from_utf8(captured.sent.lock().unwrap()[0].clone()).unwrap();
        assert!(sent.contains(&format!(
            "open_classification={}",
            decision.classification_id
        )));
        assert!(sent.contains("Email Classification: PERSONAL"));
    }

    fn example_category(relay: &MailRelay, message_id: &str) -> Option<String> {
        sqlite::training::all_examples(&relay.pool)
            .unwrap()
            .into_iter()
            .find(|ex| ex.message_id == message_id)
            .map(|ex| ex.category)
    }

    #[tokio::test]
    async fn test_example_category_belongs_to_account() {
        let (relay, _, _dir) = relay(None, 0.0);
        sqlite::folder_mappings::insert_discovered(&relay.pool, "bob@example.com", "Receipts/2024", 6)
            .unwrap();

        let receipts = [
            "Your order has shipped tracking number package",
            "Invoice receipt for your purchase order",
            "Order confirmation shipping delivery estimate",
            "Your package was delivered order receipt",
        ];
        let personal = [
            "Dinner with family tonight at mom's house",
            "Happy birthday love see you this weekend",
            "Are we still meeting for coffee tomorrow",
            "Photos from the family trip last weekend",
        ];
        let examples = receipts
            .iter()
            .map(|t| (t.to_string(), "receipts_2024".to_string()))
            .chain(personal.iter().map(|t| (t.to_string(), "personal".to_string())))
            .collect();
        assert!(relay.categorizer.train(examples).await.is_trained());

        let shipped = "Subject: Your order has shipped\r\nMessage-ID: <r1@x>\r\n\r\n\
                       Tracking number for your package order.\r\n";
        let decision = relay.process(&transaction(shipped)).await.unwrap();
        let alice = sqlite::folder_mappings::categories_for_account(&relay.pool, "alice@example.com")
            .unwrap();
        assert!(alice.contains(&decision.category));
        assert_eq!(example_category(&relay, "<r1@x>"), Some(decision.category));

        let mut to_bob = transaction(shipped);
        to_bob.rcpt_to = vec!["bob@example.com".into()];
        let decision = relay.process(&to_bob).await.unwrap();
        assert_eq!(decision.category, "receipts_2024");
    }

    #[tokio::test]
    async fn test_unmapped_account_gets_no_example() {
        let (relay, captured, _dir) = relay(None, 0.0);
        let mut tx = transaction("Subject: Hi\r\nMessage-ID: <u1@x>\r\n\r\nhello\r\n");
        tx.rcpt_to = vec!["carol@example.com".into()];

        let decision = relay.process(&tx).await.unwrap();
        assert_eq!(decision.category, "personal");
        assert!(!decision.cached);
        assert_eq!(example_category(&relay, "<u1@x>"), None);
        assert_eq!(captured.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_recipient_is_temporary_failure() {
        let (relay, captured, _dir) = relay(None, 0.7);
        let mut tx = transaction("Subject: x\r\n\r\ny\r\n");
        tx.rcpt_to.clear();
        assert_eq!(relay.handle_message(tx).await.code, 451);
        assert!(captured.sent.lock().unwrap().is_empty());
    }
}
