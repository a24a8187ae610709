use async_imap::types::Fetch;
use futures::StreamExt;
use tracing::{debug, warn};

use super::connection::ImapConnection;
use crate::types::error::MailsortError;

/// UIDs per FETCH round trip.
const FETCH_BATCH: usize = 50;

/// A full message as stored on the server.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// Identity headers of a message, enough to track where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeaders {
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: String,
}

/// Collects a FETCH stream, skipping responses that fail to parse.
async fn collect_tolerant<E: std::fmt::Display>(
    stream: impl futures::Stream<Item = Result<Fetch, E>>,
    folder: &str,
) -> Vec<Fetch> {
    futures::pin_mut!(stream);
    let mut items = Vec::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(fetch) => items.push(fetch),
            Err(e) => warn!(folder = %folder, error = %e, "Skipping unparseable FETCH response"),
        }
    }
    items
}

/// Every UID in the folder, ascending.
pub async fn search_all(conn: &mut ImapConnection, folder: &str) -> Result<Vec<u32>, MailsortError> {
    conn.examine(folder).await?;
    let uid_set = conn
        .session
        .uid_search("ALL")
        .await
        .map_err(|e| MailsortError::Backend(format!("SEARCH in {} failed: {}", folder, e)))?;
    let mut uids: Vec<u32> = uid_set.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

/// Keeps the newest `limit` UIDs when a limit is given.
pub fn most_recent(mut uids: Vec<u32>, limit: Option<usize>) -> Vec<u32> {
    if let Some(limit) = limit {
        if uids.len() > limit {
            uids.drain(..uids.len() - limit);
        }
    }
    uids
}

fn uid_list(chunk: &[u32]) -> String {
    chunk
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Full bodies of the given UIDs. Must follow `search_all` on the same folder.
pub async fn fetch_bodies(
    conn: &mut ImapConnection,
    folder: &str,
    uids: &[u32],
) -> Result<Vec<FetchedMessage>, MailsortError> {
    let mut messages = Vec::with_capacity(uids.len());
    for chunk in uids.chunks(FETCH_BATCH) {
        let fetches = collect_tolerant(
            conn.session
                .uid_fetch(uid_list(chunk), "(UID BODY.PEEK[])")
                .await
                .map_err(|e| MailsortError::Backend(format!("FETCH in {} failed: {}", folder, e)))?,
            folder,
        )
        .await;

        for fetch in &fetches {
            if let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) {
                messages.push(FetchedMessage {
                    uid,
                    raw: body.to_vec(),
                });
            }
        }
    }
    messages.sort_by_key(|m| m.uid);
    debug!(folder = %folder, count = messages.len(), "Fetched message bodies");
    Ok(messages)
}

/// Message-ID and Subject for every message in the folder.
pub async fn fetch_headers(
    conn: &mut ImapConnection,
    folder: &str,
) -> Result<Vec<MessageHeaders>, MailsortError> {
    let uids = search_all(conn, folder).await?;
    let mut headers = Vec::with_capacity(uids.len());
    for chunk in uids.chunks(FETCH_BATCH) {
        let fetches = collect_tolerant(
            conn.session
                .uid_fetch(uid_list(chunk), "(UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID SUBJECT)])")
                .await
                .map_err(|e| {
                    MailsortError::Backend(format!("FETCH headers in {} failed: {}", folder, e))
                })?,
            folder,
        )
        .await;

        for fetch in &fetches {
            if let Some(uid) = fetch.uid {
                headers.push(parse_header_block(uid, fetch.header().unwrap_or(&[])));
            }
        }
    }
    headers.sort_by_key(|h| h.uid);
    Ok(headers)
}

/// Extracts Message-ID and decoded Subject from a header-only fetch.
pub fn parse_header_block(uid: u32, block: &[u8]) -> MessageHeaders {
    use mailparse::MailHeaderMap;

    let (message_id, subject) = match mailparse::parse_headers(block) {
        Ok((parsed, _)) => (
            parsed
                .get_first_value("Message-ID")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            parsed.get_first_value("Subject").unwrap_or_default(),
        ),
        Err(_) => (None, String::new()),
    };
    MessageHeaders {
        uid,
        message_id,
        subject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_keeps_tail() {
        assert_eq!(most_recent(vec![1, 2, 3, 4, 5], Some(2)), vec![4, 5]);
        assert_eq!(most_recent(vec![1, 2], Some(5)), vec![1, 2]);
        assert_eq!(most_recent(vec![1, 2], None), vec![1, 2]);
    }

    #[test]
    fn test_parse_header_block() {
        let block = b"Message-ID: <abc@shop.example>\r\nSubject: =?UTF-8?Q?Caf=C3=A9?=\r\n\r\n";
        let h = parse_header_block(7, block);
        assert_eq!(h.uid, 7);
        assert_eq!(h.message_id.as_deref(), Some("<abc@shop.example>"));
        assert_eq!(h.subject, "Café");

        let missing = parse_header_block(8, b"Subject: hi\r\n\r\n");
        assert_eq!(missing.message_id, None);
    }
}
