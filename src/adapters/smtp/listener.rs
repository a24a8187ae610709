use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::response::SmtpResponse;
use super::session::{MailTransaction, SessionEvent, SmtpSession};
use crate::types::error::MailsortError;

/// Longest line read in one go; longer lines arrive in pieces.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Idle time allowed between client lines.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Receives each completed transaction and decides the terminal reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, transaction: MailTransaction) -> SmtpResponse;
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub hostname: String,
    pub max_message_bytes: usize,
}

/// Accepts connections until `stop` fires, one task per connection.
pub async fn serve(
    listener: TcpListener,
    settings: ListenerSettings,
    handler: Arc<dyn MessageHandler>,
    stop: CancellationToken,
) -> Result<(), MailsortError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "SMTP listener started");
    }

    loop {
        let (socket, peer) = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            },
        };

        debug!(%peer, "SMTP connection opened");
        let settings = settings.clone();
        let handler = handler.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &settings, handler.as_ref(), &stop).await {
                debug!(%peer, error = %e, "SMTP connection ended with error");
            }
        });
    }

    info!("SMTP listener stopped");
    Ok(())
}

/// Runs one SMTP conversation over any byte stream.
pub async fn handle_connection<S>(
    stream: S,
    settings: &ListenerSettings,
    handler: &dyn MessageHandler,
    stop: &CancellationToken,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut session = SmtpSession::new(settings.hostname.clone(), settings.max_message_bytes);

    writer.write_all(&session.greeting().to_bytes()).await?;

    let mut line = Vec::with_capacity(1024);
    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES);
        let read = tokio::select! {
            _ = stop.cancelled() => {
                writer.write_all(&SmtpResponse::new(421, "Service shutting down").to_bytes()).await?;
                break;
            }
            read = tokio::time::timeout(READ_TIMEOUT, limited.read_until(b'\n', &mut line)) => read,
        };

        let count = match read {
            Ok(result) => result?,
            Err(_) => {
                writer.write_all(&SmtpResponse::timeout(session.hostname()).to_bytes()).await?;
                break;
            }
        };
        if count == 0 {
            break;
        }

        match session.handle_line(&line) {
            SessionEvent::Continue => {}
            SessionEvent::Reply(reply) => writer.write_all(&reply.to_bytes()).await?,
            SessionEvent::Deliver(transaction) => {
                let reply = handler.handle_message(transaction).await;
                writer.write_all(&reply.to_bytes()).await?;
            }
            SessionEvent::Close(reply) => {
                writer.write_all(&reply.to_bytes()).await?;
                break;
            }
        }
        writer.flush().await?;
    }

    writer.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<MailTransaction>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle_message(&self, transaction: MailTransaction) -> SmtpResponse {
            self.received.lock().unwrap().push(transaction);
            SmtpResponse::accepted()
        }
    }

    #[tokio::test]
    async fn test_conversation_over_stream() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let recorder = Arc::new(Recorder::default());
        let settings = ListenerSettings {
            hostname: "relay.local".into(),
            max_message_bytes: 4096,
        };

        let handler = recorder.clone();
        let server_task = tokio::spawn(async move {
            let stop = CancellationToken::new();
            handle_connection(server, &settings, handler.as_ref(), &stop).await
        });

        let (read, mut write) = tokio::io::split(client);
        write
            .write_all(
                b"EHLO client\r\nMAIL FROM:<a@b.c>\r\nRCPT TO:<alice@example.com>\r\nDATA\r\n\
                  Subject: Hi\r\n\r\nBody\r\n.\r\nQUIT\r\n",
            )
            .await
            .unwrap();

        let mut transcript = String::new();
        BufReader::new(read).read_to_string(&mut transcript).await.unwrap();
        server_task.await.unwrap().unwrap();

        assert!(transcript.starts_with("220 relay.local"));
        assert!(transcript.contains("354 "));
        assert!(transcript.contains("250 Message accepted for delivery"));
        assert!(transcript.trim_end().ends_with("closing connection"));

        let received = recorder.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data, b"Subject: Hi\r\n\r\nBody\r\n");
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_for_a_line() {
        let (client, server) = tokio::io::duplex(4096);
        let settings = ListenerSettings {
            hostname: "relay.local".into(),
            max_message_bytes: 4096,
        };
        let stop = CancellationToken::new();
        stop.cancel();

        let server_task = tokio::spawn(async move {
            let recorder = Recorder::default();
            handle_connection(server, &settings, &recorder, &stop).await
        });

        let (read, _write) = tokio::io::split(client);
        let mut transcript = String::new();
        BufReader::new(read).read_to_string(&mut transcript).await.unwrap();
        server_task.await.unwrap().unwrap();

        assert!(transcript.starts_with("220 relay.local"));
        assert!(transcript.ends_with("421 Service shutting down\r\n"));
    }
}
