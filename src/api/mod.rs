//! JSON API for the dashboard
//!
//! A deliberately small HTTP/1.1 listener: one request per connection,
//! JSON in and out, routes mapped straight onto `commands`.

pub mod http;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::types::error::MailsortError;
use self::http::Response;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    stop: CancellationToken,
) -> Result<(), MailsortError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API listener started");
    }
    loop {
        let (socket, peer) = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "API accept failed");
                    continue;
                }
            },
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &state).await {
                debug!(%peer, error = %e, "API connection failed");
            }
        });
    }
    info!("API listener stopped");
    Ok(())
}

pub async fn handle_connection<S>(stream: S, state: &Arc<AppState>) -> Result<(), MailsortError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let request = match tokio::time::timeout(REQUEST_TIMEOUT, http::read_request(&mut reader)).await {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) | Err(_) => return Ok(()),
        Ok(Err(e)) => {
            writer.write_all(&Response::error(400, &e).to_bytes()).await?;
            writer.shutdown().await.ok();
            return Ok(());
        }
    };

    let response = routes::dispatch(state, &request).await;
    writer.write_all(&response.to_bytes()).await?;
    writer.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_request_over_stream() {
        let (state, _dir) = test_state();
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        let task = tokio::spawn(async move { handle_connection(server, &state).await });

        client
            .write_all(b"GET /api/distribution HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        task.await.unwrap().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("[]"));
    }
}
