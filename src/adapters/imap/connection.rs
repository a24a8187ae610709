use async_imap::types::Mailbox;
use async_imap::Session;
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use crate::types::error::MailsortError;
use crate::types::Account;

// TLS over tokio TCP, bridged to futures-io for async-imap.
pub type ImapSession = Session<TlsStream<Compat<TcpStream>>>;

/// Authenticated session that only ever opens folders read-only.
pub struct ImapConnection {
    pub session: ImapSession,
    pub account: String,
}

impl ImapConnection {
    /// EXAMINE, so flags such as \Seen are never touched.
    pub async fn examine(&mut self, folder: &str) -> Result<Mailbox, MailsortError> {
        self.session
            .examine(folder)
            .await
            .map_err(|e| MailsortError::Backend(format!("EXAMINE {} failed: {}", folder, e)))
    }

    pub async fn logout(mut self) {
        if let Err(e) = self.session.logout().await {
            debug!(account = %self.account, error = %e, "IMAP logout failed");
        }
    }
}

pub async fn connect(host: &str, port: u16, account: &Account) -> Result<ImapConnection, MailsortError> {
    info!(host = %host, port, account = %account.email, "Connecting to IMAP server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| MailsortError::Network(format!("TCP connection failed: {}", e)))?;

    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp.compat())
        .await
        .map_err(|e| MailsortError::Network(format!("TLS handshake failed: {}", e)))?;

    let client = async_imap::Client::new(tls_stream);
    let session = client
        .login(&account.email, &account.password)
        .await
        .map_err(|(e, _)| MailsortError::Backend(format!("Login failed: {}", e)))?;

    Ok(ImapConnection {
        session,
        account: account.email.clone(),
    })
}
