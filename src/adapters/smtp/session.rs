use super::command::{parse_command, size_parameter, SmtpCommand};
use super::response::SmtpResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Connected, waiting for HELO/EHLO
    Connected,
    /// Greeted, ready for MAIL
    Greeted,
    /// Sender set, waiting for RCPT
    MailFrom,
    /// At least one recipient
    RcptTo,
    /// Receiving message content
    Data,
}

/// Envelope and content of one message received over SMTP.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailTransaction {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub data: Vec<u8>,
}

/// What the connection loop should do after a line.
#[derive(Debug, PartialEq)]
pub enum SessionEvent {
    Reply(SmtpResponse),
    /// Content complete; hand the transaction to the message handler
    Deliver(MailTransaction),
    /// Reply, then close the connection
    Close(SmtpResponse),
    /// Data line buffered, nothing to send
    Continue,
}

/// Protocol state for one inbound connection. Pure: no I/O.
pub struct SmtpSession {
    hostname: String,
    max_message_bytes: usize,
    state: SmtpState,
    greeted: bool,
    transaction: MailTransaction,
    oversized: bool,
}

impl SmtpSession {
    pub fn new(hostname: impl Into<String>, max_message_bytes: usize) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_bytes,
            state: SmtpState::Connected,
            greeted: false,
            transaction: MailTransaction::default(),
            oversized: false,
        }
    }

    pub fn greeting(&self) -> SmtpResponse {
        SmtpResponse::service_ready(&self.hostname)
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Feeds one line including its terminator.
    pub fn handle_line(&mut self, line: &[u8]) -> SessionEvent {
        if self.state == SmtpState::Data {
            return self.handle_data_line(line);
        }
        let text = String::from_utf8_lossy(line);
        self.handle_command(parse_command(&text))
    }

    fn reset_transaction(&mut self) {
        self.transaction = MailTransaction::default();
        self.oversized = false;
        self.state = if self.greeted {
            SmtpState::Greeted
        } else {
            SmtpState::Connected
        };
    }

    fn handle_command(&mut self, command: SmtpCommand) -> SessionEvent {
        let reply = match command {
            SmtpCommand::Helo(_) => {
                self.greeted = true;
                self.reset_transaction();
                SmtpResponse::new(250, self.hostname.clone())
            }
            SmtpCommand::Ehlo(_) => {
                self.greeted = true;
                self.reset_transaction();
                SmtpResponse::multiline(
                    250,
                    vec![
                        self.hostname.clone(),
                        "8BITMIME".into(),
                        "PIPELINING".into(),
                        format!("SIZE {}", self.max_message_bytes),
                    ],
                )
            }
            SmtpCommand::MailFrom { address, parameters } => match self.state {
                SmtpState::Connected => SmtpResponse::bad_sequence("Send HELO/EHLO first"),
                SmtpState::MailFrom | SmtpState::RcptTo => {
                    SmtpResponse::bad_sequence("Nested MAIL command")
                }
                _ => {
                    if size_parameter(&parameters).is_some_and(|size| size > self.max_message_bytes) {
                        SmtpResponse::too_large()
                    } else {
                        self.transaction.mail_from = address;
                        self.state = SmtpState::MailFrom;
                        SmtpResponse::ok()
                    }
                }
            },
            SmtpCommand::RcptTo { address, .. } => match self.state {
                SmtpState::MailFrom | SmtpState::RcptTo => {
                    self.transaction.rcpt_to.push(address);
                    self.state = SmtpState::RcptTo;
                    SmtpResponse::ok()
                }
                _ => SmtpResponse::bad_sequence("Need MAIL command"),
            },
            SmtpCommand::Data => match self.state {
                SmtpState::RcptTo => {
                    self.state = SmtpState::Data;
                    SmtpResponse::start_mail_input()
                }
                _ => SmtpResponse::bad_sequence("Need RCPT command"),
            },
            SmtpCommand::Rset => {
                self.reset_transaction();
                SmtpResponse::ok()
            }
            SmtpCommand::Noop => SmtpResponse::ok(),
            SmtpCommand::Vrfy => SmtpResponse::cannot_verify(),
            SmtpCommand::Help => SmtpResponse::help(),
            SmtpCommand::Quit => return SessionEvent::Close(SmtpResponse::closing(&self.hostname)),
            SmtpCommand::NotImplemented(_) => SmtpResponse::not_implemented(),
            SmtpCommand::Invalid(detail) => SmtpResponse::syntax_error(detail),
            SmtpCommand::Unknown(_) => SmtpResponse::unrecognized(),
        };
        SessionEvent::Reply(reply)
    }

    fn handle_data_line(&mut self, line: &[u8]) -> SessionEvent {
        if line == b".\r\n" || line == b".\n" || line == b"." {
            let transaction = std::mem::take(&mut self.transaction);
            let oversized = self.oversized;
            self.reset_transaction();
            if oversized {
                return SessionEvent::Reply(SmtpResponse::too_large());
            }
            return SessionEvent::Deliver(transaction);
        }

        if self.oversized {
            return SessionEvent::Continue;
        }
        // Dot-stuffed lines lose their leading dot
        let content = if line.starts_with(b"..") { &line[1..] } else { line };
        if self.transaction.data.len() + content.len() > self.max_message_bytes {
            self.oversized = true;
            self.transaction.data.clear();
            return SessionEvent::Continue;
        }
        self.transaction.data.extend_from_slice(content);
        SessionEvent::Continue
    }
}
