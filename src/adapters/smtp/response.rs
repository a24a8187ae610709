/// Reply sent to the SMTP client. Multiple lines render as a multiline reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// Format for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, separator, line));
        }
        if self.lines.is_empty() {
            out.push_str(&format!("{}\r\n", self.code));
        }
        out.into_bytes()
    }

    pub fn service_ready(domain: &str) -> Self {
        Self::new(220, format!("{} ESMTP mailsort ready", domain))
    }

    pub fn closing(domain: &str) -> Self {
        Self::new(221, format!("{} closing connection", domain))
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    /// Terminal reply for a relayed message
    pub fn accepted() -> Self {
        Self::new(250, "Message accepted for delivery")
    }

    pub fn cannot_verify() -> Self {
        Self::new(252, "Cannot VRFY user, but will accept message")
    }

    pub fn help() -> Self {
        Self::new(214, "Commands: HELO EHLO MAIL RCPT DATA RSET NOOP QUIT")
    }

    pub fn start_mail_input() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn timeout(domain: &str) -> Self {
        Self::new(421, format!("{} timeout, closing connection", domain))
    }

    /// Terminal reply when classification or delivery failed; the sender retries
    pub fn temporary_failure() -> Self {
        Self::new(451, "Temporary failure, please retry later")
    }

    pub fn too_large() -> Self {
        Self::new(452, "Message exceeds size limit")
    }

    pub fn unrecognized() -> Self {
        Self::new(500, "Command unrecognized")
    }

    pub fn syntax_error(detail: impl Into<String>) -> Self {
        Self::new(501, detail)
    }

    pub fn not_implemented() -> Self {
        Self::new(502, "Command not implemented")
    }

    pub fn bad_sequence(detail: impl Into<String>) -> Self {
        Self::new(503, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        assert_eq!(SmtpResponse::ok().to_bytes(), b"250 OK\r\n");
    }

    #[test]
    fn test_multiline() {
        let r = SmtpResponse::multiline(250, vec!["host".into(), "8BITMIME".into(), "SIZE 10".into()]);
        assert_eq!(r.to_bytes(), b"250-host\r\n250-8BITMIME\r\n250 SIZE 10\r\n");
        assert!(r.is_success());
        assert!(!SmtpResponse::temporary_failure().is_success());
    }
}
