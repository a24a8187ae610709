/// Commands accepted by the inbound listener (RFC 5321 subset)
#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    MailFrom {
        address: String,
        parameters: Vec<String>,
    },
    RcptTo {
        address: String,
        parameters: Vec<String>,
    },
    Data,
    Rset,
    Noop,
    Vrfy,
    Help,
    Quit,
    /// Recognized but not offered here (STARTTLS, AUTH, EXPN, ...)
    NotImplemented(String),
    /// Known verb with malformed arguments
    Invalid(String),
    Unknown(String),
}

/// Parse one command line. Trailing CR/LF is ignored.
pub fn parse_command(input: &str) -> SmtpCommand {
    let input = input.trim_end_matches(['\r', '\n']);

    let (verb, args) = match input.split_once(' ') {
        Some((verb, args)) => (verb, args.trim()),
        None => (input, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "HELO" if !args.is_empty() => SmtpCommand::Helo(args.to_string()),
        "EHLO" if !args.is_empty() => SmtpCommand::Ehlo(args.to_string()),
        "HELO" | "EHLO" => SmtpCommand::Invalid(format!("{} requires a domain", verb)),
        "MAIL" => match strip_keyword(args, "FROM:").and_then(parse_path) {
            Some((address, parameters)) => SmtpCommand::MailFrom {
                address,
                parameters,
            },
            None => SmtpCommand::Invalid("Syntax: MAIL FROM:<address>".into()),
        },
        "RCPT" => match strip_keyword(args, "TO:").and_then(parse_path) {
            Some((address, parameters)) if !address.is_empty() => SmtpCommand::RcptTo {
                address,
                parameters,
            },
            _ => SmtpCommand::Invalid("Syntax: RCPT TO:<address>".into()),
        },
        "DATA" => SmtpCommand::Data,
        "RSET" => SmtpCommand::Rset,
        "NOOP" => SmtpCommand::Noop,
        "VRFY" => SmtpCommand::Vrfy,
        "HELP" => SmtpCommand::Help,
        "QUIT" => SmtpCommand::Quit,
        "STARTTLS" | "AUTH" | "EXPN" | "TURN" | "ETRN" => {
            SmtpCommand::NotImplemented(verb.to_ascii_uppercase())
        }
        _ => SmtpCommand::Unknown(input.to_string()),
    }
}

fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let head = args.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(args[keyword.len()..].trim_start())
    } else {
        None
    }
}

/// `<address> [params]`, also tolerating a bare address without brackets.
fn parse_path(input: &str) -> Option<(String, Vec<String>)> {
    let input = input.trim();
    let (address, rest) = if let Some(stripped) = input.strip_prefix('<') {
        let end = stripped.find('>')?;
        (&stripped[..end], &stripped[end + 1..])
    } else {
        match input.split_once(char::is_whitespace) {
            Some((address, rest)) => (address, rest),
            None => (input, ""),
        }
    };
    if address.contains(char::is_whitespace) {
        return None;
    }

    let parameters = rest.split_whitespace().map(str::to_string).collect();
    Some((address.trim().to_string(), parameters))
}

/// Value of a `SIZE=` parameter, if present and numeric.
pub fn size_parameter(parameters: &[String]) -> Option<usize> {
    parameters.iter().find_map(|p| {
        let (key, value) = p.split_once('=')?;
        if key.eq_ignore_ascii_case("SIZE") {
            value.parse().ok()
        } else {
            None
        }
    })
}
