//! Message content helpers
//!
//! Extracts the text the categorizer sees, stamps classification headers,
//! and appends the optional footer to text and HTML parts.

use std::ops::Range;

use base64::Engine;
use mailparse::{parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::error::MailsortError;

/// Body characters that feed the feature text.
pub const BODY_EXCERPT_CHARS: usize = 1000;

pub const HEADER_CATEGORY: &str = "X-Email-Category";
pub const HEADER_CONFIDENCE: &str = "X-Classification-Confidence";
pub const HEADER_TIME: &str = "X-Classifier-Time";
pub const HEADER_LOW_CONFIDENCE: &str = "X-Classification-Low-Confidence";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMessage {
    pub subject: String,
    pub body: String,
    pub from_address: String,
    pub message_id: String,
}

impl ParsedMessage {
    pub fn body_excerpt(&self) -> String {
        self.body.chars().take(BODY_EXCERPT_CHARS).collect()
    }

    /// Subject plus the body excerpt, as embedded for classification.
    pub fn text(&self) -> String {
        format!("{} {}", self.subject, self.body_excerpt())
    }

    pub fn sender_domain(&self) -> String {
        sender_domain(&self.from_address)
    }
}

pub fn sender_domain(address: &str) -> String {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().trim_end_matches('>').to_lowercase())
        .unwrap_or_default()
}

/// Extracts subject, plain-text body, sender and Message-ID.
///
/// Never fails: unparseable input yields empty fields.
pub fn parse(raw: &[u8]) -> ParsedMessage {
    match parse_mail(raw) {
        Ok(mail) => from_parsed(&mail),
        Err(e) => {
            debug!(error = %e, "Unparseable message, using empty content");
            ParsedMessage::default()
        }
    }
}

fn from_parsed(mail: &ParsedMail<'_>) -> ParsedMessage {
    let header = |name: &str| {
        mail.headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let mut body = String::new();
    if mail.subparts.is_empty() {
        body = mail.get_body().unwrap_or_default();
    } else {
        collect_plain_text(mail, &mut body);
    }

    let from = header("From");
    ParsedMessage {
        subject: header("Subject"),
        body,
        from_address: if from.is_empty() { from } else { first_address(&from) },
        message_id: header("Message-ID"),
    }
}

fn collect_plain_text(part: &ParsedMail<'_>, out: &mut String) {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            if let Ok(text) = part.get_body() {
                out.push_str(&text);
            }
        }
        return;
    }
    for sub in &part.subparts {
        collect_plain_text(sub, out);
    }
}

fn first_address(value: &str) -> String {
    if let Ok(list) = mailparse::addrparse(value) {
        for addr in list.iter() {
            match addr {
                MailAddr::Single(info) => return info.addr.clone(),
                MailAddr::Group(group) => {
                    if let Some(info) = group.addrs.first() {
                        return info.addr.clone();
                    }
                }
            }
        }
    }

    match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => value[start + 1..end].trim().to_string(),
        _ => value.trim().to_string(),
    }
}

/// Id for a harvested message that carries no Message-ID header.
pub fn generated_message_id(account: &str, folder: &str, seq: u32) -> String {
    format!("<generated-{account}-{folder}-{seq}@classifier.local>")
}

/// Id for a relayed message without Message-ID. Identical bytes give identical ids.
pub fn content_message_id(account: &str, raw: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(raw));
    format!("<generated-{account}-{}@classifier.local>", &digest[..32])
}

struct HeaderEnd {
    offset: usize,
    eol: &'static str,
    /// Whether the last header line before `offset` ends with a newline
    terminated: bool,
}

fn find_header_end(raw: &[u8]) -> HeaderEnd {
    let mut pos = 0;
    let mut eol = "\r\n";
    while pos < raw.len() {
        let next = raw[pos..].iter().position(|b| *b == b'\n').map(|i| pos + i + 1);
        let line = &raw[pos..next.unwrap_or(raw.len())];

        if line.iter().all(u8::is_ascii_whitespace) {
            if line.ends_with(b"\r\n") {
                eol = "\r\n";
            } else if line.ends_with(b"\n") {
                eol = "\n";
            }
            return HeaderEnd {
                offset: pos,
                eol,
                terminated: true,
            };
        }

        eol = if line.ends_with(b"\r\n") {
            "\r\n"
        } else if line.ends_with(b"\n") {
            "\n"
        } else {
            eol
        };

        match next {
            Some(end) => pos = end,
            None => {
                return HeaderEnd {
                    offset: raw.len(),
                    eol,
                    terminated: false,
                }
            }
        }
    }

    HeaderEnd {
        offset: raw.len(),
        eol,
        terminated: true,
    }
}

/// Inserts headers at the end of the header block, before the first blank line.
///
/// The rest of the message is copied byte for byte.
pub fn stamp_headers(raw: &[u8], headers: &[(&str, String)]) -> Vec<u8> {
    let end = find_header_end(raw);
    let mut out = Vec::with_capacity(raw.len() + 128);
    out.extend_from_slice(&raw[..end.offset]);
    if !end.terminated {
        out.extend_from_slice(end.eol.as_bytes());
    }
    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(end.eol.as_bytes());
    }
    out.extend_from_slice(&raw[end.offset..]);
    out
}

/// Headers recording a classification outcome.
pub fn classification_headers(
    category: &str,
    confidence: f64,
    latency_secs: f64,
    low_confidence: bool,
) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        (HEADER_CATEGORY, category.to_string()),
        (HEADER_CONFIDENCE, format!("{:.3}", confidence)),
        (HEADER_TIME, format!("{:.3}", latency_secs)),
    ];
    if low_confidence {
        headers.push((HEADER_LOW_CONFIDENCE, "true".to_string()));
    }
    headers
}

/// Display color for a category in the HTML footer.
pub fn category_color(category: &str) -> &'static str {
    match category {
        "personal" => "#2196F3",
        "shopping" => "#FF9800",
        "spam" => "#F44336",
        _ => "#666666",
    }
}

/// Dashboard link that opens one classification.
pub fn footer_link(base_url: &str, classification_id: i64) -> String {
    match url::Url::parse(base_url) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("open_classification", &classification_id.to_string());
            url.to_string()
        }
        Err(_) => format!("{base_url}?open_classification={classification_id}"),
    }
}

fn text_footer(category: &str, confidence: f64, link: &str) -> String {
    format!(
        "\n\n---\nEmail Classification: {} ({:.1}% confidence)\nView details & modify classification: {}\n",
        category.to_uppercase(),
        confidence * 100.0,
        link
    )
}

fn html_footer(category: &str, confidence: f64, link: &str) -> String {
    let color = category_color(category);
    format!(
        "<div style=\"margin-top:24px;padding:12px 16px;border-top:3px solid {color};\
         font-family:Arial,sans-serif;font-size:12px;color:#555555;background:#fafafa;\">\
         <strong style=\"color:{color};\">Email Classification: {}</strong> ({:.1}% confidence)<br>\
         <a href=\"{}\" style=\"color:{color};\">View details &amp; modify classification</a>\
         </div>\n",
        escape_html(&category.to_uppercase()),
        confidence * 100.0,
        escape_html(link),
    )
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// What the footer shows.
#[derive(Debug, Clone)]
pub struct FooterInfo<'a> {
    pub classification_id: i64,
    pub category: &'a str,
    pub confidence: f64,
    pub base_url: &'a str,
}

/// Appends the classification footer to every inline text/plain and text/html part,
/// re-encoding each part with its original transfer encoding.
pub fn append_footer(raw: &[u8], info: &FooterInfo<'_>) -> Result<Vec<u8>, MailsortError> {
    let mail = parse_mail(raw)?;
    let eol = if raw.windows(2).any(|w| w == b"\r\n") { "\r\n" } else { "\n" };
    let link = footer_link(info.base_url, info.classification_id);
    let text = text_footer(info.category, info.confidence, &link).replace('\n', eol);
    let html = html_footer(info.category, info.confidence, &link).replace('\n', eol);

    let mut edits = Vec::new();
    collect_footer_edits(raw, &mail, &text, &html, eol, &mut edits)?;
    if edits.is_empty() {
        return Ok(raw.to_vec());
    }

    edits.sort_by_key(|(range, _)| range.start);
    let mut out = Vec::with_capacity(raw.len() + 1024);
    let mut cursor = 0;
    for (range, bytes) in edits {
        if range.start < cursor {
            continue;
        }
        out.extend_from_slice(&raw[cursor..range.start]);
        out.extend_from_slice(&bytes);
        cursor = range.end;
    }
    out.extend_from_slice(&raw[cursor..]);
    Ok(out)
}

fn collect_footer_edits(
    raw: &[u8],
    part: &ParsedMail<'_>,
    text: &str,
    html: &str,
    eol: &str,
    edits: &mut Vec<(Range<usize>, Vec<u8>)>,
) -> Result<(), MailsortError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_footer_edits(raw, sub, text, html, eol, edits)?;
        }
        return Ok(());
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return Ok(());
    }
    let is_html = match part.ctype.mimetype.to_ascii_lowercase().as_str() {
        "text/plain" => false,
        "text/html" => true,
        _ => return Ok(()),
    };
    let Some(range) = body_range(raw, part) else {
        return Ok(());
    };

    let decoded = part.get_body_raw()?;
    let updated = if is_html {
        insert_before_body_close(&decoded, html.as_bytes())
    } else {
        let mut body = decoded;
        body.extend_from_slice(text.as_bytes());
        body
    };

    let encoding = part
        .headers
        .get_first_value("Content-Transfer-Encoding")
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    edits.push((range, encode_body(&updated, &encoding, eol)));
    Ok(())
}

/// Byte range of a part's body inside `raw`.
fn body_range(raw: &[u8], part: &ParsedMail<'_>) -> Option<Range<usize>> {
    let base = raw.as_ptr() as usize;
    let start = part.raw_bytes.as_ptr() as usize;
    if start < base || start + part.raw_bytes.len() > base + raw.len() {
        return None;
    }
    let offset = start - base;
    let body_start = header_block_len(part.raw_bytes)?;
    Some(offset + body_start..offset + part.raw_bytes.len())
}

fn header_block_len(bytes: &[u8]) -> Option<usize> {
    if bytes.starts_with(b"\r\n") {
        return Some(2);
    }
    if bytes.starts_with(b"\n") {
        return Some(1);
    }
    let crlf = find(bytes, b"\r\n\r\n").map(|i| i + 4);
    let lf = find(bytes, b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn insert_before_body_close(html: &[u8], footer: &[u8]) -> Vec<u8> {
    let position = html
        .windows(7)
        .position(|w| w.eq_ignore_ascii_case(b"</body>"))
        .unwrap_or(html.len());
    let mut out = Vec::with_capacity(html.len() + footer.len());
    out.extend_from_slice(&html[..position]);
    out.extend_from_slice(footer);
    out.extend_from_slice(&html[position..]);
    out
}

fn encode_body(body: &[u8], encoding: &str, eol: &str) -> Vec<u8> {
    let mut encoded = match encoding {
        "base64" => {
            let flat = base64::engine::general_purpose::STANDARD.encode(body);
            let mut out = Vec::with_capacity(flat.len() + flat.len() / 76 * 2 + 2);
            for chunk in flat.as_bytes().chunks(76) {
                out.extend_from_slice(chunk);
                out.extend_from_slice(eol.as_bytes());
            }
            out
        }
        "quoted-printable" => quoted_printable::encode(body),
        _ => body.to_vec(),
    };
    if !encoded.ends_with(b"\n") {
        encoded.extend_from_slice(eol.as_bytes());
    }
    encoded
}
