//! Minimal HTTP header-block parsing and serialization.
//!
//! This is intentionally not a general HTTP parser: it splits a header block
//! into a start-line (requests only) plus `Name: value` fields, tolerating
//! either `\r\n` or `\n` line endings and preserving whichever ending the
//! host used when it sent the block. Full HTTP semantics (redirects,
//! keep-alive, compression) are out of scope; see [`crate`] docs.

use crate::error::HeaderError;

/// Which line ending a header block used, so serialization can match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\r\n`, used on the request path in the canonical traces.
    CrLf,
    /// `\n`, used on the response path in the canonical traces.
    Lf,
}

impl LineEnding {
    #[must_use]
    const fn as_str(self) -> &'static str {
        match self {
            Self::CrLf => "\r\n",
            Self::Lf => "\n",
        }
    }
}

/// A parsed request start-line plus header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Request URI or path.
    pub uri: String,
    /// HTTP version token, e.g. `HTTP/1.1`.
    pub version: String,
    /// Header fields in insertion order; duplicate names are preserved.
    pub fields: Vec<(String, String)>,
    /// Line ending used in the original block.
    pub line_ending: LineEnding,
}

/// A parsed response header block (no start-line; status travels out of
/// band as the `status` argument to `BeginResponse`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    /// Header fields in insertion order; duplicate names are preserved.
    pub fields: Vec<(String, String)>,
    /// Line ending used in the original block.
    pub line_ending: LineEnding,
}

fn split_lines(text: &str) -> (Vec<&str>, LineEnding) {
    let line_ending = if text.contains("\r\n") {
        LineEnding::CrLf
    } else {
        LineEnding::Lf
    };
    let lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    (lines, line_ending)
}

fn parse_field(line: &str) -> Result<(String, String), HeaderError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HeaderError::MalformedField(line.to_owned()))?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

fn parse_fields<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Vec<(String, String)>, HeaderError> {
    let mut fields = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        fields.push(parse_field(line)?);
    }
    Ok(fields)
}

impl RequestHeaders {
    /// Parse a request header block: start-line, then fields, then a blank
    /// line.
    ///
    /// # Errors
    /// Returns [`HeaderError`] if the start-line is missing or malformed, or
    /// if a field line has no `:` separator.
    pub fn parse(text: &str) -> Result<Self, HeaderError> {
        let (lines, line_ending) = split_lines(text);
        let mut lines = lines.into_iter();
        let start_line = lines.next().filter(|l| !l.is_empty()).ok_or(HeaderError::MissingStartLine)?;
        let mut parts = start_line.splitn(3, ' ');
        let (method, uri, version) = (|| {
            Some((parts.next()?.to_owned(), parts.next()?.to_owned(), parts.next()?.to_owned()))
        })()
        .ok_or(HeaderError::MalformedStartLine)?;
        let fields = parse_fields(lines)?;
        Ok(Self { method, uri, version, fields, line_ending })
    }

    /// Serialize back to wire form, using the line ending recorded at parse
    /// time.
    #[must_use]
    pub fn serialize(&self) -> String {
        let nl = self.line_ending.as_str();
        let mut out = format!("{} {} {}{nl}", self.method, self.uri, self.version);
        for (name, value) in &self.fields {
            out.push_str(&format!("{name}: {value}{nl}"));
        }
        out.push_str(nl);
        out
    }
}

impl ResponseHeaders {
    /// Parse a response header block: fields only, then a blank line.
    ///
    /// # Errors
    /// Returns [`HeaderError`] if a field line has no `:` separator.
    pub fn parse(text: &str) -> Result<Self, HeaderError> {
        let (lines, line_ending) = split_lines(text);
        let fields = parse_fields(lines.into_iter())?;
        Ok(Self { fields, line_ending })
    }

    /// Serialize back to wire form, using the line ending recorded at parse
    /// time.
    #[must_use]
    pub fn serialize(&self) -> String {
        let nl = self.line_ending.as_str();
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push_str(&format!("{name}: {value}{nl}"));
        }
        out.push_str(nl);
        out
    }

    /// Remove all fields with the given case-insensitive name, returning
    /// whether anything was removed.
    pub fn remove_field(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_crlf_request() {
        let block = "GET /pass HTTP/1.1\r\nHost: localhost:1234\r\n\r\n";
        let headers = RequestHeaders::parse(block).expect("parse");
        assert_eq!(headers.method, "GET");
        assert_eq!(headers.uri, "/pass");
        assert_eq!(headers.version, "HTTP/1.1");
        assert_eq!(headers.fields, vec![("Host".to_owned(), "localhost:1234".to_owned())]);
        assert_eq!(headers.line_ending, LineEnding::CrLf);
    }

    #[test]
    fn parses_lf_response_without_start_line() {
        let block = "Server: libgozerian\nContent-Length: 10\nContent-Type: text/plain\n\n";
        let headers = ResponseHeaders::parse(block).expect("parse");
        assert_eq!(
            headers.fields,
            vec![
                ("Server".to_owned(), "libgozerian".to_owned()),
                ("Content-Length".to_owned(), "10".to_owned()),
                ("Content-Type".to_owned(), "text/plain".to_owned()),
            ]
        );
        assert_eq!(headers.line_ending, LineEnding::Lf);
    }

    #[test]
    fn serialization_round_trips_line_ending() {
        let block = "GET /x HTTP/1.1\r\nA: 1\r\n\r\n";
        let headers = RequestHeaders::parse(block).expect("parse");
        assert_eq!(headers.serialize(), block);
    }

    #[test]
    fn rejects_missing_start_line() {
        let err = RequestHeaders::parse("").unwrap_err();
        assert_eq!(err, HeaderError::MissingStartLine);
    }

    #[test]
    fn rejects_malformed_field() {
        let err = ResponseHeaders::parse("not-a-field\n\n").unwrap_err();
        assert!(matches!(err, HeaderError::MalformedField(_)));
    }

    #[test]
    fn remove_field_is_case_insensitive() {
        let mut headers = ResponseHeaders {
            fields: vec![("content-length".to_owned(), "5".to_owned())],
            line_ending: LineEnding::Lf,
        };
        assert!(headers.remove_field("Content-Length"));
        assert!(headers.fields.is_empty());
    }
}
