//! HTTP HEAD size probe.
//!
//! Uses the curl crate (libcurl) to learn the remote size before streaming.
//! Artifact hosts commonly answer HEAD for a large file with a redirect to a
//! CDN; the redirect carries `X-Linked-Size` and the final response carries
//! `Content-Length`. Headers are parsed per response block so only the last
//! response's length counts.

use std::str;

use crate::retry::TransferError;

use super::{header_list, TransferOptions};

/// Size-bearing headers learned from a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResult {
    /// `Content-Length` of the final response.
    pub content_length: Option<u64>,
    /// `X-Linked-Size` from any response in the redirect chain.
    pub linked_size: Option<u64>,
    /// True if the final response sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

impl HeadResult {
    /// Best known remote size.
    pub fn size(&self) -> Option<u64> {
        self.content_length.or(self.linked_size)
    }
}

/// Performs a HEAD request (following redirects) and returns parsed metadata.
pub fn probe(
    url: &str,
    headers: &[String],
    opts: &TransferOptions,
) -> Result<HeadResult, TransferError> {
    let mut lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(opts.connect_timeout)?;
    easy.timeout(opts.probe_timeout)?;
    if !headers.is_empty() {
        easy.http_headers(header_list(headers)?)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                lines.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }

    Ok(parse_headers(&lines))
}

/// Parse collected header lines into HeadResult. A status line starts a new
/// response block and resets per-response fields.
pub(crate) fn parse_headers(lines: &[String]) -> HeadResult {
    let mut result = HeadResult::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            result.content_length = None;
            result.accept_ranges = false;
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                result.content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("x-linked-size") {
                if let Ok(n) = value.parse::<u64>() {
                    result.linked_size = Some(n);
                }
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                result.accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
        }
    }

    result
}
