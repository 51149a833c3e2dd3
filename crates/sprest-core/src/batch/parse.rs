//! Scanner for multipart `$batch` responses.

use crate::network::{Headers, HttpResponse};
use crate::{Result, SpRestError};
use regex::Regex;
use std::sync::LazyLock;

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^HTTP/[0-9.]+ +([0-9]+) +(.*)").expect("status line regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Batch,
    BatchHeaders,
    Status,
    StatusHeaders,
    Body,
}

fn parse_error(message: String) -> SpRestError {
    SpRestError::BatchParse { message }
}

/// Split a `$batch` response body into one response per part, in order.
///
/// Each part's body is a single line. The service answers change-set members
/// under the batch boundary, so the result lines up with the operations as
/// they were queued. The body must end right after a closing boundary.
pub fn parse_batch_response(body: &str) -> Result<Vec<HttpResponse>> {
    let mut responses = Vec::new();
    let mut state = ScanState::Batch;
    let mut status: u16 = 0;
    let mut status_text = String::new();
    let mut headers = Headers::new();

    for (index, raw_line) in body.split('\n').enumerate() {
        let line = raw_line.trim_end_matches('\r');
        let line_number = index + 1;

        match state {
            ScanState::Batch => {
                if line.starts_with("--batchresponse_") {
                    state = ScanState::BatchHeaders;
                } else if !line.trim().is_empty() {
                    return Err(parse_error(format!(
                        "Invalid response, line {}",
                        line_number
                    )));
                }
            }
            ScanState::BatchHeaders => {
                if line.trim().is_empty() {
                    state = ScanState::Status;
                }
            }
            ScanState::Status => {
                let captures = STATUS_LINE.captures(line).ok_or_else(|| {
                    parse_error(format!("Invalid status, line {}", line_number))
                })?;
                status = captures[1].parse().map_err(|_| {
                    parse_error(format!("Invalid status code, line {}", line_number))
                })?;
                status_text = captures[2].trim().to_string();
                headers = Headers::new();
                state = ScanState::StatusHeaders;
            }
            ScanState::StatusHeaders => {
                if line.trim().is_empty() {
                    state = ScanState::Body;
                } else if let Some((name, value)) = line.split_once(':') {
                    headers.set(name.trim(), value.trim());
                }
            }
            ScanState::Body => {
                let response = HttpResponse::new(status, std::mem::take(&mut status_text))
                    .with_headers(std::mem::take(&mut headers));
                responses.push(if status == 204 {
                    response
                } else {
                    response.with_body(line.to_string())
                });
                state = ScanState::Batch;
            }
        }
    }

    if state != ScanState::Status {
        return Err(parse_error("Unexpected end of input".into()));
    }

    Ok(responses)
}
