//! Multipart request body for `$batch`.

use crate::address::{combine_paths, is_url_absolute};
use crate::config::{NetworkConfig, ODataConfig};
use crate::network::{Headers, RequestOptions};
use reqwest::Method;
use std::fmt::Write;

/// One queued operation as seen by the serializer.
#[derive(Debug, Clone, Copy)]
pub struct BatchPart<'a> {
    pub method: &'a Method,
    pub url: &'a str,
    pub options: &'a RequestOptions,
}

/// Build the multipart body for `parts`.
///
/// Consecutive writes share one change set; every GET closes the open change
/// set and stands alone. `new_changeset_id` is called once per change set.
pub fn serialize_batch(
    batch_id: &str,
    base_url: &str,
    parts: &[BatchPart<'_>],
    global_headers: &Headers,
    mut new_changeset_id: impl FnMut() -> String,
) -> String {
    let mut body = String::new();
    let mut changeset: Option<String> = None;

    for part in parts {
        let is_get = *part.method == Method::GET;

        if is_get {
            if let Some(id) = changeset.take() {
                let _ = write!(body, "--changeset_{}--\n\n", id);
            }
            let _ = writeln!(body, "--batch_{}", batch_id);
        } else {
            let id = match &changeset {
                Some(id) => id.clone(),
                None => {
                    let id = new_changeset_id();
                    let _ = writeln!(body, "--batch_{}", batch_id);
                    let _ = write!(
                        body,
                        "Content-Type: multipart/mixed; boundary=\"changeset_{}\"\n\n",
                        id
                    );
                    changeset = Some(id.clone());
                    id
                }
            };
            let _ = writeln!(body, "--changeset_{}", id);
        }

        body.push_str("Content-Type: application/http\n");
        body.push_str("Content-Transfer-Encoding: binary\n\n");

        let mut headers = Headers::new();
        if !is_get {
            headers.set(
                ODataConfig::HEADER_CONTENT_TYPE,
                ODataConfig::CONTENT_TYPE_VERBOSE,
            );
        }
        headers.merge(global_headers);
        headers.merge(&part.options.headers);

        let verb = if is_get {
            part.method.to_string()
        } else {
            headers
                .remove(ODataConfig::HEADER_METHOD_OVERRIDE)
                .unwrap_or_else(|| part.method.to_string())
        };

        let url = if is_url_absolute(part.url) {
            part.url.to_string()
        } else {
            combine_paths(&[base_url, part.url])
        };
        let _ = writeln!(body, "{} {} HTTP/1.1", verb, url);

        headers.set_if_missing(ODataConfig::HEADER_ACCEPT, ODataConfig::ACCEPT_JSON);
        headers.set_if_missing(
            ODataConfig::HEADER_CONTENT_TYPE,
            ODataConfig::CONTENT_TYPE_VERBOSE,
        );
        headers.set_if_missing(
            ODataConfig::HEADER_CLIENT_TAG,
            NetworkConfig::BATCH_CLIENT_TAG,
        );

        for (name, value) in headers.iter() {
            let _ = writeln!(body, "{}: {}", name, value);
        }
        body.push('\n');

        if let Some(content) = &part.options.body {
            let _ = write!(body, "{}\n\n", content);
        }
    }

    if let Some(id) = changeset.take() {
        let _ = write!(body, "--changeset_{}--\n\n", id);
    }
    let _ = writeln!(body, "--batch_{}--", batch_id);

    body
}
