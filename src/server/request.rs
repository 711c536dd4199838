use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info};

use crate::error::{Result, TestServerError};
use crate::headers::HeaderStorage;
use crate::ids::RequestId;
use crate::multipart::{boundary_from_content_type, parse_multipart_form, UploadedFile};

/// Cookie attribute names that belong to the preceding cookie rather than
/// starting a new one.
const COOKIE_ATTRIBUTES: [&str; 9] = [
    "expires", "path", "comment", "domain", "max-age", "secure", "httponly", "version",
    "samesite",
];

/// One cookie sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Reserved attributes (lower-cased) that followed this cookie
    pub attributes: HashMap<String, String>,
}

/// Immutable capture of one processed request.
///
/// Snapshots are shared as `Arc<RequestSnapshot>` and never change after the
/// handler records them.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    /// Correlates the snapshot with the handler's log lines
    pub id: RequestId,
    /// Upper-case HTTP method
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Query arguments; the last value wins for repeated names
    pub args: HashMap<String, String>,
    /// Peer IP address, when the transport reports one
    pub client_ip: Option<IpAddr>,
    /// Headers exactly as received, duplicates kept
    pub headers: HeaderStorage,
    pub cookies: HashMap<String, Cookie>,
    /// Raw body bytes
    pub data: Vec<u8>,
    /// Multipart file uploads by field name
    pub files: HashMap<String, Vec<UploadedFile>>,
    /// Multipart text fields by field name
    pub form: HashMap<String, Vec<String>>,
}

/// Parse every `Cookie` header into named cookies.
///
/// Reserved attribute names (`Path`, `Domain`, `Max-Age`, ...) attach to the
/// cookie they follow. Double-quoted values are unquoted.
#[must_use]
pub fn parse_cookies(headers: &HeaderStorage) -> HashMap<String, Cookie> {
    let mut cookies: HashMap<String, Cookie> = HashMap::new();
    let mut last: Option<String> = None;
    for header in headers.get_list("cookie") {
        for pair in header.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let Some(name) = parts.next().map(str::trim).filter(|n| !n.is_empty()) else {
                continue;
            };
            let value = parts.next().unwrap_or("").trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);

            let attribute = name.trim_start_matches('$').to_ascii_lowercase();
            if COOKIE_ATTRIBUTES.contains(&attribute.as_str()) {
                if let Some(cookie) = last.as_ref().and_then(|n| cookies.get_mut(n)) {
                    cookie.attributes.insert(attribute, value.to_string());
                }
                continue;
            }
            cookies.insert(
                name.to_string(),
                Cookie {
                    name: name.to_string(),
                    value: value.to_string(),
                    attributes: HashMap::new(),
                },
            );
            last = Some(name.to_string());
        }
    }
    cookies
}

/// Parse query string parameters from a request target
///
/// Everything after the first `?` is form-url-decoded.
///
/// # Arguments
///
/// * `url` - The request target (e.g., `/users?limit=10&offset=20`)
///
/// # Returns
///
/// A map of parameter names to values; the last occurrence of a repeated name wins
#[must_use]
pub fn parse_query_params(url: &str) -> HashMap<String, String> {
    match url.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => HashMap::new(),
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .get(..20)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/form-data;"))
}

impl RequestSnapshot {
    /// Build a snapshot from already-extracted request parts.
    ///
    /// # Arguments
    ///
    /// * `method` - Request method, upper-cased on capture
    /// * `url` - Request target including any query string
    /// * `client_ip` - Peer address
    /// * `headers` - Received headers
    /// * `data` - Complete body
    /// * `part_limit` - Multipart part-count ceiling
    ///
    /// # Errors
    ///
    /// `Multipart` when a `multipart/form-data` body exceeds `part_limit` or has a
    /// malformed part; `Internal` when the content type carries no boundary.
    pub fn build(
        method: &str,
        url: &str,
        client_ip: Option<IpAddr>,
        headers: HeaderStorage,
        data: Vec<u8>,
        part_limit: usize,
    ) -> Result<Self> {
        let path = url.split('?').next().unwrap_or("/").to_string();
        let id = RequestId::from_header_or_new(headers.get("x-request-id"));

        // R3: Headers extracted
        debug!(
            request_id = %id,
            header_count = headers.count_items(),
            headers = ?headers,
            "Headers extracted"
        );

        let cookies = parse_cookies(&headers);
        debug!(
            request_id = %id,
            cookie_count = cookies.len(),
            cookie_names = ?cookies.keys().collect::<Vec<_>>(),
            "Cookies extracted"
        );

        let args = parse_query_params(url);
        debug!(
            request_id = %id,
            param_count = args.len(),
            query_params = ?args,
            "Query params parsed"
        );

        let (files, form) = match headers.get("content-type").filter(|ct| is_multipart(ct)) {
            Some(content_type) => {
                let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
                    TestServerError::Internal(format!(
                        "Multipart content type without boundary: {content_type}"
                    ))
                })?;
                let form = parse_multipart_form(&data, boundary.as_bytes(), part_limit)?;
                let (files, form) = form.into_files_and_text();
                debug!(
                    request_id = %id,
                    file_fields = files.len(),
                    text_fields = form.len(),
                    "Multipart body decoded"
                );
                (files, form)
            }
            None => (HashMap::new(), HashMap::new()),
        };

        // R2: HTTP request parsed
        info!(
            request_id = %id,
            method = %method,
            path = %path,
            body_size_bytes = data.len(),
            "HTTP request parsed"
        );

        Ok(RequestSnapshot {
            id,
            method: method.to_ascii_uppercase(),
            path,
            args,
            client_ip,
            headers,
            cookies,
            data,
            files,
            form,
        })
    }

    /// First value of a request header, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
