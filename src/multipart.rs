//! `multipart/form-data` decoding.
//!
//! The whole body is already in memory (test requests are small), so decoding is a
//! straight split on the `--boundary` delimiter followed by a header scan per part.
//! A part-count limit bounds the work done on a broken or hostile body.
//!
//! Parts carrying a `filename` (or RFC 2231 `filename*`) in `Content-Disposition`
//! become [`UploadedFile`]s; other parts are decoded as text using the part's
//! `charset` (utf-8 when absent or unknown).

use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Default maximum number of parts accepted in one body.
pub const DEFAULT_PART_LIMIT: usize = 1000;

static PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#";\s*([\w!#$%&'*+\-.^_`|~]+)=(?:([\w!#$%&'*+\-.^_`|~]+)|"([^"]*)")"#)
        .expect("header parameter regex should be valid")
});

/// Errors produced while decoding a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    /// More parts than the configured limit
    TooManyParts {
        /// The configured limit
        limit: usize,
    },
    /// A part header line without a `:` separator
    MalformedHeader {
        /// The offending line
        line: String,
    },
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartError::TooManyParts { limit } => write!(
                f,
                "Number of multipart components exceeds the allowed limit of {limit}, \
                 this potentially indicates a DoS attack"
            ),
            MultipartError::MalformedHeader { line } => {
                write!(f, "Malformed multipart header line: {line:?}")
            }
        }
    }
}

impl std::error::Error for MultipartError {}

/// A file upload extracted from a multipart body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    /// Form field name
    pub name: String,
    /// Part `Content-Type` (`text/plain` when absent)
    pub content_type: String,
    /// Client-supplied file name
    pub filename: String,
    /// Raw file bytes
    pub content: Vec<u8>,
    /// Part headers, lower-cased names
    pub headers: Vec<(String, String)>,
}

/// One decoded value of a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A plain field; `None` when the part payload was empty
    Text(Option<String>),
    /// A file upload
    File(UploadedFile),
}

/// View over the values of one field: unwrapped when there is exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Single(&'a FormPart),
    Multiple(&'a [FormPart]),
}

/// Decoded form: field names in first-seen order, values in body order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    fields: Vec<(String, Vec<FormPart>)>,
}

impl MultipartForm {
    fn push(&mut self, name: String, part: FormPart) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, parts)) => parts.push(part),
            None => self.fields.push((name, vec![part])),
        }
    }

    /// Values of `name`, unwrapped when the field appeared once.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FieldValue<'_>> {
        let parts = self.get_all(name);
        match parts {
            [] => None,
            [single] => Some(FieldValue::Single(single)),
            many => Some(FieldValue::Multiple(many)),
        }
    }

    /// Every value of `name`; empty when the field is absent.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[FormPart] {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, parts)| parts.as_slice())
            .unwrap_or(&[])
    }

    /// Field names in first-seen order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Split into file uploads and text values, both keyed by field name.
    #[must_use]
    pub fn into_files_and_text(
        self,
    ) -> (
        HashMap<String, Vec<UploadedFile>>,
        HashMap<String, Vec<String>>,
    ) {
        let mut files: HashMap<String, Vec<UploadedFile>> = HashMap::new();
        let mut text: HashMap<String, Vec<String>> = HashMap::new();
        for (name, parts) in self.fields {
            for part in parts {
                match part {
                    FormPart::File(file) => files.entry(name.clone()).or_default().push(file),
                    FormPart::Text(value) => text
                        .entry(name.clone())
                        .or_default()
                        .push(value.unwrap_or_default()),
                }
            }
        }
        (files, text)
    }
}

/// Rewrite Firefox's `\"` escapes inside quoted values to `%22`, except where the
/// backslash-quote actually closes the value (followed by `; ` or trailing space).
fn escape_firefox_quotes(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find("\\\"") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        if after.starts_with("; ") || after.trim().is_empty() {
            out.push_str("\\\"");
        } else {
            out.push_str("%22");
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Parse a `Content-Type` / `Content-Disposition` style header value.
///
/// Returns the lower-cased main value and its parameters (lower-cased names).
///
/// ```rust
/// use test_server::multipart::parse_content_header;
///
/// let (value, params) = parse_content_header("multipart/form-data; boundary=XyZ");
/// assert_eq!(value, "multipart/form-data");
/// assert_eq!(params["boundary"], "XyZ");
/// ```
#[must_use]
pub fn parse_content_header(value: &str) -> (String, HashMap<String, String>) {
    let value = escape_firefox_quotes(value);
    let Some(pos) = value.find(';') else {
        return (value.trim().to_lowercase(), HashMap::new());
    };
    let params = PARAM_REGEX
        .captures_iter(&value[pos..])
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_lowercase();
            let val = match (caps.get(2), caps.get(3)) {
                (Some(token), _) => token.as_str().to_string(),
                (None, Some(quoted)) => quoted.as_str().replace("%22", "\""),
                (None, None) => return None,
            };
            Some((key, val))
        })
        .collect();
    (value[..pos].trim().to_lowercase(), params)
}

/// Boundary parameter of a `multipart/form-data` content type, if any.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let (_, mut params) = parse_content_header(content_type);
    params.remove("boundary").filter(|b| !b.is_empty())
}

fn lookup_encoding(label: &str) -> &'static Encoding {
    Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8)
}

/// Decode an RFC 2231 extended value: `charset'language'percent-encoded`.
fn decode_rfc2231(value: &str, fallback_charset: &str) -> String {
    let mut pieces = value.splitn(3, '\'');
    let (charset, encoded) = match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(charset), Some(_language), Some(encoded)) => (charset, encoded),
        _ => ("", value),
    };
    let charset = if charset.is_empty() {
        fallback_charset
    } else {
        charset
    };
    let raw = urlencoding::decode_binary(encoded.as_bytes());
    let (decoded, _, _) = lookup_encoding(charset).decode(&raw);
    decoded.into_owned()
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Split `body` on `--boundary`, dropping the preamble and the closing marker.
///
/// # Errors
///
/// [`MultipartError::TooManyParts`] when more than `part_limit` parts are present.
pub fn split_parts<'a>(
    body: &'a [u8],
    boundary: &[u8],
    part_limit: usize,
) -> Result<Vec<&'a [u8]>, MultipartError> {
    if body.is_empty() || boundary.is_empty() {
        return Ok(Vec::new());
    }
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary);

    let mut marks = Vec::new();
    let mut from = 0;
    while let Some(pos) = find_subslice(body, &delimiter, from) {
        marks.push(pos);
        // first mark is the opening delimiter, the last one closes the body
        if marks.len() > part_limit + 1 {
            return Err(MultipartError::TooManyParts { limit: part_limit });
        }
        from = pos + delimiter.len();
    }

    let parts = marks
        .windows(2)
        .map(|pair| &body[pair[0] + delimiter.len()..pair[1]])
        .collect();
    Ok(parts)
}

/// Decode a whole `multipart/form-data` body.
///
/// # Errors
///
/// Fails when the part limit is exceeded or a part header line is malformed.
///
/// ```rust
/// use test_server::multipart::{parse_multipart_form, FieldValue, FormPart};
///
/// let body = b"--XX\r\n\
/// Content-Disposition: form-data; name=\"a\"\r\n\r\n\
/// 1\r\n\
/// --XX--\r\n";
/// let form = parse_multipart_form(body, b"XX", 10).unwrap();
/// assert_eq!(
///     form.get("a"),
///     Some(FieldValue::Single(&FormPart::Text(Some("1".into()))))
/// );
/// ```
pub fn parse_multipart_form(
    body: &[u8],
    boundary: &[u8],
    part_limit: usize,
) -> Result<MultipartForm, MultipartError> {
    let mut form = MultipartForm::default();

    for raw_part in split_parts(body, boundary, part_limit)? {
        let part = raw_part.strip_prefix(b"\r\n").unwrap_or(raw_part);
        let (head, payload) = match find_subslice(part, b"\r\n\r\n", 0) {
            Some(pos) => (&part[..pos], &part[pos + 4..]),
            None => match part.strip_suffix(b"\r\n") {
                // headers only, no payload
                Some(head) => (head, &b""[..]),
                None => (part, &b""[..]),
            },
        };
        let payload = payload.strip_suffix(b"\r\n").unwrap_or(payload);

        let mut field_name: Option<String> = None;
        let mut file_name: Option<String> = None;
        let mut content_type = "text/plain".to_string();
        let mut charset = "utf-8".to_string();
        let mut headers = Vec::new();

        for line in String::from_utf8_lossy(head).split("\r\n") {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(MultipartError::MalformedHeader {
                    line: line.to_string(),
                });
            };
            let name = name.trim().to_lowercase();
            let (header_value, mut params) = parse_content_header(value.trim_start());

            if name == "content-disposition" {
                field_name = params.remove("name");
                file_name = params.remove("filename");
                if file_name.is_none() {
                    if let Some(extended) = params.remove("filename*") {
                        file_name = Some(decode_rfc2231(&extended, &charset));
                    }
                }
            } else if name == "content-type" {
                content_type = header_value.clone();
                charset = params
                    .remove("charset")
                    .unwrap_or_else(|| "utf-8".to_string());
            }
            headers.push((name, header_value));
        }

        let Some(field_name) = field_name.filter(|n| !n.is_empty()) else {
            debug!(header_count = headers.len(), "Multipart part without field name skipped");
            continue;
        };

        let value = match file_name {
            Some(filename) => FormPart::File(UploadedFile {
                name: field_name.clone(),
                content_type,
                filename,
                content: payload.to_vec(),
                headers,
            }),
            None if payload.is_empty() => FormPart::Text(None),
            None => {
                let (text, _, _) = lookup_encoding(&charset).decode(payload);
                FormPart::Text(Some(text.into_owned()))
            }
        };
        form.push(field_name, value);
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(b"--BOUND\r\n");
            out.extend_from_slice(part.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--BOUND--\r\n");
        out
    }

    #[test]
    fn test_parse_content_header_token_and_quoted() {
        let (value, params) =
            parse_content_header(r#"Form-Data; name="field one"; filename=a.txt"#);
        assert_eq!(value, "form-data");
        assert_eq!(params["name"], "field one");
        assert_eq!(params["filename"], "a.txt");
    }

    #[test]
    fn test_parse_content_header_without_params() {
        let (value, params) = parse_content_header(" Text/Plain ");
        assert_eq!(value, "text/plain");
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_content_header_firefox_escape() {
        let (_, params) = parse_content_header(r#"form-data; name="a"; filename="x\"y.txt""#);
        assert_eq!(params["filename"], "x\"y.txt");
    }

    #[test]
    fn test_text_and_file_fields() {
        let data = body(&[
            "Content-Disposition: form-data; name=\"a\"\r\n\r\n1",
            "Content-Disposition: form-data; name=\"f\"; filename=\"name.png\"\r\n\
             Content-Type: image/png\r\n\r\n\x01\x02\x03",
        ]);
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        assert_eq!(form.names().collect::<Vec<_>>(), vec!["a", "f"]);
        assert_eq!(
            form.get("a"),
            Some(FieldValue::Single(&FormPart::Text(Some("1".into()))))
        );
        let Some(FieldValue::Single(FormPart::File(file))) = form.get("f") else {
            panic!("expected a single file part");
        };
        assert_eq!(file.filename, "name.png");
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.content, b"\x01\x02\x03");
    }

    #[test]
    fn test_repeated_field_collects_values() {
        let data = body(&[
            "Content-Disposition: form-data; name=\"tag\"\r\n\r\nx",
            "Content-Disposition: form-data; name=\"tag\"\r\n\r\ny",
        ]);
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        match form.get("tag") {
            Some(FieldValue::Multiple(parts)) => assert_eq!(
                parts,
                &[
                    FormPart::Text(Some("x".into())),
                    FormPart::Text(Some("y".into()))
                ]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_payload_keeps_leading_newlines() {
        let data = body(&["Content-Disposition: form-data; name=\"a\"\r\n\r\n\r\nline"]);
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        assert_eq!(
            form.get_all("a"),
            &[FormPart::Text(Some("\r\nline".into()))]
        );
    }

    #[test]
    fn test_empty_text_field_is_none() {
        let data = body(&["Content-Disposition: form-data; name=\"a\"\r\n\r\n"]);
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        assert_eq!(form.get_all("a"), &[FormPart::Text(None)]);
    }

    #[test]
    fn test_charset_decoding() {
        let mut data = b"--BOUND\r\nContent-Disposition: form-data; name=\"a\"\r\n\
Content-Type: text/plain; charset=windows-1251\r\n\r\n"
            .to_vec();
        data.extend_from_slice(&[0xEA, 0xEE, 0xED, 0xFC]);
        data.extend_from_slice(b"\r\n--BOUND--\r\n");
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        assert_eq!(
            form.get_all("a"),
            &[FormPart::Text(Some("конь".into()))]
        );
    }

    #[test]
    fn test_rfc2231_filename() {
        let data = body(&[
            "Content-Disposition: form-data; name=\"f\"; filename*=utf-8''%D1%84%D0%B0%D0%B9%D0%BB.txt\r\n\r\nabc",
        ]);
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        let [FormPart::File(file)] = form.get_all("f") else {
            panic!("expected one file");
        };
        assert_eq!(file.filename, "файл.txt");
    }

    #[test]
    fn test_part_limit_exceeded() {
        let data = body(&[
            "Content-Disposition: form-data; name=\"a\"\r\n\r\n1",
            "Content-Disposition: form-data; name=\"b\"\r\n\r\n2",
            "Content-Disposition: form-data; name=\"c\"\r\n\r\n3",
        ]);
        let err = parse_multipart_form(&data, b"BOUND", 2).unwrap_err();
        assert_eq!(err, MultipartError::TooManyParts { limit: 2 });
        assert!(parse_multipart_form(&data, b"BOUND", 3).is_ok());
    }

    #[test]
    fn test_malformed_header_line() {
        let data = body(&["no colon here\r\n\r\nbody"]);
        let err = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap_err();
        assert!(matches!(err, MultipartError::MalformedHeader { .. }));
    }

    #[test]
    fn test_empty_body_or_boundary() {
        assert!(parse_multipart_form(b"", b"BOUND", 1).unwrap().is_empty());
        assert!(parse_multipart_form(b"--x\r\n", b"", 1).unwrap().is_empty());
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"abc\"").as_deref(),
            Some("abc")
        );
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
    }

    #[test]
    fn test_into_files_and_text() {
        let data = body(&[
            "Content-Disposition: form-data; name=\"a\"\r\n\r\n1",
            "Content-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n\r\nzzz",
        ]);
        let form = parse_multipart_form(&data, b"BOUND", DEFAULT_PART_LIMIT).unwrap();
        let (files, text) = form.into_files_and_text();
        assert_eq!(files["f"][0].name, "f");
        assert_eq!(files["f"][0].content, b"zzz");
        assert_eq!(text["a"], vec!["1".to_string()]);
    }
}
