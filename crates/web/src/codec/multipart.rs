use bytes::Bytes;

use super::CodecError;

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Part {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Extracts the boundary of a `multipart/form-data` content type.
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let mime: mime::Mime = content_type.parse().ok()?;
    if mime.type_() != mime::MULTIPART || mime.subtype() != mime::FORM_DATA {
        return None;
    }
    mime.get_param(mime::BOUNDARY).map(|boundary| boundary.as_str().to_owned())
}

/// Splits a buffered `multipart/form-data` body into its parts.
///
/// Part data is sliced out of `body` without copying. The preamble and epilogue are ignored.
pub fn parse_multipart(body: &Bytes, boundary: &str) -> Result<Vec<Part>, CodecError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let close_delimiter = format!("\r\n--{boundary}");
    let close_delimiter = close_delimiter.as_bytes();

    let mut pos = find(body, delimiter, 0).ok_or_else(|| CodecError::multipart("missing opening boundary"))?;
    let mut parts = Vec::new();

    loop {
        pos += delimiter.len();
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        pos += line_end_len(rest).ok_or_else(|| CodecError::multipart("boundary not followed by a line break"))?;

        let (headers, data_start) = if body[pos..].starts_with(b"\r\n") {
            ("", pos + 2)
        } else {
            let header_end =
                find(body, b"\r\n\r\n", pos).ok_or_else(|| CodecError::multipart("unterminated part headers"))?;
            let headers = std::str::from_utf8(&body[pos..header_end])
                .map_err(|_invalid| CodecError::multipart("part headers are not valid UTF-8"))?;
            (headers, header_end + 4)
        };

        let data_end =
            find(body, close_delimiter, data_start).ok_or_else(|| CodecError::multipart("missing closing boundary"))?;
        parts.push(parse_part(headers, body.slice(data_start..data_end)));
        pos = data_end + 2;
    }
}

fn parse_part(headers: &str, data: Bytes) -> Part {
    let mut part = Part { name: None, filename: None, content_type: None, data };
    for line in headers.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            for (key, param) in split_params(value).into_iter().skip(1).filter_map(parse_param) {
                match key.as_str() {
                    "name" => part.name = Some(param),
                    "filename" => part.filename = Some(param),
                    _ => {}
                }
            }
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.to_owned());
        }
    }
    part
}

fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn parse_param(param: &str) -> Option<(String, String)> {
    let (key, value) = param.split_once('=')?;
    let value = value.trim();
    let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_owned(),
    };
    Some((key.trim().to_ascii_lowercase(), value))
}

fn line_end_len(rest: &[u8]) -> Option<usize> {
    if rest.starts_with(b"\r\n") {
        Some(2)
    } else if rest.starts_with(b"\n") {
        Some(1)
    } else {
        None
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack.get(from..)?.windows(needle.len()).position(|window| window == needle).map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> Bytes {
        Bytes::from(text.replace('\n', "\r\n"))
    }

    #[test]
    fn fields_and_files() {
        let body = body(indoc::indoc! {r#"
            preamble
            --XyZ
            Content-Disposition: form-data; name="title"

            Hello
            --XyZ
            content-disposition: form-data; name="upload"; filename="a;b \"c\".txt"
            Content-Type: text/plain

            line one
            line two
            --XyZ--
            epilogue
        "#});

        let parts = parse_multipart(&body, "XyZ").unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name.as_deref(), Some("title"));
        assert_eq!(parts[0].filename, None);
        assert_eq!(parts[0].text(), Some("Hello"));

        assert_eq!(parts[1].name.as_deref(), Some("upload"));
        assert_eq!(parts[1].filename.as_deref(), Some("a;b \"c\".txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(parts[1].data, "line one\r\nline two");
    }

    #[test]
    fn part_without_headers() {
        let body = body("--b\n\nraw\n--b--");
        let parts = parse_multipart(&body, "b").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, None);
        assert_eq!(parts[0].data, "raw");
    }

    #[test]
    fn malformed_bodies() {
        assert!(parse_multipart(&body("no boundary here"), "b").is_err());
        assert!(parse_multipart(&body("--b\nContent-Disposition: form-data; name=\"a\"\n\nnever closed"), "b").is_err());
    }

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(parse_boundary("multipart/form-data; boundary=XyZ").as_deref(), Some("XyZ"));
        assert_eq!(parse_boundary("multipart/form-data"), None);
        assert_eq!(parse_boundary("application/json"), None);
    }
}
