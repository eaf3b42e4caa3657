use super::CodecError;

/// Decodes an `application/x-www-form-urlencoded` body into ordered pairs.
pub fn parse_urlencoded(body: &[u8]) -> Result<Vec<(String, String)>, CodecError> {
    Ok(serde_urlencoded::from_bytes(body)?)
}
