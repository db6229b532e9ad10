//! Request decoding and response encoding by content type

use serde_json::Value;

use crate::error::CodecError;

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_JSONLINES: &str = "application/jsonlines";

/// Split a `Content-Type` header into its lower-cased media type and parameters
///
/// A missing or blank header means `application/json`.
pub fn parse_content_type(header: Option<&str>) -> (String, Vec<(String, String)>) {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        return (APPLICATION_JSON.to_string(), Vec::new());
    };

    let mut parts = header.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let params = parts
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            Some((
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();

    (media_type, params)
}

/// Turns a request body into one or more JSON documents
pub trait RequestDecoder: Send + Sync {
    fn decode(&self, body: &[u8]) -> Result<Vec<Value>, CodecError>;
}

/// Turns one or more JSON documents into a response body
pub trait ResponseEncoder: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn encode(&self, values: &[Value]) -> Result<Vec<u8>, CodecError>;
}

/// A single JSON document
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl RequestDecoder for JsonCodec {
    fn decode(&self, body: &[u8]) -> Result<Vec<Value>, CodecError> {
        let value = serde_json::from_slice(body).map_err(|e| CodecError::Malformed(e.to_string()))?;
        Ok(vec![value])
    }
}

impl ResponseEncoder for JsonCodec {
    fn content_type(&self) -> &'static str {
        APPLICATION_JSON
    }

    fn encode(&self, values: &[Value]) -> Result<Vec<u8>, CodecError> {
        let result = match values {
            [single] => serde_json::to_vec(single),
            many => serde_json::to_vec(many),
        };
        result.map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// Newline-delimited JSON, one document per non-blank line
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesCodec;

impl RequestDecoder for JsonLinesCodec {
    fn decode(&self, body: &[u8]) -> Result<Vec<Value>, CodecError> {
        let text = std::str::from_utf8(body).map_err(|e| CodecError::Malformed(e.to_string()))?;
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(index, line)| {
                serde_json::from_str(line)
                    .map_err(|e| CodecError::Malformed(format!("line {}: {e}", index + 1)))
            })
            .collect()
    }
}

impl ResponseEncoder for JsonLinesCodec {
    fn content_type(&self) -> &'static str {
        APPLICATION_JSONLINES
    }

    fn encode(&self, values: &[Value]) -> Result<Vec<u8>, CodecError> {
        let mut lines = Vec::with_capacity(values.len());
        for value in values {
            lines.push(serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))?);
        }
        Ok(lines.join("\n").into_bytes())
    }
}
