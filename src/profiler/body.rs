//! Request body and header rendering for request records

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart},
    http::{header::CONTENT_TYPE, HeaderMap, Request},
};
use futures::{stream, StreamExt};

const REDACTED: &str = "***";

/// Body text stored on a request record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBody {
    /// Lossy UTF-8 of the payload
    pub raw: String,
    /// Human-readable form
    pub rendered: String,
}

/// Render `bytes` according to the request's content type
///
/// Form payloads become `key=value` lines, JSON is stored as sent,
/// anything else is stored empty.
pub async fn render_body(headers: &HeaderMap, bytes: &Bytes) -> RenderedBody {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let media_type = content_type.to_ascii_lowercase();

    if bytes.is_empty() {
        return RenderedBody::default();
    }

    let raw = String::from_utf8_lossy(bytes).into_owned();

    if media_type.starts_with("application/x-www-form-urlencoded") {
        let rendered = url::form_urlencoded::parse(bytes)
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        RenderedBody { raw, rendered }
    } else if media_type.starts_with("multipart/form-data") {
        // Boundary is case-sensitive, so pass the header through untouched.
        let rendered = render_multipart(content_type, bytes.clone()).await;
        RenderedBody { raw, rendered }
    } else if media_type.contains("json") {
        // Validated only; re-serializing would reorder keys and round big numbers.
        if serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_err() {
            tracing::debug!("Request body is not valid JSON, storing text as-is");
        }
        RenderedBody {
            rendered: raw.clone(),
            raw,
        }
    } else {
        RenderedBody::default()
    }
}

/// Request body after buffering for capture
pub struct BufferedBody {
    /// Body to hand downstream, carrying every byte the client sent
    pub replay: Body,
    /// Full payload, when it arrived intact within the limit
    pub captured: Option<Bytes>,
}

/// Buffer up to `limit` bytes of `body` for capture
///
/// The replayed body is always complete: an oversized payload is forwarded
/// as the buffered prefix followed by the unread remainder, and a read error
/// is forwarded to the handler after the bytes read so far.
pub async fn buffer_body(body: Body, limit: usize) -> BufferedBody {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0usize;

    loop {
        match data.next().await {
            Some(Ok(chunk)) => {
                size += chunk.len();
                chunks.push(chunk);
                if size > limit {
                    tracing::debug!(limit = limit, "Request body over capture limit, not recording it");
                    let prefix = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                    return BufferedBody {
                        replay: Body::from_stream(prefix.chain(data)),
                        captured: None,
                    };
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read request body, not recording it");
                let prefix = stream::iter(chunks.into_iter().map(Ok));
                return BufferedBody {
                    replay: Body::from_stream(prefix.chain(stream::once(async move { Err(e) }))),
                    captured: None,
                };
            }
            None => break,
        }
    }

    let bytes = match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.swap_remove(0),
        _ => Bytes::from(chunks.concat()),
    };
    BufferedBody {
        replay: Body::from(bytes.clone()),
        captured: Some(bytes),
    }
}

async fn render_multipart(content_type: &str, bytes: Bytes) -> String {
    let request = match Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
    {
        Ok(request) => request,
        Err(_) => return String::new(),
    };

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(e) => {
            tracing::debug!(error = %e, "Unreadable multipart body");
            return String::new();
        }
    };

    let mut lines = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => lines.push(format!("{}=<{}>", name, file_name)),
            None => {
                let value = field.text().await.unwrap_or_default();
                lines.push(format!("{}={}", name, value));
            }
        }
    }

    lines.join("\n")
}

/// Serialize headers as a JSON object, redacting the listed names
///
/// Repeated headers are joined with `, `.
pub fn render_headers(headers: &HeaderMap, redact: &[String]) -> serde_json::Value {
    let mut map = serde_json::Map::new();

    for (name, value) in headers {
        let key = name.as_str().to_string();
        let value = if redact.iter().any(|r| r.eq_ignore_ascii_case(name.as_str())) {
            REDACTED.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };

        match map.get_mut(&key) {
            Some(serde_json::Value::String(existing)) => {
                if value != REDACTED {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
            }
            _ => {
                map.insert(key, serde_json::Value::String(value));
            }
        }
    }

    serde_json::Value::Object(map)
}
