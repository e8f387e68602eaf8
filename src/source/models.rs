use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Serialize, Serializer};

const MP4_FAMILY: &[&str] = &["mp4", "m4v"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamKind {
    VideoOnly,
    AudioOnly,
    Muxed,
}

/// Extra request headers a fetch locator needs (user agent, referer, ...).
/// Names are case-insensitive; entries that are not valid HTTP headers are
/// dropped on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders(HeaderMap);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                self.0.insert(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = RequestHeaders::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value.as_ref());
        }
        headers
    }
}

impl Serialize for RequestHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// One elementary (or muxed) stream reported by source resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStream {
    pub format_id: String,
    pub kind: StreamKind,
    pub container: String,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub height: Option<u32>,
    /// Average audio bitrate in kbit/s.
    pub audio_bitrate: Option<f64>,
    pub url: String,
    pub headers: RequestHeaders,
}

impl MediaStream {
    pub fn has_video(&self) -> bool {
        matches!(self.kind, StreamKind::VideoOnly | StreamKind::Muxed)
    }

    pub fn has_audio(&self) -> bool {
        match self.kind {
            StreamKind::AudioOnly => true,
            StreamKind::Muxed => self
                .audio_codec
                .as_deref()
                .is_some_and(|codec| !codec.trim().is_empty()),
            StreamKind::VideoOnly => false,
        }
    }

    pub fn is_mp4_family(&self) -> bool {
        MP4_FAMILY
            .iter()
            .any(|ext| self.container.eq_ignore_ascii_case(ext))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    /// Extraction order is significant: selection takes the first match.
    pub streams: Vec<MediaStream>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_replace_case_insensitively() {
        let mut headers: RequestHeaders = [("User-Agent", "a"), ("Accept", "*/*")]
            .into_iter()
            .collect();
        headers.insert("user-agent", "b");
        assert_eq!(headers.get("USER-AGENT"), Some("b"));
        assert_eq!(headers.iter().count(), 2);
    }

    #[test]
    fn invalid_header_entries_are_dropped() {
        let mut headers = RequestHeaders::new();
        assert!(!headers.insert("bad name", "x"));
        assert!(!headers.insert("X-Trace", "line\nbreak"));
        assert!(headers.is_empty());
    }

    #[test]
    fn muxed_stream_without_audio_codec_is_not_audio_capable() {
        let stream = MediaStream {
            format_id: "18".into(),
            kind: StreamKind::Muxed,
            container: "MP4".into(),
            video_codec: Some("avc1".into()),
            audio_codec: Some(" ".into()),
            height: Some(360),
            audio_bitrate: None,
            url: "https://cdn.test/18".into(),
            headers: RequestHeaders::new(),
        };
        assert!(stream.has_video());
        assert!(!stream.has_audio());
        assert!(stream.is_mp4_family());
    }
}
