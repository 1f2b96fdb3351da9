//! Result of one request/response conversation

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use syncsocket_core::Result;

/// What a conversation produced
///
/// Holds the last data frame received, the time it arrived and the close
/// status of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    start_time: SystemTime,
    end_time: Option<SystemTime>,
    status: u16,
    bytes: Option<Bytes>,
}

impl Response {
    /// Status of a conversation whose connection was never seen closing
    pub const UNCLOSED: u16 = 0;

    pub(crate) fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            end_time: None,
            status: Self::UNCLOSED,
            bytes: None,
        }
    }

    /// When the request started executing
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// When the last data frame arrived
    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    /// Time from the start of the request to the last data frame
    pub fn duration(&self) -> Option<Duration> {
        self.end_time?.duration_since(self.start_time).ok()
    }

    /// Close status, or [`Response::UNCLOSED`]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether a close was recorded
    pub fn is_closed(&self) -> bool {
        self.status != Self::UNCLOSED
    }

    /// Payload of the last data frame
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// The payload as text, replacing invalid UTF-8
    pub fn text(&self) -> Option<String> {
        self.text_with(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// The payload decoded by `decoder`
    pub fn text_with<F>(&self, decoder: F) -> Option<String>
    where
        F: FnOnce(&[u8]) -> String,
    {
        self.bytes().map(decoder)
    }

    /// Write the payload to `path`, replacing the file, and return the path
    ///
    /// Without a payload an empty file is written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        std::fs::write(path, self.bytes().unwrap_or_default())?;
        Ok(path.to_path_buf())
    }

    pub(crate) fn record_frame(&mut self, payload: Bytes) {
        self.bytes = Some(payload);
        self.end_time = Some(SystemTime::now());
    }

    /// Record the close status; the first one sticks
    pub(crate) fn record_close(&mut self, status: u16) -> bool {
        if self.is_closed() {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_response() {
        let response = Response::new();
        assert_eq!(response.status(), Response::UNCLOSED);
        assert!(!response.is_closed());
        assert_eq!(response.bytes(), None);
        assert_eq!(response.text(), None);
        assert_eq!(response.end_time(), None);
        assert_eq!(response.duration(), None);
        assert!(response.start_time() <= SystemTime::now());
    }

    #[test]
    fn test_last_frame_wins() {
        let mut response = Response::new();
        response.record_frame(Bytes::from_static(b"first"));
        let first_end = response.end_time().unwrap();
        response.record_frame(Bytes::from_static(b"second"));

        assert_eq!(response.bytes(), Some(&b"second"[..]));
        assert!(response.end_time().unwrap() >= first_end);
        assert!(response.duration().is_some());
    }

    #[test]
    fn test_status_is_recorded_once() {
        let mut response = Response::new();
        assert!(response.record_close(4000));
        assert!(!response.record_close(1000));
        assert_eq!(response.status(), 4000);
        assert!(response.is_closed());
    }

    #[test]
    fn test_text_and_custom_decoder() {
        let mut response = Response::new();
        response.record_frame(Bytes::from("你好".as_bytes().to_vec()));

        assert_eq!(response.text().as_deref(), Some("你好"));
        let tagged = response.text_with(|bytes| {
            let text = String::from_utf8_lossy(bytes);
            if text.contains('你') {
                format!("found:{}", text)
            } else {
                text.into_owned()
            }
        });
        assert_eq!(tagged.as_deref(), Some("found:你好"));
        // Decoding never touches the stored payload
        assert_eq!(response.bytes(), Some("你好".as_bytes()));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut response = Response::new();
        response.record_frame(Bytes::from_static(&[0x68, 0xff, 0x69]));
        assert_eq!(response.text().as_deref(), Some("h\u{fffd}i"));
    }

    #[test]
    fn test_save_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"stale content that is longer").unwrap();

        let mut response = Response::new();
        response.record_frame(Bytes::from_static(b"\x00\x01binary"));
        let saved = response.save(&path).unwrap();

        assert_eq!(saved, path);
        assert_eq!(std::fs::read(&saved).unwrap(), b"\x00\x01binary");
    }

    #[test]
    fn test_save_without_payload_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let saved = Response::new().save(dir.path().join("empty")).unwrap();
        assert!(std::fs::read(saved).unwrap().is_empty());
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Response::new().save(dir.path().join("missing").join("file"));
        assert!(matches!(result, Err(syncsocket_core::Error::Io(_))));
    }
}
