//! Blocking HTTP plumbing shared by the providers
//!
//! Request bodies are sent through [`CancellableReader`] and response bodies
//! are copied with [`copy_to_file`], so both directions observe the cancel
//! token once per chunk.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::ClientConfig;
use crate::error::{ErrorKind, HarpError, Result};

use super::CancelToken;

/// Agent with the configured connect timeout
pub(crate) fn build_agent(config: &ClientConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(config.connect_timeout())
        .redirects(5)
        .build()
}

/// Convert a ureq failure, observing cancellation first
///
/// A request aborted by the cancel token surfaces as a transport error, so
/// the token decides whether this is a cancellation or a real failure.
pub(crate) fn request_error(e: ureq::Error, kind: ErrorKind, cancel: Option<&CancelToken>) -> HarpError {
    if cancel.is_some_and(|c| c.is_cancelled()) {
        return HarpError::cancelled();
    }
    let mut err = HarpError::from(e);
    err.kind = kind;
    err
}

/// Reject anything but 200
pub(crate) fn expect_ok(response: ureq::Response, kind: ErrorKind) -> Result<ureq::Response> {
    let status = response.status();
    if status == 200 {
        return Ok(response);
    }
    let body = response.into_string().unwrap_or_default();
    Err(HarpError::new(
        kind,
        format!("Request failed with status code: {} {}", status, body.trim()),
    )
    .with_code(status))
}

/// Read a whole response body as text
pub(crate) fn read_text(response: ureq::Response, kind: ErrorKind) -> Result<String> {
    response
        .into_string()
        .map_err(|e| HarpError::new(kind, format!("Failed to read response body: {}", e)))
}

/// Request body reader that hands out at most `chunk_size` bytes per read
/// and fails once the cancel token is set
pub(crate) struct CancellableReader<R> {
    inner: R,
    chunk_size: usize,
    cancel: CancelToken,
}

impl<R: Read> CancellableReader<R> {
    pub(crate) fn new(inner: R, chunk_size: usize, cancel: CancelToken) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            cancel,
        }
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "request cancelled"));
        }
        let len = buf.len().min(self.chunk_size);
        self.inner.read(&mut buf[..len])
    }
}

/// Copy a response body into `dest`, checking the cancel token per chunk
///
/// On cancellation or failure the partial file is removed.
pub(crate) fn copy_to_file(
    mut reader: impl Read,
    dest: &Path,
    chunk_size: usize,
    cancel: &CancelToken,
    kind: ErrorKind,
) -> Result<u64> {
    let result = (|| -> Result<u64> {
        let mut file = fs::File::create(dest)
            .map_err(|e| HarpError::new(kind, format!("Failed to create output file {:?}: {}", dest, e)))?;
        let mut buffer = vec![0u8; chunk_size.max(1)];
        let mut written: u64 = 0;

        loop {
            cancel.check()?;
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    cancel.check()?;
                    return Err(HarpError::new(kind, format!("Failed to read response body: {}", e)));
                }
            };
            file.write_all(&buffer[..bytes_read])
                .map_err(|e| HarpError::new(kind, format!("Failed to write {:?}: {}", dest, e)))?;
            written += bytes_read as u64;
        }

        file.flush()
            .map_err(|e| HarpError::new(kind, format!("Failed to flush {:?}: {}", dest, e)))?;
        Ok(written)
    })();

    if result.is_err() {
        fs::remove_file(dest).ok();
    }
    result
}

/// Unique path in the temp directory keeping the original extension
pub(crate) fn unique_temp_path(file_name: &str) -> PathBuf {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, uuid::Uuid::new_v4(), ext.to_string_lossy()),
        None => format!("{}_{}", stem, uuid::Uuid::new_v4()),
    };
    std::env::temp_dir().join(name)
}

/// multipart/form-data body builder
pub(crate) struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    pub(crate) fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    /// Boundary in the `--------{uuid}--------` form
    pub(crate) fn with_random_boundary() -> Self {
        Self::new(format!("--------{}--------", uuid::Uuid::new_v4()))
    }

    pub(crate) fn text(mut self, name: &str, value: &str) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub(crate) fn file(mut self, name: &str, file_name: &str, mime_type: &str, data: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, file_name
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Close the body and return `(content_type, bytes)`
    pub(crate) fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (self.content_type(), self.body)
    }
}

/// MIME type for an uploaded track file
pub(crate) fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mid") | Some("midi") => "audio/midi",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_layout() {
        let (content_type, body) = Multipart::new("XYZ")
            .text("prompt", "happy song")
            .file("files", "a.wav", "audio/wav", b"RIFF")
            .finish();
        assert_eq!(content_type, "multipart/form-data; boundary=XYZ");
        let body = String::from_utf8(body).unwrap();
        assert_eq!(
            body,
            "--XYZ\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\nhappy song\r\n\
             --XYZ\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.wav\"\r\n\
             Content-Type: audio/wav\r\n\r\nRIFF\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn test_random_boundary_shape() {
        let content_type = Multipart::with_random_boundary().content_type();
        let boundary = content_type.trim_start_matches("multipart/form-data; boundary=");
        assert!(boundary.starts_with("--------"));
        assert!(boundary.ends_with("--------"));
        assert_eq!(boundary.len(), 16 + 36);
    }

    #[test]
    fn test_cancellable_reader_limits_chunks_and_stops() {
        let cancel = CancelToken::new();
        let mut reader = CancellableReader::new(io::Cursor::new(vec![7u8; 100]), 10, cancel.clone());
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).unwrap(), 10);
        cancel.cancel();
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_copy_to_file_removes_partial_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.wav");
        let cancel = CancelToken::new();

        struct CancelAfterFirst {
            cancel: CancelToken,
            reads: usize,
        }
        impl Read for CancelAfterFirst {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.reads += 1;
                if self.reads > 1 {
                    self.cancel.cancel();
                }
                buf.fill(1);
                Ok(buf.len())
            }
        }

        let reader = CancelAfterFirst {
            cancel: cancel.clone(),
            reads: 0,
        };
        let err = copy_to_file(reader, &dest, 16, &cancel, ErrorKind::FileDownloadError).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
    }

    #[test]
    fn test_copy_to_file_writes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let data: Vec<u8> = (0..=255).collect();
        let written = copy_to_file(
            io::Cursor::new(data.clone()),
            &dest,
            7,
            &CancelToken::new(),
            ErrorKind::FileDownloadError,
        )
        .unwrap();
        assert_eq!(written, 256);
        assert_eq!(fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn test_unique_temp_path_keeps_extension() {
        let a = unique_temp_path("result.wav");
        let b = unique_temp_path("result.wav");
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "wav");
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("result_"));
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for(Path::new("x.WAV")), "audio/wav");
        assert_eq!(mime_type_for(Path::new("x.mid")), "audio/midi");
        assert_eq!(mime_type_for(Path::new("x")), "application/octet-stream");
    }
}
