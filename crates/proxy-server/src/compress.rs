//! gzip content coding for buffered GET responses.

use axum::http::header::ACCEPT_ENCODING;
use axum::http::HeaderMap;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

/// Bodies at least this large are compressed on the blocking pool.
const BLOCKING_THRESHOLD: usize = 64 * 1024;

/// Whether the client's `accept-encoding` allows gzip.
///
/// A `gzip` or `*` coding with `q=0` counts as a refusal.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| {
            let mut parts = coding.split(';');
            let name = parts.next().unwrap_or("").trim();
            if !name.eq_ignore_ascii_case("gzip") && name != "*" {
                return false;
            }
            !parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            })
        })
}

pub fn gzip(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// gzip a response body, moving large ones off the async workers.
pub async fn gzip_bytes(body: Bytes) -> io::Result<Bytes> {
    if body.len() < BLOCKING_THRESHOLD {
        return gzip(&body).map(Bytes::from);
    }
    tokio::task::spawn_blocking(move || gzip(&body).map(Bytes::from))
        .await
        .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(value));
        headers
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn detects_gzip_in_accept_encoding() {
        assert!(accepts_gzip(&accept("gzip")));
        assert!(accepts_gzip(&accept("deflate, gzip;q=0.8, br")));
        assert!(accepts_gzip(&accept("GZIP")));
        assert!(accepts_gzip(&accept("*")));
    }

    #[test]
    fn refuses_without_gzip() {
        assert!(!accepts_gzip(&HeaderMap::new()));
        assert!(!accepts_gzip(&accept("br, deflate")));
        assert!(!accepts_gzip(&accept("identity")));
        assert!(!accepts_gzip(&accept("gzip;q=0")));
        assert!(!accepts_gzip(&accept("x-gzip-ish")));
    }

    #[test]
    fn gzip_round_trips() {
        let body = b"hello hello hello hello".repeat(50);
        let compressed = gzip(&body).unwrap();
        assert!(compressed.len() < body.len());
        assert_eq!(gunzip(&compressed), body);
    }

    #[tokio::test]
    async fn large_bodies_compress_on_blocking_pool() {
        let body = Bytes::from(vec![b'a'; BLOCKING_THRESHOLD * 2]);
        let compressed = gzip_bytes(body.clone()).await.unwrap();
        assert_eq!(gunzip(&compressed), body.to_vec());
    }
}
