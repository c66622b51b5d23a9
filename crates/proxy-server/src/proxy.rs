use crate::cache_layer::{cache_key, CacheLayer, CacheStatus};
use crate::compress;
use crate::config::{Config, ConfigError, UpstreamTarget};
use crate::dispatch::CorsHeaders;
use crate::error::ProxyError;
use crate::rewrite::rewrite_path;
use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use relay_store::{Clock, FixedWindowLimiter, SystemClock};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type HttpClient = Client<HttpConnector, Body>;

pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// The proxy only listens for plain HTTP.
const FORWARDED_PROTO: &str = "http";

/// Connection-scoped headers that must not be relayed or cached.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Shared application state passed to all handlers.
///
/// Constructed once per server; the cache and rate table live here rather
/// than in process globals.
pub struct AppState {
    pub cache: CacheLayer,
    pub limiter: FixedWindowLimiter,
    pub client: HttpClient,
    pub upstream: UpstreamTarget,
    pub cors: CorsHeaders,
    pub compression: bool,
    pub upstream_timeout: Option<Duration>,
    pub started_at: Instant,
}

/// Result of handing a request to the forwarder.
pub struct Forwarded {
    /// Resolved upstream URI, absent when resolution itself failed.
    pub upstream: Option<Uri>,
    pub cache: CacheStatus,
    pub result: Result<Response<Body>, ProxyError>,
}

struct Buffered {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    oversized: bool,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build state with an explicit clock for the cache and rate table.
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let upstream = UpstreamTarget::parse(&config.upstream.url)?;
        let cors = CorsHeaders::from_config(&config.cors)?;

        let cache = CacheLayer::new(
            Duration::from_millis(config.cache.ttl_ms),
            config.cache.max_body_size_bytes,
            Arc::clone(&clock),
        );
        let limiter = FixedWindowLimiter::new(
            Duration::from_millis(config.rate_limit.window_ms),
            config.rate_limit.max_requests,
            clock,
        );
        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            cache,
            limiter,
            client,
            upstream,
            cors,
            compression: config.compression.enabled,
            upstream_timeout: config.upstream_timeout(),
            started_at: Instant::now(),
        })
    }

    /// Rewrite, resolve and relay one request. GETs go through the cache and
    /// are buffered; everything else is streamed both ways.
    pub async fn forward(&self, req: Request<Body>, client_id: &str) -> Forwarded {
        let cache = if req.method() == Method::GET {
            CacheStatus::Miss
        } else {
            CacheStatus::Bypass
        };

        let inbound = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let target = match self.upstream.resolve(rewrite_path(inbound)) {
            Ok(uri) => uri,
            Err(e) => {
                return Forwarded {
                    upstream: None,
                    cache,
                    result: Err(e),
                }
            }
        };

        if cache == CacheStatus::Bypass {
            let result = self.forward_streaming(req, &target, client_id).await;
            return Forwarded {
                upstream: Some(target),
                cache,
                result,
            };
        }

        let (cache, result) = self.forward_get(req, &target, client_id).await;
        Forwarded {
            upstream: Some(target),
            cache,
            result,
        }
    }

    async fn forward_get(
        &self,
        req: Request<Body>,
        target: &Uri,
        client_id: &str,
    ) -> (CacheStatus, Result<Response<Body>, ProxyError>) {
        let key = cache_key(target);
        let gzip_ok = self.compression && compress::accepts_gzip(req.headers());

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "cache HIT");
            let status = StatusCode::from_u16(hit.status).unwrap_or(StatusCode::OK);
            let response = self
                .render(status, hit.headers.clone(), hit.body.clone(), gzip_ok, CacheStatus::Hit)
                .await;
            return (CacheStatus::Hit, Ok(response));
        }

        let buffered = match self.outbound(req, target, client_id) {
            Ok(outbound) => self.within_timeout(self.fetch_buffered(outbound)).await,
            Err(e) => Err(e),
        };
        let Buffered {
            status,
            headers,
            body,
            oversized,
        } = match buffered {
            Ok(b) => b,
            Err(e) => return (CacheStatus::Miss, Err(e)),
        };

        let cached = !oversized && self.cache.admits(status, &headers, body.len());
        if cached {
            // Stored before compression; encoding is decided per request.
            self.cache.insert(key.clone(), status, headers.clone(), body.clone());
        }

        tracing::debug!(
            key = %key,
            status = status.as_u16(),
            bytes = body.len(),
            cached,
            "cache MISS → upstream"
        );

        let response = self
            .render(status, headers, body, gzip_ok, CacheStatus::Miss)
            .await;
        (CacheStatus::Miss, Ok(response))
    }

    /// Relay a non-GET request: the inbound body streams to upstream and the
    /// upstream body streams back without buffering.
    async fn forward_streaming(
        &self,
        req: Request<Body>,
        target: &Uri,
        client_id: &str,
    ) -> Result<Response<Body>, ProxyError> {
        let outbound = self.outbound(req, target, client_id)?;
        // Only the wait for response headers is bounded; a long body is not
        // cut off mid-stream.
        let upstream = self
            .within_timeout(async {
                self.client
                    .request(outbound)
                    .await
                    .map_err(ProxyError::from)
            })
            .await?;

        let (parts, body) = upstream.into_parts();
        let mut response = Response::new(Body::new(body));
        *response.status_mut() = parts.status;
        *response.headers_mut() = parts.headers;
        strip_hop_by_hop(response.headers_mut());
        Ok(response)
    }

    /// Issue the request and collect the whole body, noting whether it grew
    /// past the cache cap on the way.
    async fn fetch_buffered(&self, outbound: Request<Body>) -> Result<Buffered, ProxyError> {
        let upstream = self.client.request(outbound).await?;
        let (parts, mut body) = upstream.into_parts();

        let mut buf = BytesMut::new();
        let mut oversized = false;
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Ok(chunk) = frame.into_data() {
                buf.extend_from_slice(&chunk);
                if !oversized && !self.cache.fits(buf.len()) {
                    oversized = true;
                    tracing::debug!(
                        bytes = buf.len(),
                        limit = self.cache.max_body_size,
                        "response exceeds cache size cap, not caching"
                    );
                }
            }
        }

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        Ok(Buffered {
            status: parts.status,
            headers,
            body: buf.freeze(),
            oversized,
        })
    }

    fn outbound(
        &self,
        req: Request<Body>,
        target: &Uri,
        client_id: &str,
    ) -> Result<Request<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(target.clone())
            .body(body)?;
        *outbound.headers_mut() =
            forwarded_headers(&parts.headers, &parts.uri, &self.upstream, client_id);
        Ok(outbound)
    }

    async fn within_timeout<T, F>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = Result<T, ProxyError>>,
    {
        match self.upstream_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| ProxyError::Timeout(limit))?,
            None => fut.await,
        }
    }

    /// Build the client response for a buffered body, gzip-encoding it when
    /// the client accepts it and upstream has not already encoded it.
    async fn render(
        &self,
        status: StatusCode,
        mut headers: HeaderMap,
        body: Bytes,
        gzip_ok: bool,
        cache: CacheStatus,
    ) -> Response<Body> {
        let encode = gzip_ok && !body.is_empty() && !headers.contains_key(header::CONTENT_ENCODING);
        let body = if encode {
            match compress::gzip_bytes(body.clone()).await {
                Ok(compressed) => {
                    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));
                    headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
                    compressed
                }
                Err(e) => {
                    tracing::warn!(error = %e, "gzip failed, sending identity body");
                    body
                }
            }
        } else {
            body
        };

        headers.insert(X_CACHE, HeaderValue::from_static(cache.as_str()));

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Outbound headers: everything end-to-end the client sent, with `host` and
/// the `x-forwarded-*` set always overridden.
pub fn forwarded_headers(
    inbound: &HeaderMap,
    inbound_uri: &Uri,
    upstream: &UpstreamTarget,
    client_id: &str,
) -> HeaderMap {
    // HTTP/2 clients carry the host in the URI authority instead.
    let original_host = inbound
        .get(header::HOST)
        .cloned()
        .or_else(|| {
            inbound_uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        })
        .unwrap_or_else(|| HeaderValue::from_static(""));

    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.insert(header::HOST, upstream.host_header().clone());
    headers.insert(X_FORWARDED_HOST, original_host);
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(FORWARDED_PROTO));
    headers.insert(
        X_FORWARDED_FOR,
        HeaderValue::from_str(client_id).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    );
    headers
}

/// Remove the fixed hop-by-hop set plus any header `connection` names.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
