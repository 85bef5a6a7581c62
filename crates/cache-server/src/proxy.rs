use crate::cache_layer::{parse_cache_control, CacheControl, CacheLayer, CachedResponse, Tier};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type HttpClient = Client<
    hyper_util::client::legacy::connect::HttpConnector,
    Body,
>;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub cache: CacheLayer,
    pub client: HttpClient,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
}

/// A fully read upstream response.
pub struct Upstream {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
pub enum UpstreamError {
    Build(String),
    Request(String),
    Body(String),
    Timeout(Duration),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Build(e) => write!(f, "failed to build upstream request: {e}"),
            UpstreamError::Request(e) => write!(f, "upstream request failed: {e}"),
            UpstreamError::Body(e) => write!(f, "failed to read upstream body: {e}"),
            UpstreamError::Timeout(d) => write!(f, "upstream did not answer within {d:?}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Main handler. Serves GETs from cache, forwards misses upstream and caches
/// what comes back.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let method = req.method().clone();
    let key = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    // Only cache GET requests
    let cacheable_method = method == Method::GET;

    if cacheable_method {
        let lookup = state.cache.get(&key);
        if let (Some(cached), Some(tier)) = (lookup.value, lookup.tier) {
            metrics::counter!("cache_requests_total", "result" => "hit", "tier" => tier.as_str())
                .increment(1);
            tracing::debug!(
                key = %key,
                tier = tier.as_str(),
                latency_us = start.elapsed().as_micros(),
                "cache HIT"
            );
            return build_cached_response(&cached, tier);
        }
        metrics::counter!("cache_requests_total", "result" => "miss").increment(1);
    }

    let upstream = match forward(&state, method, &key, req.into_body()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(error = %e, key = %key, "upstream request failed");
            return bad_gateway();
        }
    };

    let stored = if cacheable_method && should_cache(&state.cache, &upstream) {
        let ttl = cache_directives(&upstream.headers).max_age;
        state.cache.insert(&key, to_cached(&upstream), ttl)
    } else {
        None
    };

    tracing::debug!(
        key = %key,
        status = upstream.status.as_u16(),
        tier = stored.map(Tier::as_str),
        latency_us = start.elapsed().as_micros(),
        "cache MISS → upstream"
    );

    let mut response = Response::builder().status(upstream.status);
    for (key, value) in upstream.headers.iter() {
        // Skip hop-by-hop headers
        let k = key.as_str();
        if k == "transfer-encoding" || k == "connection" {
            continue;
        }
        response = response.header(key, value);
    }
    response
        .header("X-Cache", "MISS")
        .body(Body::from(upstream.body))
        .unwrap_or_else(|_| bad_gateway())
}

/// Send a request upstream and read the whole response within the timeout.
pub async fn forward(
    state: &AppState,
    method: Method,
    path_and_query: &str,
    body: Body,
) -> Result<Upstream, UpstreamError> {
    let uri = format!(
        "{}{}",
        state.upstream_url.trim_end_matches('/'),
        path_and_query
    );
    let req = Request::builder()
        .method(method)
        .uri(&uri)
        .body(body)
        .map_err(|e| UpstreamError::Build(e.to_string()))?;

    let exchange = async {
        let resp = state
            .client
            .request(req)
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?
            .to_bytes();
        Ok::<_, UpstreamError>(Upstream {
            status,
            headers,
            body,
        })
    };

    tokio::time::timeout(state.upstream_timeout, exchange)
        .await
        .map_err(|_| UpstreamError::Timeout(state.upstream_timeout))?
}

pub fn should_cache(cache: &CacheLayer, upstream: &Upstream) -> bool {
    upstream.status == StatusCode::OK
        && upstream.body.len() <= cache.max_body_size
        && cache_directives(&upstream.headers).cacheable
}

pub fn to_cached(upstream: &Upstream) -> CachedResponse {
    let headers = upstream
        .headers
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "transfer-encoding" | "connection"))
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    CachedResponse {
        status: upstream.status.as_u16(),
        headers,
        body: upstream.body.clone(),
    }
}

/// Build an HTTP response from a cached entry.
fn build_cached_response(cached: &CachedResponse, tier: Tier) -> Response<Body> {
    let mut response = Response::builder().status(cached.status);

    for (key, value) in &cached.headers {
        if let Ok(v) = HeaderValue::from_str(value) {
            response = response.header(key.as_str(), v);
        }
    }

    response
        .header("X-Cache", "HIT")
        .header("X-Cache-Tier", tier.as_str())
        .body(Body::from(cached.body.clone()))
        .unwrap_or_else(|_| bad_gateway())
}

fn bad_gateway() -> Response<Body> {
    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
}

/// Directives from the Cache-Control header. A missing or non-ASCII
/// header leaves the response cacheable with no explicit TTL.
pub fn cache_directives(headers: &HeaderMap) -> CacheControl {
    headers
        .get("cache-control")
        .and_then(|v| v.to_str().ok())
        .map(parse_cache_control)
        .unwrap_or_default()
}
