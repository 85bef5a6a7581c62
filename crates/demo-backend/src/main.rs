use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const HOSPITAL_COUNT: u64 = 50;

#[derive(Serialize)]
struct Hospital {
    id: u64,
    name: String,
    city: String,
    latitude: f64,
    longitude: f64,
    beds: u32,
    emergency: bool,
}

fn hospital(id: u64) -> Hospital {
    // Deterministic per id so repeated fetches agree
    let offset = id as f64 * 0.013;
    Hospital {
        id,
        name: format!("Hospital {id}"),
        city: ["Lisbon", "Porto", "Coimbra", "Braga", "Faro"][(id % 5) as usize].to_string(),
        latitude: 38.7 + offset,
        longitude: -9.1 - offset,
        beds: 80 + (id as u32 * 37) % 400,
        emergency: id % 3 != 0,
    }
}

/// Simulate upstream latency (5-20ms)
async fn simulated_latency() -> u64 {
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    delay
}

async fn index() -> Html<&'static str> {
    simulated_latency().await;
    Html("<!doctype html><title>Hospital map</title><div id=\"map\"></div><script src=\"/static/app.js\"></script>")
}

async fn list_hospitals() -> Json<Vec<Hospital>> {
    simulated_latency().await;
    Json((1..=HOSPITAL_COUNT).map(hospital).collect())
}

async fn get_hospital(Path(id): Path<u64>) -> Response {
    simulated_latency().await;
    if id == 0 || id > HOSPITAL_COUNT {
        return (StatusCode::NOT_FOUND, "no such hospital").into_response();
    }
    (
        [(header::CACHE_CONTROL, "public, max-age=1800")],
        Json(hospital(id)),
    )
        .into_response()
}

async fn image(Path(name): Path<String>) -> Response {
    simulated_latency().await;
    // A fake PNG: signature followed by filler
    let mut body = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    body.extend(name.bytes().cycle().take(2048));
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        body,
    )
        .into_response()
}

async fn static_file(Path(file): Path<String>) -> Response {
    simulated_latency().await;
    let content_type = match file.rsplit('.').next() {
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        _ => "application/octet-stream",
    };
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=604800"),
        ],
        format!("/* {file} */\n{}", "x".repeat(512)),
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = Router::new()
        .route("/", get(index))
        .route("/api/hospitals", get(list_hospitals))
        .route("/hospitals/{id}", get(get_hospital))
        .route("/images/{name}", get(image))
        .route("/static/{file}", get(static_file))
        .route("/health", get(health));

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, hospitals = HOSPITAL_COUNT, "demo backend starting");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
