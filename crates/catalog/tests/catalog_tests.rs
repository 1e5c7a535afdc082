//! Catalog client against an in-process imitation of the platform API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use catalog_client::{CatalogClient, CatalogConfig};
use media_proxy::CredentialHeaders;
use playback_session::{ApiError, CatalogApi};
use serde_json::{Value, json};
use tokio::net::TcpListener;

const SESSION_COOKIE: &str = "SESSDATA=secret";
const PNG_PREFIX: [u8; 4] = [0x89, b'P', b'N', b'G'];

#[derive(Default)]
struct Platform {
    view_requests: AtomicUsize,
}

type Params = Query<HashMap<String, String>>;

fn ok(data: Value) -> Json<Value> {
    Json(json!({"code": 0, "message": "0", "data": data}))
}

fn failure(code: i64, message: &str) -> Json<Value> {
    Json(json!({"code": code, "message": message, "data": null}))
}

async fn view(State(platform): State<Arc<Platform>>, Query(params): Params) -> Json<Value> {
    platform.view_requests.fetch_add(1, Ordering::SeqCst);
    match params.get("bvid").map(String::as_str) {
        Some("BVmulti") => ok(json!({
            "bvid": "BVmulti",
            "title": "Concert",
            "pic": "http://img.example/concert.jpg",
            "duration": 900,
            "pages": [
                {"cid": 101, "page": 1, "part": "Opening", "duration": 300},
                {"cid": 102, "page": 2, "part": "Encore", "duration": 300},
                {"cid": 103, "page": 3, "part": "", "duration": 300}
            ],
            "ugc_season": null
        })),
        Some("BVsingle") => ok(json!({
            "bvid": "BVsingle",
            "title": "Episode 2",
            "duration": 240,
            "pages": [{"cid": 201, "page": 1, "part": "Episode 2", "duration": 240}],
            "ugc_season": {
                "title": "Season",
                "sections": [
                    {"episodes": [
                        {"bvid": "BVfirst", "title": "Episode 1", "arc": {"pic": "http://img.example/1.jpg", "duration": 200}},
                        {"bvid": "BVsingle", "title": "Episode 2", "arc": {"duration": 240}}
                    ]},
                    {"episodes": [
                        {"bvid": "BVthird", "title": "Episode 3"}
                    ]}
                ]
            }
        })),
        _ => failure(-404, "video does not exist"),
    }
}

async fn play_url(headers: HeaderMap, Query(params): Params) -> Json<Value> {
    let logged_in = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        == Some(SESSION_COOKIE);
    if !logged_in {
        return failure(-101, "not logged in");
    }
    if !headers.contains_key(header::REFERER) {
        return failure(-403, "missing referer");
    }
    assert_eq!(params.get("fnval").map(String::as_str), Some("16"));

    match params.get("cid").map(String::as_str) {
        Some("101") => ok(json!({
            "dash": {"audio": [
                {"baseUrl": "https://cdn.example/101-64k.m4s", "bandwidth": 67000},
                {"baseUrl": "https://cdn.example/101-192k.m4s", "bandwidth": 192000}
            ]},
            "durl": null
        })),
        Some("102") => ok(json!({"durl": [{"url": "https://cdn.example/102.mp4"}]})),
        _ => ok(json!({})),
    }
}

async fn favorites(Query(params): Params) -> Json<Value> {
    assert_eq!(params.get("media_id").map(String::as_str), Some("777"));
    assert_eq!(params.get("ps").map(String::as_str), Some("2"));
    match params.get("pn").map(String::as_str) {
        Some("1") => ok(json!({
            "medias": [
                {"bvid": "BVa", "title": "A", "duration": 100, "cover": "http://img.example/a.jpg"},
                {"bvid": "BVb", "title": "B", "duration": 200}
            ],
            "has_more": true
        })),
        _ => ok(json!({"medias": null, "has_more": false})),
    }
}

async fn cover() -> Response {
    (
        [(header::CONTENT_TYPE, "image/png; charset=binary")],
        PNG_PREFIX.to_vec(),
    )
        .into_response()
}

async fn spawn_platform() -> (String, Arc<Platform>) {
    let platform = Arc::new(Platform::default());
    let app = Router::new()
        .route("/x/web-interface/view", get(view))
        .route("/x/player/playurl", get(play_url))
        .route("/x/v3/fav/resource/list", get(favorites))
        .route("/img/cover.png", get(cover))
        .route("/broken", get(|| async { StatusCode::BAD_GATEWAY }))
        .with_state(platform.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), platform)
}

fn client_for(base: &str, credentials: CredentialHeaders) -> CatalogClient {
    let config = CatalogConfig {
        api_base: base.to_string(),
        page_size: 2,
        ..CatalogConfig::default()
    };
    CatalogClient::new(config, &credentials).unwrap()
}

fn logged_in() -> CredentialHeaders {
    CredentialHeaders::new().with_cookies(SESSION_COOKIE)
}

#[tokio::test]
async fn resolves_highest_bandwidth_audio_for_first_part() {
    let (base, _) = spawn_platform().await;
    let client = client_for(&base, logged_in());

    let url = client.resolve_media_url("BVmulti", None).await.unwrap();
    assert_eq!(url, "https://cdn.example/101-192k.m4s");
}

#[tokio::test]
async fn resolves_specific_part_with_progressive_fallback() {
    let (base, _) = spawn_platform().await;
    let client = client_for(&base, logged_in());

    let url = client.resolve_media_url("BVmulti", Some(2)).await.unwrap();
    assert_eq!(url, "https://cdn.example/102.mp4");

    let err = client.resolve_media_url("BVmulti", Some(3)).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)), "{err:?}");

    let err = client.resolve_media_url("BVmulti", Some(9)).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(ref m) if m.contains("part 9")), "{err:?}");
}

#[tokio::test]
async fn platform_error_code_becomes_resolution_failure() {
    let (base, _) = spawn_platform().await;
    let client = client_for(&base, logged_in());

    let err = client.resolve_media_url("BVgone", None).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::ResolutionFailed {
            code: -404,
            message: "video does not exist".into()
        }
    );
}

#[tokio::test]
async fn credentials_and_default_referer_are_sent() {
    let (base, _) = spawn_platform().await;

    let anonymous = client_for(&base, CredentialHeaders::new());
    let err = anonymous.resolve_media_url("BVmulti", None).await.unwrap_err();
    assert!(matches!(err, ApiError::ResolutionFailed { code: -101, .. }), "{err:?}");

    // No explicit referer: the client adds the platform's own.
    let client = client_for(&base, logged_in());
    assert!(client.resolve_media_url("BVmulti", None).await.is_ok());
}

#[tokio::test]
async fn lists_favorites_pages() {
    let (base, _) = spawn_platform().await;
    let client = client_for(&base, logged_in());

    let first = client.list_favorite_page("777", 1).await.unwrap();
    assert!(first.has_more);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].catalog_id, "BVa");
    assert_eq!(first.items[0].duration_secs, 100);
    assert_eq!(first.items[0].cover_url.as_deref(), Some("http://img.example/a.jpg"));
    assert_eq!(first.items[1].cover_url, None);

    let second = client.list_favorite_page("777", 2).await.unwrap();
    assert!(!second.has_more);
    assert!(second.items.is_empty());
}

#[tokio::test]
async fn lists_parts_and_series_from_one_metadata_request() {
    let (base, platform) = spawn_platform().await;
    let client = client_for(&base, logged_in());

    let parts = client.list_episodes("BVmulti").await.unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[1].part_index, Some(2));
    assert_eq!(parts[1].title, "Encore");
    assert_eq!(parts[2].title, "Concert");
    assert!(client.list_series("BVmulti").await.unwrap().is_empty());
    assert_eq!(platform.view_requests.load(Ordering::SeqCst), 1);

    let series = client.list_series("BVsingle").await.unwrap();
    let ids: Vec<_> = series.iter().map(|i| i.catalog_id.as_str()).collect();
    assert_eq!(ids, ["BVfirst", "BVsingle", "BVthird"]);
    assert_eq!(series[0].duration_secs, 200);
    assert_eq!(series[2].duration_secs, 0);

    let item = client.resolve_catalog_item("BVsingle").await.unwrap();
    assert_eq!(item.title, "Episode 2");
    assert_eq!(platform.view_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn images_become_data_urls() {
    let (base, _) = spawn_platform().await;
    let client = client_for(&base, logged_in());

    let data_url = client
        .fetch_image(&format!("{base}/img/cover.png"))
        .await
        .unwrap();
    assert_eq!(data_url, "data:image/png;base64,iVBORw==");

    let err = client
        .fetch_image(&format!("{base}/img/missing.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let err = client
        .fetch_image(&format!("{base}/broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(ref m) if m.contains("502")), "{err:?}");
}

#[tokio::test]
async fn unreachable_api_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(&format!("http://{addr}"), logged_in());
    let err = client.list_favorite_page("777", 1).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "{err:?}");
}
