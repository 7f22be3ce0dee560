// gateway/tests/admission_test.rs
use actix::{Actor, Addr};
use actix_web::http::StatusCode;
use actix_web::{test, App};

use common::GatewayConfig;
use gateway::actors::session_registry::{GetStats, SessionRegistryActor};
use gateway::GatewayState;

fn upgrade_request(uri: &str, peer: &str) -> test::TestRequest {
    test::TestRequest::get()
        .uri(uri)
        .insert_header(("connection", "upgrade"))
        .insert_header(("upgrade", "websocket"))
        .insert_header(("sec-websocket-version", "13"))
        .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
        .peer_addr(format!("{}:50000", peer).parse().unwrap())
}

fn setup(config: GatewayConfig) -> (GatewayState, Addr<SessionRegistryActor>) {
    let registry = SessionRegistryActor::new(config.limits.clone()).start();
    let state = GatewayState::new(config, registry.clone()).unwrap();
    (state, registry)
}

#[actix_web::test]
async fn test_upgrade_on_configured_path() {
    let (state, registry) = setup(GatewayConfig::default());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let resp = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(registry.send(GetStats).await.unwrap().sessions, 1);
}

#[actix_web::test]
async fn test_other_paths_are_not_found() {
    let (state, registry) = setup(GatewayConfig::default());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let resp = test::call_service(&app, upgrade_request("/elsewhere", "203.0.113.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(registry.send(GetStats).await.unwrap().sessions, 0);
}

#[actix_web::test]
async fn test_origin_allowlist() {
    let mut config = GatewayConfig::default();
    config.server.allowed_origins = vec!["https://*.example.org".into()];
    let (state, _registry) = setup(config);
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let missing = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let wrong = upgrade_request("/webirc", "203.0.113.7")
        .insert_header(("origin", "https://evil.com"))
        .to_request();
    assert_eq!(test::call_service(&app, wrong).await.status(), StatusCode::FORBIDDEN);

    let allowed = upgrade_request("/webirc", "203.0.113.7")
        .insert_header(("origin", "https://chat.example.org"))
        .to_request();
    assert_eq!(test::call_service(&app, allowed).await.status(), StatusCode::SWITCHING_PROTOCOLS);
}

#[actix_web::test]
async fn test_per_ip_limit_returns_429() {
    let mut config = GatewayConfig::default();
    config.limits.max_connections_per_ip = 2;
    let (state, _registry) = setup(config);
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    // Responses own the session actors; keep them alive to hold the slots
    let first = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    let second = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    assert_eq!(first.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(second.status(), StatusCode::SWITCHING_PROTOCOLS);

    let third = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = test::call_service(&app, upgrade_request("/webirc", "203.0.113.8").to_request()).await;
    assert_eq!(other.status(), StatusCode::SWITCHING_PROTOCOLS);
}

#[actix_web::test]
async fn test_global_limit_returns_503() {
    let mut config = GatewayConfig::default();
    config.limits.max_clients = 1;
    let (state, _registry) = setup(config);
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let first = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    assert_eq!(first.status(), StatusCode::SWITCHING_PROTOCOLS);

    let second = test::call_service(&app, upgrade_request("/webirc", "203.0.113.8").to_request()).await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[actix_web::test]
async fn test_forwarded_for_only_when_trusted() {
    let mut config = GatewayConfig::default();
    config.limits.max_connections_per_ip = 1;
    let (state, _registry) = setup(config.clone());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let first = upgrade_request("/webirc", "10.0.0.1")
        .insert_header(("x-forwarded-for", "203.0.113.1"))
        .to_request();
    let first = test::call_service(&app, first).await;
    assert_eq!(first.status(), StatusCode::SWITCHING_PROTOCOLS);

    // Spoofed header is ignored, so both count against the proxy address
    let second = upgrade_request("/webirc", "10.0.0.1")
        .insert_header(("x-forwarded-for", "203.0.113.2"))
        .to_request();
    assert_eq!(test::call_service(&app, second).await.status(), StatusCode::TOO_MANY_REQUESTS);

    config.server.trust_proxy = true;
    let (state, _registry) = setup(config);
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let first = upgrade_request("/webirc", "10.0.0.1")
        .insert_header(("x-forwarded-for", "203.0.113.1"))
        .to_request();
    let first = test::call_service(&app, first).await;
    let second = upgrade_request("/webirc", "10.0.0.1")
        .insert_header(("x-forwarded-for", "203.0.113.2, 10.0.0.1"))
        .to_request();
    let second = test::call_service(&app, second).await;
    assert_eq!(first.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(second.status(), StatusCode::SWITCHING_PROTOCOLS);
}

#[actix_web::test]
async fn test_query_target_is_vetted() {
    let (state, registry) = setup(GatewayConfig::default());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let private = upgrade_request("/webirc?host=127.0.0.1&port=6667", "203.0.113.7").to_request();
    assert_eq!(test::call_service(&app, private).await.status(), StatusCode::FORBIDDEN);

    let malformed = upgrade_request("/webirc?host=irc.example.org&port=high", "203.0.113.7").to_request();
    assert_eq!(test::call_service(&app, malformed).await.status(), StatusCode::BAD_REQUEST);

    assert_eq!(registry.send(GetStats).await.unwrap().sessions, 0);

    let public = upgrade_request("/webirc?host=irc.example.org&tls=true", "203.0.113.7").to_request();
    assert_eq!(test::call_service(&app, public).await.status(), StatusCode::SWITCHING_PROTOCOLS);
}

#[actix_web::test]
async fn test_failed_handshake_releases_slot() {
    let mut config = GatewayConfig::default();
    config.limits.max_connections_per_ip = 1;
    let (state, registry) = setup(config);
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    // Plain GET without upgrade headers passes admission but fails the handshake
    let plain = test::TestRequest::get()
        .uri("/webirc")
        .peer_addr("203.0.113.7:50000".parse().unwrap())
        .to_request();
    assert_eq!(test::call_service(&app, plain).await.status(), StatusCode::BAD_REQUEST);

    assert_eq!(registry.send(GetStats).await.unwrap().sessions, 0);
    let resp = test::call_service(&app, upgrade_request("/webirc", "203.0.113.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
}
