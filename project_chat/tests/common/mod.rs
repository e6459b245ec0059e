#![allow(dead_code)]

use project_chat::{
    api::{build_router, AppState},
    auth::{self, Actor, Role},
    config::{Config, JwtSecret},
};
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const SECRET: &str = "test-secret";

pub struct TestServer {
    pub addr: SocketAddr,
    pub server: JoinHandle<()>,
    pub state: AppState,
    pub client: reqwest::Client,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
        jwt_secret: Some(JwtSecret::new(SECRET)),
        token_ttl_hours: 1,
        page_size: 50,
        max_page_size: 200,
        typing_window: Duration::from_secs(5),
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    TestServer {
        addr,
        server,
        state,
        client: reqwest::Client::new(),
        _tmp: tmp,
    }
}

/// A fresh user with a valid bearer token.
pub fn user(role: Role) -> (Actor, String) {
    let actor = Actor {
        id: Uuid::new_v4(),
        role,
    };
    let token = auth::issue_jwt(SECRET.as_bytes(), &actor, time::Duration::hours(1)).unwrap();
    (actor, token)
}

pub async fn create_project(srv: &TestServer, token: &str, title: &str) -> Uuid {
    let resp = srv
        .client
        .post(srv.url("/api/projects"))
        .bearer_auth(token)
        .json(&serde_json::json!({ "title": title }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().parse().unwrap()
}
