mod common;

use comm_log::LogStore;
use common::{create_project, spawn_server, user};
use project_chat::auth::Role;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn project_lifecycle_records_status_updates() {
    let srv = spawn_server().await;
    let (client, client_token) = user(Role::Client);
    let (dev, dev_token) = user(Role::Developer);
    let (_, admin_token) = user(Role::Admin);

    let id = create_project(&srv, &client_token, "  Garden irrigation  ").await;
    let project: Value = srv
        .client
        .get(srv.url(&format!("/api/projects/{id}")))
        .bearer_auth(&client_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(project["title"], "Garden irrigation");
    assert_eq!(project["status"], "draft");
    assert_eq!(project["owner_id"], client.id.to_string());

    // only admins assign
    let resp = srv
        .client
        .put(srv.url(&format!("/api/projects/{id}/developer")))
        .bearer_auth(&client_token)
        .json(&json!({ "developer_id": dev.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let project: Value = srv
        .client
        .put(srv.url(&format!("/api/projects/{id}/developer")))
        .bearer_auth(&admin_token)
        .json(&json!({ "developer_id": dev.id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(project["status"], "in-development");
    assert_eq!(project["assigned_developer_id"], dev.id.to_string());

    let resp = srv
        .client
        .put(srv.url(&format!("/api/projects/{id}/status")))
        .bearer_auth(&dev_token)
        .json(&json!({ "status": "testing", "notes": "staging is up" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // the log holds the three status updates but no messages
    let summary = srv.state.logs.summarize(&id).unwrap();
    assert!(summary.last_message.is_none());
    assert_eq!(summary.total_message_count, 0);
    let conn = srv.state.pool.get().unwrap();
    let mut stmt = conn
        .prepare("SELECT content FROM events WHERE project_id = ?1 ORDER BY seq")
        .unwrap();
    let contents: Vec<String> = stmt
        .query_map([id.to_string()], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        contents,
        vec![
            "Project created successfully".to_string(),
            format!("Project assigned to developer {}", dev.id),
            "Status updated to testing: staging is up".to_string(),
        ]
    );
}

#[tokio::test]
async fn status_changes_are_restricted() {
    let srv = spawn_server().await;
    let (_, client_token) = user(Role::Client);
    let (_, other_dev_token) = user(Role::Developer);
    let (_, admin_token) = user(Role::Admin);
    let id = create_project(&srv, &client_token, "Kiosk app").await;
    let url = srv.url(&format!("/api/projects/{id}/status"));

    let resp = srv
        .client
        .put(&url)
        .bearer_auth(&client_token)
        .json(&json!({ "status": "testing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = srv
        .client
        .put(&url)
        .bearer_auth(&other_dev_token)
        .json(&json!({ "status": "testing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = srv
        .client
        .put(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "status": "shipped" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_status");

    let resp = srv
        .client
        .put(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "status": "cancelled" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn title_is_validated() {
    let srv = spawn_server().await;
    let (_, token) = user(Role::Client);
    for title in ["   ".to_string(), "x".repeat(101)] {
        let resp = srv
            .client
            .post(srv.url("/api/projects"))
            .bearer_auth(&token)
            .json(&json!({ "title": title }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "invalid_title");
    }
}

#[tokio::test]
async fn strangers_cannot_see_projects() {
    let srv = spawn_server().await;
    let (_, owner_token) = user(Role::Client);
    let (_, stranger_token) = user(Role::Client);
    let (_, admin_token) = user(Role::Admin);
    let id = create_project(&srv, &owner_token, "Private").await;

    let resp = srv
        .client
        .get(srv.url(&format!("/api/projects/{id}")))
        .bearer_auth(&stranger_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = srv
        .client
        .get(srv.url(&format!("/api/projects/{id}")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn owners_list_their_projects() {
    let srv = spawn_server().await;
    let (_, owner_token) = user(Role::Client);
    let (_, other_token) = user(Role::Client);
    let (_, admin_token) = user(Role::Admin);
    let mut ids = Vec::new();
    for title in ["Alpha", "Beta", "Gamma"] {
        ids.push(create_project(&srv, &owner_token, title).await);
    }
    create_project(&srv, &other_token, "Someone else's").await;
    let resp = srv
        .client
        .put(srv.url(&format!("/api/projects/{}/status", ids[1])))
        .bearer_auth(&admin_token)
        .json(&json!({ "status": "prototype" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let list = |query: &'static str| {
        let req = srv
            .client
            .get(srv.url(&format!("/api/projects{query}")))
            .bearer_auth(&owner_token);
        async move {
            let resp = req.send().await.unwrap();
            let status = resp.status();
            (status, resp.json::<Value>().await.unwrap())
        }
    };

    let (status, first) = list("?page=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["projects"].as_array().unwrap().len(), 2);
    assert_eq!(first["pagination"], json!({ "current": 1, "pages": 2, "total": 3 }));
    let (_, second) = list("?page=2&limit=2").await;
    assert_eq!(second["projects"].as_array().unwrap().len(), 1);

    let (_, prototypes) = list("?status=prototype").await;
    let projects = prototypes["projects"].as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["id"], ids[1].to_string());
    assert_eq!(prototypes["pagination"]["total"], 1);

    let (status, body) = list("?status=shipped").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_status");

    let (_, empty) = list("?status=deployed").await;
    assert_eq!(empty["pagination"], json!({ "current": 1, "pages": 0, "total": 0 }));
}
