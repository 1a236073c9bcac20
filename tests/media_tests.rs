//! Tests for media upload, listing, download and groups.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{TestApp, authed, authed_json, test_app, test_app_with, upload_request};
use mediavault::session::SessionSettings;
use mediavault::upload::UploadLimits;
use serde_json::{Value, json};
use uuid::Uuid;

async fn user_id_of(t: &TestApp, token: &str) -> Uuid {
    let (status, user) = t.send_json(authed("GET", "/user", token)).await;
    assert_eq!(status, StatusCode::OK);
    Uuid::parse_str(user["id"].as_str().unwrap()).unwrap()
}

async fn list_media(t: &TestApp, token: &str) -> Vec<Value> {
    let (status, body) = t.send_json(authed("GET", "/media", token)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body.as_array().unwrap().clone()
}

async fn download(t: &TestApp, token: &str, id: &str) -> (StatusCode, Vec<u8>) {
    let response = t
        .send(authed("GET", &format!("/media/{}/download", id), token))
        .await;
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn stored_files(t: &TestApp, owner: Uuid) -> usize {
    match std::fs::read_dir(t.upload_dir.path().join(owner.to_string())) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_upload_and_download() {
    let t = test_app().await;
    let token = t.signed_in("dana@example.com").await;

    let (status, body) = t
        .send_json(upload_request(&token, &[("notes.txt", &b"hello vault"[..])]))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Saved all files successfully!");

    let media = list_media(&t, &token).await;
    assert_eq!(media.len(), 1);
    assert_eq!(media[0]["size"], 11);
    assert_eq!(media[0]["file_type"], "text/plain");
    assert!(media[0]["group_id"].is_null());

    let id = media[0]["id"].as_str().unwrap();
    let response = t
        .send(authed("GET", &format!("/media/{}/download", id), &token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello vault");
}

#[tokio::test]
async fn test_oversized_file_is_partial_success() {
    let limits = UploadLimits {
        max_files: 20,
        max_file_bytes: 16,
    };
    let t = test_app_with(limits, SessionSettings::default()).await;
    let token = t.signed_in("dana@example.com").await;

    let big = [b'x'; 64];
    let files: Vec<(&str, &[u8])> = vec![
        ("1.bin", &b"one"[..]),
        ("2.bin", &b"two"[..]),
        ("3.bin", &big[..]),
        ("4.bin", &b"four"[..]),
        ("5.bin", &b"five"[..]),
    ];

    let (status, body) = t.send_json(upload_request(&token, &files)).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT, "{}", body);
    assert_eq!(body["message"], "Some files failed to upload");
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("3.bin"));

    let media = list_media(&t, &token).await;
    assert_eq!(media.len(), 4);

    for item in &media {
        let filename = item["filename"].as_str().unwrap();
        let (_, expected) = files
            .iter()
            .find(|(name, _)| filename.ends_with(name))
            .unwrap();
        let (status, bytes) = download(&t, &token, item["id"].as_str().unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[..], *expected);
    }

    let owner = user_id_of(&t, &token).await;
    assert_eq!(stored_files(&t, owner), 4);
}

#[tokio::test]
async fn test_large_upload_streams_to_disk() {
    let limits = UploadLimits {
        max_files: 2,
        max_file_bytes: 1 << 20,
    };
    let t = test_app_with(limits, SessionSettings::default()).await;
    let token = t.signed_in("dana@example.com").await;

    let data: Vec<u8> = (0..(512 * 1024)).map(|i| (i % 251) as u8).collect();
    let too_big = vec![7u8; (1 << 20) + 1];
    let (status, body) = t
        .send_json(upload_request(
            &token,
            &[("big.bin", &data[..]), ("huge.bin", &too_big[..])],
        ))
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT, "{}", body);
    assert!(body["errors"][0].as_str().unwrap().contains("huge.bin"));

    let media = list_media(&t, &token).await;
    assert_eq!(media.len(), 1);
    assert_eq!(media[0]["size"], data.len());
    let (status, bytes) = download(&t, &token, media[0]["id"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, data);

    // Only the committed file is left behind; nothing staged remains.
    let owner = user_id_of(&t, &token).await;
    let names: Vec<String> = std::fs::read_dir(t.upload_dir.path().join(owner.to_string()))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("_big.bin"));
}

#[tokio::test]
async fn test_too_many_files_saves_nothing() {
    let t = test_app().await;
    let token = t.signed_in("dana@example.com").await;

    let names: Vec<String> = (0..21).map(|i| format!("{}.txt", i)).collect();
    let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();

    let (status, body) = t.send_json(upload_request(&token, &files)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("too many files"));

    assert!(list_media(&t, &token).await.is_empty());
    let owner = user_id_of(&t, &token).await;
    assert_eq!(stored_files(&t, owner), 0);
}

#[tokio::test]
async fn test_upload_requires_auth() {
    let t = test_app().await;
    let (content_type, body) = common::multipart_body(&[("a.txt", &b"a"[..])]);

    let (status, _) = t
        .send_json(
            Request::post("/media/upload")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_is_owner_only() {
    let t = test_app().await;
    let owner = t.signed_in("owner@example.com").await;
    let other = t.signed_in("other@example.com").await;

    t.send_json(upload_request(&owner, &[("secret.txt", &b"secret"[..])]))
        .await;
    let media = list_media(&t, &owner).await;
    let id = media[0]["id"].as_str().unwrap();

    let (status, body) = t
        .send_json(authed("GET", &format!("/media/{}/download", id), &other))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");

    assert!(list_media(&t, &other).await.is_empty());

    let (status, _) = t
        .send_json(authed(
            "GET",
            &format!("/media/{}/download", Uuid::new_v4()),
            &owner,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .send_json(authed("GET", "/media/not-a-uuid/download", &owner))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_groups_and_assignment() {
    let t = test_app().await;
    let token = t.signed_in("dana@example.com").await;

    let (status, group) = t
        .send_json(authed_json(
            "POST",
            "/groups",
            &token,
            json!({ "name": "Holiday" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", group);
    assert_eq!(group["name"], "Holiday");
    assert!(group["created_at"].is_string());
    let group_id = group["id"].as_str().unwrap().to_string();

    let (status, groups) = t.send_json(authed("GET", "/groups", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups.as_array().unwrap().len(), 1);

    t.send_json(upload_request(
        &token,
        &[("a.png", &b"png-bytes"[..]), ("b.txt", &b"text"[..])],
    ))
    .await;
    let media = list_media(&t, &token).await;
    assert_eq!(media.len(), 2);
    let media_id = media[0]["id"].as_str().unwrap().to_string();

    let (status, body) = t
        .send_json(authed(
            "PATCH",
            &format!("/media/{}/group/{}", media_id, group_id),
            &token,
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Assign media to a group successfully.");

    let (status, grouped) = t
        .send_json(authed(
            "GET",
            &format!("/media?group_id={}", group_id),
            &token,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let grouped = grouped.as_array().unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0]["id"], media_id.as_str());
    assert_eq!(grouped[0]["group_id"], group_id.as_str());
}

#[tokio::test]
async fn test_cannot_assign_to_foreign_group() {
    let t = test_app().await;
    let owner = t.signed_in("owner@example.com").await;
    let other = t.signed_in("other@example.com").await;

    let (_, group) = t
        .send_json(authed_json(
            "POST",
            "/groups",
            &other,
            json!({ "name": "Theirs" }),
        ))
        .await;

    t.send_json(upload_request(&owner, &[("a.txt", &b"a"[..])])).await;
    let media = list_media(&t, &owner).await;

    let (status, _) = t
        .send_json(authed(
            "PATCH",
            &format!(
                "/media/{}/group/{}",
                media[0]["id"].as_str().unwrap(),
                group["id"].as_str().unwrap()
            ),
            &owner,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send_json(authed(
            "PATCH",
            &format!(
                "/media/{}/group/{}",
                media[0]["id"].as_str().unwrap(),
                Uuid::new_v4()
            ),
            &owner,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_group_name_validation() {
    let t = test_app().await;
    let token = t.signed_in("dana@example.com").await;

    let (status, _) = t
        .send_json(authed_json("POST", "/groups", &token, json!({ "name": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
