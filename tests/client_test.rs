//! Gateway client tests against a mock HTTP server.

use chrono::{TimeZone, Utc};
use clouddrive_fuse::client::{DriveClient, DriveItem, DriveService, ItemKind};
use clouddrive_fuse::error::{DriveError, FsError};
use mockito::{Matcher, Server};
use serde_json::json;

fn folder(id: &str) -> DriveItem {
    DriveItem {
        id: id.to_string(),
        name: String::new(),
        kind: Some(ItemKind::Folder),
        size: None,
        modified: None,
        listable: true,
    }
}

fn file(id: &str) -> DriveItem {
    DriveItem {
        id: id.to_string(),
        name: "a.txt".to_string(),
        kind: Some(ItemKind::File),
        size: Some(5),
        modified: None,
        listable: false,
    }
}

#[test]
fn test_404_maps_to_not_found() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/download")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "no such item"}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let err = client.download(&file("FILE::1")).unwrap_err();

    assert!(matches!(err, DriveError::NotFound(_)));
    assert_eq!(err.to_errno(), libc::ENOENT);
    assert_eq!(FsError::from(err), FsError::NotFound);
}

#[test]
fn test_429_maps_to_ebusy() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/children")
        .with_status(429)
        .with_header("retry-after", "60")
        .with_body(r#"{"error": "Rate limit exceeded"}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let err = client.children(&folder("FOLDER::root")).unwrap_err();

    assert!(matches!(err, DriveError::RateLimited));
    assert_eq!(err.to_errno(), libc::EBUSY);
}

#[test]
fn test_500_maps_to_eio() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/root")
        .with_status(500)
        .with_body("Internal Server Error")
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let err = client.root().unwrap_err();

    match &err {
        DriveError::ServerError { status, message } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("expected ServerError, got {:?}", other),
    }
    assert_eq!(err.to_errno(), libc::EIO);
    assert!(matches!(FsError::from(err), FsError::Io(_)));
}

#[test]
fn test_rpc_not_found_message_maps_to_not_found() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/delete")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "Item not found"}}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let err = client.delete(&file("FILE::gone")).unwrap_err();

    assert!(err.is_not_found());
}

#[test]
fn test_other_rpc_error_is_invalid_response() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/mkdir")
        .with_status(200)
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "bad params"}}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let err = client.create_folder(&folder("FOLDER::root"), "x").unwrap_err();

    assert!(matches!(err, DriveError::InvalidResponse(_)));
    assert_eq!(err.to_errno(), libc::EPROTO);
}

#[test]
fn test_malformed_json_is_protocol_error() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/root")
        .with_status(200)
        .with_body("not json")
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let err = client.root().unwrap_err();

    assert!(matches!(err, DriveError::JsonError(_)));
    assert_eq!(err.to_errno(), libc::EPROTO);
}

#[test]
fn test_connection_refused() {
    // Nothing listens on port 1
    let client = DriveClient::new("http://localhost:1", "test-token").unwrap();
    let err = client.root().unwrap_err();

    assert_eq!(err.to_errno(), libc::ECONNREFUSED);
    assert!(matches!(FsError::from(err), FsError::Io(_)));
}

#[test]
fn test_children_are_parsed() {
    let mut server = Server::new();

    let m = server
        .mock("POST", "/api/drive/children")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "method": "children",
            "params": {"id": "FOLDER::root"}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "items": [
                        {"drivewsid": "FOLDER::docs", "name": "docs", "type": "FOLDER", "hasChildren": true},
                        {"docwsid": "FILE::1", "name": "a.txt", "type": "FILE", "size": 12,
                         "dateModified": "2024-03-01T10:20:30Z"},
                        {"id": "APP::pages", "name": "Pages", "type": "APP_LIBRARY"}
                    ]
                }
            })
            .to_string(),
        )
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let items = client.children(&folder("FOLDER::root")).unwrap();
    m.assert();

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].id, "FOLDER::docs");
    assert!(items[0].is_folder());

    assert_eq!(items[1].name, "a.txt");
    assert_eq!(items[1].kind, Some(ItemKind::File));
    assert_eq!(items[1].size, Some(12));
    assert_eq!(
        items[1].modified,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap())
    );

    assert_eq!(items[2].path_type(), ItemKind::Folder);
}

#[test]
fn test_child_picks_first_exact_match() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/children")
        .with_status(200)
        .with_body(
            json!({
                "result": {
                    "items": [
                        {"id": "FILE::lower", "name": "notes", "type": "FILE"},
                        {"id": "FILE::upper", "name": "Notes", "type": "FILE"},
                        {"id": "FILE::dup", "name": "Notes", "type": "FILE"}
                    ]
                }
            })
            .to_string(),
        )
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let found = client.child(&folder("FOLDER::root"), "Notes").unwrap().unwrap();
    assert_eq!(found.id, "FILE::upper");
}

#[test]
fn test_download_decodes_base64() {
    let mut server = Server::new();

    let _m = server
        .mock("POST", "/api/drive/download")
        .match_body(Matcher::PartialJson(json!({"params": {"id": "FILE::1"}})))
        .with_status(200)
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "result": {"__type__": "bytes", "data": "aGVsbG8="}}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    assert_eq!(client.download(&file("FILE::1")).unwrap(), b"hello");
}

#[test]
fn test_upload_sends_base64_content() {
    let mut server = Server::new();

    let m = server
        .mock("POST", "/api/drive/upload")
        .match_body(Matcher::PartialJson(json!({
            "method": "upload",
            "params": {
                "parent_id": "FOLDER::docs",
                "name": "a.txt",
                "content": {"__type__": "bytes", "data": "aGVsbG8="}
            }
        })))
        .with_status(200)
        .with_body(r#"{"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    client.upload(&folder("FOLDER::docs"), "a.txt", b"hello").unwrap();
    m.assert();
}

#[test]
fn test_session_is_parsed() {
    let mut server = Server::new();

    let m = server
        .mock("GET", "/api/auth/session")
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(r#"{"apple_id": "someone@example.com", "trusted": true}"#)
        .create();

    let client = DriveClient::new(&server.url(), "test-token").unwrap();
    let session = client.session().unwrap();
    m.assert();

    assert_eq!(session.account.as_deref(), Some("someone@example.com"));
    assert!(session.trusted);
}

#[test]
fn test_expired_session_is_an_error() {
    let mut server = Server::new();

    let _m = server
        .mock("GET", "/api/auth/session")
        .with_status(401)
        .with_body("session expired")
        .create();

    let client = DriveClient::new(&server.url(), "stale").unwrap();
    let err = client.session().unwrap_err();
    assert!(matches!(err, DriveError::ServerError { status: 401, .. }));
}
