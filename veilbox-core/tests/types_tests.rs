use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use veilbox_core::{FileNode, LinkKeyPolicy, LinkShare, ShareGrant};
use veilbox_crypto::KdfParams;

fn sample_node() -> FileNode {
    FileNode {
        id: "f1".into(),
        is_directory: false,
        encrypted_name: vec![1, 2, 3],
        encrypted_mime_type: Some(vec![4, 5]),
        encrypted_key: "c2VhbGVk".into(),
        nonce: vec![0; 12],
        parent_id: Some("d1".into()),
        owner_id: "alice".into(),
        uploader_id: "bob".into(),
        size: Some(26),
    }
}

// --- FileNode ---

#[test]
fn file_node_wire_shape() {
    let value = serde_json::to_value(sample_node()).unwrap();
    assert_eq!(
        value,
        json!({
            "id": "f1",
            "isDirectory": false,
            "encryptedFileName": "AQID",
            "encryptedMimeType": "BAU=",
            "encryptedKey": "c2VhbGVk",
            "nonce": "AAAAAAAAAAAAAAAA",
            "parentId": "d1",
            "ownerId": "alice",
            "uploaderId": "bob",
            "size": 26
        })
    );
}

#[test]
fn file_node_without_mime_omits_field() {
    let node = FileNode {
        encrypted_mime_type: None,
        ..sample_node()
    };
    let value = serde_json::to_value(&node).unwrap();
    assert!(value.get("encryptedMimeType").is_none());

    let back: FileNode = serde_json::from_value(value).unwrap();
    assert_eq!(back, node);
}

#[test]
fn file_node_rejects_bad_base64() {
    let mut value = serde_json::to_value(sample_node()).unwrap();
    value["nonce"] = json!("not base64!");
    assert!(serde_json::from_value::<FileNode>(value).is_err());
}

#[test]
fn fingerprint_tracks_nonce_and_wrapping() {
    let node = sample_node();
    let renamed = FileNode {
        parent_id: None,
        ..sample_node()
    };
    let re_nonced = FileNode {
        nonce: vec![1; 12],
        ..sample_node()
    };
    let rewrapped = FileNode {
        encrypted_key: "b3RoZXI=".into(),
        ..sample_node()
    };

    assert_eq!(node.fingerprint(), renamed.fingerprint());
    assert_ne!(node.fingerprint(), re_nonced.fingerprint());
    assert_ne!(node.fingerprint(), rewrapped.fingerprint());
    assert_eq!(node.fingerprint().len(), 64);
}

// --- ShareGrant ---

#[test]
fn share_grant_wire_shape() {
    let grant = ShareGrant {
        file_id: "f1".into(),
        user_id: "u".into(),
        encrypted_key: "envelope".into(),
        edit_permission: false,
    };
    assert_eq!(
        serde_json::to_value(&grant).unwrap(),
        json!({
            "fileId": "f1",
            "userId": "u",
            "encryptedKey": "envelope",
            "editPermission": false
        })
    );
}

// --- LinkShare ---

fn link(expires_at: Option<chrono::DateTime<Utc>>) -> LinkShare {
    LinkShare {
        link_id: "l1".into(),
        file_id: "f1".into(),
        wrapped_key: "wrapped".into(),
        password_protected: true,
        salt: Some(vec![9; 16]),
        kdf: Some(KdfParams::fast_for_tests()),
        key_derivation: LinkKeyPolicy::Hkdf,
        expires_at,
    }
}

#[test]
fn link_share_wire_shape() {
    let expires = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
    let value = serde_json::to_value(link(Some(expires))).unwrap();
    assert_eq!(
        value,
        json!({
            "linkId": "l1",
            "fileId": "f1",
            "wrappedKey": "wrapped",
            "passwordProtected": true,
            "salt": "CQkJCQkJCQkJCQkJCQkJCQ==",
            "kdf": { "memoryKib": 1024, "iterations": 1, "parallelism": 1 },
            "keyDerivation": "hkdf",
            "expiresAt": "2030-01-02T03:04:05Z"
        })
    );
}

#[test]
fn link_expiry_is_strictly_after() {
    let now = Utc::now();
    assert!(!link(None).is_expired_at(now));
    assert!(!link(Some(now)).is_expired_at(now));
    assert!(link(Some(now - Duration::seconds(1))).is_expired_at(now));
    assert!(!link(Some(now + Duration::seconds(1))).is_expired_at(now));
}
