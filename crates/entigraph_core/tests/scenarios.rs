//! End-to-end behavior of sessions, save cycles and persistence.

use entigraph_codec::{LocalId, Number, Operation, Pointer, Value};
use entigraph_core::{CoreError, PointerMode, ServerPayload, Session};
use entigraph_storage::FileBlobStore;
use entigraph_testkit::generators::wire_value_strategy;
use proptest::prelude::*;
use serde_json::json;
use std::thread;
use tempfile::tempdir;

#[test]
fn first_save_assigns_server_id() {
    let session = Session::new();
    let game = session.create("games");
    game.write().set("losingScore", 140i64).unwrap();

    let flush = game.write().flush();
    assert_eq!(
        flush.operations().get("losingScore"),
        Some(&Operation::Set(Value::from(140i64)))
    );

    game.mark_saved(&flush, "abc123", ServerPayload::new(), session.resolver())
        .unwrap();
    let game = game.read();
    assert_eq!(game.object_id(), Some("abc123"));
    assert!(game.local_id().is_none());
    assert!(game.operations().is_empty());
}

#[test]
fn unsaved_reference_needs_lenient_pointers() {
    let session = Session::new();
    let player = session.create("Player");
    let pointer = Value::from(player.pointer());

    let err = session.encode(&pointer, PointerMode::Strict).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Codec(entigraph_codec::CodecError::UnsavedReference { .. })
    ));

    let json = session.encode(&pointer, PointerMode::Lenient).unwrap();
    let local = json["localId"].as_str().unwrap();
    let hex = local.strip_prefix(LocalId::PREFIX).unwrap();
    assert!(!hex.is_empty());
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn cached_local_pointer_decodes_to_server_id_after_promotion() {
    let session = Session::new();
    let player = session.create("Player");
    let encoded = session
        .encode(&Value::from(player.pointer()), PointerMode::Lenient)
        .unwrap();

    let (flush, _) = session.begin_save(&player, PointerMode::Strict).unwrap();
    session
        .complete_save(&player, &flush, &json!({"objectId": "p1"}))
        .unwrap();

    let decoded = session.decode(&encoded).unwrap();
    assert_eq!(decoded.as_pointer(), Some(&Pointer::saved("Player", "p1")));
    assert!(session
        .entity_for(&Pointer::saved("Player", "p1"))
        .is_some_and(|n| n.ptr_eq(&player)));
}

#[test]
fn concurrent_mutations_land_in_exactly_one_flush() {
    const WRITERS: usize = 4;
    const PER_WRITER: i64 = 250;

    let session = Session::new();
    let node = session.stub("Counter", "c1");

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let node = node.clone();
            thread::spawn(move || {
                for _ in 0..PER_WRITER {
                    node.write().increment("hits", 1i64).unwrap();
                }
            })
        })
        .collect();

    let flusher = {
        let node = node.clone();
        thread::spawn(move || {
            let mut flushes = Vec::new();
            for _ in 0..50 {
                flushes.push(node.write().flush());
                thread::yield_now();
            }
            flushes
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    let mut flushes = flusher.join().unwrap();
    flushes.push(node.write().flush());

    let total: i64 = flushes
        .iter()
        .filter_map(|f| match f.operations().get("hits") {
            Some(Operation::Increment(Number::Int(n))) => Some(*n),
            Some(other) => panic!("unexpected operation {other:?}"),
            None => None,
        })
        .sum();
    assert_eq!(total, WRITERS as i64 * PER_WRITER);
    assert!(node.read().operations().is_empty());
    assert_eq!(node.read().get_i64("hits"), Some(total));
}

#[test]
fn overlapping_saves_keep_newer_mutations_pending() {
    let session = Session::new();
    let node = session.stub("Game", "g1");
    node.write().set("name", "first").unwrap();
    let (flush, body) = session.begin_save(&node, PointerMode::Strict).unwrap();
    assert_eq!(body, json!({"name": "first"}));

    node.write().increment("score", 2i64).unwrap();
    session
        .complete_save(&node, &flush, &json!({"updatedAt": "2020-01-01T00:00:00.000Z"}))
        .unwrap();

    let entity = node.read();
    assert_eq!(entity.persisted().get("name"), Some(&Value::from("first")));
    assert!(entity.is_dirty_field("score"));
    assert!(!entity.is_dirty_field("name"));
}

#[test]
fn older_response_does_not_drop_accepted_fields() {
    let session = Session::new();
    let node = session.stub("Game", "g1");
    node.write().set("n", 1i64).unwrap();
    let (first, _) = session.begin_save(&node, PointerMode::Strict).unwrap();
    session
        .complete_save(&node, &first, &json!({"updatedAt": "2020-01-01T00:00:00.000Z"}))
        .unwrap();

    node.write().increment("n", 5i64).unwrap();
    node.write().set("other", "x").unwrap();
    let (older, _) = session.begin_save(&node, PointerMode::Strict).unwrap();
    node.write().set("n", "s").unwrap();
    let (newer, _) = session.begin_save(&node, PointerMode::Strict).unwrap();

    session
        .complete_save(&node, &newer, &json!({"updatedAt": "2020-01-03T00:00:00.000Z"}))
        .unwrap();
    session
        .complete_save(&node, &older, &json!({"updatedAt": "2020-01-02T00:00:00.000Z"}))
        .unwrap();

    let entity = node.read();
    assert_eq!(entity.get("n"), Some(Value::from("s")));
    assert_eq!(entity.get("other"), Some(Value::from("x")));
    assert!(!entity.is_dirty());
    assert!(!entity.has_save_in_flight());
}

#[test]
fn entity_survives_directory_store() {
    let dir = tempdir().unwrap();
    let store = FileBlobStore::open(dir.path()).unwrap();

    let session = Session::new();
    let owner = session.stub("Player", "p1");
    let game = session
        .hydrate(
            "Game",
            &json!({
                "objectId": "g1",
                "createdAt": "2015-07-14T15:55:52.133Z",
                "owner": {"__type": "Pointer", "className": "Player", "objectId": "p1"},
                "tags": ["a", "b"],
                "at": {"__type": "Date", "iso": "2016-01-01T00:00:00.000Z"}
            }),
        )
        .unwrap();
    assert!(session
        .entity_for(&game.read().get_pointer("owner").unwrap())
        .is_some_and(|n| n.ptr_eq(&owner)));
    session.save_to_store(&store, "current_game", &game).unwrap();

    let reopened = FileBlobStore::open(dir.path()).unwrap();
    let fresh = Session::new();
    let loaded = fresh
        .load_from_store(&reopened, "current_game")
        .unwrap()
        .unwrap();
    let loaded = loaded.read();
    assert_eq!(loaded.object_id(), Some("g1"));
    assert_eq!(loaded.get_pointer("owner"), Some(Pointer::saved("Player", "p1")));
    assert_eq!(
        loaded.get_list("tags"),
        Some(vec![Value::from("a"), Value::from("b")])
    );
    assert_eq!(loaded.created_at(), game.read().created_at());
    assert!(fresh.find("Player", "p1").is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stored_values_round_trip(value in wire_value_strategy()) {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let session = Session::new();
        session.save_json_to_store(&store, "value", &value).unwrap();
        let loaded = session.load_json_from_store(&store, "value").unwrap();
        prop_assert_eq!(loaded, Some(value));
    }
}
