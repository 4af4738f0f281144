use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use chat_protocol::{
    is_cancelled, new_cancel_signal, AuditEntry, ChatMessage, ErrorKind, MessageId,
    MessageOutcome, StreamEvent, TokenUsage, ToolCall,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use session_store::{
    read_export, SessionActivity, SessionClaim, SessionStore, SessionStoreError, SnapshotSink,
    EXPORT_VERSION,
};
use tempfile::TempDir;

fn user(store: &SessionStore, text: &str) -> ChatMessage {
    ChatMessage::user(store.next_message_id(), text, 1_000)
}

fn completed_assistant(store: &SessionStore, text: &str, session_id: &str) -> ChatMessage {
    let mut message = ChatMessage::assistant_placeholder(store.next_message_id(), 2_000, None);
    message.streaming = false;
    message.content = text.to_string();
    message.session_id = Some(session_id.to_string());
    message.usage = Some(TokenUsage::new(10, 20, 0));
    message.outcome = Some(MessageOutcome::Completed);
    message
}

fn write_lines(lines: &[String]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("export.jsonl");
    let mut file = File::create(&path).expect("export file should be created");
    for line in lines {
        writeln!(file, "{line}").expect("line should be written");
    }
    (dir, path)
}

fn header_line(version: u32, exported_at: &str) -> String {
    json!({
        "type": "session",
        "version": version,
        "export_id": "e1",
        "session_key": "webchat:main",
        "exported_at": exported_at,
        "message_count": 0,
    })
    .to_string()
}

#[derive(Default)]
struct RecordingSink {
    snapshots: Mutex<Vec<(String, Vec<String>)>>,
}

impl SnapshotSink for RecordingSink {
    fn publish(&self, session_key: &str, transcript: &[ChatMessage]) {
        let contents = transcript
            .iter()
            .map(|message| message.content.clone())
            .collect();
        self.snapshots
            .lock()
            .expect("sink lock")
            .push((session_key.to_string(), contents));
    }
}

#[test]
fn removing_one_session_leaves_others_untouched() {
    let store = SessionStore::with_sessions(["a", "b"]).expect("store should build");
    for text in ["one", "two", "three"] {
        let message = user(&store, text);
        store.append_or_replace("b", message).expect("append to b");
    }
    let message = user(&store, "only a");
    store.append_or_replace("a", message).expect("append to a");

    store.remove_session("a").expect("a should be removable");

    assert!(!store.contains("a"));
    assert_eq!(store.transcript("b").expect("b transcript").len(), 3);
    assert_eq!(store.metadata("b").expect("b metadata").message_count, 3);
    assert_eq!(store.active_key().as_deref(), Some("b"));
}

#[test]
fn create_session_is_idempotent() {
    let store = SessionStore::new();
    assert!(store.create_session("webchat:main").expect("first create"));
    let message = user(&store, "keep me");
    store
        .append_or_replace("webchat:main", message)
        .expect("append");

    assert!(!store.create_session("webchat:main").expect("second create"));
    assert_eq!(store.session_keys(), vec!["webchat:main".to_string()]);
    assert_eq!(
        store.metadata("webchat:main").expect("metadata").message_count,
        1
    );
}

#[test]
fn empty_session_key_is_rejected() {
    let store = SessionStore::new();
    assert!(matches!(
        store.create_session("   "),
        Err(SessionStoreError::EmptySessionKey)
    ));
}

#[test]
fn last_session_cannot_be_removed() {
    let store = SessionStore::with_sessions(["only"]).expect("store should build");
    let error = store.remove_session("only").expect_err("removal must fail");
    assert!(matches!(error, SessionStoreError::LastSession(key) if key == "only"));
    assert!(store.contains("only"));
}

#[test]
fn removing_active_session_promotes_first_remaining() {
    let store = SessionStore::with_sessions(["a", "b", "c"]).expect("store should build");
    store.switch_active("b").expect("switch to b");

    store.remove_session("b").expect("remove b");

    assert_eq!(store.active_key().as_deref(), Some("a"));
    assert_eq!(store.session_keys(), vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn switching_to_unknown_session_fails() {
    let store = SessionStore::with_sessions(["a"]).expect("store should build");
    assert!(matches!(
        store.switch_active("missing"),
        Err(SessionStoreError::UnknownSession(key)) if key == "missing"
    ));
    assert_eq!(store.active_key().as_deref(), Some("a"));
}

#[test]
fn append_or_replace_orders_by_creation_not_by_last_write() {
    let store = SessionStore::with_sessions(["s"]).expect("store should build");
    let question = user(&store, "question");
    let mut answer = ChatMessage::assistant_placeholder(store.next_message_id(), 1_500, None);
    let follow_up = user(&store, "follow up");

    store.append_or_replace("s", question).expect("append question");
    store
        .append_or_replace("s", follow_up)
        .expect("append follow up");
    store
        .append_or_replace("s", answer.clone())
        .expect("insert placeholder");
    answer.content = "streamed".to_string();
    store.append_or_replace("s", answer).expect("replace answer");

    let contents: Vec<String> = store
        .transcript("s")
        .expect("transcript")
        .into_iter()
        .map(|message| message.content)
        .collect();
    assert_eq!(contents, vec!["question", "streamed", "follow up"]);
}

#[test]
fn reset_clears_transcript_and_error_but_keeps_key() {
    let store = SessionStore::with_sessions(["s"]).expect("store should build");
    let message = completed_assistant(&store, "hello", "backend-1");
    store.append_or_replace("s", message).expect("append");
    store
        .record_error("s", ErrorKind::Transport, "connection reset")
        .expect("record error");

    store.reset_session("s").expect("reset");

    assert!(store.contains("s"));
    let metadata = store.metadata("s").expect("metadata");
    assert_eq!(metadata.message_count, 0);
    assert_eq!(metadata.total_tokens(), 0);
    assert_eq!(metadata.last_active, 0);
    assert_eq!(store.last_error("s").expect("error lookup"), None);
}

#[test]
fn metadata_is_derived_from_transcript() {
    let store = SessionStore::with_sessions(["s"]).expect("store should build");
    let first = user(&store, "hi");
    let second = completed_assistant(&store, "hello", "backend-1");
    store.append_or_replace("s", first).expect("append user");
    store
        .append_or_replace("s", second)
        .expect("append assistant");

    let all = store.all_metadata();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].session_key, "s");
    assert_eq!(all[0].message_count, 2);
    assert_eq!(all[0].last_active, 2_000);
    assert_eq!(all[0].total_input_tokens, 10);
    assert_eq!(all[0].total_output_tokens, 20);
}

#[test]
fn dismissing_an_error_clears_it() {
    let store = SessionStore::with_sessions(["s"]).expect("store should build");
    store
        .record_error("s", ErrorKind::Authentication, "unauthorized")
        .expect("record error");

    let dismissed = store
        .dismiss_error("s")
        .expect("dismiss")
        .expect("error should be present");
    assert_eq!(dismissed.kind, ErrorKind::Authentication);
    assert_eq!(dismissed.message, "unauthorized");
    assert_eq!(store.last_error("s").expect("error lookup"), None);
}

#[test]
fn status_flags_are_per_session() {
    let store = SessionStore::with_sessions(["a", "b"]).expect("store should build");
    let _stream = store
        .begin_stream("a", new_cancel_signal())
        .expect("claim a for streaming");
    let _history = store.begin_history_load("b").expect("claim b for history");

    let a = store.status("a").expect("status a");
    let b = store.status("b").expect("status b");
    assert_eq!(a.activity(), Some(SessionActivity::Streaming));
    assert_eq!(b.activity(), Some(SessionActivity::LoadingHistory));
}

#[test]
fn claims_exclude_each_other_and_clear_on_drop() {
    let store = SessionStore::with_sessions(["s"]).expect("store should build");

    let stream = store
        .begin_stream("s", new_cancel_signal())
        .expect("first claim");
    assert!(matches!(
        store.begin_history_load("s"),
        Err(SessionStoreError::Busy { activity: SessionActivity::Streaming, .. })
    ));
    assert!(matches!(
        store.begin_stream("s", new_cancel_signal()),
        Err(SessionStoreError::Busy { .. })
    ));
    drop(stream);

    let history = store.begin_history_load("s").expect("claim after release");
    assert!(matches!(
        store.begin_stream("s", new_cancel_signal()),
        Err(SessionStoreError::Busy { activity: SessionActivity::LoadingHistory, .. })
    ));
    drop(history);

    assert_eq!(store.status("s").expect("status").activity(), None);
}

#[test]
fn racing_claims_admit_exactly_one_holder() {
    for _ in 0..50 {
        let store = Arc::new(SessionStore::with_sessions(["s"]).expect("store should build"));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let claim = if index % 2 == 0 {
                        store.begin_stream("s", new_cancel_signal())
                    } else {
                        store.begin_history_load("s")
                    };
                    claim.ok()
                })
            })
            .collect();

        let claims: Vec<SessionClaim> = handles
            .into_iter()
            .filter_map(|handle| handle.join().expect("claim thread should finish"))
            .collect();
        assert_eq!(claims.len(), 1);
    }
}

#[test]
fn removing_a_session_cancels_its_stream_and_fences_the_old_slot() {
    let store = SessionStore::with_sessions(["a", "b"]).expect("store should build");
    let cancel = new_cancel_signal();
    let claim = store.begin_stream("a", Arc::clone(&cancel)).expect("claim a");
    claim
        .append_or_replace(user(&store, "before removal"))
        .expect("write while live");

    store.remove_session("a").expect("remove a");
    assert!(is_cancelled(&cancel));
    assert!(!claim.is_live());

    assert!(store.create_session("a").expect("recreate a"));
    let late = claim.append_or_replace(user(&store, "late"));
    assert!(matches!(late, Err(SessionStoreError::SessionRemoved(key)) if key == "a"));
    drop(claim);

    assert!(store.transcript("a").expect("transcript").is_empty());
    assert_eq!(store.status("a").expect("status").activity(), None);
    assert!(!store.cancel_stream("a"));
}

#[test]
fn cancel_stream_raises_only_the_streaming_claim() {
    let store = SessionStore::with_sessions(["a", "b"]).expect("store should build");
    let cancel = new_cancel_signal();
    let _stream = store.begin_stream("a", Arc::clone(&cancel)).expect("claim a");
    let _history = store.begin_history_load("b").expect("claim b");

    assert!(!store.cancel_stream("b"));
    assert!(!is_cancelled(&cancel));
    assert!(store.cancel_stream("a"));
    assert!(is_cancelled(&cancel));
}

#[test]
fn sink_receives_a_snapshot_per_mutation() {
    let sink = Arc::new(RecordingSink::default());
    let store = SessionStore::with_sessions(["s"])
        .expect("store should build")
        .with_sink(sink.clone());

    let mut answer = ChatMessage::assistant_placeholder(store.next_message_id(), 1, None);
    store
        .append_or_replace("s", answer.clone())
        .expect("insert placeholder");
    answer.content = "partial".to_string();
    store.append_or_replace("s", answer).expect("replace");
    store.reset_session("s").expect("reset");

    let snapshots = sink.snapshots.lock().expect("sink lock").clone();
    assert_eq!(
        snapshots,
        vec![
            ("s".to_string(), vec![String::new()]),
            ("s".to_string(), vec!["partial".to_string()]),
            ("s".to_string(), Vec::new()),
        ]
    );
}

#[test]
fn concurrent_writes_to_different_sessions_do_not_interfere() {
    let store = Arc::new(SessionStore::with_sessions(["a", "b", "c"]).expect("store should build"));

    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|key| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for index in 0..50 {
                    let message =
                        ChatMessage::user(store.next_message_id(), format!("{key}-{index}"), 1);
                    store.append_or_replace(key, message).expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread should finish");
    }

    for key in ["a", "b", "c"] {
        let transcript = store.transcript(key).expect("transcript");
        assert_eq!(transcript.len(), 50);
        assert!(transcript
            .iter()
            .all(|message| message.content.starts_with(key)));
        assert!(transcript.windows(2).all(|pair| pair[0].id < pair[1].id));
    }
}

#[test]
fn backend_context_changes_mark_new_conversation_ids() {
    let store = SessionStore::with_sessions(["s"]).expect("store should build");
    let first = completed_assistant(&store, "one", "conv-1");
    let second = completed_assistant(&store, "two", "conv-1");
    let question = user(&store, "again");
    let third = completed_assistant(&store, "three", "conv-2");
    let third_id = third.id;
    for message in [first, second, question, third] {
        store.append_or_replace("s", message).expect("append");
    }

    assert_eq!(
        store.backend_context_changes("s").expect("changes"),
        vec![third_id]
    );
}

#[test]
fn export_round_trips_transcript_with_audit_trail() {
    let store = SessionStore::with_sessions(["webchat:main"]).expect("store should build");
    let question = user(&store, "run it");
    let mut answer = completed_assistant(&store, "done", "conv-1");
    let mut call = ToolCall::new("t1", "shell", json!({"cmd": "ls"}));
    call.output = Some("a\nb".to_string());
    answer.tool_calls = vec![call];
    answer.audit = vec![AuditEntry::new(StreamEvent::Token {
        text: "done".to_string(),
    })];
    store
        .append_or_replace("webchat:main", question)
        .expect("append question");
    store
        .append_or_replace("webchat:main", answer)
        .expect("append answer");

    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = store
        .export_to_dir("webchat:main", dir.path())
        .expect("export should succeed");
    assert!(path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with("_webchat-main.jsonl")));

    let (header, messages) = read_export(&path).expect("export should read back");
    assert_eq!(header.version, EXPORT_VERSION);
    assert_eq!(header.session_key, "webchat:main");
    assert_eq!(header.message_count, 2);
    assert_eq!(messages, store.transcript("webchat:main").expect("transcript"));
}

#[test]
fn export_of_unknown_session_fails() {
    let store = SessionStore::with_sessions(["a"]).expect("store should build");
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let result = store.export_jsonl("missing", &dir.path().join("x.jsonl"));
    assert!(matches!(result, Err(SessionStoreError::UnknownSession(_))));
}

#[test]
fn read_export_rejects_unsupported_version() {
    let (_dir, path) = write_lines(&[header_line(2, "2026-02-14T00:00:00Z")]);
    let error = read_export(&path).expect_err("version 2 must be rejected");
    assert!(matches!(
        error,
        SessionStoreError::UnsupportedVersion { line: 1, found: 2, .. }
    ));
}

#[test]
fn read_export_rejects_invalid_timestamp() {
    let (_dir, path) = write_lines(&[header_line(1, "yesterday")]);
    let error = read_export(&path).expect_err("timestamp must be rejected");
    assert!(matches!(
        error,
        SessionStoreError::InvalidTimestamp { field: "exported_at", .. }
    ));
}

#[test]
fn read_export_requires_header_first() {
    let message = json!({
        "type": "message",
        "id": "msg-1-0",
        "role": "user",
        "content": "hi",
        "timestamp": 1,
    })
    .to_string();
    let (_dir, path) = write_lines(&[message]);
    let error = read_export(&path).expect_err("message first must be rejected");
    assert!(matches!(
        error,
        SessionStoreError::InvalidHeaderRecord { line: 1, .. }
    ));
}

#[test]
fn read_export_rejects_second_header() {
    let (_dir, path) = write_lines(&[
        header_line(1, "2026-02-14T00:00:00Z"),
        header_line(1, "2026-02-14T00:00:00Z"),
    ]);
    let error = read_export(&path).expect_err("second header must be rejected");
    assert!(matches!(
        error,
        SessionStoreError::InvalidMessageRecord { line: 2, .. }
    ));
}

#[test]
fn read_export_of_empty_file_reports_missing_header() {
    let (_dir, path) = write_lines(&[]);
    let error = read_export(&path).expect_err("empty file must be rejected");
    assert!(matches!(error, SessionStoreError::MissingHeader { .. }));
}
