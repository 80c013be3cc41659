use proptest::prelude::*;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use turbo_core::{ChatConfig, Insertion, LlmConfig, Replacement, ResponseDocument, SuggestionKind, TurnState};
use turbo_llm::OpenAiClient;
use turbo_session::{
    ChatSession, ControllerOptions, FailureKind, SnapshotCallback, TextBuffer, TurnController,
    TurnSnapshot,
};
use turbo_testkit::{MockHttpServer, MockResponse, Scripted, ScriptedTransport, char_deltas, sse_body};
use uuid::Uuid;

fn document_strategy() -> impl Strategy<Value = ResponseDocument> {
    (
        "\\PC{0,40}",
        prop::collection::vec(("\\PC{0,20}", "[ -~]{0,12}"), 0..3),
        prop::collection::vec("\\PC{0,20}", 0..2),
    )
        .prop_map(|(response, replacements, insertions)| ResponseDocument {
            response,
            replacements: replacements
                .into_iter()
                .enumerate()
                .map(|(idx, (text, description))| Replacement {
                    id: format!("replacement-{idx}"),
                    text,
                    description,
                    kind: SuggestionKind::Replacement,
                })
                .collect(),
            insertions: insertions
                .into_iter()
                .enumerate()
                .map(|(idx, text)| Insertion {
                    id: format!("insertion-{idx}"),
                    text,
                    description: String::new(),
                })
                .collect(),
            metadata: None,
        })
}

fn collector() -> (SnapshotCallback, Arc<Mutex<Vec<TurnSnapshot>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: SnapshotCallback = Arc::new(move |snapshot| {
        sink.lock().expect("snapshots").push(snapshot);
    });
    (callback, seen)
}

fn assert_monotone(snapshots: &[TurnSnapshot]) {
    let streamed: Vec<&TurnSnapshot> = snapshots
        .iter()
        .filter(|s| s.state == TurnState::Streaming && !s.placeholder)
        .collect();
    for pair in streamed.windows(2) {
        let (before, after) = (&pair[0].document, &pair[1].document);
        assert!(after.response.starts_with(&before.response));
        assert!(after.replacements.len() >= before.replacements.len());
        assert!(after.insertions.len() >= before.insertions.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn character_deltas_publish_monotonically(doc in document_strategy()) {
        let raw = serde_json::to_string(&doc).expect("serialize");
        let (callback, seen) = collector();
        let mut controller = TurnController::new(Uuid::now_v7(), ControllerOptions::default(), callback);
        controller.begin("gpt-4o-mini");
        for delta in char_deltas(&raw, 1) {
            controller.push_delta(&delta);
        }
        let terminal = controller.finish();

        let snapshots = seen.lock().expect("snapshots").clone();
        assert_monotone(&snapshots);
        prop_assert_eq!(terminal.state, TurnState::Completed);
        prop_assert_eq!(&terminal.document, &doc);
        prop_assert_eq!(snapshots.iter().filter(|s| s.is_terminal()).count(), 1);
    }
}

#[test]
fn byte_sized_sse_chunks_keep_suggestion_text_growing() {
    let raw = "{\"response\":\"Here is a tighter draft.\",\"replacements\":[{\"id\":\"replacement-1\",\"text\":\"Improved text with caf\u{e9}\",\"description\":\"tighter\"}],\"insertions\":[]}";
    let deltas = char_deltas(raw, 1);
    let delta_refs: Vec<&str> = deltas.iter().map(String::as_str).collect();
    let transport = ScriptedTransport::new([Scripted::sse(sse_body(&delta_refs), 1)]);
    let (callback, seen) = collector();
    let request = ChatSession::new("openai", "gpt-4o-mini", ChatConfig::default())
        .submit("tighten", Some("draft"))
        .expect("turn")
        .request;

    let terminal = TurnController::new(Uuid::now_v7(), ControllerOptions::default(), callback)
        .run(&transport, &request);

    assert_eq!(terminal.state, TurnState::Completed);
    let snapshots = seen.lock().expect("snapshots").clone();
    assert_monotone(&snapshots);
    let texts: Vec<&str> = snapshots
        .iter()
        .filter_map(|s| s.document.replacements.first())
        .filter(|r| r.id == "replacement-1")
        .map(|r| r.text.as_str())
        .collect();
    assert!(texts.contains(&"Improved te"));
    for pair in texts.windows(2) {
        assert!(pair[1].starts_with(pair[0]));
    }
}

fn client_for(server: &MockHttpServer) -> OpenAiClient {
    let cfg = LlmConfig {
        endpoint: server.endpoint.clone(),
        api_key: Some("sk-test".to_string()),
        api_key_env: "TURBO_SESSION_TEST_UNSET_KEY".to_string(),
        timeout_seconds: 5,
        ..LlmConfig::default()
    };
    OpenAiClient::new(cfg).expect("client")
}

/// Run the pending turn against `client`, routing snapshots into `chat`.
fn drive(chat: &mut ChatSession, client: &OpenAiClient, input: &str, selection: Option<&str>) -> TurnSnapshot {
    let pending = chat.submit(input, selection).expect("turn");
    let (tx, rx) = mpsc::channel();
    let callback: SnapshotCallback = Arc::new(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    let terminal = chat.controller(&pending, callback).run(client, &pending.request);
    for snapshot in rx.try_iter() {
        chat.apply_snapshot(&snapshot);
    }
    terminal
}

#[test]
fn session_streams_over_http_and_applies_suggestions_once() {
    let body = sse_body(&[
        "{\"response\":\"Try this.\",",
        "\"replacements\":[{\"id\":\"replacement-1\",\"text\":\"swift\",\"description\":\"livelier\"}],",
        "\"insertions\":[{\"id\":\"insertion-1\",\"text\":\" The end.\",\"description\":\"closing\"}]}",
    ]);
    let server = MockHttpServer::start(vec![MockResponse::sse(body)]).expect("server");
    let client = client_for(&server);
    let mut chat = ChatSession::new("openai", "gpt-4o-mini", ChatConfig::default());

    let terminal = drive(&mut chat, &client, "Make it livelier", Some("quick"));

    assert_eq!(terminal.state, TurnState::Completed);
    let assistant = chat.messages().last().expect("assistant").clone();
    assert_eq!(assistant.content, "Try this.");
    assert_eq!(assistant.state, Some(TurnState::Completed));

    let sent: serde_json::Value =
        serde_json::from_str(&server.request_bodies()[0]).expect("request json");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["model"], "gpt-4o-mini");
    assert_eq!(sent["messages"][0]["role"], "system");
    let user = sent["messages"][1]["content"].as_str().expect("user content");
    assert!(user.starts_with("Selected text from editor:\n\"\"\"\nquick\n\"\"\""));

    let mut editor = TextBuffer::new("The quick fox.");
    editor.select(4, 9).expect("select");
    chat.use_replacement(assistant.id, "replacement-1", &mut editor)
        .expect("apply");
    editor.select(0, 3).expect("select");
    chat.use_replacement(assistant.id, "replacement-1", &mut editor)
        .expect("second apply");
    editor.set_cursor(14).expect("cursor");
    chat.use_insertion(assistant.id, "insertion-1", &mut editor)
        .expect("insert");
    assert_eq!(editor.text(), "The swift fox. The end.");
}

#[test]
fn unauthorized_response_aborts_and_flags_credentials() {
    let server = MockHttpServer::start(vec![MockResponse {
        status: 401,
        body: "{\"error\":{\"message\":\"Incorrect API key provided\"}}".to_string(),
    }])
    .expect("server");
    let client = client_for(&server);
    let mut chat = ChatSession::new("openai", "gpt-4o-mini", ChatConfig::default());

    let terminal = drive(&mut chat, &client, "hello", None);

    assert_eq!(terminal.state, TurnState::Aborted);
    let failure = terminal.failure.expect("failure");
    assert_eq!(failure.kind, FailureKind::Transport);
    assert!(failure.credential_invalid);
    assert!(chat.credential_invalid());
    assert_eq!(chat.messages().last().expect("assistant").state, Some(TurnState::Aborted));
}

#[test]
fn retry_after_incomplete_reply_completes() {
    let truncated = sse_body(&["{\"response\":\"Cut off mid"]);
    let full = sse_body(&["{\"response\":\"Whole answer\",\"replacements\":[],\"insertions\":[]}"]);
    let transport = ScriptedTransport::new([Scripted::sse(truncated, 8), Scripted::sse(full, 8)]);
    let mut chat = ChatSession::new("openai", "gpt-4o-mini", ChatConfig::default());

    let first = chat.submit("Explain", None).expect("turn");
    let (tx, rx) = mpsc::channel();
    let callback: SnapshotCallback = Arc::new(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    let terminal = chat.controller(&first, Arc::clone(&callback)).run(&transport, &first.request);
    assert_eq!(terminal.state, TurnState::Incomplete);
    for snapshot in rx.try_iter() {
        chat.apply_snapshot(&snapshot);
    }

    let second = chat.retry().expect("retry");
    let terminal = chat.controller(&second, callback).run(&transport, &second.request);
    for snapshot in rx.try_iter() {
        chat.apply_snapshot(&snapshot);
    }
    assert_eq!(terminal.state, TurnState::Completed);
    assert_eq!(chat.messages().len(), 2);
    assert_eq!(chat.messages()[1].content, "Whole answer");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages, requests[1].messages);
}
