//! Integration tests for a full client run against a scripted session server.

use clouseau_client::app::{run_until, RunOptions};
use clouseau_client::config::Config;
use clouseau_core::HistorySnapshot;
use clouseau_types::{Frame, SessionCommand, SessionEnvelope, SessionEventKind};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

fn text(frame: Frame) -> Message {
    Message::Text(serde_json::to_string(&frame).unwrap().into())
}

/// Server that answers the health check, replays a short session and hangs up.
async fn spawn_scripted_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        tx.send(text(Frame::new("id", "c-1"))).await.unwrap();

        while let Some(Ok(msg)) = rx.next().await {
            let Message::Text(raw) = msg else { continue };
            let frame: Frame = serde_json::from_str(&raw).unwrap();
            if frame.channel == "ping" {
                tx.send(text(Frame::new("pong", frame.payload))).await.unwrap();
                break;
            }
        }

        let clone = SessionEnvelope::encode(SessionEventKind::Message, &SessionCommand::new("git clone repo", "/root"));
        tx.send(text(Frame::new("term", serde_json::to_string(&clone).unwrap())))
            .await
            .unwrap();
        tx.send(text(Frame::new("term", r#"{"type":"message","payload":"{\"command\":\"ls\",\"cwd\":\"/root\"}"}"#)))
            .await
            .unwrap();
        tx.send(text(Frame::new(
            "term/prompt",
            SessionCommand::new("python train.py", "/root/repo").to_json(),
        )))
        .await
        .unwrap();
        tx.send(text(Frame::new(
            "term/message",
            SessionCommand::new("python train.py", "/root/repo").to_json(),
        )))
        .await
        .unwrap();
        tx.send(Message::Close(None)).await.unwrap();

        // Drain until the client acknowledges the close.
        while let Some(Ok(_)) = rx.next().await {}
    });

    format!("ws://{}/websocket", addr)
}

fn test_config(url: String, dir: &TempDir) -> Config {
    Config {
        url,
        history_file: dir.path().join("history.json"),
        request_timeout_ms: 1000,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_run_records_session_and_saves_history() {
    let dir = TempDir::new().unwrap();
    let url = spawn_scripted_server().await;
    let config = test_config(url, &dir);

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        run_until(config, RunOptions { accept_prompts: true }, std::future::pending::<()>()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.client_id.as_deref(), Some("c-1"));

    let items = summary.history.items();
    let texts: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, vec!["git clone repo", "python train.py"]);
    assert!(items[1].run_command);
    assert!(items[1].flag);

    let saved = HistorySnapshot::new(dir.path().join("history.json")).load().unwrap();
    assert_eq!(saved, items);

    let raw = std::fs::read_to_string(dir.path().join("history.json")).unwrap();
    assert!(raw.contains("\"runCommand\": true"));
    assert!(raw.contains("\"flagType\": \"python\""));
}

#[tokio::test]
async fn test_run_fails_when_server_is_down() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = test_config(format!("ws://{}/websocket", addr), &dir);
    let err = run_until(config, RunOptions::default(), std::future::pending::<()>())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Failed to connect"));
    assert!(!dir.path().join("history.json").exists());
}
