//! RCON client tests against a mock DS console speaking the line protocol.

use astrotux::rcon::{PlayerCategory, RconClient, RconReply};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const STATS_JSON: &str = r#"{"build":"1.27.101.0","serverName":"Test","isEnforcingWhitelist":false}"#;
const KICK_ACK: &str = "UAstroServerCommExecutor::DSKickPlayerGuid: Kicked";
const DENY_ACK: &str = "UAstroServerCommExecutor::DSSetDenyUnlisted: SetDenyUnlistedPlayers 1";

/// Serves one connection: answers status queries with JSON and mutating
/// commands with their opaque acks, recording every received line.
async fn spawn_mock_console() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (line_tx, line_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let _ = line_tx.send(line.clone());
            let reply: Option<String> = if line == "DSServerStatistics" {
                Some(STATS_JSON.to_string())
            } else if line == "DSListPlayers" {
                Some(r#"{"playerInfo":[]}"#.to_string())
            } else if line == "DSListGames" {
                Some(r#"{"activeSaveName":"SAVE_1","gameList":[]}"#.to_string())
            } else if line.starts_with("DSKickPlayerGuid") {
                Some(KICK_ACK.to_string())
            } else if line.starts_with("DSSetDenyUnlisted") {
                Some(DENY_ACK.to_string())
            } else if line.starts_with("DSSetPlayerCategoryForPlayerName") {
                Some(r#"{"status":true}"#.to_string())
            } else {
                // Password line, liveness probe, and no-reply commands.
                None
            };
            if let Some(reply) = reply {
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });

    (port, line_rx)
}

#[tokio::test]
async fn connects_sends_password_first_and_probes() {
    let (port, mut lines) = spawn_mock_console().await;
    let client = RconClient::new(port, Some("secret".to_string()));

    assert!(client.ensure_connection().await);
    assert!(client.connected().await);

    assert_eq!(lines.recv().await.unwrap(), "secret");
    assert_eq!(lines.recv().await.unwrap(), "Hello There!");
}

#[tokio::test]
async fn status_query_returns_json_reply() {
    let (port, _lines) = spawn_mock_console().await;
    let client = RconClient::new(port, None);
    assert!(client.ensure_connection().await);

    let reply = client.server_statistics().await.unwrap();
    let json = reply.as_json().expect("statistics reply should be JSON");
    assert_eq!(json["build"], "1.27.101.0");
    assert_eq!(json["isEnforcingWhitelist"], false);
}

#[tokio::test]
async fn mutating_commands_return_raw_acks() {
    let (port, mut lines) = spawn_mock_console().await;
    let client = RconClient::new(port, None);
    assert!(client.ensure_connection().await);
    let _ = lines.recv().await; // probe

    let reply = client.kick_player_guid("abc123").await.unwrap();
    assert_eq!(lines.recv().await.unwrap(), "DSKickPlayerGuid abc123");
    let raw = reply.as_raw().expect("kick ack should be raw bytes");
    assert!(raw.starts_with(b"UAstroServerCommExecutor::DSKickPlayerGuid"));
    assert_eq!(raw.last(), Some(&b'd'));

    let reply = client.set_deny_unlisted(true).await.unwrap();
    assert_eq!(lines.recv().await.unwrap(), "DSSetDenyUnlisted true");
    let raw = reply.as_raw().expect("deny ack should be raw bytes");
    assert_eq!(raw.last(), Some(&b'1'));
}

#[tokio::test]
async fn player_names_are_quoted_and_escaped_on_the_wire() {
    let (port, mut lines) = spawn_mock_console().await;
    let client = RconClient::new(port, None);
    assert!(client.ensure_connection().await);
    let _ = lines.recv().await; // probe

    let reply = client
        .set_player_category("Quote\"Name", PlayerCategory::Whitelisted)
        .await
        .unwrap();
    assert_eq!(
        lines.recv().await.unwrap(),
        "DSSetPlayerCategoryForPlayerName \"Quote\\\"Name\" Whitelisted"
    );
    assert_eq!(
        reply.as_json().and_then(|v| v["status"].as_bool()),
        Some(true)
    );
}

#[tokio::test]
async fn commands_are_serialised_in_submission_order() {
    let (port, mut lines) = spawn_mock_console().await;
    let client = RconClient::new(port, None);
    assert!(client.ensure_connection().await);
    let _ = lines.recv().await; // probe

    let _ = client.server_statistics().await.unwrap();
    let _ = client.list_players().await.unwrap();
    let _ = client.list_games().await.unwrap();

    assert_eq!(lines.recv().await.unwrap(), "DSServerStatistics");
    assert_eq!(lines.recv().await.unwrap(), "DSListPlayers");
    assert_eq!(lines.recv().await.unwrap(), "DSListGames");
}

#[tokio::test]
async fn server_side_close_marks_client_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Accept, read the liveness probe, then drop the connection.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let _ = lines.next_line().await;
    });

    let client = RconClient::new(port, None);
    assert!(client.ensure_connection().await);

    // The next request observes EOF and drops the socket.
    let result = client.server_statistics().await;
    assert!(result.is_err());
    assert!(!client.connected().await);
}

#[tokio::test]
async fn connection_refused_leaves_client_disconnected() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = RconClient::new(port, None);
    assert!(!client.ensure_connection().await);
    assert!(!client.connected().await);
}

#[tokio::test]
async fn no_reply_commands_do_not_consume_the_stream() {
    let (port, mut lines) = spawn_mock_console().await;
    let client = RconClient::new(port, None);
    assert!(client.ensure_connection().await);
    let _ = lines.recv().await; // probe

    client.server_shutdown().await.unwrap();
    assert_eq!(lines.recv().await.unwrap(), "DSServerShutdown");

    // The connection is still usable for a query afterwards.
    let reply = client.list_games().await.unwrap();
    assert!(matches!(reply, RconReply::Json(_)));
}
