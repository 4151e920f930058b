//! Full client scenarios: hole-punch handshake with identity exchange,
//! re-punching, direct chat, and heartbeat-driven liveness.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;

use keyhole_cli::Session;
use keyhole_core::{ClientConfig, ServerConfig};
use keyhole_integration_tests::{start_server, start_server_with, wait_for, REPLY_WAIT};

fn client_config(server: SocketAddr) -> ClientConfig {
    ClientConfig {
        laddr: "127.0.0.1:0".to_string(),
        raddr: server.to_string(),
        punch_burst: 10,
        punch_interval_ms: 20,
        reply_timeout_secs: 2,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn punch_handshake_teaches_both_identities() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let (alice, _alice_out) = Session::connect(client_config(addr)).await?;
    let (bob, _bob_out) = Session::connect(client_config(addr)).await?;

    assert_eq!(alice.login("alice").await?, 1);
    assert_eq!(bob.login("bob").await?, 2);

    let bob_addr = alice.get(2).await?;
    assert_eq!(bob_addr, bob.local_addr()?);

    alice.punch(2).await?;

    // The active side learns bob from his reply burst; the passive side
    // learns alice from the first request that lands.
    assert!(
        wait_for(|| alice.known_peer(2).is_some(), REPLY_WAIT).await,
        "alice never learned bob"
    );
    let learned = alice.known_peer(2).context("alice never learned bob")?;
    assert_eq!(learned.name, "bob");
    assert_eq!(learned.addr, bob_addr);

    assert!(
        wait_for(|| bob.known_peer(1).is_some(), REPLY_WAIT).await,
        "bob never learned alice"
    );
    let learned = bob.known_peer(1).context("bob never learned alice")?;
    assert_eq!(learned.name, "alice");
    assert_eq!(learned.addr, alice.local_addr()?);

    // A second round toward the same target succeeds: the done flag was
    // cleared when the first round ended.
    alice.punch(2).await?;
    Ok(())
}

#[tokio::test]
async fn chat_flows_directly_between_punched_peers() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let (alice, mut alice_out) = Session::connect(client_config(addr)).await?;
    let (bob, mut bob_out) = Session::connect(client_config(addr)).await?;

    alice.login("alice").await?;
    bob.login("bob").await?;
    alice.get(2).await?;
    alice.punch(2).await?;
    assert!(wait_for(|| alice.known_peer(2).is_some(), REPLY_WAIT).await);
    assert!(wait_for(|| bob.known_peer(1).is_some(), REPLY_WAIT).await);

    alice.send_chat(2, "hello bob").await?;
    let line = timeout(REPLY_WAIT, bob_out.recv())
        .await?
        .context("bob's sink closed")?;
    assert_eq!(line, "[1 alice] hello bob");

    // The hole is open in both directions.
    bob.send_chat(1, "hi alice").await?;
    let line = timeout(REPLY_WAIT, alice_out.recv())
        .await?
        .context("alice's sink closed")?;
    assert_eq!(line, "[2 bob] hi alice");
    Ok(())
}

#[tokio::test]
async fn line_surface_drives_the_whole_flow() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let (alice, _alice_out) = Session::connect(client_config(addr)).await?;
    let (bob, mut bob_out) = Session::connect(client_config(addr)).await?;

    assert_eq!(alice.exec_line("#login alice").await, "login success, ID: 1");
    assert_eq!(bob.exec_line("#login bob").await, "login success, ID: 2");

    let hint = alice.exec_line("#get 2").await;
    assert!(hint.starts_with("get 2 addr success"), "{hint}");
    let hint = alice.exec_line("#punch 2").await;
    assert!(hint.starts_with("punch 2 success"), "{hint}");
    assert!(wait_for(|| alice.known_peer(2).is_some(), REPLY_WAIT).await);
    assert!(wait_for(|| bob.known_peer(1).is_some(), REPLY_WAIT).await);

    assert_eq!(alice.exec_line("2 hi there").await, "[me -> 2] hi there");
    let line = timeout(REPLY_WAIT, bob_out.recv())
        .await?
        .context("bob's sink closed")?;
    assert_eq!(line, "[1 alice] hi there");

    assert_eq!(alice.exec_line("#logout").await, "logout success");
    assert_eq!(alice.current_id(), 0);
    Ok(())
}

#[tokio::test]
async fn punch_before_get_is_a_local_failure() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let (alice, _out) = Session::connect(client_config(addr)).await?;
    alice.login("alice").await?;

    let hint = alice.exec_line("#punch 9").await;
    assert!(hint.contains("run get first"), "{hint}");
    Ok(())
}

#[tokio::test]
async fn session_heartbeats_keep_the_record_alive() -> Result<()> {
    let (server, addr) = start_server_with(ServerConfig {
        port: 0,
        client_timeout_secs: 2,
        sweep_interval_secs: 1,
        ..ServerConfig::default()
    })
    .await?;
    let (alice, _out) = Session::connect(client_config(addr)).await?;
    alice.login("alice").await?;

    // Well past the timeout: the 1 s heartbeat ticker must keep us alive.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(server.registry().lookup(1).is_some());

    // After logout the record is gone and stays gone.
    alice.logout().await?;
    assert!(server.registry().lookup(1).is_none());
    Ok(())
}
