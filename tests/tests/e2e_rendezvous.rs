//! Wire-level scenarios against a live rendezvous server: login/logout,
//! failure responses, introductions, heartbeats, and liveness eviction.

use std::time::Duration;

use anyhow::Result;
use keyhole_core::ServerConfig;
use keyhole_integration_tests::{start_server, start_server_with, ControlClient};

#[tokio::test]
async fn login_logout_round_trip() -> Result<()> {
    let (server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(server.registry().len(), 0);
    assert_eq!(client.roundtrip("login alice").await?, "login OK 1");
    assert_eq!(server.registry().len(), 1);
    assert_eq!(client.roundtrip("logout 1").await?, "logout OK");
    assert_eq!(server.registry().len(), 0);
    Ok(())
}

#[tokio::test]
async fn login_ids_are_distinct_and_never_reused() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(client.roundtrip("login alice").await?, "login OK 1");
    assert_eq!(client.roundtrip("login bob").await?, "login OK 2");
    assert_eq!(client.roundtrip("logout 1").await?, "logout OK");
    // The freed ID is not recycled.
    assert_eq!(client.roundtrip("login carol").await?, "login OK 3");
    Ok(())
}

#[tokio::test]
async fn logout_of_unknown_id_fails() -> Result<()> {
    let (server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(
        client.roundtrip("logout 7").await?,
        "logout FAIL 7 is not exists"
    );
    assert_eq!(server.registry().len(), 0);
    Ok(())
}

#[tokio::test]
async fn bad_arguments_are_rejected() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(client.roundtrip("punch onlyone").await?, "punch FAIL bad args");
    assert_eq!(client.roundtrip("login").await?, "login FAIL bad args");
    assert_eq!(client.roundtrip("login two words").await?, "login FAIL bad args");
    assert_eq!(client.roundtrip("get seven").await?, "get FAIL bad args");
    assert_eq!(client.roundtrip("logout 1 2").await?, "logout FAIL bad args");
    Ok(())
}

#[tokio::test]
async fn unknown_commands_are_dropped_silently() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    client.send("frobnicate 1").await?;
    client.expect_no_reply(Duration::from_millis(300)).await?;
    Ok(())
}

#[tokio::test]
async fn get_returns_the_observed_endpoint() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(client.roundtrip("login alice").await?, "login OK 1");
    assert_eq!(
        client.roundtrip("get 1").await?,
        format!("get OK {}", client.local_addr()?)
    );
    assert_eq!(client.roundtrip("get 9").await?, "get FAIL 9 is not exists");
    Ok(())
}

#[tokio::test]
async fn punch_delivers_the_introduction() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let a = ControlClient::connect(addr).await?;
    let b = ControlClient::connect(addr).await?;

    assert_eq!(a.roundtrip("login alice").await?, "login OK 1");
    assert_eq!(b.roundtrip("login bob").await?, "login OK 2");

    a.send("punch 1 2").await?;
    // Target receives the caller's endpoint; caller gets the verdict.
    assert_eq!(b.recv().await?, format!("getpunch {}", a.local_addr()?));
    assert_eq!(a.recv().await?, "punch OK");

    // Unknown target: failure goes to the caller, nothing reaches anyone else.
    assert_eq!(a.roundtrip("punch 1 9").await?, "punch FAIL 9 is not exists");
    Ok(())
}

#[tokio::test]
async fn heartbeat_is_answered_with_the_marker() -> Result<()> {
    let (server, addr) = start_server().await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(client.roundtrip("login alice").await?, "login OK 1");
    assert_eq!(client.roundtrip("heartbeat 1").await?, "pong");

    // Unknown ID: no reply, no state change.
    client.send("heartbeat 99").await?;
    client.expect_no_reply(Duration::from_millis(300)).await?;
    assert_eq!(server.registry().len(), 1);

    // Malformed ID: dropped.
    client.send("heartbeat nope").await?;
    client.expect_no_reply(Duration::from_millis(300)).await?;
    Ok(())
}

#[tokio::test]
async fn silent_clients_are_evicted_by_the_sweeper() -> Result<()> {
    let (server, addr) = start_server_with(ServerConfig {
        port: 0,
        client_timeout_secs: 1,
        sweep_interval_secs: 1,
        ..ServerConfig::default()
    })
    .await?;
    let client = ControlClient::connect(addr).await?;

    assert_eq!(client.roundtrip("login alice").await?, "login OK 1");

    // Heartbeats hold the record across the timeout window.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(client.roundtrip("heartbeat 1").await?, "pong");
    }
    assert!(server.registry().lookup(1).is_some());

    // Then silence: the sweeper takes it once the timeout passes.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(server.registry().lookup(1).is_none());
    assert_eq!(client.roundtrip("get 1").await?, "get FAIL 1 is not exists");
    Ok(())
}
