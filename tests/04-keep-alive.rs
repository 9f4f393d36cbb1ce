// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Keep alive: PINGREQ keeps the connection up, and a silent client is
//! cut after 1.5x keep alive, on v5 with DISCONNECT(KeepAliveTimeout)
//! first.

use std::time::{Duration, Instant};

use codec::{v5, ProtocolVersion, QoS};
use corvid::client::{AsyncClient, ClientEvent, ConnectOptions};
use tokio::time::timeout;

mod common;

#[tokio::test]
async fn test_pingreq_keeps_connection_alive() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("pinger").set_keep_alive(1);
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());

    // recv drives the keep alive timer; with PINGREQ flowing every
    // second the broker must not cut us within 3 seconds.
    let result = timeout(Duration::from_secs(3), client.recv()).await;
    assert!(result.is_err(), "connection dropped despite PINGREQ");

    // Still able to do work afterwards.
    client.subscribe("alive/t", QoS::AtMostOnce).await.unwrap();
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_silent_v5_client_cut_with_keep_alive_timeout() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options
        .set_version(ProtocolVersion::V5)
        .set_client_id("silent")
        .set_keep_alive(1)
        // Pin PINGREQ far above the keep alive so the client stays
        // silent and the broker applies the 1.5x cutoff.
        .set_pingreq_interval(Duration::from_secs(10));
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());

    let started = Instant::now();
    let event = timeout(Duration::from_secs(4), client.recv())
        .await
        .expect("broker did not react to the silent client")
        .unwrap();
    let elapsed = started.elapsed();

    match event {
        Some(ClientEvent::Disconnect(Some(packet))) => {
            assert_eq!(packet.reason_code(), v5::ReasonCode::KeepAliveTimeout);
        }
        other => panic!("expected DISCONNECT(KeepAliveTimeout), got {other:?}"),
    }
    // The cutoff is 1.5x keep alive, give or take scheduling.
    assert!(elapsed >= Duration::from_millis(1300), "cut too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3500), "cut too late: {elapsed:?}");
}

#[tokio::test]
async fn test_silent_v311_client_cut_without_packet() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options
        .set_client_id("silent3")
        .set_keep_alive(1)
        .set_pingreq_interval(Duration::from_secs(10));
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());

    // v3.1.1 has no DISCONNECT from the server; the stream just ends.
    let event = timeout(Duration::from_secs(4), client.recv())
        .await
        .expect("broker did not react to the silent client");
    match event {
        Ok(None) => (),
        Err(err) => assert_eq!(err.kind(), corvid::error::ErrorKind::ConnectionReset),
        Ok(Some(other)) => panic!("unexpected event {other:?}"),
    }
}
