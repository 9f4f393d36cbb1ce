// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Will messages: published on abnormal disconnect, suppressed by a clean
//! DISCONNECT, and delayed by min(will delay, session expiry).

use std::time::{Duration, Instant};

use codec::{ProtocolVersion, QoS};
use corvid::client::{AsyncClient, ClientEvent, ConnectOptions, WillOptions};
use tokio::time::timeout;

mod common;

async fn watcher(addr: &str, client_id: &str, filter: &str) -> AsyncClient {
    let mut options = ConnectOptions::new(addr);
    options
        .set_client_id(client_id)
        .set_version(ProtocolVersion::V5);
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    client.subscribe(filter, QoS::AtMostOnce).await.unwrap();
    client
}

#[tokio::test]
async fn test_will_published_on_abnormal_disconnect() {
    let addr = common::start_broker().await;
    let mut observer = watcher(&addr, "will-obs", "will/abnormal").await;

    let mut options = ConnectOptions::new(&addr);
    options
        .set_client_id("will-dropper")
        .set_version(ProtocolVersion::V5)
        .set_will(WillOptions::new("will/abnormal", b"it-died"));
    let (mut client, _ack) = AsyncClient::connect(options).await.unwrap();
    client.abort().await.unwrap();

    let event = timeout(Duration::from_secs(5), observer.recv())
        .await
        .expect("will never arrived")
        .unwrap()
        .unwrap();
    let ClientEvent::Publish(publish) = event else {
        panic!("expected publish");
    };
    assert_eq!(publish.topic, "will/abnormal");
    assert_eq!(publish.payload, b"it-died");
}

#[tokio::test]
async fn test_will_suppressed_on_clean_disconnect() {
    let addr = common::start_broker().await;
    let mut observer = watcher(&addr, "will-obs2", "will/clean").await;

    let mut options = ConnectOptions::new(&addr);
    options
        .set_client_id("will-clean")
        .set_version(ProtocolVersion::V5)
        .set_will(WillOptions::new("will/clean", b"not-this"));
    let (mut client, _ack) = AsyncClient::connect(options).await.unwrap();
    client.disconnect().await.unwrap();

    let result = timeout(Duration::from_secs(1), observer.recv()).await;
    assert!(result.is_err(), "will published after a clean DISCONNECT");
}

#[tokio::test]
async fn test_will_delay_capped_by_session_expiry() {
    let addr = common::start_broker().await;
    let mut observer = watcher(&addr, "will-obs3", "will/delayed").await;

    // Will delay 2s but session expiry 1s: the will goes out when the
    // session ends, between roughly 1s and 2s after the disconnect.
    let mut will = WillOptions::new("will/delayed", b"late");
    will.delay_interval = Some(2);
    let mut options = ConnectOptions::new(&addr);
    options
        .set_client_id("will-delayed")
        .set_version(ProtocolVersion::V5)
        .set_session_expiry_interval(1)
        .set_will(will);
    let (mut client, _ack) = AsyncClient::connect(options).await.unwrap();

    let dropped_at = Instant::now();
    client.abort().await.unwrap();

    let event = timeout(Duration::from_secs(4), observer.recv())
        .await
        .expect("delayed will never arrived")
        .unwrap()
        .unwrap();
    let elapsed = dropped_at.elapsed();
    let ClientEvent::Publish(publish) = event else {
        panic!("expected publish");
    };
    assert_eq!(publish.payload, b"late");
    assert!(
        elapsed >= Duration::from_millis(800),
        "will arrived before the delay: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(2000),
        "will not capped by session expiry: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_delayed_will_canceled_by_reconnect() {
    let addr = common::start_broker().await;
    let mut observer = watcher(&addr, "will-obs4", "will/canceled").await;

    let mut will = WillOptions::new("will/canceled", b"never");
    will.delay_interval = Some(2);
    let mut options = ConnectOptions::new(&addr);
    options
        .set_client_id("will-returner")
        .set_version(ProtocolVersion::V5)
        .set_clean_session(false)
        .set_session_expiry_interval(60)
        .set_will(will);
    let (mut client, _ack) = AsyncClient::connect(options.clone()).await.unwrap();
    client.abort().await.unwrap();

    // Reconnect within the will delay; the will must not be sent
    // [MQTT-3.1.3-9].
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.session_present);

    let result = timeout(Duration::from_secs(3), observer.recv()).await;
    assert!(result.is_err(), "will published despite the reconnect");
    client.disconnect().await.unwrap();
}
