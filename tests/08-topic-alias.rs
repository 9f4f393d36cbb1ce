// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic aliases, v5: registration, alias-only sends, per-connection
//! scope and the out-of-range failures.

use std::time::Duration;

use codec::{v5, ProtocolVersion, QoS};
use corvid::client::{AsyncClient, ClientEvent, ConnectOptions};
use corvid::error::ErrorKind;
use tokio::time::timeout;

mod common;

async fn connect(addr: &str, client_id: &str) -> AsyncClient {
    let mut options = ConnectOptions::new(addr);
    options
        .set_client_id(client_id)
        .set_version(ProtocolVersion::V5);
    let (client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    client
}

#[tokio::test]
async fn test_alias_round_trip() {
    let addr = common::start_broker().await;
    let mut subscriber = connect(&addr, "alias-sub").await;
    subscriber
        .subscribe("topic/long", QoS::AtMostOnce)
        .await
        .unwrap();

    let mut publisher = connect(&addr, "alias-pub").await;

    // First publish registers alias 1 with the full topic.
    let mut packet = v5::PublishPacket::new("topic/long", QoS::AtMostOnce, b"first").unwrap();
    packet.set_topic_alias(1);
    publisher.publish_v5(packet).await.unwrap();

    // Second publish carries only the alias.
    let mut packet = v5::PublishPacket::new("", QoS::AtMostOnce, b"second").unwrap();
    packet.set_topic_alias(1);
    publisher.publish_v5(packet).await.unwrap();

    for expected in [b"first".as_slice(), b"second".as_slice()] {
        let event = timeout(Duration::from_secs(5), subscriber.recv())
            .await
            .expect("aliased publish missing")
            .unwrap()
            .unwrap();
        let ClientEvent::Publish(publish) = event else {
            panic!("expected publish");
        };
        // The broker resolves the alias; subscribers always see the full
        // topic name.
        assert_eq!(publish.topic, "topic/long");
        assert_eq!(publish.payload, expected);
    }
}

#[tokio::test]
async fn test_alias_scope_is_one_connection() {
    let addr = common::start_broker().await;

    let mut publisher = connect(&addr, "alias-scope").await;
    let mut packet = v5::PublishPacket::new("scoped/topic", QoS::AtMostOnce, b"x").unwrap();
    packet.set_topic_alias(1);
    publisher.publish_v5(packet).await.unwrap();
    publisher.disconnect().await.unwrap();

    // A fresh connection has an empty send-side alias map; an alias-only
    // publish is refused locally before any bytes go out.
    let mut publisher = connect(&addr, "alias-scope").await;
    let mut packet = v5::PublishPacket::new("", QoS::AtMostOnce, b"y").unwrap();
    packet.set_topic_alias(1);
    let err = publisher.publish_v5(packet).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TopicAliasInvalid);
}

#[tokio::test]
async fn test_alias_above_peer_maximum_refused() {
    let addr = common::start_broker_with(
        r#"
[general]
topic_alias_maximum = 4

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:0"
"#,
    )
    .await;

    let mut publisher = connect(&addr, "alias-max").await;
    let mut packet = v5::PublishPacket::new("over/limit", QoS::AtMostOnce, b"x").unwrap();
    packet.set_topic_alias(9);
    let err = publisher.publish_v5(packet).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TopicAliasInvalid);

    // Within the advertised bound it works.
    let mut packet = v5::PublishPacket::new("over/limit", QoS::AtMostOnce, b"x").unwrap();
    packet.set_topic_alias(4);
    publisher.publish_v5(packet).await.unwrap();
}

#[tokio::test]
async fn test_inbound_alias_to_client() {
    // A client advertising a topic alias maximum accepts alias-carrying
    // publishes from the broker only up to that bound; the broker in this
    // repo never sends aliases, so the advertised maximum simply must not
    // break normal delivery.
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options
        .set_client_id("alias-recv")
        .set_version(ProtocolVersion::V5)
        .set_topic_alias_maximum(8);
    let (mut subscriber, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    subscriber.subscribe("plain/t", QoS::AtMostOnce).await.unwrap();

    let mut publisher = connect(&addr, "alias-recv-pub").await;
    publisher
        .publish("plain/t", QoS::AtMostOnce, b"no-alias")
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(5), subscriber.recv())
        .await
        .expect("delivery missing")
        .unwrap()
        .unwrap();
    assert!(matches!(event, ClientEvent::Publish(_)));
}
