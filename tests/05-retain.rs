// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained messages: delivery to new subscribers, clearing with a
//! zero-byte payload, retain handling modes and message expiry.

use std::time::Duration;

use codec::{v5, ProtocolVersion, QoS, U32Data};
use corvid::client::{AsyncClient, ClientEvent, ConnectOptions, SubscribeRequest};
use tokio::time::{sleep, timeout};

mod common;

async fn connect(addr: &str, client_id: &str, version: ProtocolVersion) -> AsyncClient {
    let mut options = ConnectOptions::new(addr);
    options.set_client_id(client_id).set_version(version);
    let (client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    client
}

#[tokio::test]
async fn test_retained_delivered_to_new_subscriber() {
    let addr = common::start_broker().await;
    let mut publisher = connect(&addr, "ret-pub", ProtocolVersion::V311).await;

    let mut packet = codec::v3::PublishPacket::new("ret/t", QoS::AtMostOnce, b"kept").unwrap();
    packet.set_retain(true);
    publisher.publish_v3(packet).await.unwrap();
    // QoS 0: make sure the broker processed it before subscribing.
    publisher
        .publish("ret/sync", QoS::AtLeastOnce, b"sync")
        .await
        .unwrap();

    let mut subscriber = connect(&addr, "ret-sub", ProtocolVersion::V311).await;
    subscriber.subscribe("ret/t", QoS::AtMostOnce).await.unwrap();

    let event = timeout(Duration::from_secs(5), subscriber.recv())
        .await
        .expect("no retained message")
        .unwrap()
        .unwrap();
    let ClientEvent::Publish(publish) = event else {
        panic!("expected publish");
    };
    assert_eq!(publish.payload, b"kept");
    assert!(publish.retain);
}

#[tokio::test]
async fn test_retain_clear_with_empty_payload() {
    let addr = common::start_broker().await;
    let mut publisher = connect(&addr, "clr-pub", ProtocolVersion::V311).await;

    let mut packet = codec::v3::PublishPacket::new("ret/t1", QoS::AtMostOnce, b"p1").unwrap();
    packet.set_retain(true);
    publisher.publish_v3(packet).await.unwrap();

    // A zero-byte retained publish removes the entry [MQTT-3.3.1-6]; the
    // QoS 2 handshake doubles as a sync point.
    let mut packet = codec::v3::PublishPacket::new("ret/t1", QoS::ExactOnce, b"").unwrap();
    packet.set_retain(true);
    let result = publisher.publish_v3(packet).await.unwrap();
    assert!(result.is_success());

    let mut subscriber = connect(&addr, "clr-sub", ProtocolVersion::V311).await;
    subscriber.subscribe("ret/t1", QoS::AtMostOnce).await.unwrap();

    let result = timeout(Duration::from_secs(1), subscriber.recv()).await;
    assert!(result.is_err(), "cleared retained message was delivered");
}

#[tokio::test]
async fn test_retain_handling_do_not_send() {
    let addr = common::start_broker().await;
    let mut publisher = connect(&addr, "rh-pub", ProtocolVersion::V5).await;

    let mut packet = v5::PublishPacket::new("rh/t", QoS::AtMostOnce, b"kept").unwrap();
    packet.set_retain(true);
    publisher.publish_v5(packet).await.unwrap();
    publisher
        .publish("rh/sync", QoS::AtLeastOnce, b"sync")
        .await
        .unwrap();

    let mut subscriber = connect(&addr, "rh-sub", ProtocolVersion::V5).await;
    let mut request = SubscribeRequest::new("rh/t", QoS::AtMostOnce);
    request.options.retain_handling = v5::RetainHandling::DoNotSend;
    subscriber.subscribe_many(&[request]).await.unwrap();

    let result = timeout(Duration::from_millis(800), subscriber.recv()).await;
    assert!(result.is_err(), "retained sent despite DoNotSend");
}

#[tokio::test]
async fn test_retained_message_expiry() {
    let addr = common::start_broker().await;
    let mut publisher = connect(&addr, "exp-pub", ProtocolVersion::V5).await;

    let mut packet = v5::PublishPacket::new("exp/t", QoS::AtLeastOnce, b"fleeting").unwrap();
    packet.set_retain(true);
    packet
        .properties_mut()
        .push(v5::Property::MessageExpiryInterval(U32Data::new(1)));
    publisher.publish_v5(packet).await.unwrap();

    // Before the expiry the retained message is there.
    let mut early = connect(&addr, "exp-early", ProtocolVersion::V5).await;
    early.subscribe("exp/t", QoS::AtMostOnce).await.unwrap();
    let event = timeout(Duration::from_secs(2), early.recv())
        .await
        .expect("retained message missing before expiry")
        .unwrap()
        .unwrap();
    assert!(matches!(event, ClientEvent::Publish(_)));

    // After the expiry a new subscription gets nothing.
    sleep(Duration::from_millis(1500)).await;
    let mut late = connect(&addr, "exp-late", ProtocolVersion::V5).await;
    late.subscribe("exp/t", QoS::AtMostOnce).await.unwrap();
    let result = timeout(Duration::from_millis(800), late.recv()).await;
    assert!(result.is_err(), "expired retained message was delivered");
}
