// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Publish/subscribe round trips at every QoS, payload fidelity and
//! ordering.

use std::time::Duration;

use codec::{v5, ProtocolVersion, QoS};
use corvid::client::{AsyncClient, ClientEvent, ConnectOptions};
use tokio::time::timeout;

mod common;

async fn recv_publish(client: &mut AsyncClient) -> corvid::client::ReceivedPublish {
    let event = timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for a publish")
        .unwrap()
        .expect("stream closed");
    match event {
        ClientEvent::Publish(publish) => publish,
        other => panic!("expected publish, got {other:?}"),
    }
}

#[tokio::test]
async fn test_qos0_round_trip() {
    let addr = common::start_broker().await;

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("sub0");
    let (mut subscriber, _ack) = AsyncClient::connect(options).await.unwrap();
    subscriber.subscribe("ps/qos0", QoS::AtMostOnce).await.unwrap();

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("pub0");
    let (mut publisher, _ack) = AsyncClient::connect(options).await.unwrap();
    publisher
        .publish("ps/qos0", QoS::AtMostOnce, b"fire-and-forget")
        .await
        .unwrap();

    let received = recv_publish(&mut subscriber).await;
    assert_eq!(received.topic, "ps/qos0");
    assert_eq!(received.payload, b"fire-and-forget");
    assert_eq!(received.qos, QoS::AtMostOnce);
}

#[tokio::test]
async fn test_qos1_round_trip_with_puback() {
    let addr = common::start_broker().await;

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("sub1");
    let (mut subscriber, _ack) = AsyncClient::connect(options).await.unwrap();
    subscriber
        .subscribe("ps/qos1", QoS::AtLeastOnce)
        .await
        .unwrap();

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("pub1");
    let (mut publisher, _ack) = AsyncClient::connect(options).await.unwrap();
    let result = publisher
        .publish("ps/qos1", QoS::AtLeastOnce, b"once-at-least")
        .await
        .unwrap();
    assert!(result.is_success());
    assert!(result.puback.is_some());

    let received = recv_publish(&mut subscriber).await;
    assert_eq!(received.payload, b"once-at-least");
    assert_eq!(received.qos, QoS::AtLeastOnce);
}

#[tokio::test]
async fn test_qos2_round_trip_with_pubcomp() {
    let addr = common::start_broker().await;

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("sub2");
    let (mut subscriber, _ack) = AsyncClient::connect(options).await.unwrap();
    subscriber.subscribe("ps/qos2", QoS::ExactOnce).await.unwrap();

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("pub2");
    let (mut publisher, _ack) = AsyncClient::connect(options).await.unwrap();
    let result = publisher
        .publish("ps/qos2", QoS::ExactOnce, b"exactly-once")
        .await
        .unwrap();
    assert!(result.is_success());
    assert!(result.pubrec.is_some());
    assert!(result.pubcomp.is_some());

    let received = recv_publish(&mut subscriber).await;
    assert_eq!(received.payload, b"exactly-once");
}

#[tokio::test]
async fn test_publisher_order_preserved_per_subscriber() {
    let addr = common::start_broker().await;

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("sub-ord");
    let (mut subscriber, _ack) = AsyncClient::connect(options).await.unwrap();
    subscriber
        .subscribe("ord/#", QoS::AtLeastOnce)
        .await
        .unwrap();

    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("pub-ord");
    let (mut publisher, _ack) = AsyncClient::connect(options).await.unwrap();
    for i in 0..8u8 {
        publisher
            .publish("ord/seq", QoS::AtLeastOnce, &[i])
            .await
            .unwrap();
    }

    for i in 0..8u8 {
        let received = recv_publish(&mut subscriber).await;
        assert_eq!(received.payload, vec![i]);
    }
}

#[tokio::test]
async fn test_v5_payload_and_user_properties_unaltered() {
    let addr = common::start_broker().await;

    let mut options = ConnectOptions::new(&addr);
    options
        .set_version(ProtocolVersion::V5)
        .set_client_id("sub-props");
    let (mut subscriber, _ack) = AsyncClient::connect(options).await.unwrap();
    subscriber
        .subscribe("props/t", QoS::AtLeastOnce)
        .await
        .unwrap();

    let mut options = ConnectOptions::new(&addr);
    options
        .set_version(ProtocolVersion::V5)
        .set_client_id("pub-props");
    let (mut publisher, _ack) = AsyncClient::connect(options).await.unwrap();

    let payload: Vec<u8> = (0..=255).collect();
    let mut packet = v5::PublishPacket::new("props/t", QoS::AtLeastOnce, &payload).unwrap();
    packet.properties_mut().push(v5::Property::UserProperty(
        codec::StringPairData::from("trace", "abc123").unwrap(),
    ));
    packet.properties_mut().push(v5::Property::UserProperty(
        codec::StringPairData::from("trace", "def456").unwrap(),
    ));
    publisher.publish_v5(packet).await.unwrap();

    let received = recv_publish(&mut subscriber).await;
    assert_eq!(received.payload, payload);
    let user_properties = received.properties.user_properties();
    assert_eq!(user_properties.len(), 2);
    assert_eq!(user_properties[0].value(), "abc123");
    assert_eq!(user_properties[1].value(), "def456");
}

#[tokio::test]
async fn test_no_local_suppresses_own_messages() {
    let addr = common::start_broker().await;

    let mut options = ConnectOptions::new(&addr);
    options
        .set_version(ProtocolVersion::V5)
        .set_client_id("loopy");
    let (mut client, _ack) = AsyncClient::connect(options).await.unwrap();

    let mut request = corvid::client::SubscribeRequest::new("loop/t", QoS::AtMostOnce);
    request.options.no_local = true;
    client.subscribe_many(&[request]).await.unwrap();

    client
        .publish("loop/t", QoS::AtMostOnce, b"to-myself")
        .await
        .unwrap();

    let result = timeout(Duration::from_millis(700), client.recv()).await;
    assert!(result.is_err(), "no-local subscription delivered own message");
}
