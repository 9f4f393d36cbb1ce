// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Connection establishment across protocol versions and the
//! empty-client-id rules.

use codec::ProtocolVersion;
use corvid::client::{AsyncClient, ConnectOptions};
use corvid::error::ErrorKind;

mod common;

#[tokio::test]
async fn test_connect_v311() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("conn-v3");
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    assert!(!ack.session_present);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_connect_v5() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options
        .set_version(ProtocolVersion::V5)
        .set_client_id("conn-v5");
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_empty_client_id_v5_gets_assigned_id() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options.set_version(ProtocolVersion::V5).set_client_id("");
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    let assigned = ack.assigned_client_id.expect("assigned client id");
    assert!(assigned.starts_with("corvid-"));
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_empty_client_id_with_session_rejected_v311() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("").set_clean_session(false);
    let (_client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(!ack.is_success());
    assert_eq!(
        ack.reason_code,
        codec::v5::ReasonCode::ClientIdentifierNotValid
    );
}

#[tokio::test]
async fn test_anonymous_denied() {
    let addr = common::start_broker_with(
        r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:0"

[security]
allow_anonymous = false
"#,
    )
    .await;
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("anon");
    let (_client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(!ack.is_success());
    assert_eq!(ack.reason_code, codec::v5::ReasonCode::NotAuthorized);
}

#[tokio::test]
async fn test_session_present_after_reconnect() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("presence").set_clean_session(false);

    let (mut client, ack) = AsyncClient::connect(options.clone()).await.unwrap();
    assert!(!ack.session_present);
    client.disconnect().await.unwrap();

    let (mut client, ack) = AsyncClient::connect(options.clone()).await.unwrap();
    assert!(ack.session_present);
    client.disconnect().await.unwrap();

    // Clean start discards the stored session.
    options.set_clean_session(true);
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(!ack.session_present);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_response_information_grants_reply_prefix() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options
        .set_version(ProtocolVersion::V5)
        .set_client_id("req-res")
        .set_request_response_information(true);
    let (mut client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    let prefix = ack.response_information.expect("response information");
    assert!(prefix.ends_with('/'));

    // The session may subscribe below its own response prefix.
    let filter = format!("{prefix}#");
    let result = client.subscribe(&filter, codec::QoS::AtMostOnce).await.unwrap();
    assert!(!result.reason_codes[0].is_error());
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_invalid_filter_all_error() {
    let addr = common::start_broker().await;
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("bad-filter");
    let (mut client, _ack) = AsyncClient::connect(options).await.unwrap();
    let err = client
        .subscribe("sport/#/bad", codec::QoS::AtMostOnce)
        .await
        .unwrap_err();
    // The filter never reaches the wire; the codec refuses it.
    assert_eq!(err.kind(), ErrorKind::MalformedPacket);
    client.disconnect().await.unwrap();
}
