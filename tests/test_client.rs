mod common;
use common::*;

use mockito::Matcher;
use std::time::Duration;
use zendure_bridge::endpoint::DeviceEndpoint;
use zendure_bridge::zendure::{Client, Properties, Report};

fn client() -> Client {
    Client::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn fetch_battery_report() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/properties/report")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(Factory::battery_report(0.0, 300.0, 55))
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("hub", Some(server.host_with_port()));
    let report = client().fetch(&endpoint, DeviceKind::Battery).await.unwrap();

    let Report::Battery(reading) = report else {
        panic!("expected a battery report, got {:?}", report);
    };
    assert_eq!(reading.serial.as_deref(), Some("HOA1NAN9N385989"));
    assert_eq!(reading.grid_input_power, 0.0);
    assert_eq!(reading.output_home_power, 300.0);
    assert_eq!(reading.electric_level, 55.0);
    assert_eq!(reading.min_soc, 10.0);
    assert_eq!(reading.temperature_raw, Some(2981.0));
    assert_eq!(reading.pack_temperature, Some(29.0));

    mock.assert_async().await;
}

#[tokio::test]
async fn fetch_meter_report() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/properties/report")
        .with_status(200)
        .with_body(Factory::meter_report(1200.0))
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("p1", Some(server.host_with_port()));
    match client().fetch(&endpoint, DeviceKind::Meter).await.unwrap() {
        Report::Meter(reading) => {
            assert_eq!(reading.total_power, 1200.0);
            assert_eq!(reading.phase_power, [Some(600.0), Some(600.0), None]);
        }
        other => panic!("expected a meter report, got {:?}", other),
    }
}

#[tokio::test]
async fn fetch_http_status_error() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/properties/report")
        .with_status(503)
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("hub", Some(server.host_with_port()));
    let err = client().fetch(&endpoint, DeviceKind::Battery).await.unwrap_err();
    assert!(
        matches!(err, DeviceError::Transport(TransportError::HttpStatus(503))),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn fetch_missing_field_is_malformed() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/properties/report")
        .with_status(200)
        .with_body(r#"{"sn":"X","properties":{"gridInputPower":0,"electricLevel":40}}"#)
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("hub", Some(server.host_with_port()));
    let err = client().fetch(&endpoint, DeviceKind::Battery).await.unwrap_err();
    match err {
        DeviceError::Transport(TransportError::MalformedBody(msg)) => {
            assert!(msg.contains("outputHomePower"), "{}", msg)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn fetch_without_address() {
    common_setup();

    let endpoint = DeviceEndpoint::new("hub", None);
    let err = client().fetch(&endpoint, DeviceKind::Battery).await.unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Configuration(ConfigurationError::MissingAddress(_))
    ));
}

#[tokio::test]
async fn send_posts_serial_and_properties() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/properties/write")
        .match_body(Matcher::Json(serde_json::json!({
            "sn": "HOA1NAN9N385989",
            "properties": { "acMode": 1, "inputLimit": 800 }
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("hub", Some(server.host_with_port()));
    client()
        .send(&endpoint, Some("HOA1NAN9N385989"), &Properties::power_target(-800))
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn send_retries_once() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", "/properties/write")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let succeeding = server
        .mock("POST", "/properties/write")
        .with_status(200)
        .with_body("")
        .expect(1)
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("hub", Some(server.host_with_port()));
    let ack = client()
        .send(&endpoint, None, &Properties::power_target(200))
        .await
        .unwrap();
    assert_eq!(ack.0, serde_json::Value::Null);

    failing.assert_async().await;
    succeeding.assert_async().await;
}

#[tokio::test]
async fn send_gives_up_after_second_failure() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/properties/write")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let endpoint = DeviceEndpoint::new("hub", Some(server.host_with_port()));
    let err = client()
        .send(&endpoint, None, &Properties::smart_mode())
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Transport(TransportError::HttpStatus(500))));

    mock.assert_async().await;
}

#[tokio::test]
async fn probe_rejects_bad_address() {
    common_setup();

    let err = client().probe("192.168.1").await.unwrap_err();
    assert!(err.to_string().contains("192.168.1"), "{}", err);
}

#[tokio::test]
async fn fetch_timeout() {
    common_setup();

    let (address, _accepted) = silent_device().await;
    let client = Client::new(Duration::from_millis(300)).unwrap();

    let endpoint = DeviceEndpoint::new("hub", Some(address));
    let err = client.fetch(&endpoint, DeviceKind::Battery).await.unwrap_err();
    assert!(
        matches!(err, DeviceError::Transport(TransportError::Timeout)),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn fetch_connection_refused() {
    common_setup();

    // nothing listens on port 1
    let endpoint = DeviceEndpoint::new("hub", Some("127.0.0.1:1".to_string()));
    let err = client().fetch(&endpoint, DeviceKind::Battery).await.unwrap_err();
    assert!(
        matches!(err, DeviceError::Transport(TransportError::Unreachable(_))),
        "{:?}",
        err
    );
}
