mod common;
use common::*;

use serde_json::json;
use zendure_bridge::database::DatabaseStore;

#[tokio::test]
async fn sqlite_round_trip() -> Result<()> {
    common_setup();

    let store = DatabaseStore::connect("sqlite::memory:").await?;

    assert_eq!(store.get("hub", "chargeMeter").await?, None);

    store.set("hub", "chargeMeter", json!(1.25)).await?;
    store.set("hub", "sn", json!("HOA1NAN9N385989")).await?;
    store.set("p1", "ip", json!("10.0.0.4")).await?;

    assert_eq!(store.get("hub", "chargeMeter").await?, Some(json!(1.25)));
    assert_eq!(store.get("hub", "sn").await?, Some(json!("HOA1NAN9N385989")));
    assert_eq!(store.get("p1", "ip").await?, Some(json!("10.0.0.4")));
    assert_eq!(store.get("p1", "sn").await?, None);

    Ok(())
}

#[tokio::test]
async fn sqlite_upsert_overwrites() -> Result<()> {
    common_setup();

    let store = DatabaseStore::connect("sqlite::memory:").await?;

    store.set("hub", "dischargeMeter", json!(3.0)).await?;
    store.set("hub", "dischargeMeter", json!(0.0)).await?;

    assert_eq!(store.get("hub", "dischargeMeter").await?, Some(json!(0.0)));

    Ok(())
}

#[tokio::test]
async fn device_store_over_database() -> Result<()> {
    common_setup();

    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(DatabaseStore::connect("sqlite::memory:").await?);
    let hub = DeviceStore::new(store.clone(), "hub");

    hub.set_f64("chargeMeter", 0.5).await?;
    hub.set_string("ip", "192.168.1.40").await?;

    assert_eq!(hub.get_f64("chargeMeter").await?, Some(0.5));
    assert_eq!(hub.get_string("ip").await?, Some("192.168.1.40".to_string()));
    assert_eq!(DeviceStore::new(store, "other").get_f64("chargeMeter").await?, None);

    Ok(())
}

#[tokio::test]
async fn unsupported_url_is_rejected() {
    common_setup();

    assert!(DatabaseStore::connect("redis://localhost").await.is_err());
}
