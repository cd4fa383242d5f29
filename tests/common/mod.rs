//! Shared helpers for integration tests.

#![allow(dead_code)]

use gdds_client::{
    AuthToken, ClientConfig, EpochMillis, KeyValueStore, RetryPolicy, ScriptedChannel,
    SessionConfig, StreamClient, StreamRecord, TransitMode,
};
use std::sync::Arc;
use std::time::Duration;

pub const API_KEY: &str = "test-api-key";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn record(n: i64) -> StreamRecord {
    StreamRecord {
        vehicle: format!("veh-{n}"),
        source_ip: Some("192.0.2.10".to_string()),
        timestamp: EpochMillis(1_700_000_000_000 + n),
        latitude: 37.0 + n as f64 * 0.001,
        longitude: -122.0,
        heading: 180.0,
        speed: 11.5,
        transit_mode: TransitMode::Bus,
        message: None,
        server_timestamp: EpochMillis(1_700_000_000_050 + n),
    }
}

/// Config with millisecond backoff so retry tests stay fast.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        session: SessionConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            max_identity_rotations: 3,
        },
        ..Default::default()
    }
}

pub fn client_with_store(
    channel: ScriptedChannel,
    store: Arc<dyn KeyValueStore>,
    config: ClientConfig,
) -> StreamClient<ScriptedChannel> {
    init_tracing();
    StreamClient::with_store(channel, AuthToken::new(API_KEY), store, config).unwrap()
}
