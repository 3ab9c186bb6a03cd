#![allow(dead_code)]

pub mod mock_cortex;

use emotiv_cortex_engine::{ConnectionState, CortexConfig, Subscription};
use tokio::time::timeout;

use mock_cortex::{MockCortexServer, STEP_TIMEOUT};

pub const HEADSET: &str = "INSIGHT-A1B2C3D4";
pub const OTHER_HEADSET: &str = "EPOCX-E50202E1";

/// Config pointing at the mock server, with instant reconnects and no polling.
pub fn engine_config(url: String) -> CortexConfig {
    let mut config = CortexConfig::new("test-client-id", "test-client-secret");
    config.cortex_url = url;
    config.reconnect.base_delay_secs = 0;
    config.reconnect.max_delay_secs = 0;
    config.timeouts.rpc_timeout_secs = 2;
    config.headsets.poll_interval_secs = 0;
    config
}

pub async fn start_server_or_skip(test_name: &str) -> Option<MockCortexServer> {
    match MockCortexServer::start().await {
        Ok(server) => Some(server),
        Err(err) => {
            eprintln!("Skipping {test_name}: unable to start mock server: {err}");
            None
        }
    }
}

/// Next item of `subscription`, failing the test if none arrives in time.
pub async fn next<T>(subscription: &mut Subscription<T>) -> T {
    timeout(STEP_TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed")
}

/// Whether `subscription` closes (after draining) within the step timeout.
pub async fn closes<T>(subscription: &mut Subscription<T>) -> bool {
    timeout(STEP_TIMEOUT, async {
        while subscription.recv().await.is_some() {}
    })
    .await
    .is_ok()
}

pub async fn wait_for_state(states: &mut Subscription<ConnectionState>, target: ConnectionState) {
    timeout(STEP_TIMEOUT, async {
        loop {
            match states.recv().await {
                Some(state) if state == target => return,
                Some(_) => {}
                None => panic!("connection state topic closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"));
}
