//! Discover Emotiv headsets and print every change to the headset list.
//!
//! ```bash
//! EMOTIV_CLIENT_ID=xxx EMOTIV_CLIENT_SECRET=yyy cargo run --example headsets
//! ```

use std::time::Duration;

use emotiv_cortex_engine::{ConnectionState, CortexConfig, CortexEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let engine = CortexEngine::new(CortexConfig::discover(None)?)?;
    let mut states = engine.events().subscribe_connection_state();
    let mut headsets = engine.events().subscribe_headsets();
    engine.start()?;

    while let Some(state) = states.recv().await {
        println!("Connection: {state}");
        if state == ConnectionState::Authorized {
            break;
        }
    }

    println!("Scanning for headsets...");
    if let Err(e) = engine.refresh_headsets().await {
        println!("  (refresh warning: {e})");
    }

    let watch = async {
        while let Some(list) = headsets.recv().await {
            if list.is_empty() {
                println!("No headsets found. Make sure your headset is powered on.");
                continue;
            }
            println!("Found {} headset(s):", list.len());
            for h in &list {
                println!("  {} ({:?}, {:?})", h.id, h.status, h.connection_type);
                println!("    Model:    {}", h.model);
                if let Some(fw) = &h.firmware {
                    println!("    Firmware: {fw}");
                }
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(15), watch).await;

    engine.stop().await;
    Ok(())
}
