//! CLI output handling - pipeline event receiver loop.
//!
//! Renders snap and store events either as human-readable lines or as JSON
//! lines tagged with their source.

use std::io::{self, Write};

use anyhow::Result;

use crate::coalescer::SnapEvent;
use crate::pipeline::GameLensEvents;
use crate::store::StoreEvent;

/// Print events until both streams close.
pub async fn run_event_loop(events: GameLensEvents, json_mode: bool) -> Result<()> {
    let GameLensEvents {
        mut snaps,
        mut store,
    } = events;
    let (mut snaps_open, mut store_open) = (true, true);

    while snaps_open || store_open {
        tokio::select! {
            event = snaps.recv(), if snaps_open => match event {
                Some(event) => print_snap_event(&event, json_mode)?,
                None => snaps_open = false,
            },
            event = store.recv(), if store_open => match event {
                Some(event) => print_store_event(&event, json_mode)?,
                None => store_open = false,
            },
        }
    }

    Ok(())
}

fn print_snap_event(event: &SnapEvent, json_mode: bool) -> Result<()> {
    if json_mode {
        let json = serde_json::json!({ "source": "snap", "event": event });
        println!("{}", json);
        io::stdout().flush()?;
        return Ok(());
    }

    match event {
        SnapEvent::Queued { reason } => println!("  snap queued     {}", reason),
        SnapEvent::Dropped { reason, why } => println!("  snap dropped    {} ({})", reason, why),
        SnapEvent::SensitiveChanged { sensitive } => {
            println!("  sensitive       {}", if *sensitive { "on" } else { "off" })
        }
        SnapEvent::Captured { capture_id, reasons } => {
            let reasons: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();
            println!("  captured        {} [{}]", capture_id, reasons.join(", "))
        }
        SnapEvent::CaptureFailed { error } => eprintln!("  capture failed  {}", error),
    }
    Ok(())
}

fn print_store_event(event: &StoreEvent, json_mode: bool) -> Result<()> {
    if json_mode {
        let json = serde_json::json!({ "source": "store", "event": event });
        println!("{}", json);
        io::stdout().flush()?;
        return Ok(());
    }

    match event {
        StoreEvent::CaptureSaved(stored) => {
            println!("  saved           {}", stored.image_path.display())
        }
        StoreEvent::CaptureFailed { capture_id, error } => {
            eprintln!("  store failed    {} ({})", capture_id, error)
        }
        StoreEvent::Evicted { partition, count } => {
            println!("  evicted         {} from {}", count, partition.display())
        }
    }
    Ok(())
}
