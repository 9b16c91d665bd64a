//! Demo workload: a periodic heartbeat incident and a chain that reacts to it.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use serde_json::json;
use tickwork_engine::{from_consumer, responder, IncidentCode, Outcome, Payload, Processor, StrategyId};
use tracing::info;

pub const HEARTBEAT: &str = "heartbeat";

/// Start the heartbeat and the demo chain. Returns the chain's root.
pub fn install(processor: &mut Processor, heartbeat_ms: i64) -> Result<StrategyId> {
    let heartbeat = processor.code(HEARTBEAT);
    let beats = Rc::new(Cell::new(0_u64));

    let counter = beats.clone();
    processor.on_incident(
        heartbeat,
        from_consumer(move |_, incident| {
            counter.set(counter.get() + 1);
            let beat = incident.detail["beat"].as_u64().unwrap_or_default();
            info!(beat, at = incident.timestamp(), "Heartbeat");
        }),
        -1,
        None,
    )?;
    schedule_beat(processor, heartbeat, heartbeat_ms, 1);

    let quiet = processor
        .chain("idle", from_consumer(|_, _| info!("Nothing to report")))
        .with_merit(|| 1.0)
        .build();
    let seen = beats.clone();
    let report = processor
        .chain(
            "report",
            from_consumer(move |_, _| info!(beats = seen.get(), "Reporting heartbeats")),
        )
        .with_merit({
            let beats = beats.clone();
            move || beats.get() as f32
        })
        .build();

    let root = processor
        .chain("warm up", from_consumer(|_, _| info!("Waiting for three heartbeats")))
        .then_on_incident(heartbeat, None, 3)
        .then_delay("cool down", heartbeat_ms / 2, None)
        .then_decide_best_choice("summarise", &[quiet, report])
        .finally(responder(|_, _| {
            info!("Demo chain finished");
            Ok(Outcome::Success)
        }))
        .build();

    processor.enqueue(root);
    Ok(root)
}

fn schedule_beat(processor: &mut Processor, code: IncidentCode, every_ms: i64, beat: u64) {
    processor.delay(
        every_ms,
        Payload::action(move |p| {
            p.notify_now(code, json!(HEARTBEAT), json!({ "beat": beat }))?;
            schedule_beat(p, code, every_ms, beat + 1);
            Ok(())
        }),
    );
}
