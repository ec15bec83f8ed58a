//! Test entry points the CLI can select by name (spec.md §6 `--assembly`;
//! see DESIGN.md for why a systems language resolves it to a static
//! registry rather than dynamic assembly loading).

use psharp_core::{Event, MachineTypeBuilder, Runtime, StateDef};
use std::sync::Arc;

pub type EntryPoint = fn(&mut Runtime) -> anyhow::Result<()>;

pub fn lookup(name: &str) -> Option<EntryPoint> {
    match name {
        "ping_pong" => Some(ping_pong),
        "deferral" => Some(deferral),
        _ => None,
    }
}

pub fn names() -> &'static [&'static str] {
    &["ping_pong", "deferral"]
}

/// Scenario S1 (spec.md §8): a client sends `Ping`, waits for `Pong`,
/// and halts.
fn ping_pong(runtime: &mut Runtime) -> anyhow::Result<()> {
    let server_ty = MachineTypeBuilder::new("Server")
        .state(StateDef::new("Active").start().on_action(
            "Ping",
            Arc::new(|ctx, event| {
                if let Ok(sender) = serde_json::from_value::<psharp_core::MachineId>(event.payload.clone()) {
                    ctx.send(sender, Event::new("Pong"));
                }
                Ok(())
            }),
        ))
        .build()?;
    let server_id = runtime.create_machine(server_ty, None)?;

    let client_ty = MachineTypeBuilder::new("Client")
        .state(
            StateDef::new("Active").start().on_entry(Arc::new(move |ctx, _e| {
                let payload = serde_json::to_value(&ctx.machine_id)
                    .map_err(|e| psharp_core::RuntimeError::Internal(e.to_string()))?;
                let ping = Event::new("Ping").with_payload(payload);
                ctx.send(server_id.clone(), ping);
                ctx.goto("Waiting");
                Ok(())
            })),
        )
        .state(StateDef::new("Waiting").on_action(
            "Pong",
            Arc::new(|ctx, _e| {
                ctx.pop();
                Ok(())
            }),
        ))
        .build()?;
    runtime.create_machine(client_ty, None)?;
    Ok(())
}

/// Scenario S3 (spec.md §8): a machine defers `E1` while handling `E2`,
/// then handles the deferred `E1` once it reaches a state that accepts it.
fn deferral(runtime: &mut Runtime) -> anyhow::Result<()> {
    let ty = MachineTypeBuilder::new("Deferrer")
        .state(
            StateDef::new("First")
                .start()
                .defer("E1")
                .on_action(
                    "E2",
                    Arc::new(|ctx, _e| {
                        ctx.goto("Second");
                        Ok(())
                    }),
                ),
        )
        .state(StateDef::new("Second").on_action(
            "E1",
            Arc::new(|ctx, _e| {
                ctx.pop();
                Ok(())
            }),
        ))
        .build()?;
    let id = runtime.create_machine(ty, None)?;
    runtime.send_event(id.clone(), Event::new("E1"), None)?;
    runtime.send_event(id, Event::new("E2"), None)?;
    Ok(())
}
