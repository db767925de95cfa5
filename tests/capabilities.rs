//! Capability keys gate privileged access: ports delegate across at
//! most one hierarchy level, actions never cross it at all.

use cadence::runtime::{App, Config, RuntimeError, TimeValue};

#[test]
fn grandchild_port_is_out_of_reach() {
    let mut app = App::new("keys", Config::default());
    let top = app.top();
    let child = app.add_reactor(top, "child").unwrap();
    let grandchild = app.add_reactor(child, "grandchild").unwrap();
    let deep_out = app.add_output::<u32>(grandchild, "out").unwrap();

    // One level down is fine.
    let child_out = app.add_output::<u32>(child, "out").unwrap();
    app.add_reaction(top, "near", move |_ctx| Ok(()))
        .with_trigger(child_out)
        .finish()
        .unwrap();

    // Two levels down is refused.
    let err = app
        .add_reaction(top, "far", move |_ctx| Ok(()))
        .with_trigger(deep_out)
        .finish()
        .unwrap_err();
    assert!(matches!(err, RuntimeError::KeyRefused { .. }));
}

#[test]
fn child_action_is_never_granted() {
    let mut app = App::new("keys_actions", Config::default());
    let top = app.top();
    let child = app.add_reactor(top, "child").unwrap();
    let child_action = app
        .add_action::<u32>(child, "a", TimeValue::ZERO)
        .unwrap();

    let err = app
        .add_reaction(top, "sneak", move |_ctx| Ok(()))
        .with_sched(child_action)
        .finish()
        .unwrap_err();
    assert!(matches!(err, RuntimeError::KeyRefused { .. }));

    // The owning reactor itself may schedule it.
    app.add_reaction(child, "legit", move |ctx| {
        ctx.schedule(child_action, TimeValue::ZERO, Some(1u32))?;
        Ok(())
    })
    .with_trigger(cadence::runtime::Trigger::Startup)
    .with_sched(child_action)
    .finish()
    .unwrap();
}
