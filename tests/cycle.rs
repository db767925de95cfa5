//! A zero-delay feedback loop between two reactors is a dependency
//! cycle; the engine refuses to start.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cadence::runtime::{App, Config, RuntimeError};

#[test]
fn cycle_refuses_to_start() {
    let mut app = App::new(
        "cycle",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let a = app.add_reactor(top, "a").unwrap();
    let b = app.add_reactor(top, "b").unwrap();

    let a_in = app.add_input::<u32>(a, "inp").unwrap();
    let a_out = app.add_output::<u32>(a, "out").unwrap();
    let b_in = app.add_input::<u32>(b, "inp").unwrap();
    let b_out = app.add_output::<u32>(b, "out").unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_a = ran.clone();
    app.add_reaction(a, "forward", move |ctx| {
        ran_a.store(true, Ordering::SeqCst);
        let value = ctx.get::<u32>(a_in)?.unwrap_or(0);
        ctx.set(a_out, value + 1)?;
        Ok(())
    })
    .with_trigger(a_in)
    .with_write(a_out)
    .finish()
    .unwrap();

    let ran_b = ran.clone();
    app.add_reaction(b, "forward", move |ctx| {
        ran_b.store(true, Ordering::SeqCst);
        let value = ctx.get::<u32>(b_in)?.unwrap_or(0);
        ctx.set(b_out, value + 1)?;
        Ok(())
    })
    .with_trigger(b_in)
    .with_write(b_out)
    .finish()
    .unwrap();

    // Legal in isolation; the cycle only closes once both are in place.
    app.connect(a_out, b_in).unwrap();
    app.connect(b_out, a_in).unwrap();

    let result = app.run();
    assert!(matches!(result, Err(RuntimeError::GraphCycle { ref what }) if !what.is_empty()));
    assert!(!ran.load(Ordering::SeqCst), "no reaction may run");
}
