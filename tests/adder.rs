//! Two input ports receive values at the same tag; the reaction writes
//! their sum, which a sibling observes within the same instant.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, Trigger};

#[test]
fn adder() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut app = App::new(
        "adder_test",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let source = app.add_reactor(top, "source").unwrap();
    let adder = app.add_reactor(top, "adder").unwrap();
    let sink = app.add_reactor(top, "sink").unwrap();

    let a_out = app.add_output::<u32>(source, "a").unwrap();
    let b_out = app.add_output::<u32>(source, "b").unwrap();
    let in1 = app.add_input::<u32>(adder, "in1").unwrap();
    let in2 = app.add_input::<u32>(adder, "in2").unwrap();
    let out = app.add_output::<u32>(adder, "out").unwrap();
    let sink_in = app.add_input::<u32>(sink, "inp").unwrap();

    app.add_reaction(source, "emit", move |ctx| {
        ctx.set(a_out, 2u32)?;
        ctx.set(b_out, 1u32)?;
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_write(a_out)
    .with_write(b_out)
    .finish()
    .unwrap();

    app.add_reaction(adder, "add", move |ctx| {
        let a = ctx.get::<u32>(in1)?.unwrap_or(0);
        let b = ctx.get::<u32>(in2)?.unwrap_or(0);
        ctx.set(out, a + b)?;
        Ok(())
    })
    .with_trigger(in1)
    .with_trigger(in2)
    .with_write(out)
    .finish()
    .unwrap();

    let result = Arc::new(Mutex::new(None));
    let observed = result.clone();
    app.add_reaction(sink, "check", move |ctx| {
        *observed.lock().unwrap() = ctx.get::<u32>(sink_in)?;
        Ok(())
    })
    .with_trigger(sink_in)
    .finish()
    .unwrap();

    app.connect(a_out, in1).unwrap();
    app.connect(b_out, in2).unwrap();
    app.connect(out, sink_in).unwrap();

    app.run().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(3));
}
