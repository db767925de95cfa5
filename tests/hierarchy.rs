//! Data transport across the hierarchy: a grandchild's output is
//! forwarded through its parent's output to a sibling's input.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, Trigger};

#[test]
fn hierarchy() {
    let mut app = App::new(
        "hierarchy",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let outer = app.add_reactor(top, "outer").unwrap();
    let inner = app.add_reactor(outer, "inner").unwrap();
    let logger = app.add_reactor(top, "logger").unwrap();

    let inner_out = app.add_output::<String>(inner, "out").unwrap();
    let outer_out = app.add_output::<String>(outer, "out").unwrap();
    let logger_in = app.add_input::<String>(logger, "inp").unwrap();

    app.add_reaction(inner, "emit", move |ctx| {
        ctx.set(inner_out, "foo".to_owned())?;
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_write(inner_out)
    .finish()
    .unwrap();

    let received = Arc::new(Mutex::new(None));
    let observed = received.clone();
    app.add_reaction(logger, "log", move |ctx| {
        *observed.lock().unwrap() = ctx.get::<String>(logger_in)?;
        assert!(ctx.get_elapsed_logical_time().is_zero());
        Ok(())
    })
    .with_trigger(logger_in)
    .finish()
    .unwrap();

    // Scope rules: forwarding up the hierarchy and across siblings is
    // accepted; the reverse direction is not.
    assert!(app.can_connect(inner_out, outer_out));
    assert!(app.can_connect(outer_out, logger_in));
    assert!(!app.can_connect(logger_in, outer_out));

    app.connect(inner_out, outer_out).unwrap();
    app.connect(outer_out, logger_in).unwrap();

    app.run().unwrap();
    assert_eq!(*received.lock().unwrap(), Some("foo".to_owned()));
}
