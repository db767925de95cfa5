//! Scope and sanity rules enforced by `can_connect`/`connect`.

use cadence::runtime::{App, Config, RuntimeError};

#[test]
fn connection_scope_rules() {
    let mut app = App::new("scopes", Config::default());
    let top = app.top();
    let a = app.add_reactor(top, "a").unwrap();
    let b = app.add_reactor(top, "b").unwrap();
    let inner = app.add_reactor(a, "inner").unwrap();

    let a_out = app.add_output::<u32>(a, "out").unwrap();
    let a_in = app.add_input::<u32>(a, "inp").unwrap();
    let b_out = app.add_output::<u32>(b, "out").unwrap();
    let b_in = app.add_input::<u32>(b, "inp").unwrap();
    let inner_out = app.add_output::<u32>(inner, "out").unwrap();
    let inner_in = app.add_input::<u32>(inner, "inp").unwrap();

    // Output to input between siblings.
    assert!(app.can_connect(a_out, b_in));
    // Input to output is always rejected.
    assert!(!app.can_connect(a_in, b_out));
    // Output forwarding: grandchild to child only.
    assert!(app.can_connect(inner_out, a_out));
    assert!(!app.can_connect(inner_out, b_out));
    // Input forwarding: child to grandchild only.
    assert!(app.can_connect(a_in, inner_in));
    assert!(!app.can_connect(b_in, inner_in));
    // No self-loops.
    assert!(!app.can_connect(a_out, a_out));
}

#[test]
fn at_most_one_upstream_source() {
    let mut app = App::new("single_source", Config::default());
    let top = app.top();
    let a = app.add_reactor(top, "a").unwrap();
    let b = app.add_reactor(top, "b").unwrap();
    let c = app.add_reactor(top, "c").unwrap();
    let a_out = app.add_output::<u32>(a, "out").unwrap();
    let b_out = app.add_output::<u32>(b, "out").unwrap();
    let c_in = app.add_input::<u32>(c, "inp").unwrap();

    app.connect(a_out, c_in).unwrap();
    let err = app.connect(b_out, c_in).unwrap_err();
    assert!(matches!(err, RuntimeError::IllegalConnection { .. }));
}

#[test]
fn type_mismatch_is_rejected() {
    let mut app = App::new("typed", Config::default());
    let top = app.top();
    let a = app.add_reactor(top, "a").unwrap();
    let b = app.add_reactor(top, "b").unwrap();
    let a_out = app.add_output::<u32>(a, "out").unwrap();
    let b_in = app.add_input::<String>(b, "inp").unwrap();

    assert!(!app.can_connect(a_out, b_in));
}
