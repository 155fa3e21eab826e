//! Generic-argument stack tests — outward pass-through resolution, scope
//! pinning, and LIFO enforcement.

use tswinmd::semantics::{FundamentalKind, GenericArgs, TypeSemantics};

#[test]
fn declared_params_resolve_by_slot() {
    let mut args = GenericArgs::default();
    assert!(args.push_params(&["T".to_string(), "U".to_string()]));
    let (semantics, depth) = args.resolve(1).expect("slot 1 resolves");
    assert!(matches!(semantics, TypeSemantics::GenericParamDef(name) if name == "U"));
    assert_eq!(depth, 1);
}

#[test]
fn empty_declarations_push_nothing() {
    let mut args = GenericArgs::default();
    assert!(!args.push_params(&[]));
    assert_eq!(args.depth(), 0);
}

#[test]
fn pass_through_binding_resolves_outward() {
    // H<string> encloses a use of G<U> where U is H's first parameter:
    // G's argument vector carries a pass-through index into H's scope.
    let mut args = GenericArgs::default();
    args.push_args(vec![TypeSemantics::Fundamental(FundamentalKind::String)]);
    args.push_args(vec![TypeSemantics::GenericIndex(0)]);

    let (semantics, depth) = args.resolve(0).expect("pass-through resolves");
    assert!(matches!(
        semantics,
        TypeSemantics::Fundamental(FundamentalKind::String)
    ));
    // Resolved in the outermost vector.
    assert_eq!(depth, 1);
}

#[test]
fn generic_scope_round_trip() {
    // G<T> used as G<U> inside H<U>: resolving T at the call site must
    // yield exactly what U resolves to in H's scope.
    let mut args = GenericArgs::default();
    assert!(args.push_params(&["U".to_string()]));
    args.push_args(vec![TypeSemantics::GenericIndex(0)]);

    let (at_call_site, _) = args.resolve(0).expect("resolves");

    let mut outer_only = GenericArgs::default();
    assert!(outer_only.push_params(&["U".to_string()]));
    let (in_outer_scope, _) = outer_only.resolve(0).expect("resolves");

    match (&at_call_site, &in_outer_scope) {
        (TypeSemantics::GenericParamDef(a), TypeSemantics::GenericParamDef(b)) => {
            assert_eq!(a, b)
        }
        _ => panic!("expected generic parameter definitions"),
    }
}

#[test]
fn pinned_scope_resolves_against_enclosing_vectors_only() {
    let mut args = GenericArgs::default();
    args.push_args(vec![TypeSemantics::Fundamental(FundamentalKind::String)]);
    args.push_args(vec![TypeSemantics::GenericIndex(0)]);

    let (_, depth) = args.resolve(0).expect("resolves");
    // Pin the cursor at the resolution point: further lookups may only see
    // vectors strictly below it, and here there are none.
    let prior = args.set_scope(depth);
    let error = args.resolve(0).err().expect("nothing in scope");
    assert!(error.to_string().contains("no generic arguments"));
    args.set_scope(prior);

    // Cursor restored: resolution works again.
    assert!(args.resolve(0).is_ok());
}

#[test]
fn three_level_pass_through() {
    let mut args = GenericArgs::default();
    args.push_args(vec![TypeSemantics::Fundamental(FundamentalKind::I4)]);
    args.push_args(vec![TypeSemantics::GenericIndex(0)]);
    args.push_args(vec![TypeSemantics::GenericIndex(0)]);

    let (semantics, depth) = args.resolve(0).expect("resolves through two hops");
    assert!(matches!(
        semantics,
        TypeSemantics::Fundamental(FundamentalKind::I4)
    ));
    assert_eq!(depth, 1);
}

#[test]
fn index_out_of_range_is_an_error() {
    let mut args = GenericArgs::default();
    args.push_args(vec![TypeSemantics::Fundamental(FundamentalKind::I4)]);
    let error = args.resolve(3).err().expect("out of range");
    assert!(error.to_string().contains("out of range"));
}

#[test]
fn resolve_with_empty_stack_is_an_error() {
    let args = GenericArgs::default();
    assert!(args.resolve(0).is_err());
}

#[test]
fn pushes_and_pops_nest() {
    let mut args = GenericArgs::default();
    args.push_args(vec![TypeSemantics::Fundamental(FundamentalKind::Bool)]);
    args.push_args(vec![TypeSemantics::Fundamental(FundamentalKind::U4)]);
    assert_eq!(args.depth(), 2);
    args.pop();
    args.pop();
    assert_eq!(args.depth(), 0);
}

#[test]
#[should_panic(expected = "underflow")]
fn pop_on_empty_stack_panics() {
    let mut args = GenericArgs::default();
    args.pop();
}
