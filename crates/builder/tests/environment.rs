//! Property tests for environment composition

use kiln_args::Mutation;
use kiln_builder::{compose, EnvironmentFragment, Tier};
use proptest::prelude::*;

fn arb_tier() -> impl Strategy<Value = Tier> {
    prop_oneof![Just(Tier::Base), Just(Tier::Dependency), Just(Tier::User)]
}

fn arb_fragment() -> impl Strategy<Value = EnvironmentFragment> {
    (
        "[a-z]{1,4}",
        arb_tier(),
        prop::collection::vec(
            (
                prop::sample::select(vec!["PATH", "CPATH", "CFLAGS"]),
                "/[a-z]{1,4}",
            ),
            0..4,
        ),
    )
        .prop_map(|(source, tier, vars)| {
            vars.into_iter()
                .fold(EnvironmentFragment::new(source, tier), |env, (name, value)| {
                    // path-like names accumulate; CFLAGS appends with a space
                    if name == "CFLAGS" {
                        env.with_mutation(name, Mutation::suffix(value, Some(" ")))
                    } else {
                        env.with(name, value)
                    }
                })
        })
}

proptest! {
    #[test]
    fn then_matches_composing_separately(
        fragments in prop::collection::vec(arb_fragment(), 0..5),
    ) {
        let separate = compose(&fragments).unwrap();
        let joined = fragments
            .iter()
            .cloned()
            .fold(EnvironmentFragment::default(), EnvironmentFragment::then);
        prop_assert_eq!(compose(&[joined]).unwrap(), separate);
    }

    #[test]
    fn tiers_order_path_entries(
        base in prop::collection::vec("/[a-z]{1,4}", 0..4),
        user in prop::collection::vec("/[a-z]{1,4}", 0..4),
    ) {
        let base_env = base
            .iter()
            .fold(EnvironmentFragment::new("system", Tier::Base), |env, dir| env.with("PATH", dir.as_str()));
        let user_env = user
            .iter()
            .fold(EnvironmentFragment::new("user", Tier::User), |env, dir| env.with("PATH", dir.as_str()));

        // user contributions land last whichever order the fragments come in
        let expected: Vec<&str> = base.iter().chain(&user).map(String::as_str).collect();
        let forward = compose(&[base_env.clone(), user_env.clone()]).unwrap();
        let backward = compose(&[user_env, base_env]).unwrap();
        prop_assert_eq!(forward.paths("PATH"), expected.clone());
        prop_assert_eq!(backward.paths("PATH"), expected);
    }

    #[test]
    fn user_set_always_wins(
        base in "[a-z]{1,4}",
        user in "[a-z]{1,4}",
        user_first in any::<bool>(),
    ) {
        let base_env = EnvironmentFragment::new("system", Tier::Base).with("CC", base);
        let user_env = EnvironmentFragment::new("user", Tier::User).with("CC", user.clone());
        let fragments = if user_first {
            vec![user_env, base_env]
        } else {
            vec![base_env, user_env]
        };
        let env = compose(&fragments).unwrap();
        prop_assert_eq!(env.get("CC"), Some(user.as_str()));
    }
}
