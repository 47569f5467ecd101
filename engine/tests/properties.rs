use engine::matcher::{InputMatcher, InputRules, MatchOutcome};
use engine::metrics;
use engine::projector::OpponentProjector;
use engine::text::TargetText;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Key {
    Type(char),
    Delete,
}

fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        4 => prop::sample::select(vec!['a', 'b', 'c', ' ']).prop_map(Key::Type),
        1 => Just(Key::Delete),
    ]
}

fn apply(buf: &str, key: &Key) -> String {
    match key {
        Key::Type(c) => {
            let mut next = buf.to_string();
            next.push(*c);
            next
        }
        Key::Delete => {
            let mut next = buf.to_string();
            next.pop();
            next
        }
    }
}

proptest! {
    #[test]
    fn cursor_is_monotonic_and_bounded(
        target in "[abc ]{1,40}",
        keys in prop::collection::vec(key_strategy(), 0..200),
        no_backspace in any::<bool>(),
    ) {
        let text = TargetText::plain(&target).unwrap();
        let mut matcher = InputMatcher::new(InputRules { no_backspace, ..InputRules::default() });
        let mut buf = String::new();
        let mut last_cursor = 0;

        for (i, key) in keys.iter().enumerate() {
            let res = matcher.submit(&apply(&buf, key), &text, i as u64 * 100);
            buf = res.buffer;
            let p = matcher.progress();
            prop_assert!(p.cursor_index >= last_cursor);
            prop_assert!(p.cursor_index <= text.len());
            last_cursor = p.cursor_index;

            let m = metrics::compute(p, text.len(), 0, i as u64 * 100);
            prop_assert!(m.wpm.is_finite() && m.wpm >= 0.0);
            prop_assert!(m.accuracy.is_finite() && (0.0..=100.0).contains(&m.accuracy));
            prop_assert!((0.0..=100.0).contains(&m.progress_pct));
        }
    }

    #[test]
    fn blocked_deletion_changes_nothing(
        target in "[ab]{5,20}",
        prefix in "[ab]{1,10}",
        cut in 1usize..10,
    ) {
        let text = TargetText::plain(&target).unwrap();
        let mut matcher = InputMatcher::new(InputRules { no_backspace: true, ..InputRules::default() });
        let mut buf = String::new();
        for c in prefix.chars() {
            buf.push(c);
            buf = matcher.submit(&buf, &text, 0).buffer;
        }
        let before = matcher.progress().clone();
        let keep = buf.chars().count().saturating_sub(cut);
        let shorter: String = buf.chars().take(keep).collect();
        prop_assume!(shorter.chars().count() < buf.chars().count());

        let res = matcher.submit(&shorter, &text, 1_000);
        let blocked = res.outcome == MatchOutcome::DeletionBlocked || res.outcome == MatchOutcome::Ignored;
        prop_assert!(blocked);
        prop_assert_eq!(matcher.progress(), &before);
    }

    #[test]
    fn projection_never_regresses(
        steps in prop::collection::vec((1u64..2_000, prop::option::of((0usize..300, 0.0f64..200.0))), 1..60),
    ) {
        let mut projector = OpponentProjector::new(300, 15);
        projector.add_remote("op", "Opponent", 0);
        let mut now = 0;
        let mut last = 0;

        for (dt, sample) in steps {
            now += dt;
            if let Some((index, wpm)) = sample {
                projector.on_authoritative_update("op", index, wpm, now);
            }
            projector.tick(now);
            let current = projector.render_index("op").unwrap();
            prop_assert!(current >= last);
            prop_assert!(current <= 300);
            last = current;
        }
    }

    #[test]
    fn ghost_projection_is_pure(wpm in 1.0f64..250.0, elapsed in 0u64..600_000) {
        let a = engine::projector::ghost_index(wpm, elapsed, 1_000);
        let b = engine::projector::ghost_index(wpm, elapsed, 1_000);
        prop_assert_eq!(a, b);
        prop_assert!(a <= 1_000);
    }
}
