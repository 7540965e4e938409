//! Property tests for credential macro parsing and search.

use std::collections::BTreeSet;

use credrot::core::creds_macro::{find_macro, find_matching_keys, CredentialRef};
use credrot::core::domain::Field;
use proptest::prelude::*;
use serde_yaml::{Mapping, Value};

fn field() -> impl Strategy<Value = Field> {
    prop::sample::select(Field::ALL.to_vec())
}

fn filler() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 :/@.-]{0,16}"
}

proptest! {
    #[test]
    fn test_macro_found_inside_any_text(
        id in "[a-z][a-z0-9-]{0,15}",
        field in field(),
        single in any::<bool>(),
        prefix in filler(),
        suffix in filler(),
    ) {
        let quote = if single { '\'' } else { '"' };
        let text = format!("{}${{creds.get({q}{}{q}).{}}}{}", prefix, id, field, suffix, q = quote);

        let found = find_macro(&text, None).unwrap();
        prop_assert_eq!(&found.id, &id);
        prop_assert_eq!(found.field, field);
        prop_assert!(find_macro(&text, Some(field)).is_some());
    }

    #[test]
    fn test_search_finds_exactly_the_referencing_keys(
        entries in prop::collection::btree_map("[a-z][a-z0-9_]{0,8}", any::<bool>(), 1..12),
        nested in any::<bool>(),
        prefix in filler(),
    ) {
        let credential = CredentialRef {
            macro_text: "${creds.get(\"db-cred\").password}".to_string(),
            id: "db-cred".to_string(),
            field: Field::Password,
        };

        let mut inner = Mapping::new();
        let mut expected = BTreeSet::new();
        for (key, references) in &entries {
            let value = if *references {
                expected.insert(if nested { format!("outer[0].{}", key) } else { key.clone() });
                format!("{}${{creds.get('db-cred').password}}", prefix)
            } else {
                format!("{}${{creds.get('db-cred').username}}", prefix)
            };
            inner.insert(Value::String(key.clone()), Value::String(value));
        }

        let section = if nested {
            let mut outer = Mapping::new();
            outer.insert(
                Value::String("outer".to_string()),
                Value::Sequence(vec![Value::Mapping(inner)]),
            );
            Value::Mapping(outer)
        } else {
            Value::Mapping(inner)
        };

        let needles = credential.needles();
        let found: BTreeSet<String> = find_matching_keys(&section, &needles, None).into_iter().collect();
        prop_assert_eq!(&found, &expected);

        if let Some(skipped) = expected.iter().next().cloned() {
            let rest: BTreeSet<String> = find_matching_keys(&section, &needles, Some(&skipped))
                .into_iter()
                .collect();
            prop_assert!(!rest.contains(&skipped));
            prop_assert_eq!(rest.len(), expected.len() - 1);
        }
    }
}
