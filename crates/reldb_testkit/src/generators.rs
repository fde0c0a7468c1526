//! Property-based test generators using proptest.
//!
//! Provides strategies for generating values, point rows and users with
//! addresses that satisfy the fixture tables' constraints.

use crate::fixtures::{Address, User};
use proptest::prelude::*;
use reldb_core::Value;

/// Strategy for generating storable SQL values of every kind.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Real),
        "[ -~]{0,24}".prop_map(Value::Text),
        any::<bool>().prop_map(Value::Bool),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
    ]
}

/// Strategy for generating a point with small coordinates.
pub fn point_strategy() -> impl Strategy<Value = (i64, i64)> {
    (-1000i64..1000, -1000i64..1000)
}

/// Strategy for generating up to `max` points.
pub fn points_strategy(max: usize) -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec(point_strategy(), 0..=max)
}

/// Strategy for generating valid SQL identifiers that are not keywords.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("t_[a-z0-9_]{0,16}").expect("Invalid regex")
}

/// Strategy for generating a new, unsaved user.
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        prop::string::string_regex("[a-z]{1,30}").expect("Invalid regex"),
        prop::string::string_regex("[A-Z][a-z]{0,10} [A-Z][a-z]{0,12}").expect("Invalid regex"),
    )
        .prop_map(|(name, fullname)| User::new(&name, &fullname))
}

/// Strategy for generating an unsaved address for an unsaved owner.
pub fn address_strategy() -> impl Strategy<Value = Address> {
    prop::string::string_regex("[a-z]{1,10}@[a-z]{1,8}\\.(org|com)")
        .expect("Invalid regex")
        .prop_map(|email| Address::new(&email))
}

/// Strategy for generating users, each with up to three addresses.
pub fn users_with_addresses_strategy(
    max_users: usize,
) -> impl Strategy<Value = Vec<(User, Vec<Address>)>> {
    prop::collection::vec(
        (user_strategy(), prop::collection::vec(address_strategy(), 0..=3)),
        1..=max_users,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_users_fit_user_account(user in user_strategy()) {
            prop_assert!(user.id.is_none());
            prop_assert!(!user.name.is_empty() && user.name.len() <= 30);
            prop_assert!(user.fullname.contains(' '));
        }

        #[test]
        fn generated_identifiers_parse_as_table_names(name in identifier_strategy()) {
            let sql = format!("CREATE TABLE {name} (x int)");
            prop_assert!(reldb_core::parse(&sql).is_ok());
        }

        #[test]
        fn generated_reals_are_finite(value in value_strategy()) {
            if let Value::Real(r) = value {
                prop_assert!(r.is_finite());
            }
        }
    }
}
