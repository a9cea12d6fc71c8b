//! Typed option storage
//!
//! The configuration layer of the playcore control plane: declared options
//! with typed values, aliases, profiles and per-file backups, plus the
//! dynamically typed `Node` value used throughout the workspace.
//!
//! # Features
//!
//! - **Typed values**: flag, integer, double, time, choice, string, string
//!   list and free-form node options, with optional numeric bounds
//! - **Change detection**: writes report whether the stored value changed
//! - **Aliases**: alternate names, optionally marked deprecated
//! - **Profiles**: named groups of assignments that may include each other
//! - **File-local scope**: values saved on write and restored when a file ends
//!
//! # Quick Start
//!
//! ```rust
//! use option_store::{Node, OptionStore, SetFlags};
//!
//! let mut store = OptionStore::with_defaults();
//!
//! // Parse through the option's type
//! store.set_parsed("loop-playlist", "inf", SetFlags::RUNTIME).unwrap();
//! assert_eq!(store.value("loop-playlist").unwrap(), Node::from("inf"));
//!
//! // Print back in canonical form
//! let opt = store.get("loop-playlist").unwrap();
//! assert_eq!(opt.option_type().print(opt.value()).as_deref(), Some("inf"));
//! ```
//!
//! # Architecture
//!
//! ```text
//! OptionStore
//!     │
//!     ├── entries: BTreeMap<name, Entry>
//!     │       │
//!     │       ├── Option(ConfigOption { def: OptionDef, value: Node, .. })
//!     │       └── Alias { target, deprecated }
//!     │
//!     └── profiles: Vec<Profile>
//! ```

pub mod error;
pub mod node;
pub mod option_type;
pub mod store;

pub use error::{OptionError, Result};
pub use node::Node;
pub use option_type::{format_timestamp, parse_time, OptionKind, OptionType, LIST_ACTIONS};
pub use store::{ConfigOption, Markers, OptionDef, OptionStore, Profile, Resolved, SetFlags, SetOutcome, UpdateFlags};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::node::Node;
    pub use crate::option_type::{OptionKind, OptionType};
    pub use crate::store::{OptionDef, OptionStore, SetFlags, UpdateFlags};
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Printed values parse back to an equal value for every built-in option
        #[test]
        fn prop_print_parse_round_trip(index in 0usize..64, x in -1000.0f64..1000.0, n in -5i64..5) {
            let store = OptionStore::with_defaults();
            let options: Vec<&ConfigOption> = store.options().collect();
            let opt = options[index % options.len()];
            let ty = opt.option_type();

            let candidate = match &ty.kind {
                OptionKind::Flag => Node::Flag(n > 0),
                OptionKind::Int => Node::Int(n),
                OptionKind::Double | OptionKind::Time => Node::Double(x),
                OptionKind::Choice(names) => Node::from(names[n.unsigned_abs() as usize % names.len()].as_str()),
                OptionKind::String => Node::from(format!("value {}", n)),
                OptionKind::StringList => Node::string_list(&["a", "b"]),
                OptionKind::Node => Node::map([("n", Node::Int(n))]),
            };

            if let Ok(value) = ty.validate(opt.name(), candidate) {
                let text = ty.print(&value).unwrap();
                let parsed = ty.parse(opt.name(), &text).unwrap();
                prop_assert!(ty.values_equal(&value, &parsed));
            }
        }

        /// Wrapping add never leaves the declared range
        #[test]
        fn prop_add_stays_in_range(start in 0i64..=3, inc in -10.0f64..10.0, wrap in any::<bool>()) {
            let ty = OptionType::int().with_range(0.0, 3.0);
            let next = ty.add("osd-level", &Node::Int(start), inc, wrap).unwrap();
            let v = next.as_i64().unwrap();
            prop_assert!((0..=3).contains(&v));
        }
    }

    #[test]
    fn test_every_builtin_default_is_valid() {
        let store = OptionStore::with_defaults();
        for opt in store.options() {
            let ty = opt.option_type();
            assert!(ty.validate(opt.name(), opt.default_value().clone()).is_ok(), "{}", opt.name());
        }
    }
}
