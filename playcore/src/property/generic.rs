//! Properties synthesized from options
//!
//! Every option not flagged `no_property` becomes a property of the same
//! name that copies values through the option's typed storage. Option
//! aliases become alias properties forwarding to their target.

use option_store::{Node, OptionStore, OptionType, SetFlags};

use super::{PropertyAccessor, PropertyTable};
use crate::bridge;
use crate::error::{PropertyError, PropertyResult};
use crate::session::Session;

/// Property backed directly by an option
#[derive(Debug, Clone)]
pub struct OptionProperty {
    option: String,
}

impl OptionProperty {
    pub fn new(option: &str) -> Self {
        Self {
            option: option.to_string(),
        }
    }
}

impl PropertyAccessor for OptionProperty {
    fn get(&self, session: &mut Session) -> PropertyResult<Node> {
        Ok(session.options.value(&self.option)?)
    }

    fn get_type(&self, session: &mut Session) -> PropertyResult<OptionType> {
        session
            .options
            .get(&self.option)
            .map(|opt| opt.option_type().clone())
            .ok_or(PropertyError::Unknown)
    }

    fn set(&self, session: &mut Session, value: Node) -> PropertyResult<()> {
        bridge::write_option(session, &self.option, value, SetFlags::RUNTIME).map(|_| ())
    }
}

/// Property that forwards every action to another property
#[derive(Debug, Clone)]
pub struct AliasProperty {
    target: String,
    deprecated: bool,
}

impl AliasProperty {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            deprecated: false,
        }
    }

    /// Alias that warns once per session when used
    pub fn deprecated(target: &str) -> Self {
        Self {
            target: target.to_string(),
            deprecated: true,
        }
    }
}

impl PropertyAccessor for AliasProperty {
    fn alias(&self) -> Option<(&str, bool)> {
        Some((&self.target, self.deprecated))
    }
}

/// Add one property per exposed option and option alias
pub(crate) fn register_options(table: &mut PropertyTable, options: &OptionStore) {
    for name in options.names() {
        if let Some((target, deprecated)) = options.alias_target(name) {
            // Aliases that lead nowhere are not properties
            if options.resolve(target).is_err() {
                continue;
            }
            let alias = if deprecated {
                AliasProperty::deprecated(target)
            } else {
                AliasProperty::new(target)
            };
            table.register_option(name, alias);
            continue;
        }
        match options.get(name) {
            Some(opt) if !opt.no_property() => table.register_option(name, OptionProperty::new(name)),
            _ => {}
        }
    }
}
