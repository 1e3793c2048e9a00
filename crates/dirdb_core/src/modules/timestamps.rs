//! Creation and modification timestamps.

use crate::error::DirResult;
use crate::message::{Element, Message, ModFlag};
use crate::module::{Module, Next};
use crate::timestring::now_timestring;
use crate::value::Value;

/// Registered module name.
pub const NAME: &str = "timestamps";

const ON_ADD: [&str; 4] = ["createTimestamp", "modifyTimestamp", "whenCreated", "whenChanged"];
const ON_MODIFY: [&str; 2] = ["modifyTimestamp", "whenChanged"];

/// Stamps records with the time they were created and last changed.
///
/// Attributes the caller supplies are left alone, and control records are
/// never stamped.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timestamps;

impl Module for Timestamps {
    fn name(&self) -> &str {
        NAME
    }

    fn add(&mut self, mut msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if !msg.dn.is_special() {
            let now = now_timestring();
            for attr in ON_ADD {
                if !msg.has_attribute(attr) {
                    msg.add_string(attr, &now);
                }
            }
        }
        next.add(msg)
    }

    fn modify(&mut self, mut msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if !msg.dn.is_special() {
            let now = now_timestring();
            for attr in ON_MODIFY {
                if !msg.has_attribute(attr) {
                    msg.elements.push(Element::with_values(
                        attr,
                        ModFlag::Replace,
                        vec![Value::from(now.as_str())],
                    ));
                }
            }
        }
        next.modify(msg)
    }
}
