//! `instanceType` enforcement.
//!
//! On add, a supplied `instanceType` must be single-valued. Without the
//! naming-context-head bit it may only be `0` or carry the writable bit;
//! with it, the writable bit is mandatory. A missing value defaults to
//! writable. The attribute can never be changed afterwards.

use super::single_value;
use crate::error::{DirError, DirResult};
use crate::message::Message;
use crate::module::{Module, Next};
use crate::syntax::parse_integer;

/// Registered module name.
pub const NAME: &str = "instancetype";

/// The object is the head of a naming context.
pub const INSTANCE_TYPE_IS_NC_HEAD: u32 = 0x0000_0001;
/// The object is writable on this replica.
pub const INSTANCE_TYPE_WRITE: u32 = 0x0000_0004;

const ATTR: &str = "instanceType";

/// Validates and defaults `instanceType`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceType;

fn check(instance_type: u32) -> DirResult<()> {
    if instance_type & INSTANCE_TYPE_IS_NC_HEAD == 0 {
        if instance_type != 0 && instance_type & INSTANCE_TYPE_WRITE == 0 {
            return Err(DirError::constraint(
                "instancetype: if TYPE_IS_NC_HEAD wasn't set, then only TYPE_WRITE or 0 are allowed!",
            ));
        }
    } else if instance_type & INSTANCE_TYPE_WRITE == 0 {
        return Err(DirError::constraint(
            "instancetype: if TYPE_IS_NC_HEAD was set, then also TYPE_WRITE is requested!",
        ));
    }
    Ok(())
}

impl Module for InstanceType {
    fn name(&self) -> &str {
        NAME
    }

    fn add(&mut self, mut msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if msg.dn.is_special() {
            return next.add(msg);
        }
        let supplied = single_value(&msg, ATTR).map_err(|_| {
            DirError::constraint("instancetype: the 'instanceType' attribute is single-valued!")
        })?;
        match supplied {
            Some(value) => {
                let text = value.to_string_lossy();
                let instance_type = parse_integer(&text)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| {
                        DirError::syntax(format!("instancetype: invalid instanceType '{text}'"))
                    })?;
                check(instance_type)?;
            }
            None => msg.add_string(ATTR, &INSTANCE_TYPE_WRITE.to_string()),
        }
        next.add(msg)
    }

    fn modify(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if !msg.dn.is_special() && msg.has_attribute(ATTR) {
            return Err(DirError::constraint(
                "instancetype: the 'instanceType' attribute can never be changed!",
            ));
        }
        next.modify(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;
    use crate::error::ErrorKind;
    use crate::message::{Element, ModFlag};
    use crate::modules::testing;
    use crate::request::Scope;
    use crate::value::Value;

    fn record(instance_type: Option<&str>) -> Message {
        let mut msg = Message::new(Dn::parse("cn=a,dc=test").unwrap());
        msg.add_string("cn", "a");
        if let Some(value) = instance_type {
            msg.add_string(ATTR, value);
        }
        msg
    }

    #[test]
    fn allowed_combinations() {
        for value in ["0", "4", "5", "0x4"] {
            assert!(check(u32::try_from(parse_integer(value).unwrap()).unwrap()).is_ok(), "{value}");
        }
        for value in [1u32, 2, 3] {
            assert!(check(value).is_err(), "{value}");
        }
    }

    #[test]
    fn missing_value_defaults_to_writable() {
        let mut ctx = testing::context(vec![Box::new(InstanceType)]);
        ctx.add(record(None)).unwrap();
        let dn = Dn::parse("cn=a,dc=test").unwrap();
        let stored = ctx.search(&dn, Scope::Base, None, None).unwrap().remove(0);
        assert_eq!(stored.get_u64(ATTR), Some(u64::from(INSTANCE_TYPE_WRITE)));
    }

    #[test]
    fn nc_head_without_write_is_rejected() {
        let mut ctx = testing::context(vec![Box::new(InstanceType)]);
        let err = ctx.add(record(Some("1"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert!(ctx.errstring().unwrap().contains("TYPE_WRITE is requested"));
    }

    #[test]
    fn multiple_values_are_rejected() {
        let mut ctx = testing::context(vec![Box::new(InstanceType)]);
        let mut msg = record(Some("4"));
        msg.add_string(ATTR, "5");
        assert_eq!(ctx.add(msg).unwrap_err().kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn any_change_is_rejected() {
        let mut ctx = testing::context(vec![Box::new(InstanceType)]);
        ctx.add(record(Some("4"))).unwrap();
        for value in ["4", "5", "1"] {
            let mut change = Message::new(Dn::parse("cn=a,dc=test").unwrap());
            change.elements.push(Element::with_values(
                ATTR,
                ModFlag::Replace,
                vec![Value::from(value)],
            ));
            let err = ctx.modify(change).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        }
    }
}
