//! Storage properties checked through the full module chain.

use dirdb_core::{Dn, Element, ErrorKind, Message, ModFlag, Scope, SequenceKind};
use dirdb_testkit::{arb_message, memory_context, PropTestConfig};
use proptest::prelude::*;

fn index_description(ctx: &mut dirdb_core::DirContext) {
    let mut list = Message::new(Dn::special("@INDEXLIST"));
    list.add_string("@IDXATTR", "description");
    ctx.add(list).unwrap();
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn add_then_delete_is_two_mutations(msg in arb_message()) {
        let mut ctx = memory_context();
        let before = ctx.sequence_number(SequenceKind::HighestSeq).unwrap();
        let dn = msg.dn.clone();
        ctx.add(msg).unwrap();
        ctx.delete(&dn).unwrap();
        prop_assert_eq!(ctx.sequence_number(SequenceKind::HighestSeq).unwrap(), before + 2);
        let err = ctx.search(&dn, Scope::Base, None, None).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn second_add_conflicts(msg in arb_message()) {
        let mut ctx = memory_context();
        ctx.add(msg.clone()).unwrap();
        let err = ctx.add(msg).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn deleting_every_value_removes_the_attribute(msg in arb_message()) {
        let mut ctx = memory_context();
        let element = msg.elements[0].clone();
        let dn = msg.dn.clone();
        ctx.add(msg).unwrap();

        let mut change = Message::new(dn.clone());
        change.elements.push(Element::with_values(&element.name, ModFlag::Delete, element.values));
        ctx.modify(change).unwrap();

        let stored = ctx.search(&dn, Scope::Base, None, None).unwrap().remove(0);
        prop_assert!(!stored.has_attribute(&element.name));
        prop_assert!(stored.elements.iter().all(|e| !e.values.is_empty()));
    }

    #[test]
    fn indexed_search_tracks_adds_and_deletes(msg in arb_message()) {
        let mut ctx = memory_context();
        index_description(&mut ctx);
        let mut msg = msg;
        msg.remove("description");
        msg.add_string("description", "needle");
        let dn = msg.dn.clone();
        ctx.add(msg).unwrap();

        let found = ctx.search(&Dn::root(), Scope::Subtree, Some("(description=needle)"), None).unwrap();
        prop_assert_eq!(found.len(), 1);
        prop_assert_eq!(&found[0].dn, &dn);

        ctx.delete(&dn).unwrap();
        let found = ctx.search(&Dn::root(), Scope::Subtree, Some("(description=needle)"), None).unwrap();
        prop_assert!(found.is_empty());
    }
}

#[test]
fn errstring_describes_the_last_failure() {
    let mut ctx = memory_context();
    let missing = Dn::parse("cn=missing,dc=test").unwrap();
    assert_eq!(ctx.delete(&missing).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(ctx.errstring().is_some());

    ctx.search(&Dn::root(), Scope::Base, None, None).unwrap();
    assert!(ctx.errstring().is_none());
}

#[test]
fn transactions_roll_back() {
    let mut ctx = memory_context();
    let dn = Dn::parse("cn=temp,dc=test").unwrap();
    ctx.transaction_start().unwrap();
    let mut msg = Message::new(dn.clone());
    msg.add_string("cn", "temp");
    ctx.add(msg).unwrap();
    ctx.transaction_cancel().unwrap();
    assert_eq!(
        ctx.search(&dn, Scope::Base, None, None).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
