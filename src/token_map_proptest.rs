#![cfg(test)]

// Property tests for TokenMap kept inside the crate so they can observe
// refcounts and index cardinality directly.
//
// The model is a map from key index to the list of outstanding InstanceRefs
// for that key. Invariants checked after every operation:
// - lookup(key) is Some iff the model holds >= 1 outstanding ref for it.
// - All outstanding refs for one key carry the same handle, and find_by_id
//   round-trips to an entry with that key (dual-index consistency).
// - The registry's len() equals the number of keys with outstanding refs.
// - After a key's refs net to zero, re-interning allocates a fresh handle.

use crate::key::{InstanceKey, KeySpec, Serdata, TopicId};
use crate::token_map::{InstanceHandle, InstanceRef, TokenMap};
use proptest::prelude::*;
use std::sync::Arc;

struct Sample(String);

impl KeySpec for Sample {
    fn write_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
    }
    fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
    }
}

const TOPIC: TopicId = TopicId(1);

fn serdata(k: usize) -> Arc<Serdata> {
    Arc::new(Serdata::from_sample(TOPIC, &Sample(format!("k{k}"))))
}

fn key(k: usize) -> InstanceKey {
    InstanceKey::from_sample(TOPIC, &Sample(format!("k{k}")))
}

// Pool-indexed operations so shrinking reduces to earlier keys and shorter
// op lists.
#[derive(Clone, Debug)]
enum Op {
    Intern(usize),
    CloneRef(usize),
    DropRef(usize),
    DropAll(usize),
    Lookup(usize),
    FindById(usize),
}

fn op_strategy(keys: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..keys).prop_map(Op::Intern),
        (0..keys).prop_map(Op::CloneRef),
        (0..keys).prop_map(Op::DropRef),
        (0..keys).prop_map(Op::DropAll),
        (0..keys).prop_map(Op::Lookup),
        (0..keys).prop_map(Op::FindById),
    ]
}

proptest! {
    #[test]
    fn prop_token_map_liveness(
        keys in 1usize..=6,
        ops in proptest::collection::vec(op_strategy(6), 1..150),
    ) {
        let map = TokenMap::new();
        let mut live: Vec<Vec<InstanceRef>> =
            std::iter::repeat_with(Vec::new).take(keys).collect();
        // Handles retired when a key's refs netted to zero; must never be
        // reissued.
        let mut retired: Vec<InstanceHandle> = Vec::new();

        for op in ops {
            match op {
                Op::Intern(k) if k < keys => {
                    let r = map.find_or_create(&serdata(k));
                    if let Some(prev) = live[k].first() {
                        prop_assert_eq!(prev.handle(), r.handle());
                    } else {
                        prop_assert!(
                            !retired.contains(&r.handle()),
                            "retired handle reissued"
                        );
                    }
                    live[k].push(r);
                }
                Op::CloneRef(k) if k < keys => {
                    if let Some(r) = live[k].last() {
                        let r2 = r.clone();
                        prop_assert_eq!(r2.handle(), r.handle());
                        live[k].push(r2);
                    }
                }
                Op::DropRef(k) if k < keys => {
                    if let Some(r) = live[k].pop() {
                        if live[k].is_empty() {
                            retired.push(r.handle());
                        }
                        drop(r);
                    }
                }
                Op::DropAll(k) if k < keys => {
                    if let Some(r) = live[k].first() {
                        retired.push(r.handle());
                    }
                    live[k].clear();
                }
                Op::Lookup(k) if k < keys => {
                    let found = map.lookup(&key(k));
                    match live[k].first() {
                        Some(r) => prop_assert_eq!(found, Some(r.handle())),
                        None => prop_assert_eq!(found, None),
                    }
                }
                Op::FindById(k) if k < keys => {
                    if let Some(r) = live[k].first() {
                        let entry = map.find_by_id(r.handle());
                        let entry = entry.expect("live handle resolves");
                        prop_assert_eq!(entry.key(), &key(k));
                        prop_assert_eq!(
                            entry.refcount() as usize,
                            live[k].len(),
                            "refcount tracks outstanding refs"
                        );
                    }
                }
                _ => {}
            }

            let expected_len = live.iter().filter(|refs| !refs.is_empty()).count();
            prop_assert_eq!(map.len(), expected_len);
        }

        // Drain everything; the registry must end empty.
        for refs in &mut live {
            refs.clear();
        }
        prop_assert!(map.is_empty());
    }
}
