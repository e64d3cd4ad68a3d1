//! Property-based tests for the core primitives

use proptest::prelude::*;

use ezchain_core::{sha256, Address, BloomFilter, Digest, MerkleTree, Value};

fn digest() -> impl Strategy<Value = Digest> {
    any::<[u8; 32]>().prop_map(Digest)
}

fn value() -> impl Strategy<Value = Value> {
    (0u128..u64::MAX as u128, 1u64..1_000_000).prop_map(|(begin, num)| {
        Value::new(begin, num).expect("valid range")
    })
}

proptest! {
    /// Splitting a value yields adjacent halves whose union is exactly
    /// the original range
    #[test]
    fn split_preserves_the_range(v in value(), cut in 1u64..u64::MAX) {
        prop_assume!(v.value_num() > 1);
        let amount = 1 + cut % (v.value_num() - 1);
        let (a, b) = v.split(amount).unwrap();

        prop_assert_eq!(a.begin_index(), v.begin_index());
        prop_assert_eq!(b.end_index(), v.end_index());
        prop_assert_eq!(a.end_index() + 1, b.begin_index());
        prop_assert_eq!(a.value_num() + b.value_num(), v.value_num());
        prop_assert!(!a.intersects(&b));
        prop_assert!(v.contains(&a) && v.contains(&b));
    }

    /// Intersection is symmetric and contained in both operands
    #[test]
    fn intersection_is_symmetric(a in value(), b in value()) {
        prop_assert_eq!(a.intersects(&b), b.intersects(&a));
        match (a.intersection(&b), b.intersection(&a)) {
            (Some(x), Some(y)) => {
                prop_assert!(x.same_range(&y));
                prop_assert!(a.contains(&x) && b.contains(&x));
            }
            (None, None) => {}
            _ => prop_assert!(false, "asymmetric intersection"),
        }
    }

    /// Every leaf of every tree proves against the root
    #[test]
    fn merkle_proofs_verify_for_all_leaves(
        leaves in proptest::collection::vec(digest(), 1..40)
    ) {
        let tree = MerkleTree::build(leaves.clone()).unwrap();
        let root = tree.root();
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.prove(i).unwrap();
            prop_assert!(proof.verify(leaf, &root));
        }
    }

    /// A proof never verifies a different leaf at the same position
    #[test]
    fn merkle_proofs_bind_their_leaf(
        leaves in proptest::collection::vec(digest(), 2..20),
        other in digest(),
    ) {
        let tree = MerkleTree::build(leaves.clone()).unwrap();
        let proof = tree.prove(0).unwrap();
        prop_assume!(other != leaves[0]);
        prop_assert!(!proof.verify(&other, &tree.root()));
    }

    /// Inserted addresses are always reported as possibly present
    #[test]
    fn bloom_has_no_false_negatives(
        addrs in proptest::collection::vec("[a-f0-9]{8,40}", 1..50)
    ) {
        let mut bloom = BloomFilter::with_capacity(addrs.len());
        let addrs: Vec<Address> = addrs.into_iter().map(Address::new).collect();
        for a in &addrs {
            bloom.insert(a);
        }
        for a in &addrs {
            prop_assert!(bloom.might_contain(a));
        }
    }

    /// The canonical digest is a pure function of the value's content
    #[test]
    fn canonical_digest_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(sha256(&data), sha256(&data));
        let v = Value::new(1, 1).unwrap();
        prop_assert_eq!(
            ezchain_core::canonical::canonical_digest(&v).unwrap(),
            ezchain_core::canonical::canonical_digest(&v).unwrap()
        );
    }
}
