//! Step 1: data-structure validation
//!
//! Everything checkable without touching the chain: the value itself, the
//! triplet length invariant, ordering of the index and ownership lists,
//! containment of owner heights in the index, the genesis anchor, and
//! that the record actually ends with the receiver as owner.

use ezchain_core::{Address, VpbRecord};

use crate::report::ValidationError;

pub(crate) fn validate(record: &VpbRecord, account: &Address) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let list = &record.block_index_list;

    if let Err(e) = record.value.check() {
        errors.push(ValidationError::StructuralInvalid(e.to_string()));
    }

    if record.proofs.len() != list.len() {
        errors.push(ValidationError::StructuralInvalid(format!(
            "{} proof units against {} index entries",
            record.proofs.len(),
            list.len()
        )));
    }

    if list.index_lst.is_empty() {
        errors.push(ValidationError::StructuralInvalid(
            "index list is empty".into(),
        ));
    } else if list.index_lst.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::StructuralInvalid(
            "index list is not strictly increasing".into(),
        ));
    }

    if list.owner_data.is_empty() {
        errors.push(ValidationError::StructuralInvalid(
            "ownership history is empty".into(),
        ));
        return errors;
    }

    if list
        .owner_data
        .windows(2)
        .any(|w| w[0].height >= w[1].height)
    {
        errors.push(ValidationError::StructuralInvalid(
            "ownership heights are not strictly increasing".into(),
        ));
    }

    for record_entry in &list.owner_data {
        if !list.index_lst.contains(&record_entry.height) {
            errors.push(ValidationError::StructuralInvalid(format!(
                "ownership height {} missing from index list",
                record_entry.height
            )));
        }
    }

    if list.owner_data[0].height != 0 {
        errors.push(ValidationError::StructuralInvalid(format!(
            "first ownership record at height {}, expected genesis height 0",
            list.owner_data[0].height
        )));
    }

    match list.current_owner() {
        Some(owner) if owner == account => {}
        Some(owner) => errors.push(ValidationError::StructuralInvalid(format!(
            "record ends with owner {}, but {} asserts ownership",
            owner, account
        ))),
        None => {}
    }

    errors
}
