//! Typed results for the write commands (ambient; SPEC_FULL.md §10.5): the command algebra (C4)
//! promises "typed result readers" per spec §4.4, but spec.md itself never spells out their
//! shape for insert/update/delete. Grounded on the teacher driver's `results.rs`.

use bson::Bson;

/// The result of an `insertOne`-style call: a single collection-handle convenience wrapping
/// [`crate::command::Insert`] for exactly one document.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` of the inserted document.
    pub inserted_id: Bson,
}

/// The result of an `insertMany`-style call.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` of each inserted document, in the order the documents were sent.
    pub inserted_ids: Vec<Bson>,
}

/// The result of an `update`/`replaceOne`-style call, per the `update` command's reply shape.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    /// The `_id` of the document created by an upsert, if one occurred.
    pub upserted_id: Option<Bson>,
}

/// The result of a `delete`-style call.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct DeleteResult {
    pub deleted_count: u64,
}
