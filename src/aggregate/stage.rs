use bson::{doc, Bson, Document};

use crate::aggregate::Accumulator;

/// A single stage of an aggregation pipeline, per spec §4.6's closed stage algebra. Stages this
/// core doesn't model explicitly still reach the server via [`Stage::Raw`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Stage {
    Project(Document),
    Match(Document),
    Redact(Bson),
    Limit(i64),
    Skip(i64),
    Sample { size: i64 },
    Group { id: Bson, fields: Vec<(String, Accumulator)> },
    AddFields(Document),
    BucketAuto {
        group_by: Bson,
        buckets: i64,
        output: Option<Document>,
        granularity: Option<String>,
    },
    Lookup(LookupStage),
    GraphLookup {
        from: String,
        start_with: Bson,
        connect_from_field: String,
        connect_to_field: String,
        as_field: String,
        max_depth: Option<u32>,
        depth_field: Option<String>,
        restrict_search_with_match: Option<Document>,
    },
    Filter {
        input: Bson,
        cond: Bson,
        as_field: Option<String>,
    },
    Unwind {
        path: String,
        include_array_index: Option<String>,
        preserve_null_and_empty_arrays: Option<bool>,
    },
    Sort(Vec<Sort>),
    GeoNear(GeoNearOptions),
    IndexStats,
    Out { db: Option<String>, coll: String },
    /// An escape hatch for a stage not otherwise represented in this algebra.
    Raw(Document),
}

/// A `$lookup` stage, per spec §4.6.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupStage {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

/// `$geoNear` options, per spec §4.6.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoNearOptions {
    pub near: Bson,
    pub distance_field: String,
    pub spherical: Option<bool>,
    pub max_distance: Option<f64>,
    pub query: Option<Document>,
}

/// A single key's sort direction within a `$sort` stage.
#[derive(Clone, Debug, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::Ascending }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::Descending }
    }

    pub fn by_meta(field: impl Into<String>, meta: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::MetadataSort(meta.into()) }
    }
}

/// The direction (or metadata key) a `$sort` field is ordered by, per spec §4.6.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum SortOrder {
    Ascending,
    Descending,
    /// `{$meta: "..."}`, e.g. sorting by full-text search relevance (`"textScore"`).
    MetadataSort(String),
}

impl From<&SortOrder> for Bson {
    fn from(order: &SortOrder) -> Self {
        match order {
            SortOrder::Ascending => Bson::Int32(1),
            SortOrder::Descending => Bson::Int32(-1),
            SortOrder::MetadataSort(meta) => Bson::Document(doc! { "$meta": meta.clone() }),
        }
    }
}

impl Stage {
    pub(crate) fn to_document(&self) -> Document {
        match self {
            Stage::Project(spec) => doc! { "$project": spec.clone() },
            Stage::Match(filter) => doc! { "$match": filter.clone() },
            Stage::Redact(expr) => doc! { "$redact": expr.clone() },
            Stage::Limit(n) => doc! { "$limit": *n },
            Stage::Skip(n) => doc! { "$skip": *n },
            Stage::Sample { size } => doc! { "$sample": { "size": *size } },
            Stage::Group { id, fields } => {
                let mut group = doc! { "_id": id.clone() };
                for (name, accumulator) in fields {
                    group.insert(name, accumulator.to_document());
                }
                doc! { "$group": group }
            }
            Stage::AddFields(spec) => doc! { "$addFields": spec.clone() },
            Stage::BucketAuto { group_by, buckets, output, granularity } => {
                let mut spec = doc! { "groupBy": group_by.clone(), "buckets": *buckets };
                if let Some(output) = output {
                    spec.insert("output", output.clone());
                }
                if let Some(granularity) = granularity {
                    spec.insert("granularity", granularity.clone());
                }
                doc! { "$bucketAuto": spec }
            }
            Stage::Lookup(lookup) => doc! {
                "$lookup": {
                    "from": lookup.from.clone(),
                    "localField": lookup.local_field.clone(),
                    "foreignField": lookup.foreign_field.clone(),
                    "as": lookup.as_field.clone(),
                }
            },
            Stage::GraphLookup {
                from,
                start_with,
                connect_from_field,
                connect_to_field,
                as_field,
                max_depth,
                depth_field,
                restrict_search_with_match,
            } => {
                let mut spec = doc! {
                    "from": from.clone(),
                    "startWith": start_with.clone(),
                    "connectFromField": connect_from_field.clone(),
                    "connectToField": connect_to_field.clone(),
                    "as": as_field.clone(),
                };
                if let Some(max_depth) = max_depth {
                    spec.insert("maxDepth", *max_depth as i64);
                }
                if let Some(depth_field) = depth_field {
                    spec.insert("depthField", depth_field.clone());
                }
                if let Some(restrict) = restrict_search_with_match {
                    spec.insert("restrictSearchWithMatch", restrict.clone());
                }
                doc! { "$graphLookup": spec }
            }
            Stage::Filter { input, cond, as_field } => {
                let mut spec = doc! { "input": input.clone(), "cond": cond.clone() };
                if let Some(as_field) = as_field {
                    spec.insert("as", as_field.clone());
                }
                doc! { "$filter": spec }
            }
            Stage::Unwind { path, include_array_index, preserve_null_and_empty_arrays } => {
                let mut spec = doc! { "path": format!("${path}") };
                if let Some(include_array_index) = include_array_index {
                    spec.insert("includeArrayIndex", include_array_index.clone());
                }
                if let Some(preserve) = preserve_null_and_empty_arrays {
                    spec.insert("preserveNullAndEmptyArrays", *preserve);
                }
                doc! { "$unwind": spec }
            }
            Stage::Sort(keys) => {
                let mut spec = Document::new();
                for key in keys {
                    spec.insert(&key.field, Bson::from(&key.order));
                }
                doc! { "$sort": spec }
            }
            Stage::GeoNear(opts) => {
                let mut spec = doc! {
                    "near": opts.near.clone(),
                    "distanceField": opts.distance_field.clone(),
                };
                if let Some(spherical) = opts.spherical {
                    spec.insert("spherical", spherical);
                }
                if let Some(max_distance) = opts.max_distance {
                    spec.insert("maxDistance", max_distance);
                }
                if let Some(query) = &opts.query {
                    spec.insert("query", query.clone());
                }
                doc! { "$geoNear": spec }
            }
            Stage::IndexStats => doc! { "$indexStats": {} },
            Stage::Out { db, coll } => match db {
                Some(db) => doc! { "$out": { "db": db.clone(), "coll": coll.clone() } },
                None => doc! { "$out": coll.clone() },
            },
            Stage::Raw(doc) => doc.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn group_stage_renders_id_and_accumulators() {
        let stage = Stage::Group {
            id: Bson::String("$category".into()),
            fields: vec![("total".into(), Accumulator::sum_field("amount"))],
        };
        assert_eq!(
            stage.to_document(),
            doc! { "$group": { "_id": "$category", "total": { "$sum": "$amount" } } }
        );
    }

    #[test]
    fn sort_stage_renders_metadata_sort() {
        let stage = Stage::Sort(vec![Sort::by_meta("score", "textScore")]);
        assert_eq!(stage.to_document(), doc! { "$sort": { "score": { "$meta": "textScore" } } });
    }

    #[test]
    fn out_without_db_renders_bare_collection_name() {
        let stage = Stage::Out { db: None, coll: "summaries".into() };
        assert_eq!(stage.to_document(), doc! { "$out": "summaries" });
    }

    #[test]
    fn raw_stage_passes_through_unmodified() {
        let raw = doc! { "$unionWith": "other" };
        assert_eq!(Stage::Raw(raw.clone()).to_document(), raw);
    }
}
