use bson::{doc, Bson, Document};

/// A `$group` accumulator expression, per spec §4.6. Each variant accepts either a field
/// reference (`Accumulator::sum_field("amount")`, which becomes `"$amount"`) or an arbitrary
/// aggregation expression (`Accumulator::sum_expr(doc! {...})`) — the two constructors are the
/// "field-ref and expression forms" spec §4.6 calls for.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Accumulator {
    Sum(Bson),
    Avg(Bson),
    First(Bson),
    Last(Bson),
    Max(Bson),
    Min(Bson),
    Push(Bson),
    AddToSet(Bson),
    StdDevPop(Bson),
    StdDevSamp(Bson),
}

macro_rules! accumulator_ctors {
    ($(($variant:ident, $field_ctor:ident, $expr_ctor:ident)),* $(,)?) => {
        impl Accumulator {
            $(
                pub fn $field_ctor(field: impl AsRef<str>) -> Self {
                    Accumulator::$variant(Bson::String(format!("${}", field.as_ref())))
                }

                pub fn $expr_ctor(expr: impl Into<Bson>) -> Self {
                    Accumulator::$variant(expr.into())
                }
            )*
        }
    };
}

impl Accumulator {
    /// `{$sum: 1}`, the per-group document-counting form of `$sum`, per spec §4.6.
    pub fn sum_all() -> Self {
        Accumulator::Sum(Bson::Int32(1))
    }
}

accumulator_ctors! {
    (Sum, sum_field, sum_expr),
    (Avg, avg_field, avg_expr),
    (First, first_field, first_expr),
    (Last, last_field, last_expr),
    (Max, max_field, max_expr),
    (Min, min_field, min_expr),
    (Push, push_field, push_expr),
    (AddToSet, add_to_set_field, add_to_set_expr),
    (StdDevPop, std_dev_pop_field, std_dev_pop_expr),
    (StdDevSamp, std_dev_samp_field, std_dev_samp_expr),
}

impl Accumulator {
    pub(crate) fn to_document(&self) -> Document {
        let (op, expr) = match self {
            Accumulator::Sum(e) => ("$sum", e),
            Accumulator::Avg(e) => ("$avg", e),
            Accumulator::First(e) => ("$first", e),
            Accumulator::Last(e) => ("$last", e),
            Accumulator::Max(e) => ("$max", e),
            Accumulator::Min(e) => ("$min", e),
            Accumulator::Push(e) => ("$push", e),
            Accumulator::AddToSet(e) => ("$addToSet", e),
            Accumulator::StdDevPop(e) => ("$stdDevPop", e),
            Accumulator::StdDevSamp(e) => ("$stdDevSamp", e),
        };
        doc! { op: expr.clone() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_ref_form_prefixes_dollar_sign() {
        let acc = Accumulator::sum_field("amount");
        assert_eq!(acc.to_document(), doc! { "$sum": "$amount" });
    }

    #[test]
    fn expression_form_passes_through_verbatim() {
        let acc = Accumulator::avg_expr(doc! { "$multiply": ["$price", "$qty"] });
        assert_eq!(acc.to_document(), doc! { "$avg": { "$multiply": ["$price", "$qty"] } });
    }

    #[test]
    fn sum_all_counts_documents() {
        assert_eq!(Accumulator::sum_all().to_document(), doc! { "$sum": 1 });
    }
}
