use {
    super::{FieldPath, FlatRow, Segment, Shape, boxed_iter},
    serde_json::Value,
    std::{borrow::Cow, iter::once},
    tap::Pipe,
};

/// Depth-first walk over `value`, yielding every leaf together with its path.
///
/// Empty sequences and mappings have no leaves and therefore yield nothing. There is no depth
/// limit besides the stack.
pub fn flattened_iter(
    prefix: FieldPath<'static>,
    value: Value,
) -> Box<dyn Iterator<Item = (FieldPath<'static>, Value)>> {
    match Shape::from(value) {
        Shape::Sequence(items) => items
            .into_iter()
            .enumerate()
            .flat_map(move |(idx, value)| flattened_iter(prefix.join(Segment::Idx(idx)), value))
            .pipe(boxed_iter),
        Shape::Mapping(map) => map
            .into_iter()
            .flat_map(move |(key, value)| {
                flattened_iter(prefix.join(Segment::Field(Cow::Owned(key))), value)
            })
            .pipe(boxed_iter),
        Shape::Scalar(scalar) => once((prefix, scalar)).pipe(boxed_iter),
    }
}

/// Flattens one item into a single level mapping, in the item's own key order.
///
/// A bare scalar becomes the single column `""`. Column names that collide (a key containing
/// `level_sep` next to a genuinely nested one) keep the value written last.
pub fn flattened(value: Value, level_sep: &str) -> FlatRow {
    flattened_iter(FieldPath::default(), value)
        .map(|(path, value)| (path.column_name(level_sep), value))
        .collect()
}

/// Lazily flattens every item of a collection.
pub fn flattened_items<'a, I>(items: I, level_sep: &'a str) -> impl Iterator<Item = FlatRow> + 'a
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: 'a,
{
    items.into_iter().map(move |item| flattened(item, level_sep))
}
