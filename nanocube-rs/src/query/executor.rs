//! Runs queries against a cube and names the levels of the result.
use std::panic::{self, AssertUnwindSafe};

use crate::cube::Cube;
use crate::query::{build_description, QueryDescription, QueryError};
use crate::result::ResultVector;
use crate::schema::Schema;

/// Determines which kind of query to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Aggregates over time unless the query anchors the time dimension itself.
    Plain,
    /// Additionally anchors the time dimension, expanding the result per time bin.
    Time,
}

/// Computes the level names of a result for the given description.
///
/// Each anchored dimension becomes one level, named after the dimension. The levels appear in
/// schema order, independent of the order of clauses within the query expression.
pub fn level_names(schema: &Schema, description: &QueryDescription) -> Vec<String> {
    description
        .anchors()
        .iter()
        .enumerate()
        .filter(|(_, anchored)| **anchored)
        .map(|(index, _)| schema.dimension_name(index).to_owned())
        .collect()
}

/// Parses the given expression and runs it against the cube.
///
/// Parse and domain errors are returned as is. Any unexpected failure within the cube, including
/// a panic, is logged and reported as [QueryError::Unexpected](QueryError::Unexpected).
pub fn execute(
    cube: &dyn Cube,
    expression: &str,
    kind: QueryKind,
) -> Result<ResultVector, QueryError> {
    let schema = cube.schema();
    let mut description = build_description(expression, schema)?;
    if kind == QueryKind::Time {
        description.anchor_time(schema)?;
    }

    let mut result = ResultVector::new(level_names(schema, &description));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match kind {
        QueryKind::Plain => cube.query(&description, &mut result),
        QueryKind::Time => cube.time_query(&description, &mut result),
    }));

    match outcome {
        Ok(Ok(())) => Ok(result),
        Ok(Err(QueryError::Unexpected(detail))) => {
            log::error!("Failed to execute query '{}': {}", expression, detail);
            Err(QueryError::Unexpected(detail))
        }
        Ok(Err(error)) => Err(error),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            log::error!("Query '{}' panicked: {}", expression, detail);
            Err(QueryError::Unexpected(detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::query::build_description;
    use crate::query::executor::level_names;
    use crate::schema::{DumpFileDescription, Schema};

    #[test]
    fn levels_follow_schema_order() {
        let schema = Schema::new(
            DumpFileDescription::parse(
                "field: a nc_dim_cat_1
field: b nc_dim_cat_1
field: time nc_dim_time_2",
            )
            .unwrap(),
        )
        .unwrap();

        let description = build_description("@b/@a", &schema).unwrap();
        assert_eq!(
            level_names(&schema, &description),
            vec!["a".to_owned(), "b".to_owned()]
        );

        let mut time = build_description("@b", &schema).unwrap();
        time.anchor_time(&schema).unwrap();
        assert_eq!(
            level_names(&schema, &time),
            vec!["b".to_owned(), "time".to_owned()]
        );
    }

    #[test]
    fn levels_name_the_anchored_dimensions() {
        let schema = Schema::new(
            DumpFileDescription::parse(
                "field: A nc_dim_cat_1
field: B nc_dim_cat_1
field: C nc_dim_cat_1
field: time nc_dim_time_2",
            )
            .unwrap(),
        )
        .unwrap();

        let description = build_description("@C/@B", &schema).unwrap();
        assert_eq!(
            level_names(&schema, &description),
            vec!["B".to_owned(), "C".to_owned()]
        );
        assert_eq!(
            level_names(&schema, &build_description("", &schema).unwrap()).is_empty(),
            true
        );
    }
}
