//! Turns textual queries into per-dimension query descriptions.
//!
//! A query expression consists of clauses separated by `/`. Each clause names a dimension,
//! optionally prefixed by `@` to **anchor** it (the dimension then becomes a level of the
//! result) and optionally followed by `=` and a target which constrains the values of this
//! dimension:
//!
//! ```text
//! @location=qaddr(1,2,2)+3/crime=[0,2]/time=interval(100,200)
//! ```
//!
//! The grammar itself is implemented in [parser](parser). This module maps the parsed clauses
//! onto a [QueryDescription](QueryDescription) for a given [Schema](crate::schema::Schema).
//! Clauses naming a dimension which isn't part of the schema are dropped (and logged) rather
//! than failing the whole query.
//!
//! # Example
//!
//! ```
//! # use nanocube::schema::{DumpFileDescription, Schema};
//! # use nanocube::query::{build_description, Target, Address};
//! let schema = Schema::new(DumpFileDescription::parse("
//! field: a nc_dim_cat_1
//! field: b nc_dim_cat_1
//! field: time nc_dim_time_2
//! ").unwrap()).unwrap();
//!
//! let description = build_description("@b=3/unknown=1", &schema).unwrap();
//! assert_eq!(description.anchors(), &[false, true, false]);
//! assert_eq!(description.target(1), &Target::Find(Address::value(3)));
//! assert_eq!(description.target(0), &Target::Root);
//! ```
use std::fmt::{Display, Formatter};

use crate::schema::Schema;

pub mod executor;
pub mod parser;

/// The largest quadtree depth which can be addressed.
pub const MAX_QUADTREE_LEVEL: usize = 32;

/// Represents the path to a node of a dimension.
///
/// For quadtree dimensions, this is the sequence of children (0..=3) walked from the root,
/// where bit 0 of each step is the x bit and bit 1 the y bit of the tile coordinate at that
/// level. For categorical and time dimensions an address is either empty (the root) or contains
/// the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(Vec<u64>);

impl Address {
    /// Returns the address of the root node.
    pub fn root() -> Address {
        Address(Vec::new())
    }

    /// Returns the address of a categorical or time value.
    pub fn value(value: u64) -> Address {
        Address(vec![value])
    }

    /// Creates an address from a raw path.
    pub fn from_path(path: Vec<u64>) -> Address {
        Address(path)
    }

    /// Returns the address of the quadtree tile (x, y) at the given level.
    ///
    /// Returns **None** if the level is deeper than [MAX_QUADTREE_LEVEL](MAX_QUADTREE_LEVEL) or if
    /// a coordinate doesn't fit into the grid of the given level.
    ///
    /// # Example
    ///
    /// ```
    /// # use nanocube::query::Address;
    /// let address = Address::quadtree(1, 2, 2).unwrap();
    /// assert_eq!(address.path(), &[2, 1]);
    /// assert_eq!(address.tile(), (1, 2));
    ///
    /// assert_eq!(Address::quadtree(4, 0, 2).is_none(), true);
    /// ```
    pub fn quadtree(x: u64, y: u64, level: usize) -> Option<Address> {
        if level > MAX_QUADTREE_LEVEL || x >> level != 0 || y >> level != 0 {
            return None;
        }

        Some(Address(
            (0..level)
                .rev()
                .map(|bit| ((x >> bit) & 1) | (((y >> bit) & 1) << 1))
                .collect(),
        ))
    }

    /// Interprets this address as quadtree path and returns the (x, y) tile it denotes.
    pub fn tile(&self) -> (u64, u64) {
        self.0.iter().fold((0, 0), |(x, y), step| {
            ((x << 1) | (step & 1), (y << 1) | ((step >> 1) & 1))
        })
    }

    /// Returns the raw path.
    pub fn path(&self) -> &[u64] {
        &self.0
    }

    /// Returns the number of steps in this path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Determines if this is the root address.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (index, step) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", step)?;
        }
        write!(f, "]")
    }
}

/// Describes which values of a dimension a query is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No constraint at all.
    Root,
    /// Everything at or below the given address.
    Find(Address),
    /// Everything below the given base, drilled down by **depth** levels.
    Dive {
        /// The node to start from.
        base: Address,
        /// The number of levels to expand below **base**.
        depth: usize,
    },
    /// Everything between the two addresses (inclusive). For quadtrees this is the rectangle of
    /// tiles spanned by both addresses, which therefore have to share the same level.
    Range {
        /// The lower (or top left) bound.
        low: Address,
        /// The upper (or bottom right) bound.
        high: Address,
    },
    /// A sequence of **count** consecutive time bins, each **width** wide, starting at **base**.
    Intervals {
        /// The first time bin of the first interval.
        base: u64,
        /// The number of bins per interval.
        width: u64,
        /// The number of intervals.
        count: u64,
    },
    /// Any of the given targets.
    Sequence(Vec<Target>),
}

/// The per-dimension view of a query.
///
/// For each dimension of the schema this contains an anchor flag and a target. Anchored
/// dimensions become levels of the result, all others are aggregated according to their target.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescription {
    anchors: Vec<bool>,
    targets: Vec<Target>,
}

impl QueryDescription {
    /// Creates a description for the given number of dimensions where nothing is anchored or
    /// constrained.
    pub fn new(dimensions: usize) -> QueryDescription {
        QueryDescription {
            anchors: vec![false; dimensions],
            targets: vec![Target::Root; dimensions],
        }
    }

    /// Returns the anchor flags of all dimensions.
    pub fn anchors(&self) -> &[bool] {
        &self.anchors
    }

    /// Returns the targets of all dimensions.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Returns the target of the given dimension.
    pub fn target(&self, dimension: usize) -> &Target {
        &self.targets[dimension]
    }

    /// Determines if the given dimension is anchored.
    pub fn is_anchored(&self, dimension: usize) -> bool {
        self.anchors[dimension]
    }

    /// Marks the given dimension as anchored or not.
    pub fn set_anchor(&mut self, dimension: usize, anchored: bool) {
        self.anchors[dimension] = anchored;
    }

    /// Specifies the target of the given dimension.
    pub fn set_target(&mut self, dimension: usize, target: Target) {
        self.targets[dimension] = target;
    }

    /// Returns the number of anchored dimensions.
    pub fn anchored_count(&self) -> usize {
        self.anchors.iter().filter(|anchored| **anchored).count()
    }

    /// Anchors the time dimension for a time query.
    ///
    /// A time query expands over time by itself, therefore the caller must not anchor or
    /// constrain the time dimension.
    pub fn anchor_time(&mut self, schema: &Schema) -> Result<(), QueryError> {
        let time = schema.time_dimension();
        if self.anchors[time] || self.targets[time] != Target::Root {
            return Err(QueryError::Domain(
                "time queries should not constrain time dimension".to_owned(),
            ));
        }

        self.anchors[time] = true;
        Ok(())
    }
}

/// Enumerates the errors which can occur while parsing or executing a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The query expression is syntactically invalid.
    Parse(String),
    /// The query is well formed but cannot be applied (e.g. an invalid address).
    Domain(String),
    /// Something unexpected went wrong within the cube. The detail is only logged.
    Unexpected(String),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Parse(message) => write!(f, "{}", message),
            QueryError::Domain(message) => write!(f, "{}", message),
            QueryError::Unexpected(_) => {
                write!(f, "Unexpected problem. Server might be unstable now.")
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// Parses the given query expression and builds the description for the given schema.
///
/// Clauses referring to unknown dimensions are skipped with a warning. Only malformed syntax
/// fails the whole expression.
pub fn build_description(
    expression: &str,
    schema: &Schema,
) -> Result<QueryDescription, QueryError> {
    let clauses = parser::parse_query(expression)?;
    let mut description = QueryDescription::new(schema.dimension_count());

    for clause in clauses {
        match schema.dimension_index(&clause.dimension) {
            Some(index) => {
                description.set_anchor(index, clause.anchored);
                description.set_target(index, clause.target);
            }
            None => log::warn!(
                "Dimension {} not found. Disregarding it.",
                clause.dimension
            ),
        }
    }

    Ok(description)
}

#[cfg(test)]
mod tests {
    use crate::query::{build_description, Address, QueryError, Target};
    use crate::schema::{DumpFileDescription, Schema};

    fn schema() -> Schema {
        Schema::new(
            DumpFileDescription::parse(
                "field: a nc_dim_cat_1
field: b nc_dim_quadtree_4
field: c nc_dim_cat_2
field: time nc_dim_time_2",
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn quadtree_addresses_map_to_paths_and_back() {
        let address = Address::quadtree(5, 3, 3).unwrap();
        assert_eq!(address.path(), &[1, 2, 3]);
        assert_eq!(address.tile(), (5, 3));
        assert_eq!(Address::quadtree(0, 0, 0).unwrap(), Address::root());
        assert_eq!(Address::quadtree(0, 0, 33).is_none(), true);
    }

    #[test]
    fn unknown_dimensions_are_skipped() {
        let description = build_description("@nope=qaddr(0,0,1)/@c=7", &schema()).unwrap();
        assert_eq!(description.anchors(), &[false, false, true, false]);
        assert_eq!(description.target(2), &Target::Find(Address::value(7)));
        assert_eq!(description.anchored_count(), 1);
    }

    #[test]
    fn malformed_expressions_fail() {
        match build_description("@c=[1,2", &schema()) {
            Err(QueryError::Parse(_)) => (),
            other => panic!("Expected a parse error but got {:?}", other),
        }
    }

    #[test]
    fn an_empty_expression_constrains_nothing() {
        let description = build_description("", &schema()).unwrap();
        assert_eq!(description.anchored_count(), 0);
        assert_eq!(description.targets().iter().all(|t| *t == Target::Root), true);
    }

    #[test]
    fn time_queries_reject_time_constraints() {
        let schema = schema();

        let mut anchored = build_description("@time", &schema).unwrap();
        assert_eq!(anchored.anchor_time(&schema).is_err(), true);

        let mut constrained = build_description("time=interval(1,5)", &schema).unwrap();
        assert_eq!(
            constrained.anchor_time(&schema),
            Err(QueryError::Domain(
                "time queries should not constrain time dimension".to_owned()
            ))
        );

        let mut plain = build_description("@a", &schema).unwrap();
        plain.anchor_time(&schema).unwrap();
        assert_eq!(plain.anchors(), &[true, false, false, true]);
    }
}
