//! Provides the aggregate index which answers queries.
//!
//! The [Cube](Cube) trait is the seam between the HTTP endpoints and the actual index. It is
//! fed record by record during ingestion and answers [query descriptions](QueryDescription)
//! afterwards. [FlatCube](flat::FlatCube) is the implementation provided by this crate.
use std::fmt::{Display, Formatter};
use std::io::Read;

use crate::fmt::format_size;
use crate::query::{QueryDescription, QueryError};
use crate::result::ResultVector;
use crate::schema::Schema;

pub mod flat;

/// Describes an index which can ingest records and answer queries.
pub trait Cube: Send + Sync {
    /// Returns the schema of the indexed dataset.
    fn schema(&self) -> &Schema;

    /// Reads and indexes one binary record.
    ///
    /// Returns **false** if the reader was already exhausted, so that no record was read.
    fn add(&mut self, reader: &mut dyn Read) -> anyhow::Result<bool>;

    /// Returns the number of records indexed so far.
    fn len(&self) -> usize;

    /// Determines if no record has been indexed yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluates the given description and aggregates all matching records into the result.
    ///
    /// The result has to provide one level per anchored dimension.
    fn query(
        &self,
        description: &QueryDescription,
        result: &mut ResultVector,
    ) -> Result<(), QueryError>;

    /// Same as [query](Cube::query), but the description anchors the unconstrained time
    /// dimension so that the result is expanded per time bin.
    fn time_query(
        &self,
        description: &QueryDescription,
        result: &mut ResultVector,
    ) -> Result<(), QueryError>;

    /// Computes statistics for each layer of the index.
    fn report(&self) -> Report;

    /// Computes a summary of the indexed data.
    fn summary(&self) -> Summary;

    /// Renders the layer structure as graphviz document.
    fn graphviz(&self) -> String {
        self.report().to_graphviz()
    }
}

/// Statistics of a single layer of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerReport {
    /// The name of the dimension or measure.
    pub name: String,
    /// A short description of the layer type.
    pub kind: String,
    /// The number of distinct nodes on all levels of this layer.
    pub nodes: usize,
    /// The number of distinct values (the deepest nodes) of this layer.
    pub leaves: usize,
}

/// Statistics of the whole index.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// The number of indexed records.
    pub records: usize,
    /// The estimated number of bytes allocated by the index.
    pub allocated_memory: usize,
    /// One entry per dimension followed by the measure layer.
    pub layers: Vec<LayerReport>,
}

impl Report {
    /// Renders the layers as a chain of graphviz nodes.
    ///
    /// # Example
    ///
    /// ```
    /// # use nanocube::cube::{Report, LayerReport};
    /// let report = Report {
    ///     records: 2,
    ///     allocated_memory: 128,
    ///     layers: vec![
    ///         LayerReport { name: "a".to_owned(), kind: "categorical".to_owned(), nodes: 2, leaves: 2 },
    ///         LayerReport { name: "count".to_owned(), kind: "measure".to_owned(), nodes: 2, leaves: 2 },
    ///     ],
    /// };
    /// let graph = report.to_graphviz();
    /// assert!(graph.starts_with("digraph nanocube {"));
    /// assert!(graph.contains("layer0 -> layer1;"));
    /// ```
    pub fn to_graphviz(&self) -> String {
        let mut graph = String::from("digraph nanocube {\n    node [shape=box];\n");
        for (index, layer) in self.layers.iter().enumerate() {
            graph.push_str(&format!(
                "    layer{} [label=\"{} ({})\\n{} nodes\\n{} leaves\"];\n",
                index,
                layer.name.replace('"', "'"),
                layer.kind,
                layer.nodes,
                layer.leaves
            ));
            if index > 0 {
                graph.push_str(&format!("    layer{} -> layer{};\n", index - 1, index));
            }
        }
        graph.push_str("}\n");

        graph
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Records:          {}", self.records)?;
        writeln!(f, "Allocated memory: {}", format_size(self.allocated_memory))?;
        for (index, layer) in self.layers.iter().enumerate() {
            writeln!(
                f,
                "Layer {} - {} ({}): {} nodes, {} leaves",
                index, layer.name, layer.kind, layer.nodes, layer.leaves
            )?;
        }

        Ok(())
    }
}

/// A summary of the indexed data.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// The number of indexed records.
    pub records: usize,
    /// The aggregated measure (or the number of records if no measure is present).
    pub total: u64,
    /// The smallest and largest time bin seen.
    pub time_range: Option<(u64, u64)>,
    /// The number of distinct values per dimension.
    pub distinct_values: Vec<(String, usize)>,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Records: {}", self.records)?;
        writeln!(f, "Total:   {}", self.total)?;
        match self.time_range {
            Some((first, last)) => writeln!(f, "Time:    {}..{}", first, last)?,
            None => writeln!(f, "Time:    -")?,
        }
        for (name, distinct) in &self.distinct_values {
            writeln!(f, "{}: {} distinct values", name, distinct)?;
        }

        Ok(())
    }
}
