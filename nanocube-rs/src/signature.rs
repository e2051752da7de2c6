//! Derives the canonical type signature of a dataset.
//!
//! Cubes are specialized per shape of the dataset, therefore each combination of dimension and
//! variable types is served by a dedicated worker binary. The signature names this binary: all
//! categorical (`c<bytes>`) and quadtree (`q<levels>`) dimensions form the **dimensions**
//! segment, the time dimension and all unsigned measures (`u<bytes>`) form the **variables**
//! segment. Each entry is prefixed by an underscore and emitted in field order.
//!
//! Fields with an unrecognized type tag are skipped. They contribute to neither segment.
//!
//! # Example
//!
//! ```
//! # use nanocube::schema::DumpFileDescription;
//! # use nanocube::signature::Signature;
//! let description = DumpFileDescription::parse("
//! field: a nc_dim_cat_1
//! field: b nc_dim_cat_2
//! field: c nc_dim_cat_4
//! field: d nc_dim_quadtree_25
//! field: time nc_dim_time_2
//! field: count nc_var_uint_4
//! ").unwrap();
//!
//! let signature = Signature::resolve(&description);
//! assert_eq!(signature.dimensions(), "_c1_c2_c4_q25");
//! assert_eq!(signature.variables(), "_u2_u4");
//! assert_eq!(signature.to_string(), "_c1_c2_c4_q25_u2_u4");
//! ```
use std::fmt::{Display, Formatter};

use crate::schema::{DumpFileDescription, FieldKind};

/// The signature of a dataset, split into its dimensions and variables segment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    dimensions: String,
    variables: String,
}

impl Signature {
    /// Computes the signature of the given dataset description.
    pub fn resolve(description: &DumpFileDescription) -> Signature {
        let mut signature = Signature::default();

        for field in &description.fields {
            match field.kind {
                FieldKind::Categorical { bytes } => {
                    log::debug!("{}: categorical dimension with {} bytes", field.name, bytes);
                    signature.dimensions.push_str(&format!("_c{}", bytes));
                }
                FieldKind::Quadtree { levels } => {
                    log::debug!("{}: quadtree dimension with {} levels", field.name, levels);
                    signature.dimensions.push_str(&format!("_q{}", levels));
                }
                FieldKind::Time { bytes } => {
                    log::debug!("{}: time dimension with {} bytes", field.name, bytes);
                    signature.variables.push_str(&format!("_u{}", bytes));
                }
                FieldKind::Measure { bytes } => {
                    log::debug!("{}: unsigned variable with {} bytes", field.name, bytes);
                    signature.variables.push_str(&format!("_u{}", bytes));
                }
                FieldKind::Unknown { .. } => {
                    log::warn!(
                        "Ignoring field {} as its type {} is not supported.",
                        field.name,
                        field.type_name
                    );
                }
            }
        }

        signature
    }

    /// Returns the dimensions segment, e.g. `_c1_q25`.
    pub fn dimensions(&self) -> &str {
        &self.dimensions
    }

    /// Returns the time and variables segment, e.g. `_u2_u4`.
    pub fn variables(&self) -> &str {
        &self.variables
    }

    /// Determines if neither a dimension nor a variable was recognized.
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.variables.is_empty()
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.dimensions, self.variables)
    }
}
