//! Splits the path of an HTTP request into an endpoint name and its parameters.
//!
//! The first path segment names the endpoint, all remaining segments are its parameters. Each
//! segment is percent-decoded separately, so that an encoded `/` within a segment doesn't split
//! it. For query endpoints, the parameters are joined back into the query expression.
//!
//! # Example
//!
//! ```
//! # use nanocube::request::Request;
//! let request = Request::parse("/query/@location=qaddr(1,2,2)%2B3/crime=%5B1,2%5D").unwrap();
//! assert_eq!(request.command(), "query");
//! assert_eq!(request.parameter_count(), 2);
//! assert_eq!(request.str_parameter(0).unwrap(), "@location=qaddr(1,2,2)+3");
//! assert_eq!(request.expression(), "@location=qaddr(1,2,2)+3/crime=[1,2]");
//! ```
use anyhow::{anyhow, Context};
use itertools::Itertools;

/// A parsed request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: String,
    parameters: Vec<String>,
}

impl Request {
    /// Parses the given (still percent-encoded) path.
    pub fn parse(path: &str) -> anyhow::Result<Request> {
        let mut segments = path
            .split('/')
            .skip_while(|segment| segment.is_empty())
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|segment| segment.into_owned())
                    .with_context(|| format!("Cannot decode the path segment '{}'.", segment))
            });

        let command = segments.next().transpose()?.unwrap_or_default();
        let parameters = segments.collect::<anyhow::Result<Vec<String>>>()?;

        Ok(Request {
            command,
            parameters,
        })
    }

    /// Creates a request for the given endpoint and parameters.
    ///
    /// ```
    /// # use nanocube::request::Request;
    /// let request = Request::example(vec!["query", "@crime", "time=5"]);
    /// assert_eq!(request.expression(), "@crime/time=5");
    /// ```
    pub fn example(segments: Vec<&str>) -> Request {
        let mut segments = segments.into_iter().map(str::to_owned);
        Request {
            command: segments.next().unwrap_or_default(),
            parameters: segments.collect(),
        }
    }

    /// Returns the name of the endpoint to call.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the number of parameters.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Returns the parameter at the given index.
    pub fn str_parameter(&self, index: usize) -> anyhow::Result<&str> {
        self.parameters
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Missing parameter {} for {}.", index, self.command))
    }

    /// Joins all parameters into a query expression.
    pub fn expression(&self) -> String {
        self.parameters.iter().join("/")
    }
}
