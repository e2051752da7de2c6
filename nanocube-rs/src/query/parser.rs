//! Parses query expressions into clauses.
//!
//! ```text
//! query    := clause ('/' clause)*
//! clause   := ['@'] name ['=' target]
//! target   := '[' target (',' target)* ']'
//!           | ('range' | 'interval') '(' address ',' address ')'
//!           | 'mt_interval_sequence(' n ',' n ',' n ')'
//!           | address '+' n
//!           | address
//! address  := 'qaddr(' n ',' n ',' n ')' | n
//! ```
//!
//! Empty clauses (e.g. caused by a trailing `/`) are ignored.
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, map, map_opt, opt},
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair},
    IResult, Parser,
};

use crate::query::{Address, QueryError, Target};

/// A single parsed clause of a query expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Determines if the dimension is anchored, i.e. marked with `@`.
    pub anchored: bool,
    /// The name of the dimension.
    pub dimension: String,
    /// The target given for the dimension or [Target::Root](Target::Root) if none was given.
    pub target: Target,
}

/// Parses the given query expression into its clauses.
///
/// # Example
///
/// ```
/// # use nanocube::query::parser::parse_query;
/// # use nanocube::query::{Target, Address};
/// let clauses = parse_query("@location=qaddr(1,1,1)+2/crime=[1,3]").unwrap();
/// assert_eq!(clauses.len(), 2);
/// assert_eq!(clauses[0].anchored, true);
/// assert_eq!(clauses[0].target, Target::Dive {
///     base: Address::quadtree(1, 1, 1).unwrap(),
///     depth: 2
/// });
/// assert_eq!(clauses[1].dimension, "crime");
/// ```
pub fn parse_query(expression: &str) -> Result<Vec<Clause>, QueryError> {
    expression
        .split('/')
        .filter(|text| !text.is_empty())
        .map(|text| match all_consuming(clause).parse(text) {
            Ok((_, clause)) => Ok(clause),
            Err(error) => Err(QueryError::Parse(format!(
                "Cannot parse query clause '{}': {}",
                text, error
            ))),
        })
        .collect()
}

fn number(input: &str) -> IResult<&str, u64> {
    nom::character::complete::u64(input)
}

fn dimension_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')(input)
}

fn clause(input: &str) -> IResult<&str, Clause> {
    map(
        (
            opt(char('@')),
            dimension_name,
            opt(preceded(char('='), target)),
        ),
        |(anchor, dimension, target)| Clause {
            anchored: anchor.is_some(),
            dimension: dimension.to_owned(),
            target: target.unwrap_or(Target::Root),
        },
    )
    .parse(input)
}

fn target(input: &str) -> IResult<&str, Target> {
    alt((
        sequence,
        range,
        intervals,
        dive,
        map(address, Target::Find),
    ))
    .parse(input)
}

fn sequence(input: &str) -> IResult<&str, Target> {
    map(
        delimited(char('['), separated_list1(char(','), target), char(']')),
        Target::Sequence,
    )
    .parse(input)
}

fn range(input: &str) -> IResult<&str, Target> {
    map(
        delimited(
            alt((tag("range("), tag("interval("))),
            separated_pair(address, char(','), address),
            char(')'),
        ),
        |(low, high)| Target::Range { low, high },
    )
    .parse(input)
}

fn intervals(input: &str) -> IResult<&str, Target> {
    map(
        delimited(
            tag("mt_interval_sequence("),
            (
                number,
                preceded(char(','), number),
                preceded(char(','), number),
            ),
            char(')'),
        ),
        |(base, width, count)| Target::Intervals { base, width, count },
    )
    .parse(input)
}

fn dive(input: &str) -> IResult<&str, Target> {
    map(
        separated_pair(address, char('+'), number),
        |(base, depth)| Target::Dive {
            base,
            depth: depth as usize,
        },
    )
    .parse(input)
}

fn address(input: &str) -> IResult<&str, Address> {
    alt((qaddr, map(number, Address::value))).parse(input)
}

fn qaddr(input: &str) -> IResult<&str, Address> {
    map_opt(
        delimited(
            tag("qaddr("),
            (
                number,
                preceded(char(','), number),
                preceded(char(','), number),
            ),
            char(')'),
        ),
        |(x, y, level)| Address::quadtree(x, y, level as usize),
    )
    .parse(input)
}

#[cfg(test)]
mod tests {
    use crate::query::parser::parse_query;
    use crate::query::{Address, QueryError, Target};

    fn single_target(expression: &str) -> Target {
        let mut clauses = parse_query(expression).unwrap();
        assert_eq!(clauses.len(), 1);
        clauses.remove(0).target
    }

    #[test]
    fn plain_dimensions_are_parsed() {
        let clauses = parse_query("@a/b/").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].anchored, true);
        assert_eq!(clauses[0].dimension, "a");
        assert_eq!(clauses[0].target, Target::Root);
        assert_eq!(clauses[1].anchored, false);
        assert_eq!(clauses[1].dimension, "b");
    }

    #[test]
    fn all_target_kinds_are_parsed() {
        assert_eq!(single_target("a=12"), Target::Find(Address::value(12)));
        assert_eq!(
            single_target("a=qaddr(3,0,2)"),
            Target::Find(Address::from_path(vec![1, 1]))
        );
        assert_eq!(
            single_target("a=5+1"),
            Target::Dive {
                base: Address::value(5),
                depth: 1
            }
        );
        assert_eq!(
            single_target("a=range(qaddr(0,0,1),qaddr(1,1,1))"),
            Target::Range {
                low: Address::from_path(vec![0]),
                high: Address::from_path(vec![3])
            }
        );
        assert_eq!(
            single_target("time=interval(10,20)"),
            Target::Range {
                low: Address::value(10),
                high: Address::value(20)
            }
        );
        assert_eq!(
            single_target("time=mt_interval_sequence(100,10,5)"),
            Target::Intervals {
                base: 100,
                width: 10,
                count: 5
            }
        );
        assert_eq!(
            single_target("a=[1,qaddr(0,0,0)+3]"),
            Target::Sequence(vec![
                Target::Find(Address::value(1)),
                Target::Dive {
                    base: Address::root(),
                    depth: 3
                }
            ])
        );
    }

    #[test]
    fn malformed_clauses_are_rejected() {
        for expression in [
            "a=",
            "a=[]",
            "a=qaddr(1,2)",
            "a=qaddr(4,0,2)",
            "a=range(1)",
            "a=1 ",
            "@",
            "a=x",
        ] {
            match parse_query(expression) {
                Err(QueryError::Parse(_)) => (),
                other => panic!("{} should not be parsed but yielded {:?}", expression, other),
            }
        }
    }
}
