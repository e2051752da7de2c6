//! Provides the HTTP endpoints of a worker.
//!
//! Once the cube is loaded, [install](install) registers the following endpoints in the
//! [CommandDictionary](crate::commands::CommandDictionary):
//!
//! | Endpoint     | Response                                                            |
//! |--------------|---------------------------------------------------------------------|
//! | `query`      | JSON result of the query expression given as remaining path         |
//! | `binquery`   | compressed binary result (see [frame](crate::frame))                |
//! | `tquery`     | JSON result, additionally expanded per time bin                     |
//! | `bintquery`  | compressed binary result, additionally expanded per time bin        |
//! | `stats`      | JSON string with per-layer statistics of the index                  |
//! | `schema`     | JSON string with the header of the dataset                          |
//! | `tbin`       | JSON string with the `tbin` metadata (**204 No Content** if absent) |
//! | `summary`    | JSON string with a summary of the indexed data                      |
//! | `graphviz`   | JSON string with a graphviz rendering of the index layers           |
//!
//! Errors are reported as JSON objects (`{"error": "..."}`): **400** for malformed or invalid
//! queries, **500** for unexpected failures.
use std::sync::Arc;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::commands::{CommandDictionary, CommandError, CommandResult, Handler};
use crate::cube::Cube;
use crate::frame;
use crate::platform::Platform;
use crate::query::executor::{execute, QueryKind};
use crate::query::QueryError;
use crate::request::Request;
use crate::response::Response;

/// The metadata key which carries the time binning of the dataset.
pub const TBIN_METADATA: &str = "tbin";

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
enum Endpoint {
    Query,
    BinQuery,
    TimeQuery,
    BinTimeQuery,
    Stats,
    Schema,
    TBin,
    Summary,
    GraphViz,
}

const ENDPOINTS: [(&str, Endpoint); 9] = [
    ("query", Endpoint::Query),
    ("binquery", Endpoint::BinQuery),
    ("tquery", Endpoint::TimeQuery),
    ("bintquery", Endpoint::BinTimeQuery),
    ("stats", Endpoint::Stats),
    ("schema", Endpoint::Schema),
    ("tbin", Endpoint::TBin),
    ("summary", Endpoint::Summary),
    ("graphviz", Endpoint::GraphViz),
];

/// Serves queries against a loaded cube.
pub struct Nanocube {
    cube: Arc<dyn Cube>,
}

impl Nanocube {
    /// Wraps the given cube.
    pub fn new(cube: Arc<dyn Cube>) -> Nanocube {
        Nanocube { cube }
    }

    /// Provides access to the underlying cube.
    pub fn cube(&self) -> &Arc<dyn Cube> {
        &self.cube
    }

    fn query(&self, request: &Request, kind: QueryKind, binary: bool) -> CommandResult {
        let expression = request.expression();
        log::debug!("Executing {:?} query '{}'", kind, expression);

        let result = execute(self.cube.as_ref(), &expression, kind).map_err(|error| match error {
            QueryError::Unexpected(_) => CommandError::ServerError(anyhow::anyhow!("{}", error)),
            _ => CommandError::ClientError(anyhow::anyhow!("{}", error)),
        })?;

        if binary {
            let data = result.serialize().map_err(CommandError::ServerError)?;
            let data = frame::compress(&data)
                .map_err(|error| CommandError::ServerError(anyhow::anyhow!("{}", error)))?;
            Ok(Response::octet_stream(data))
        } else {
            Ok(Response::json(&result.to_json(self.cube.schema())))
        }
    }

    fn tbin(&self) -> Response {
        match self
            .cube
            .schema()
            .description()
            .metadata
            .get(TBIN_METADATA)
        {
            Some(tbin) => Response::text(tbin),
            None => Response::empty(),
        }
    }
}

impl Handler for Nanocube {
    fn handle(&self, token: usize, request: &Request) -> CommandResult {
        match Endpoint::from_usize(token) {
            Some(Endpoint::Query) => self.query(request, QueryKind::Plain, false),
            Some(Endpoint::BinQuery) => self.query(request, QueryKind::Plain, true),
            Some(Endpoint::TimeQuery) => self.query(request, QueryKind::Time, false),
            Some(Endpoint::BinTimeQuery) => self.query(request, QueryKind::Time, true),
            Some(Endpoint::Stats) => Ok(Response::text(&self.cube.report().to_string())),
            Some(Endpoint::Schema) => Ok(Response::text(
                &self.cube.schema().description().to_string(),
            )),
            Some(Endpoint::TBin) => Ok(self.tbin()),
            Some(Endpoint::Summary) => Ok(Response::text(&self.cube.summary().to_string())),
            Some(Endpoint::GraphViz) => Ok(Response::text(&self.cube.graphviz())),
            None => Err(crate::server_error!("Unknown token received: {}", token)),
        }
    }
}

/// Registers the given cube and all its endpoints in the platform.
pub fn install(platform: &Arc<Platform>, cube: Arc<dyn Cube>) -> Arc<Nanocube> {
    let nanocube = Arc::new(Nanocube::new(cube));
    platform.register::<Nanocube>(nanocube.clone());

    if let Some(commands) = platform.find::<CommandDictionary>() {
        for (name, endpoint) in ENDPOINTS {
            commands.register_command(name, nanocube.clone(), endpoint as usize);
        }
    } else {
        log::warn!("No command dictionary present. Endpoints are not available.");
    }

    nanocube
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use hyper::StatusCode;

    use crate::builder::Builder;
    use crate::commands::CommandDictionary;
    use crate::config::Config;
    use crate::cube::flat::FlatCube;
    use crate::cube::Cube;
    use crate::frame;
    use crate::query::Address;
    use crate::request::Request;
    use crate::result::ResultVector;
    use crate::schema::{DumpFileDescription, Schema};
    use crate::server::Server;
    use crate::testing::{query_http_async, test_async, SHARED_TEST_RESOURCES};

    const HEADER: &str = "name: crimes
encoding: binary
metadata: tbin 2013-12-01_00:00:00_3600s
field: crime nc_dim_cat_1
valname: crime 0 ASSAULT
valname: crime 1 THEFT
field: time nc_dim_time_2
field: count nc_var_uint_4
";

    fn cube(header: &str) -> Arc<dyn Cube> {
        let schema = Schema::new(DumpFileDescription::parse(header).unwrap()).unwrap();
        let mut cube = FlatCube::new(schema).unwrap();

        let mut data = Vec::new();
        for (crime, time, count) in [(0_u8, 1_u16, 3_u32), (1, 1, 4), (1, 2, 5)] {
            data.push(crime);
            data.extend_from_slice(&time.to_le_bytes());
            data.extend_from_slice(&count.to_le_bytes());
        }
        let mut reader = Cursor::new(data);
        while cube.add(&mut reader).unwrap() {}

        Arc::new(cube)
    }

    #[test]
    fn endpoints_are_dispatched() {
        test_async(async {
            let platform = Builder::new().enable_commands().build().await;
            let _ = crate::service::install(&platform, cube(HEADER));
            let dispatcher = platform.require::<CommandDictionary>().dispatcher();

            let response = dispatcher
                .invoke(Request::example(vec!["query", "@crime", "unknown=1"]))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(json["layers"][0], "anchor:crime");
            assert_eq!(json["root"]["children"][1]["label"], "THEFT");
            assert_eq!(json["root"]["children"][1]["val"], 9);

            let response = dispatcher
                .invoke(Request::example(vec!["bintquery", "crime=1"]))
                .await;
            let data = frame::decompress(response.body()).unwrap();
            let result = ResultVector::deserialize(&data).unwrap();
            assert_eq!(result.levels(), &["time"]);
            assert_eq!(result.value_at(&[Address::value(2)]), Some(5));

            let response = dispatcher
                .invoke(Request::example(vec!["tquery", "time=1"]))
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                &response.body()[..],
                br#"{"error":"time queries should not constrain time dimension"}"#
            );

            let response = dispatcher
                .invoke(Request::example(vec!["query", "crime=[1"]))
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let response = dispatcher.invoke(Request::example(vec!["tbin"])).await;
            assert_eq!(&response.body()[..], br#""2013-12-01_00:00:00_3600s""#);

            let response = dispatcher.invoke(Request::example(vec!["schema"])).await;
            let schema: String = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(schema, HEADER);

            let response = dispatcher.invoke(Request::example(vec!["summary"])).await;
            let summary: String = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(summary.contains("Total:   12"), true);
        });
    }

    #[test]
    fn a_missing_tbin_yields_no_content() {
        test_async(async {
            let platform = Builder::new().enable_commands().build().await;
            let _ = crate::service::install(
                &platform,
                cube("field: crime nc_dim_cat_1\nfield: time nc_dim_time_2\nfield: count nc_var_uint_4"),
            );
            let dispatcher = platform.require::<CommandDictionary>().dispatcher();

            let response = dispatcher.invoke(Request::example(vec!["tbin"])).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert_eq!(response.body().is_empty(), true);
        });
    }

    #[test]
    fn integration_test() {
        // Exclusive access to port 1503...
        let _guard = SHARED_TEST_RESOURCES
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        test_async(async {
            let platform = Builder::new()
                .enable_all()
                .disable_config()
                .disable_signals()
                .build()
                .await;
            crate::config::install(platform.clone()).await;
            platform
                .require::<Config>()
                .load_from_string(
                    "
                server:
                    host: 127.0.0.1
                    port: 1503
                ",
                )
                .unwrap();
            let _ = crate::service::install(&platform, cube(HEADER));

            Server::fork_and_await(&platform.require::<Server>()).await;
            let server = platform.require::<Server>();

            let (status, body) = query_http_async(&server, "/query/@crime=%5B0,1%5D")
                .await
                .unwrap();
            assert_eq!(status, StatusCode::OK);
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["root"]["children"][0]["val"], 3);
            assert_eq!(json["root"]["children"][1]["val"], 9);

            let (status, _) = query_http_async(&server, "/nope").await.unwrap();
            assert_eq!(status, StatusCode::NOT_FOUND);

            platform.terminate();
        });
    }
}
