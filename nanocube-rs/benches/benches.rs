use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nanocube::average::Average;
use nanocube::commands::CommandDictionary;
use nanocube::cube::flat::FlatCube;
use nanocube::cube::Cube;
use nanocube::frame;
use nanocube::query::executor::{execute, QueryKind};
use nanocube::query::parser::parse_query;
use nanocube::query::Address;
use nanocube::request::Request;
use nanocube::result::ResultVector;
use nanocube::schema::{DumpFileDescription, Schema};

const HEADER: &str = "name: bench
encoding: binary
field: location nc_dim_quadtree_25
field: crime nc_dim_cat_1
field: time nc_dim_time_2
field: count nc_var_uint_4
";

fn cube(records: u32) -> FlatCube {
    let schema = Schema::new(DumpFileDescription::parse(HEADER).unwrap()).unwrap();
    let mut cube = FlatCube::new(schema).unwrap();

    let mut data = Vec::new();
    for index in 0..records {
        data.extend_from_slice(&(index * 7919 % (1 << 25)).to_le_bytes());
        data.extend_from_slice(&(index * 104_729 % (1 << 25)).to_le_bytes());
        data.push((index % 5) as u8);
        data.extend_from_slice(&((index % 1000) as u16).to_le_bytes());
        data.extend_from_slice(&1_u32.to_le_bytes());
    }
    let mut reader = Cursor::new(data);
    while cube.add(&mut reader).unwrap() {}

    cube
}

fn result(width: u64) -> ResultVector {
    let mut result = ResultVector::new(vec!["crime".to_owned(), "time".to_owned()]);
    for crime in 0..5 {
        for time in 0..width {
            result.add(&[Address::value(crime), Address::value(time)], time + crime);
        }
    }

    result
}

fn query_benchmarks(c: &mut Criterion) {
    c.bench_function("parse simple query", |b| {
        b.iter(|| parse_query(black_box("@crime=[0,1,2]")).unwrap())
    });

    c.bench_function("parse complex query", |b| {
        b.iter(|| {
            parse_query(black_box(
                "@location=qaddr(1,2,2)+3/crime=[0,1]/@time=mt_interval_sequence(480,24,10)",
            ))
            .unwrap()
        })
    });

    let cube = cube(100_000);
    c.bench_function("execute drill down", |b| {
        b.iter(|| {
            execute(
                &cube,
                black_box("@location=qaddr(0,0,1)+4/@crime"),
                QueryKind::Plain,
            )
            .unwrap()
        })
    });

    c.bench_function("execute time query", |b| {
        b.iter(|| execute(&cube, black_box("crime=[1,2]"), QueryKind::Time).unwrap())
    });
}

fn frame_benchmarks(c: &mut Criterion) {
    let data = result(1_000).serialize().unwrap();

    c.bench_function("serialize result", |b| {
        let result = result(1_000);
        b.iter(|| black_box(result.serialize().unwrap()))
    });

    c.bench_function("compress frame", |b| {
        b.iter(|| frame::compress(black_box(&data)).unwrap())
    });

    let compressed = frame::compress(&data).unwrap();
    c.bench_function("decompress frame", |b| {
        b.iter(|| frame::decompress(black_box(&compressed)).unwrap())
    });
}

fn commands_benchmarks(c: &mut Criterion) {
    c.bench_function("recording average duration", |b| {
        let avg = Average::default();
        b.iter(|| avg.add(black_box(42)));
    });

    c.bench_function("execute unknown endpoint", |b| {
        b.iter_custom(|iters| {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(async {
                    let commands = CommandDictionary::new(4);
                    let dispatcher = commands.dispatcher();

                    let start = Instant::now();
                    for _i in 0..iters {
                        let request = Request::example(vec!["nope"]);
                        let _ = black_box(dispatcher.invoke(request).await);
                    }
                    start.elapsed()
                })
        })
    });

    c.bench_function("execute query endpoint", |b| {
        let cube: Arc<dyn Cube> = Arc::new(cube(10_000));
        b.iter_custom(|iters| {
            let cube = cube.clone();
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(async move {
                    let platform = nanocube::builder::Builder::new()
                        .enable_commands()
                        .build()
                        .await;
                    let _ = nanocube::service::install(&platform, cube);
                    let dispatcher = platform.require::<CommandDictionary>().dispatcher();

                    let start = Instant::now();
                    for _i in 0..iters {
                        let request = Request::example(vec!["query", "@crime"]);
                        let _ = black_box(dispatcher.invoke(request).await);
                    }
                    start.elapsed()
                })
        })
    });
}

criterion_group!(
    benches,
    query_benchmarks,
    frame_benchmarks,
    commands_benchmarks
);
criterion_main!(benches);
