//! Format normalization for Parquet and gzip sources

mod common;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use common::{file_uri, init_test_tracing, unreachable_destination, Captured, MemorySink};
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use parquet::arrow::ArrowWriter;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tabload_ingest::batch::{parse_timestamp, CellValue};
use tabload_ingest::config::IngestConfig;
use tabload_ingest::normalize::normalize_blocking;
use tabload_ingest::schema::{probe_header, ColumnCoercion, ColumnType};
use tabload_ingest::source::SourceDescriptor;
use tabload_ingest::Pipeline;

// 2021-01-01 00:30:10 UTC
const PICKUP_MICROS: i64 = 1_609_461_010_000_000;

fn trip_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("VendorID", DataType::Int64, true),
        Field::new(
            "tpep_pickup_datetime",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        ),
        Field::new("fare_amount", DataType::Float64, true),
        Field::new("store_and_fwd_flag", DataType::Utf8, true),
        Field::new("airport", DataType::Boolean, true),
    ]))
}

fn trip_batch(schema: Arc<Schema>, offset: i64, rows: i64) -> RecordBatch {
    let ids: Vec<Option<i64>> = (0..rows).map(|i| Some(offset + i)).collect();
    let pickups: Vec<Option<i64>> = (0..rows)
        .map(|i| (i % 5 != 4).then_some(PICKUP_MICROS + (offset + i) * 1_000_000))
        .collect();
    let fares: Vec<Option<f64>> = (0..rows).map(|i| Some(2.5 + i as f64)).collect();
    let flags: Vec<Option<&str>> = (0..rows).map(|i| Some(if i % 2 == 0 { "N" } else { "Y" })).collect();
    let airport: Vec<Option<bool>> = (0..rows).map(|i| Some(i % 3 == 0)).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(TimestampMicrosecondArray::from(pickups)),
        Arc::new(Float64Array::from(fares)),
        Arc::new(StringArray::from(flags)),
        Arc::new(BooleanArray::from(airport)),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

fn write_parquet(path: &Path, batches: &[RecordBatch], schema: Arc<Schema>) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    for batch in batches {
        writer.write(batch).unwrap();
    }
    writer.close().unwrap();
}

fn count_data_rows(path: &Path) -> usize {
    csv::Reader::from_path(path).unwrap().records().count()
}

#[test]
fn test_parquet_conversion_preserves_rows_and_columns() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("yellow_tripdata_2021-01.parquet");
    let schema = trip_schema();
    write_parquet(
        &input,
        &[trip_batch(schema.clone(), 0, 12), trip_batch(schema.clone(), 12, 9)],
        schema,
    );

    let source = SourceDescriptor::from_uri("https://host/yellow_tripdata_2021-01.parquet").unwrap();
    let artifact = normalize_blocking(&source, &input).unwrap();

    assert!(artifact.converted);
    assert_eq!(artifact.path, dir.path().join("yellow_tripdata_2021-01.csv"));
    assert_eq!(
        probe_header(&artifact.path).unwrap(),
        vec!["VendorID", "tpep_pickup_datetime", "fare_amount", "store_and_fwd_flag", "airport"]
    );
    assert_eq!(count_data_rows(&artifact.path), 21);

    let mut reader = csv::Reader::from_path(&artifact.path).unwrap();
    let first = reader.records().next().unwrap().unwrap();
    assert_eq!(&first[0], "0");
    assert_eq!(
        parse_timestamp(&first[1]),
        parse_timestamp("2021-01-01 00:30:10"),
        "timestamp written as {}",
        &first[1]
    );
}

#[test]
fn test_empty_parquet_keeps_header() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.parquet");
    write_parquet(&input, &[], trip_schema());

    let source = SourceDescriptor::from_uri("file:///tmp/empty.parquet").unwrap();
    let artifact = normalize_blocking(&source, &input).unwrap();

    assert_eq!(probe_header(&artifact.path).unwrap().len(), 5);
    assert_eq!(count_data_rows(&artifact.path), 0);
}

#[test]
fn test_gzip_is_decompressed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("trips.csv.gz");
    let plain = "a,b\n1,x\n2,y\n3,z\n";

    let mut encoder = GzEncoder::new(std::fs::File::create(&input).unwrap(), GzLevel::default());
    encoder.write_all(plain.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let source = SourceDescriptor::from_uri("https://host/trips.csv.gz").unwrap();
    let artifact = normalize_blocking(&source, &input).unwrap();

    assert!(artifact.converted);
    assert_eq!(artifact.path, dir.path().join("trips.csv"));
    assert_eq!(std::fs::read_to_string(&artifact.path).unwrap(), plain);
    assert!(input.exists());
}

#[tokio::test]
async fn test_parquet_source_end_to_end() {
    init_test_tracing();
    let src = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let input = src.path().join("trips.parquet");
    let schema = trip_schema();
    write_parquet(&input, &[trip_batch(schema.clone(), 0, 25)], schema);

    let config = IngestConfig::builder()
        .table("trips")
        .chunk_size(10)
        .data_dir(data.path())
        .coercions(vec![
            ColumnCoercion::new("VendorID", ColumnType::BigInt),
            ColumnCoercion::new("tpep_pickup_datetime", ColumnType::Timestamp),
            ColumnCoercion::new("fare_amount", ColumnType::Double),
            ColumnCoercion::new("airport", ColumnType::Boolean),
        ])
        .build();

    let captured = Captured::default();
    let mut sink = MemorySink::new();
    let report = Pipeline::new(config, unreachable_destination())
        .run_with_sink(&file_uri(&input), &mut sink, captured.reporter())
        .await
        .unwrap();

    assert!(report.artifact.converted);
    assert_eq!(report.summary.rows, 25);
    assert_eq!(report.summary.batches, 3);
    assert_eq!(captured.lines().len(), 4);

    let rows = &sink.table("trips").rows;
    assert_eq!(rows.len(), 25);
    assert_eq!(rows[0][0], CellValue::BigInt(0));
    assert_eq!(
        rows[0][1],
        CellValue::Timestamp(parse_timestamp("2021-01-01 00:30:10").unwrap())
    );
    assert_eq!(rows[4][1], CellValue::Null);
    assert_eq!(rows[0][2], CellValue::Double(2.5));
    assert_eq!(rows[0][3], CellValue::Text("N".to_string()));
    assert_eq!(rows[0][4], CellValue::Boolean(true));
}

#[tokio::test]
async fn test_timezone_tagged_timestamps_load_as_utc() {
    init_test_tracing();
    let src = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let input = src.path().join("spark_trips.parquet");

    let schema = Arc::new(Schema::new(vec![
        Field::new("VendorID", DataType::Int64, true),
        Field::new(
            "tpep_pickup_datetime",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            true,
        ),
        Field::new(
            "tpep_dropoff_datetime",
            DataType::Timestamp(TimeUnit::Microsecond, Some("America/New_York".into())),
            true,
        ),
    ]));
    let dropoff_micros = PICKUP_MICROS + 900_000_000;
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![Some(1), Some(2)])),
            Arc::new(
                TimestampMicrosecondArray::from(vec![Some(PICKUP_MICROS), None])
                    .with_timezone("UTC"),
            ),
            Arc::new(
                TimestampMicrosecondArray::from(vec![Some(dropoff_micros), Some(dropoff_micros)])
                    .with_timezone("America/New_York"),
            ),
        ],
    )
    .unwrap();
    write_parquet(&input, &[batch], schema);

    let config = IngestConfig::builder()
        .table("trips")
        .data_dir(data.path())
        .build();

    let mut sink = MemorySink::new();
    let report = Pipeline::new(config, unreachable_destination())
        .run_with_sink(&file_uri(&input), &mut sink, Captured::default().reporter())
        .await
        .unwrap();

    assert_eq!(report.summary.rows, 2);
    let rows = &sink.table("trips").rows;
    assert_eq!(
        rows[0][1],
        CellValue::Timestamp(parse_timestamp("2021-01-01 00:30:10").unwrap())
    );
    assert_eq!(rows[1][1], CellValue::Null);
    assert_eq!(
        rows[0][2],
        CellValue::Timestamp(parse_timestamp("2021-01-01 00:45:10").unwrap())
    );
    assert_eq!(rows[1][2], rows[0][2]);
}
