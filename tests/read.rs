mod common;

use common::{Element, Fixture};
use futures::executor::block_on;
use serde_json::json;
use zarrs_panels::chunk::{ArraySlice, TypedBuffer};
use zarrs_panels::codec::{Codec, CodecChain};
use zarrs_panels::storage::{Store, StoreRef};

fn ramp(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64 * 0.5 - 3.0).collect()
}

#[test]
fn read_shuffled_zlib_chunks() {
    let fixture = Fixture::new();
    let values = ramp(3 * 5 * 7);
    fixture.float32("lithk", &[3, 5, 7], &[2, 2, 3], &values, Some(-9999.0), json!({}));
    let store = fixture.zarr_store();

    let meta = block_on(store.open_array("lithk")).unwrap();
    assert_eq!(meta.shape, vec![3, 5, 7]);
    assert_eq!(meta.chunk_shape, vec![2, 2, 3]);
    assert_eq!(meta.data_type, "float32");
    assert_eq!(meta.fill_value, Some(-9999.0));

    let all = block_on(store.read_array("lithk", &ArraySlice::all(&meta.shape))).unwrap();
    let expected: Vec<f32> = values.iter().map(|v| *v as f32).collect();
    assert_eq!(all, TypedBuffer::Float32(expected.clone()));

    let step = block_on(store.read_array("lithk", &ArraySlice::leading_index(&meta.shape, 2))).unwrap();
    assert_eq!(step.into_f32_vec(), expected[70..].to_vec());
}

#[test]
fn missing_chunks_hold_fill() {
    let fixture = Fixture::new();
    fixture.put_json(
        "sparse/.zarray",
        &json!({
            "zarr_format": 2,
            "shape": [4],
            "chunks": [2],
            "dtype": "<f8",
            "compressor": {"id": "zlib", "level": 6},
            "fill_value": "NaN",
            "filters": null,
            "order": "C",
        }),
    );
    let raw = Element::F64Le.encode(&[1.0, 2.0]);
    let chain = CodecChain::new(vec![Codec::Zlib { level: 6 }]);
    fixture.put("sparse/1", chain.encode(&raw).unwrap());

    let store = fixture.zarr_store();
    let values = block_on(store.read_array("sparse", &ArraySlice::all(&[4])))
        .unwrap()
        .to_f64_vec();
    assert!(values[0].is_nan() && values[1].is_nan());
    assert_eq!(&values[2..], &[1.0, 2.0]);
}

#[test]
fn corrupt_chunk_is_a_decode_error() {
    let fixture = Fixture::new();
    fixture.float32("v", &[4], &[4], &[1.0, 2.0, 3.0, 4.0], None, json!({}));
    fixture.put("v/0", vec![0x78, 0x01, 0xde, 0xad]);
    let store = fixture.zarr_store();
    let err = block_on(store.read_array("v", &ArraySlice::all(&[4]))).unwrap_err();
    assert!(matches!(err, zarrs_panels::Error::Decode(_)), "{err}");
}

#[test]
fn read_v3_gzip_big_endian() {
    let fixture = Fixture::new();
    fixture.put_json(
        "v3/zarr.json",
        &json!({
            "zarr_format": 3,
            "node_type": "array",
            "shape": [2, 3],
            "data_type": "float64",
            "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": [2, 3]}},
            "chunk_key_encoding": {"name": "default", "configuration": {"separator": "/"}},
            "fill_value": 0.0,
            "codecs": [
                {"name": "bytes", "configuration": {"endian": "big"}},
                {"name": "gzip", "configuration": {"level": 5}}
            ],
            "attributes": {"units": "m", "standard_name": "land_ice_thickness"},
            "dimension_names": ["y", "x"]
        }),
    );
    let values = [1.5, -2.0, 3.25, 0.0, 1e6, -7.5];
    let raw = Element::F64Be.encode(&values);
    let chain = CodecChain::new(vec![Codec::Gzip { level: 5 }]);
    fixture.put("v3/c/0/0", chain.encode(&raw).unwrap());

    let store = fixture.zarr_store();
    let meta = block_on(store.open_array("v3")).unwrap();
    assert_eq!(meta.data_type, "float64");
    assert_eq!(
        meta.dimension_names,
        Some(vec![Some("y".to_string()), Some("x".to_string())])
    );
    assert_eq!(meta.attributes.units.as_deref(), Some("m"));
    assert_eq!(meta.attributes.standard_name.as_deref(), Some("land_ice_thickness"));
    let out = block_on(store.read_array("v3", &ArraySlice::all(&[2, 3]))).unwrap();
    assert_eq!(out, TypedBuffer::Float64(values.to_vec()));
}

#[test]
fn read_v3_numcodecs_partial_shuffle() {
    let fixture = Fixture::new();
    fixture.put_json(
        "odd/zarr.json",
        &json!({
            "zarr_format": 3,
            "node_type": "array",
            "shape": [3],
            "data_type": "float32",
            "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": [3]}},
            "chunk_key_encoding": {"name": "default", "configuration": {"separator": "/"}},
            "fill_value": "NaN",
            "codecs": [
                {"name": "bytes", "configuration": {"endian": "little"}},
                {"name": "numcodecs.shuffle", "configuration": {"elementsize": 8}},
                {"name": "numcodecs.zlib", "configuration": {"level": 1}}
            ]
        }),
    );
    // 12 bytes shuffled as one 8-byte element plus a 4-byte remainder
    let values = [0.25, -1.0, 7.5];
    let chain = CodecChain::new(vec![Codec::Shuffle { elementsize: 8 }, Codec::Zlib { level: 1 }]);
    fixture.put("odd/c/0", chain.encode(&Element::F32Le.encode(&values)).unwrap());

    let store = fixture.zarr_store();
    let meta = block_on(store.open_array("odd")).unwrap();
    assert!(meta.fill_value.is_some_and(f64::is_nan));
    let out = block_on(store.read_array("odd", &ArraySlice::all(&[3]))).unwrap();
    assert_eq!(out, TypedBuffer::Float32(vec![0.25, -1.0, 7.5]));
    let tail = block_on(store.read_array("odd", &ArraySlice::new(vec![1..3]))).unwrap();
    assert_eq!(tail.into_f32_vec(), vec![-1.0, 7.5]);
}

#[test]
fn invalid_codec_level_fails_to_open() {
    let fixture = Fixture::new();
    fixture.put_json(
        "bad/.zarray",
        &json!({
            "zarr_format": 2,
            "shape": [2],
            "chunks": [2],
            "dtype": "<f4",
            "compressor": {"id": "gzip", "level": 12},
            "fill_value": 0.0,
            "filters": null,
            "order": "C",
        }),
    );
    let store = fixture.zarr_store();
    let err = block_on(store.open_array("bad")).unwrap_err();
    assert!(matches!(err, zarrs_panels::Error::Metadata { .. }), "{err}");
}

#[test]
fn listing_and_groups() {
    let fixture = Fixture::new();
    fixture.group_attrs("models", json!({"description": "ensemble"}));
    fixture.group("models/b");
    fixture.group("models/a");
    fixture.float32("models/a/v", &[2, 2], &[1, 2], &[1.0, 2.0, 3.0, 4.0], None, json!({}));
    let store = fixture.zarr_store();

    assert_eq!(block_on(store.list_children("")).unwrap(), vec!["models"]);
    assert_eq!(block_on(store.list_children("models")).unwrap(), vec!["a", "b"]);
    // chunk keys of an array are not children
    assert!(block_on(store.list_children("models/a/v")).unwrap().is_empty());

    let attrs = block_on(store.open_group("models")).unwrap();
    assert_eq!(attrs.description.as_deref(), Some("ensemble"));
    assert!(block_on(store.open_group("models/a/v")).is_err());
    assert!(block_on(store.open_array("models/a")).is_err());
}

#[test]
fn resolve_refs() {
    let fixture = Fixture::new();
    let store = fixture.zarr_store();
    let main = block_on(store.resolve_ref(&StoreRef::default())).unwrap();
    assert_eq!(main.snapshot, None);
    let err = block_on(store.resolve_ref(&StoreRef::parse("dev"))).unwrap_err();
    assert!(matches!(err, zarrs_panels::Error::RefNotFound(_)));

    fixture.put_json(
        "refs/tag.v1/ref.json",
        &json!({"snapshot": "1CECHNKREP0F1RSTCMT0"}),
    );
    let tag = block_on(store.resolve_ref(&StoreRef::parse("v1"))).unwrap();
    assert_eq!(tag.snapshot.as_deref(), Some("1CECHNKREP0F1RSTCMT0"));

    let snap = StoreRef::parse("0000000000000000000A");
    let err = block_on(store.resolve_ref(&snap)).unwrap_err();
    assert!(matches!(err, zarrs_panels::Error::RefNotFound(_)));
    fixture.put("snapshots/0000000000000000000A", Vec::new());
    let resolved = block_on(store.resolve_ref(&snap)).unwrap();
    assert_eq!(resolved.requested, snap);
    assert_eq!(resolved.snapshot.as_deref(), Some("0000000000000000000A"));
}
