//! Round-trip: synthesize a slice file, stream-read it, compare field by
//! field. Thickness is not serialized and must come back as zero.

mod common;

use common::encode_slice_file;
use marc_slice::geometry::category;
use marc_slice::{GeometryTag, Hatch, Layer, Line, Point, Polygon, Polyline, SliceReader};
use std::io::Write;
use tempfile::NamedTempFile;

fn sample_layers(count: u32) -> Vec<Layer> {
    (1..=count)
        .map(|n| {
            let z = n as f32 * 0.03;
            Layer {
                number: n,
                height_mm: z,
                thickness_mm: 0.0,
                hatches: vec![Hatch {
                    tag: GeometryTag {
                        type_id: 1,
                        category: category::HATCH,
                        point_count: 4,
                    },
                    lines: vec![
                        Line {
                            a: Point::new(0.0, n as f32),
                            b: Point::new(12.5, n as f32),
                        },
                        Line {
                            a: Point::new(0.0, n as f32 + 0.1),
                            b: Point::new(12.5, n as f32 + 0.1),
                        },
                    ],
                }],
                polylines: vec![Polyline {
                    tag: GeometryTag {
                        type_id: 2,
                        category: category::POLYLINE,
                        point_count: 3,
                    },
                    points: vec![
                        Point::new(-1.0, -1.0),
                        Point::new(-2.0, -1.0),
                        Point::new(-2.0, -2.0),
                    ],
                }],
                polygons: vec![Polygon {
                    tag: GeometryTag {
                        type_id: 3,
                        category: category::POLYGON,
                        point_count: 4,
                    },
                    points: vec![
                        Point::new(5.0, 5.0),
                        Point::new(6.0, 5.0),
                        Point::new(6.0, 6.0),
                        Point::new(5.0, 6.0),
                    ],
                }],
                support_circles: Vec::new(),
            }
        })
        .collect()
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn k_layers_round_trip_field_by_field() {
    let layers = sample_layers(5);
    let file = write_temp(&encode_slice_file(&layers));

    let mut reader = SliceReader::open(file.path()).unwrap();
    assert_eq!(reader.total_layers(), 5);

    let mut decoded = Vec::new();
    while reader.has_next() {
        decoded.push(reader.read_next().unwrap());
    }
    assert_eq!(decoded.len(), layers.len());

    for (original, read_back) in layers.iter().zip(&decoded) {
        assert_eq!(read_back, original);
        assert_eq!(read_back.thickness_mm, 0.0);
    }
    assert!(!reader.has_next());
}

#[test]
fn layers_arrive_strictly_in_file_order() {
    let layers = sample_layers(10);
    let file = write_temp(&encode_slice_file(&layers));

    let mut reader = SliceReader::open(file.path()).unwrap();
    let mut expected = 1;
    while reader.has_next() {
        let layer = reader.read_next().unwrap();
        assert_eq!(layer.number, expected);
        expected += 1;
    }
    assert_eq!(expected, 11);
}

#[test]
fn layer_with_no_geometry_round_trips() {
    let layers = vec![Layer {
        number: 1,
        height_mm: 0.03,
        ..Default::default()
    }];
    let file = write_temp(&encode_slice_file(&layers));

    let mut reader = SliceReader::open(file.path()).unwrap();
    let layer = reader.read_next().unwrap();
    assert!(layer.is_empty());
}
