//! Byte-level slice file synthesis shared by the integration tests.

use marc_slice::{Hatch, Layer, Polygon, Polyline};

/// Serialize layers into the on-disk slice stream (header + layer records).
pub fn encode_slice_file(layers: &[Layer]) -> Vec<u8> {
    let mut bytes = Vec::new();

    // Header block.
    bytes.extend_from_slice(b"MARC");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&(layers.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    bytes.extend_from_slice(&1_700_000_000u64.to_le_bytes());
    let mut printer = [0u8; 32];
    printer[..8].copy_from_slice(b"marc-sim");
    bytes.extend_from_slice(&printer);
    bytes.resize(marc_slice::HEADER_LEN, 0);

    for layer in layers {
        encode_layer(&mut bytes, layer);
    }
    bytes
}

fn encode_layer(bytes: &mut Vec<u8>, layer: &Layer) {
    bytes.extend_from_slice(&layer.number.to_le_bytes());
    bytes.extend_from_slice(&layer.height_mm.to_le_bytes());

    bytes.extend_from_slice(&(layer.hatches.len() as u32).to_le_bytes());
    for hatch in &layer.hatches {
        encode_hatch(bytes, hatch);
    }

    bytes.extend_from_slice(&(layer.polylines.len() as u32).to_le_bytes());
    for polyline in &layer.polylines {
        encode_polyline(bytes, polyline);
    }

    bytes.extend_from_slice(&(layer.polygons.len() as u32).to_le_bytes());
    for polygon in &layer.polygons {
        encode_polygon(bytes, polygon);
    }
}

fn encode_tag(bytes: &mut Vec<u8>, type_id: u32, category: u32, point_count: u32) {
    bytes.extend_from_slice(&type_id.to_le_bytes());
    bytes.extend_from_slice(&category.to_le_bytes());
    bytes.extend_from_slice(&point_count.to_le_bytes());
}

fn encode_hatch(bytes: &mut Vec<u8>, hatch: &Hatch) {
    encode_tag(
        bytes,
        hatch.tag.type_id,
        hatch.tag.category,
        (hatch.lines.len() * 2) as u32,
    );
    for line in &hatch.lines {
        bytes.extend_from_slice(&line.a.x.to_le_bytes());
        bytes.extend_from_slice(&line.a.y.to_le_bytes());
        bytes.extend_from_slice(&line.b.x.to_le_bytes());
        bytes.extend_from_slice(&line.b.y.to_le_bytes());
    }
}

fn encode_polyline(bytes: &mut Vec<u8>, polyline: &Polyline) {
    encode_tag(
        bytes,
        polyline.tag.type_id,
        polyline.tag.category,
        polyline.points.len() as u32,
    );
    for point in &polyline.points {
        bytes.extend_from_slice(&point.x.to_le_bytes());
        bytes.extend_from_slice(&point.y.to_le_bytes());
    }
}

fn encode_polygon(bytes: &mut Vec<u8>, polygon: &Polygon) {
    encode_tag(
        bytes,
        polygon.tag.type_id,
        polygon.tag.category,
        polygon.points.len() as u32,
    );
    for point in &polygon.points {
        bytes.extend_from_slice(&point.x.to_le_bytes());
        bytes.extend_from_slice(&point.y.to_le_bytes());
    }
}
