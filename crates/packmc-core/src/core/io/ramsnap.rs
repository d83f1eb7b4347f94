//! The RAMSNAP textual snapshot format.
//!
//! ```text
//! RAMSNAP 1
//! b00 b01 b02 b10 b11 b12 b20 b21 b22
//! N
//! x y z q0 q1 q2 q3 species        (N particle lines)
//! key value                        (auxiliary pairs, sorted by key)
//! ```
//!
//! Floats are printed in Rust's shortest round-trip representation, which
//! together with the sorted auxiliary pairs makes store -> load -> store
//! byte-identical.

use super::{AuxInfo, SnapshotData, SnapshotFile};
use crate::core::geometry::TriclinicBox;
use crate::core::models::shape::Shape;
use nalgebra::{Matrix3, Quaternion, Unit, Vector3};
use std::io::{BufRead, Write};
use thiserror::Error;

const FORMAT_NAME: &str = "RAMSNAP";
const FORMAT_VERSION: &str = "1";
const UNIT_NORM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("unsupported snapshot format or version: '{0}'")]
    UnsupportedFormat(String),

    #[error("snapshot box matrix has a non-positive determinant")]
    InvalidBox,
}

pub struct RamsnapFile;

struct Lines<R> {
    reader: R,
    number: usize,
}

impl<R: BufRead> Lines<R> {
    fn next_line(&mut self) -> Result<Option<String>, SnapshotError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        self.number += 1;
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn expect_line(&mut self, what: &str) -> Result<String, SnapshotError> {
        self.next_line()?.ok_or_else(|| SnapshotError::Malformed {
            line: self.number + 1,
            reason: format!("unexpected end of file, expected {what}"),
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::Malformed {
            line: self.number,
            reason: reason.into(),
        }
    }
}

fn parse_floats<const N: usize>(
    lines: &Lines<impl BufRead>,
    text: &str,
) -> Result<[f64; N], SnapshotError> {
    let mut values = [0.0; N];
    let mut fields = text.split_whitespace();
    for value in values.iter_mut() {
        let field = fields
            .next()
            .ok_or_else(|| lines.malformed(format!("expected {N} numbers")))?;
        *value = field
            .parse()
            .map_err(|_| lines.malformed(format!("'{field}' is not a number")))?;
    }
    Ok(values)
}

impl SnapshotFile for RamsnapFile {
    type Error = SnapshotError;

    fn read_from(reader: &mut impl BufRead) -> Result<SnapshotData, Self::Error> {
        let mut lines = Lines { reader, number: 0 };

        let header = lines.expect_line("format header")?;
        let mut header_fields = header.split_whitespace();
        if header_fields.next() != Some(FORMAT_NAME)
            || header_fields.next() != Some(FORMAT_VERSION)
        {
            return Err(SnapshotError::UnsupportedFormat(header));
        }

        let box_line = lines.expect_line("box matrix")?;
        let b: [f64; 9] = parse_floats(&lines, &box_line)?;
        let matrix = Matrix3::new(b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8]);
        let simulation_box = TriclinicBox::try_new(matrix).ok_or(SnapshotError::InvalidBox)?;

        let count_line = lines.expect_line("particle count")?;
        let count: usize = count_line
            .trim()
            .parse()
            .map_err(|_| lines.malformed("expected a particle count"))?;

        let mut shapes = Vec::with_capacity(count);
        for _ in 0..count {
            let particle_line = lines.expect_line("particle record")?;
            let mut fields = particle_line.split_whitespace();
            let mut numbers = [0.0f64; 7];
            for value in numbers.iter_mut() {
                let field = fields
                    .next()
                    .ok_or_else(|| lines.malformed("expected 'x y z q0 q1 q2 q3 species'"))?;
                *value = field
                    .parse()
                    .map_err(|_| lines.malformed(format!("'{field}' is not a number")))?;
            }
            let species: usize = fields
                .next()
                .ok_or_else(|| lines.malformed("missing species index"))?
                .parse()
                .map_err(|_| lines.malformed("species index is not an integer"))?;
            if fields.next().is_some() {
                return Err(lines.malformed("trailing fields in particle record"));
            }

            let quaternion = Quaternion::new(numbers[3], numbers[4], numbers[5], numbers[6]);
            if (quaternion.norm_squared() - 1.0).abs() > UNIT_NORM_TOLERANCE {
                return Err(lines.malformed("orientation quaternion is not normalized"));
            }
            // Reconstructed without renormalization so that a stored unit
            // quaternion round-trips bit for bit.
            let orientation = Unit::new_unchecked(quaternion);
            let position = Vector3::new(numbers[0], numbers[1], numbers[2]);
            shapes.push(Shape::new(position, orientation, species));
        }

        let mut aux = AuxInfo::new();
        while let Some(line) = lines.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| lines.malformed("auxiliary entry must be 'key value'"))?;
            aux.insert(key.to_string(), value.to_string());
        }

        Ok(SnapshotData {
            simulation_box,
            shapes,
            aux,
        })
    }

    fn write_to(data: &SnapshotData, writer: &mut impl Write) -> Result<(), Self::Error> {
        writeln!(writer, "{FORMAT_NAME} {FORMAT_VERSION}")?;

        let matrix = data.simulation_box.matrix();
        let mut box_fields = Vec::with_capacity(9);
        for row in 0..3 {
            for col in 0..3 {
                box_fields.push(matrix[(row, col)].to_string());
            }
        }
        writeln!(writer, "{}", box_fields.join(" "))?;

        writeln!(writer, "{}", data.shapes.len())?;
        for shape in &data.shapes {
            let position = shape.position();
            let quaternion = shape.orientation().quaternion();
            writeln!(
                writer,
                "{} {} {} {} {} {} {} {}",
                position[0],
                position[1],
                position[2],
                quaternion.w,
                quaternion.i,
                quaternion.j,
                quaternion.k,
                shape.species(),
            )?;
        }

        for (key, value) in &data.aux {
            writeln!(writer, "{key} {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;
    use std::f64::consts::FRAC_PI_3;

    fn sample_data() -> SnapshotData {
        let orientation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_3);
        SnapshotData {
            simulation_box: TriclinicBox::new(Matrix3::new(
                10.0, 0.5, 0.0, //
                0.0, 9.0, 0.25, //
                0.0, 0.0, 11.0,
            )),
            shapes: vec![
                Shape::new(Vector3::new(1.25, 2.5, 3.75), UnitQuaternion::identity(), 0),
                Shape::new(Vector3::new(0.1, 8.7, 10.33333333333337), orientation, 1),
            ],
            aux: AuxInfo::from([
                ("cycles".to_string(), "12000".to_string()),
                ("translationStep".to_string(), "0.31".to_string()),
            ]),
        }
    }

    fn to_string(data: &SnapshotData) -> String {
        let mut bytes = Vec::new();
        RamsnapFile::write_to(data, &mut bytes).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn store_load_store_is_byte_identical() {
        let original = to_string(&sample_data());
        let reloaded = RamsnapFile::read_from(&mut original.as_bytes()).unwrap();
        assert_eq!(to_string(&reloaded), original);
    }

    #[test]
    fn reloaded_data_equals_the_original() {
        let data = sample_data();
        let text = to_string(&data);
        let reloaded = RamsnapFile::read_from(&mut text.as_bytes()).unwrap();
        assert_eq!(reloaded, data);
    }

    #[test]
    fn header_carries_format_and_version() {
        let text = to_string(&sample_data());
        assert!(text.starts_with("RAMSNAP 1\n"));
    }

    #[test]
    fn wrong_header_is_rejected() {
        let text = "RAMTRJ 1\n";
        let result = RamsnapFile::read_from(&mut text.as_bytes());
        assert!(matches!(result, Err(SnapshotError::UnsupportedFormat(_))));
    }

    #[test]
    fn truncated_particle_list_is_rejected() {
        let text = "RAMSNAP 1\n5 0 0 0 5 0 0 0 5\n2\n1 1 1 1 0 0 0 0\n";
        let result = RamsnapFile::read_from(&mut text.as_bytes());
        assert!(matches!(result, Err(SnapshotError::Malformed { .. })));
    }

    #[test]
    fn denormalized_orientation_is_rejected() {
        let text = "RAMSNAP 1\n5 0 0 0 5 0 0 0 5\n1\n1 1 1 0.5 0.5 0 0 0\n";
        let result = RamsnapFile::read_from(&mut text.as_bytes());
        assert!(matches!(result, Err(SnapshotError::Malformed { line: 4, .. })));
    }

    #[test]
    fn inverted_box_is_rejected() {
        let text = "RAMSNAP 1\n-5 0 0 0 5 0 0 0 5\n0\n";
        let result = RamsnapFile::read_from(&mut text.as_bytes());
        assert!(matches!(result, Err(SnapshotError::InvalidBox)));
    }

    #[test]
    fn aux_pairs_round_trip_in_sorted_order() {
        let text = to_string(&sample_data());
        let aux_section: Vec<&str> = text.lines().skip(5).collect();
        assert_eq!(aux_section, vec!["cycles 12000", "translationStep 0.31"]);
    }

    #[test]
    fn files_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packing.ramsnap");
        let data = sample_data();
        RamsnapFile::write_to_path(&data, &path).unwrap();
        let reloaded = RamsnapFile::read_from_path(&path).unwrap();
        assert_eq!(reloaded, data);
    }
}
