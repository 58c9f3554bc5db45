//! Plain-text map and path files.
//!
//! ```text
//! map.txt    id x y type_id observations     one cone per line
//! path.txt   x y heading                     one keyframe per line
//! ```
//!
//! Floats use the shortest representation that parses back to the same
//! value, so a save/load cycle is exact. Blank lines and lines starting with
//! `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use log::info;

use crate::core::types::{Point2D, Pose2D};
use crate::error::{Result, SlamError};
use crate::map::{ConeClass, ConeId};

/// File name of the saved map inside an output directory.
pub const MAP_FILE_NAME: &str = "map.txt";

/// File name of the saved path inside an output directory.
pub const PATH_FILE_NAME: &str = "path.txt";

/// One line of a map file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeRecord {
    pub id: ConeId,
    pub position: Point2D,
    pub class: ConeClass,
    pub observations: u32,
}

pub fn write_map<W: Write>(mut writer: W, cones: &[ConeRecord]) -> Result<()> {
    writeln!(writer, "# id x y type_id observations")?;
    for cone in cones {
        writeln!(
            writer,
            "{} {} {} {} {}",
            cone.id,
            cone.position.x,
            cone.position.y,
            cone.class.type_id(),
            cone.observations
        )?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_map<R: BufRead>(reader: R) -> Result<Vec<ConeRecord>> {
    let mut cones = Vec::new();
    for (line, fields) in records(reader) {
        let fields = fields?;
        expect_fields(line, &fields, 5)?;
        cones.push(ConeRecord {
            id: parse(line, &fields[0], "id")?,
            position: Point2D::new(parse(line, &fields[1], "x")?, parse(line, &fields[2], "y")?),
            class: ConeClass::from_type_id(parse(line, &fields[3], "type_id")?),
            observations: parse(line, &fields[4], "observations")?,
        });
    }
    Ok(cones)
}

pub fn write_path<W: Write>(mut writer: W, poses: &[Pose2D]) -> Result<()> {
    writeln!(writer, "# x y heading")?;
    for pose in poses {
        writeln!(writer, "{} {} {}", pose.x, pose.y, pose.theta)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_path<R: BufRead>(reader: R) -> Result<Vec<Pose2D>> {
    let mut poses = Vec::new();
    for (line, fields) in records(reader) {
        let fields = fields?;
        expect_fields(line, &fields, 3)?;
        poses.push(Pose2D::new(
            parse(line, &fields[0], "x")?,
            parse(line, &fields[1], "y")?,
            parse(line, &fields[2], "heading")?,
        ));
    }
    Ok(poses)
}

pub fn save_map(path: &Path, cones: &[ConeRecord]) -> Result<()> {
    write_map(BufWriter::new(File::create(path)?), cones)?;
    info!("Saved {} cones to {}", cones.len(), path.display());
    Ok(())
}

pub fn load_map(path: &Path) -> Result<Vec<ConeRecord>> {
    let cones = read_map(BufReader::new(File::open(path)?))?;
    info!("Loaded {} cones from {}", cones.len(), path.display());
    Ok(cones)
}

pub fn save_path(path: &Path, poses: &[Pose2D]) -> Result<()> {
    write_path(BufWriter::new(File::create(path)?), poses)?;
    info!("Saved {} poses to {}", poses.len(), path.display());
    Ok(())
}

pub fn load_path(path: &Path) -> Result<Vec<Pose2D>> {
    let poses = read_path(BufReader::new(File::open(path)?))?;
    info!("Loaded {} poses from {}", poses.len(), path.display());
    Ok(poses)
}

/// Non-empty, non-comment lines split on whitespace, with 1-based line numbers.
fn records<R: BufRead>(reader: R) -> impl Iterator<Item = (usize, Result<Vec<String>>)> {
    reader
        .lines()
        .enumerate()
        .map(|(i, line)| {
            let fields = line.map_err(SlamError::from).map(|l| {
                l.split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            });
            (i + 1, fields)
        })
        .filter(|(_, fields)| match fields {
            Ok(f) => f.first().is_some_and(|first| !first.starts_with('#')),
            Err(_) => true,
        })
}

fn expect_fields(line: usize, fields: &[String], count: usize) -> Result<()> {
    if fields.len() != count {
        return Err(SlamError::Parse {
            line,
            reason: format!("expected {} fields, found {}", count, fields.len()),
        });
    }
    Ok(())
}

fn parse<T: FromStr>(line: usize, field: &str, name: &str) -> Result<T> {
    field.parse().map_err(|_| SlamError::Parse {
        line,
        reason: format!("invalid {} '{}'", name, field),
    })
}
