use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context};

use crate::pointcloud::PointCloud;

enum Format {
    Xyz,
    Csv,
}

/// Writes `x y z` rows in millimeters.
pub fn write_xyz<W: Write>(cloud: &PointCloud, mut out: W) -> anyhow::Result<()> {
    ensure_not_empty(cloud)?;
    for point in cloud.iter() {
        writeln!(out, "{:.3} {:.3} {:.3}", point.x_mm, point.y_mm, point.z_mm)?;
    }
    Ok(())
}

/// Writes `x,y,z,layer,angle` rows with a header, millimeters and degrees.
pub fn write_csv<W: Write>(cloud: &PointCloud, mut out: W) -> anyhow::Result<()> {
    ensure_not_empty(cloud)?;
    writeln!(out, "x_mm,y_mm,z_mm,layer,angle_deg")?;
    for point in cloud.iter() {
        writeln!(
            out,
            "{:.3},{:.3},{:.3},{},{:.1}",
            point.x_mm, point.y_mm, point.z_mm, point.layer, point.angle_deg
        )?;
    }
    Ok(())
}

/// Picks the format from the file extension and writes the cloud there.
pub fn write_to_path(cloud: &PointCloud, path: &Path) -> anyhow::Result<()> {
    ensure_not_empty(cloud)?;

    let format = match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "xyz" => Format::Xyz,
        "csv" => Format::Csv,
        other => bail!("unsupported export extension {other:?}, use .xyz or .csv"),
    };

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        Format::Xyz => write_xyz(cloud, &mut out)?,
        Format::Csv => write_csv(cloud, &mut out)?,
    }
    out.flush()?;

    Ok(())
}

fn ensure_not_empty(cloud: &PointCloud) -> anyhow::Result<()> {
    if cloud.is_empty() {
        bail!("nothing to export, the cloud is empty");
    }
    Ok(())
}
