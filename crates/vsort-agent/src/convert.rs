//! File converters used by workflow actions: archive extraction and
//! image to single-page PDF.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;
use vsort_config::log_workflow_warn;

use crate::planner::place_without_clobber;

/// Render resolution for generated PDFs.
const PDF_DPI: u32 = 150;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("No usable file name: {0}")]
    BadName(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Extract `x.zip` into the sibling folder `x/`. Returns the folder and the
/// number of files written. Entries that would land outside the folder are
/// skipped.
pub fn unzip(path: &Path) -> Result<(PathBuf, usize)> {
    let stem = path
        .file_stem()
        .ok_or_else(|| ConvertError::BadName(path.to_path_buf()))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let out_dir = parent.join(stem);
    fs::create_dir_all(&out_dir)?;

    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            log_workflow_warn!("Skipping unsafe archive entry", entry = %entry.name());
            continue;
        };
        let target = out_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok((out_dir, written))
}

/// Render an image as a one-page PDF beside the source (`x.png` -> `x.pdf`,
/// suffixed when taken). Transparency is flattened onto white.
pub fn image_to_pdf(path: &Path) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| ConvertError::BadName(path.to_path_buf()))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        for c in [r, g, b] {
            rgb.push(blend_on_white(c, a));
        }
    }
    let pdf = render_pdf(width, height, &rgb)?;

    let output = place_without_clobber(parent, &stem, ".pdf", |candidate| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(candidate)?;
        file.write_all(&pdf)?;
        file.sync_all()
    })?;
    Ok(output)
}

fn blend_on_white(channel: u8, alpha: u8) -> u8 {
    let c = channel as u32;
    let a = alpha as u32;
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}

/// Minimal PDF 1.4: catalog, page tree, one page, one Flate RGB XObject.
fn render_pdf(width: u32, height: u32, rgb: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(rgb)?;
    let image_data = encoder.finish()?;

    let page_w = (width as f64 * 72.0 / PDF_DPI as f64).max(1.0);
    let page_h = (height as f64 * 72.0 / PDF_DPI as f64).max(1.0);
    let content = format!("q {:.2} 0 0 {:.2} 0 0 cm /Im0 Do Q", page_w, page_h);

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(5);

    let mut object = |out: &mut Vec<u8>, body: &[u8]| {
        offsets.push(out.len());
        let number = offsets.len();
        out.extend_from_slice(format!("{} 0 obj\n", number).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    };

    object(&mut out, b"<< /Type /Catalog /Pages 2 0 R >>");
    object(&mut out, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    object(
        &mut out,
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
             /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>",
            page_w, page_h
        )
        .as_bytes(),
    );

    let mut xobject = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} \
         /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode /Length {} >>\nstream\n",
        width,
        height,
        image_data.len()
    )
    .into_bytes();
    xobject.extend_from_slice(&image_data);
    xobject.extend_from_slice(b"\nendstream");
    object(&mut out, &xobject);

    let mut contents = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
    contents.extend_from_slice(content.as_bytes());
    contents.extend_from_slice(b"\nendstream");
    object(&mut out, &contents);

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_unzip_to_sibling_folder() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bundle.zip");
        write_zip(&archive, &[("a.txt", b"alpha"), ("nested/b.txt", b"beta")]);

        let (out, count) = unzip(&archive).unwrap();
        assert_eq!(out, temp.path().join("bundle"));
        assert_eq!(count, 2);
        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(out.join("nested/b.txt")).unwrap(), b"beta");
        assert!(archive.exists());
    }

    #[test]
    fn test_unzip_skips_escaping_entries() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", b"nope"), ("ok.txt", b"fine")]);

        let (out, count) = unzip(&archive).unwrap();
        assert_eq!(count, 1);
        assert!(out.join("ok.txt").exists());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unzip_rejects_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("broken.zip");
        fs::write(&archive, b"not a zip").unwrap();
        assert!(matches!(unzip(&archive), Err(ConvertError::Zip(_))));
    }

    #[test]
    fn test_image_to_pdf() {
        let temp = tempfile::tempdir().unwrap();
        let png = temp.path().join("shot.png");
        let img = image::RgbaImage::from_pixel(30, 20, image::Rgba([255, 0, 0, 128]));
        img.save(&png).unwrap();

        let pdf = image_to_pdf(&png).unwrap();
        assert_eq!(pdf, temp.path().join("shot.pdf"));

        let mut bytes = Vec::new();
        File::open(&pdf).unwrap().read_to_end(&mut bytes).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Width 30 /Height 20"));

        // Second conversion must not clobber the first.
        let again = image_to_pdf(&png).unwrap();
        assert_eq!(again, temp.path().join("shot_1.pdf"));
    }

    #[test]
    fn test_blend_on_white() {
        assert_eq!(blend_on_white(0, 255), 0);
        assert_eq!(blend_on_white(0, 0), 255);
        assert_eq!(blend_on_white(200, 255), 200);
    }
}
