pub mod cache;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod imaging;
pub mod item;
pub mod probe;
pub mod session;
pub mod signals;
pub mod subject;
pub mod threshold;

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;
    use std::path::Path;

    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::config::Config;

    pub fn config_for(base_url: &str, library_dir: &Path) -> Config {
        Config {
            base_url: base_url.to_string(),
            library_dir: library_dir.to_path_buf(),
            ..Config::default()
        }
        .sanitized()
    }

    /// A noisy JPEG, comfortably above the 5 KiB thresholds.
    pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        let img = RgbImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let b = state.to_le_bytes();
            image::Rgb([b[1], b[2], b[3]])
        });

        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .expect("encode sample jpeg");
        assert!(buf.len() > 5120, "sample jpeg too small: {}", buf.len());
        buf
    }
}
