//! Icon loading.
//!
//! Icons come from raw `image-data` pixels, from image files, or from a
//! themed icon name looked up in the freedesktop icon directories. Anything
//! larger than [`ICON_SIZE`] is scaled down keeping its aspect ratio; smaller
//! icons are drawn at their own size.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use notifyd_core::hints::{IconSource, ImageData};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest edge of a drawn icon, in pixels.
pub const ICON_SIZE: u32 = 48;

/// Themes searched for named icons, in order.
const THEMES: &[&str] = &["hicolor", "Adwaita", "gnome"];

/// Size directories searched inside a theme, closest to [`ICON_SIZE`] first.
const SIZES: &[&str] = &[
    "48x48", "64x64", "96x96", "128x128", "256x256", "32x32", "24x24", "22x22", "16x16",
];

/// Directories that hold icon themes or loose icon files.
pub fn icon_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(base) = directories::BaseDirs::new() {
        roots.push(base.home_dir().join(".icons"));
        roots.push(base.data_dir().join("icons"));
    }
    let data_dirs = std::env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|dirs| !dirs.is_empty())
        .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
    for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
        roots.push(Path::new(dir).join("icons"));
    }
    roots.push(PathBuf::from("/usr/share/pixmaps"));
    roots
}

/// Find `<name>.png` under `roots`, either inside a theme's size directories
/// or directly in a root.
pub fn find_themed_icon(name: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() || name.contains('/') {
        return None;
    }
    let file = format!("{}.png", name);
    for theme in THEMES {
        for root in roots {
            for size in SIZES {
                let Ok(entries) = std::fs::read_dir(root.join(theme).join(size)) else {
                    continue;
                };
                let mut contexts: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_dir())
                    .collect();
                contexts.sort();
                if let Some(found) = contexts
                    .iter()
                    .map(|context| context.join(&file))
                    .find(|path| path.is_file())
                {
                    return Some(found);
                }
            }
        }
    }
    roots
        .iter()
        .map(|root| root.join(&file))
        .find(|path| path.is_file())
}

/// Decode and scale an icon. `None` when nothing could be loaded.
pub fn load_icon(source: &IconSource, roots: &[PathBuf]) -> Option<RgbaImage> {
    let image = match source {
        IconSource::Image(data) => from_image_data(data),
        IconSource::File(path) => open(path),
        // A name that is not in any theme may still be a relative file path.
        IconSource::Name(name) => find_themed_icon(name, roots)
            .and_then(|path| open(&path))
            .or_else(|| open(Path::new(name))),
    }?;
    Some(scale_to_fit(image, ICON_SIZE))
}

fn open(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(image) => Some(image.to_rgba8()),
        Err(e) => {
            debug!("Could not load icon {}: {}", path.display(), e);
            None
        }
    }
}

/// Copy 8-bit RGB or RGBA `image-data` pixels into an image buffer.
pub fn from_image_data(data: &ImageData) -> Option<RgbaImage> {
    if !data.is_valid() {
        warn!("Ignoring malformed icon image");
        return None;
    }
    if data.bits_per_sample != 8 || !(data.channels == 3 || data.channels == 4) {
        warn!(
            "Unsupported icon image format: {} channels, {} bits per sample",
            data.channels, data.bits_per_sample
        );
        return None;
    }
    let width = u32::try_from(data.width).ok()?;
    let height = u32::try_from(data.height).ok()?;
    let stride = usize::try_from(data.rowstride).ok()?;
    let channels = usize::try_from(data.channels).ok()?;

    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let offset = y as usize * stride + x as usize * channels;
        let px = data.data.get(offset..offset + channels)?;
        let alpha = if channels == 4 { px[3] } else { u8::MAX };
        *pixel = Rgba([px[0], px[1], px[2], alpha]);
    }
    Some(image)
}

/// Scale down so the longest edge is at most `max`. Never scales up.
pub fn scale_to_fit(image: RgbaImage, max: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max {
        return image;
    }
    let scaled = |edge: u32| ((u64::from(edge) * u64::from(max) / u64::from(longest)) as u32).max(1);
    imageops::resize(&image, scaled(width), scaled(height), FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_png(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))
            .save(path)
            .unwrap();
    }

    fn rgb_data(width: i32, height: i32) -> ImageData {
        ImageData {
            width,
            height,
            rowstride: width * 3,
            has_alpha: false,
            bits_per_sample: 8,
            channels: 3,
            data: vec![0x80; (width * height * 3) as usize],
        }
    }

    #[test]
    fn test_file_icon_loads_without_upscaling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        write_png(&path, 16, 8);

        let icon = load_icon(&IconSource::File(path), &[]).unwrap();
        assert_eq!(icon.dimensions(), (16, 8));
        assert_eq!(icon.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_large_file_icon_scaled_down_keeping_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        write_png(&path, 200, 100);

        let icon = load_icon(&IconSource::File(path), &[]).unwrap();
        assert_eq!(icon.dimensions(), (48, 24));
    }

    #[test]
    fn test_missing_file_icon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.png");
        assert!(load_icon(&IconSource::File(path), &[]).is_none());
    }

    #[test]
    fn test_themed_icon_found_in_theme_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let expected = root.join("hicolor/48x48/apps/mail-client.png");
        write_png(&expected, 48, 48);

        assert_eq!(
            find_themed_icon("mail-client", &[root.clone()]),
            Some(expected)
        );
        let icon = load_icon(&IconSource::Name("mail-client".into()), &[root]).unwrap();
        assert_eq!(icon.dimensions(), (48, 48));
    }

    #[test]
    fn test_themed_icon_prefers_closest_size() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        write_png(&root.join("hicolor/256x256/apps/editor.png"), 256, 256);
        write_png(&root.join("hicolor/48x48/apps/editor.png"), 48, 48);

        assert_eq!(
            find_themed_icon("editor", &[root.clone()]),
            Some(root.join("hicolor/48x48/apps/editor.png"))
        );
    }

    #[test]
    fn test_loose_icon_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        write_png(&root.join("terminal.png"), 32, 32);

        assert_eq!(
            find_themed_icon("terminal", &[root.clone()]),
            Some(root.join("terminal.png"))
        );
    }

    #[test]
    fn test_unknown_name_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        write_png(&path, 20, 20);

        let name = path.to_string_lossy().into_owned();
        assert_eq!(find_themed_icon(&name, &[dir.path().to_path_buf()]), None);
        let icon = load_icon(&IconSource::Name(name), &[]).unwrap();
        assert_eq!(icon.dimensions(), (20, 20));

        assert!(load_icon(&IconSource::Name("no-such-icon".into()), &[]).is_none());
    }

    #[test]
    fn test_oversized_image_data_scaled_keeping_aspect() {
        let icon = load_icon(&IconSource::Image(rgb_data(96, 48)), &[]).unwrap();
        assert_eq!(icon.dimensions(), (48, 24));

        let icon = load_icon(&IconSource::Image(rgb_data(30, 300)), &[]).unwrap();
        assert_eq!(icon.dimensions(), (4, 48));
    }

    #[test]
    fn test_image_data_respects_rowstride_and_alpha() {
        let data = ImageData {
            width: 1,
            height: 2,
            rowstride: 8,
            has_alpha: true,
            bits_per_sample: 8,
            channels: 4,
            data: vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8],
        };
        let image = from_image_data(&data).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgba([1, 2, 3, 4]));
        assert_eq!(image.get_pixel(0, 1), &Rgba([5, 6, 7, 8]));
    }

    #[test]
    fn test_image_data_unsupported_format() {
        let mut data = rgb_data(2, 2);
        data.bits_per_sample = 16;
        data.rowstride = 12;
        data.data = vec![0; 24];
        assert!(from_image_data(&data).is_none());
    }

    #[test]
    fn test_scale_to_fit_never_upscales() {
        let image = RgbaImage::new(10, 40);
        assert_eq!(scale_to_fit(image, 48).dimensions(), (10, 40));
    }
}
