//! Font discovery for text overlays.

use std::path::{Path, PathBuf};

use rusttype::Font;

/// Common system locations for a plain sans-serif face.
const CANDIDATE_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// A parsed font and the file it came from.
#[derive(Clone)]
pub struct LoadedFont {
    pub path: PathBuf,
    pub font: Font<'static>,
}

impl std::fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedFont")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Load the configured font, or the first system font that parses.
pub fn load_font(configured: Option<&Path>) -> Option<LoadedFont> {
    if let Some(path) = configured {
        match load_font_file(path) {
            Some(font) => return Some(font),
            None => {
                tracing::warn!(path = %path.display(), "Configured font could not be loaded");
            }
        }
    }

    let found = CANDIDATE_FONTS
        .iter()
        .map(Path::new)
        .filter(|p| p.exists())
        .find_map(load_font_file);
    match &found {
        Some(font) => tracing::debug!(path = %font.path.display(), "Using system font"),
        None => tracing::info!("No usable font found; text overlays need the filter-graph engine"),
    }
    found
}

pub fn load_font_file(path: &Path) -> Option<LoadedFont> {
    let bytes = std::fs::read(path).ok()?;
    let font = Font::try_from_vec(bytes)?;
    Some(LoadedFont {
        path: path.to_path_buf(),
        font,
    })
}
