use std::path::Path;

use super::domain::DataType;

const RASTER_EXTENSIONS: [&str; 8] = ["tif", "tiff", "img", "bil", "jpg", "jp2", "png", "gif"];
const VECTOR_EXTENSIONS: [&str; 6] = ["shp", "gdb", "dbf", "lyr", "kml", "geojson"];

/// Vector formats the distance transform accepts as source data.
pub const DISTANCE_SOURCE_EXTENSIONS: [&str; 4] = ["shp", "gdb", "kml", "geojson"];

/// Lower-cased extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|extension| extension.to_string_lossy().trim().to_ascii_lowercase())
        .filter(|extension| !extension.is_empty())
}

/// Maps a dataset path to its kind by extension. Total: anything that is not
/// a known raster or vector format is `Unknown`.
pub fn classify(path: &Path) -> DataType {
    match extension_of(path) {
        Some(extension) if RASTER_EXTENSIONS.contains(&extension.as_str()) => DataType::Raster,
        Some(extension) if VECTOR_EXTENSIONS.contains(&extension.as_str()) => DataType::Vector,
        _ => DataType::Unknown,
    }
}
