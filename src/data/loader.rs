use std::{
    fs,
    path::{Path, PathBuf},
};

use image::imageops::FilterType;
use ndarray::{s, Array3, Array4};
use rayon::prelude::*;

use super::{DataError, ImageDataset};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Loads a labeled dataset from a directory whose immediate subdirectories
/// are class names containing image files.
///
/// Classes are enumerated alphabetically by subdirectory name, which fixes
/// the class-index assignment. Every image is decoded, resized to
/// `(height, width)`, converted to RGB and rescaled to `[0, 1]`. Decoding
/// runs in parallel.
///
/// # Errors
/// Fails on an unreadable root, a root without class subdirectories, an
/// empty class tree or an undecodable image file.
pub fn load_directory(
    root: &Path,
    image_size: (usize, usize),
) -> Result<ImageDataset, DataError> {
    let mut class_dirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                class_dirs.push((name, entry.path()));
            }
        }
    }
    class_dirs.sort_by(|a, b| a.0.cmp(&b.0));

    if class_dirs.is_empty() {
        return Err(DataError::NoClasses(root.to_path_buf()));
    }

    let mut entries: Vec<(PathBuf, usize)> = Vec::new();
    for (class, (_, dir)) in class_dirs.iter().enumerate() {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();
        entries.extend(files.into_iter().map(|p| (p, class)));
    }

    if entries.is_empty() {
        return Err(DataError::NoImages(root.to_path_buf()));
    }

    let decoded: Vec<(Array3<f32>, usize)> = entries
        .par_iter()
        .map(|(path, class)| decode_image(path, image_size).map(|img| (img, *class)))
        .collect::<Result<Vec<_>, _>>()?;

    let (height, width) = image_size;
    let mut images = Array4::zeros((decoded.len(), height, width, 3));
    let mut classes = Vec::with_capacity(decoded.len());
    for (i, (img, class)) in decoded.into_iter().enumerate() {
        images.slice_mut(s![i, .., .., ..]).assign(&img);
        classes.push(class);
    }

    let class_names: Vec<String> = class_dirs.into_iter().map(|(name, _)| name).collect();
    let labels = ImageDataset::one_hot(&classes, class_names.len());
    let dataset = ImageDataset::new(images, labels, class_names);

    log::info!(
        "loaded {} images across {} classes from '{}'",
        dataset.len(),
        dataset.num_classes(),
        root.display()
    );
    for (name, count) in dataset.class_names().iter().zip(dataset.class_counts()) {
        log::info!("  {name}: {count} images");
    }

    Ok(dataset)
}

fn is_image_file(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.starts_with('.') => return false,
        None => return false,
        _ => {}
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn decode_image(path: &Path, (height, width): (usize, usize)) -> Result<Array3<f32>, DataError> {
    let img = image::open(path).map_err(|source| DataError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let img = img
        .resize_exact(width as u32, height as u32, FilterType::Triangle)
        .to_rgb8();
    let pixels: Vec<f32> = img.into_raw().into_iter().map(|b| b as f32 / 255.0).collect();
    // The buffer length is height * width * 3 by construction.
    Ok(Array3::from_shape_vec((height, width, 3), pixels).unwrap())
}
