//! Deterministic cache keys.
//!
//! The key is a SHA-256 over a fixed-size thumbnail of the source image plus
//! every request field that changes the output. Fields are length-prefixed
//! so adjacent values can never run together.

use image::imageops::FilterType;
use sha2::{Digest, Sha256};

use crate::edit::{EditOptions, EditTask, SourceImage, normalize_prompt};

/// Provider id used for router-level keys, computed before a provider has
/// been chosen.
pub const ROUTED_PROVIDER: &str = "auto";

/// Task field for keys computed before classification.
pub const UNCLASSIFIED_TASK: &str = "auto";

/// Bumped whenever the hashed layout changes.
const KEY_VERSION: &str = "ironlens-cache-v1";

/// Edge length of the square thumbnail that stands in for the image.
const THUMBNAIL_EDGE: u32 = 64;

/// Compute the cache key for a request.
///
/// `task` is `None` when the task is still to be classified. `priority` in
/// `options` does not affect output and is not hashed.
pub fn cache_key(
    image: &SourceImage,
    prompt: &str,
    provider_id: &str,
    task: Option<EditTask>,
    options: &EditOptions,
) -> String {
    let mut hasher = Sha256::new();

    field(&mut hasher, KEY_VERSION.as_bytes());
    field(&mut hasher, &image.width().to_le_bytes());
    field(&mut hasher, &image.height().to_le_bytes());
    field(&mut hasher, &thumbnail(image));
    field(&mut hasher, normalize_prompt(prompt).as_bytes());
    field(&mut hasher, provider_id.as_bytes());
    field(
        &mut hasher,
        task.map(|t| t.as_str()).unwrap_or(UNCLASSIFIED_TASK).as_bytes(),
    );

    let size = match options.target_size {
        Some(size) => format!("{}x{}", size.width, size.height),
        None => "source".to_string(),
    };
    field(&mut hasher, size.as_bytes());
    field(&mut hasher, &[options.quality]);
    field(&mut hasher, &[options.watermark as u8]);

    hex(&hasher.finalize())
}

/// Whether a string has the shape of a key produced by [`cache_key`].
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

fn thumbnail(image: &SourceImage) -> Vec<u8> {
    image
        .pixels()
        .resize_exact(THUMBNAIL_EDGE, THUMBNAIL_EDGE, FilterType::Triangle)
        .to_rgb8()
        .into_raw()
}

fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::TargetSize;
    use image::{DynamicImage, Rgb, RgbImage};

    fn gradient(seed: u8) -> SourceImage {
        let img = RgbImage::from_fn(128, 96, |x, y| {
            Rgb([(x as u8).wrapping_add(seed), y as u8, seed])
        });
        SourceImage::new(DynamicImage::ImageRgb8(img))
    }

    fn key_for(image: &SourceImage, prompt: &str, options: &EditOptions) -> String {
        cache_key(image, prompt, "on-device", Some(EditTask::Cleanup), options)
    }

    #[test]
    fn key_is_stable() {
        let image = gradient(1);
        let options = EditOptions::default();
        let a = key_for(&image, "erase the bin", &options);
        let b = key_for(&image.clone(), "erase the bin", &options);
        assert_eq!(a, b);
        assert!(is_valid_key(&a));
    }

    #[test]
    fn key_is_pinned_across_builds() {
        // Keys name files in the persistent tier; a change here orphans
        // every entry written by an earlier build.
        let img = RgbImage::from_fn(90, 75, |x, y| {
            Rgb([
                ((x * x * 3 + y * 11) % 256) as u8,
                ((y * y * 5 + x * 13) % 256) as u8,
                ((x * y * 7) % 256) as u8,
            ])
        });
        let image = SourceImage::new(DynamicImage::ImageRgb8(img));
        let key = cache_key(&image, "Erase the bin", ROUTED_PROVIDER, None, &EditOptions::default());
        assert_eq!(
            key,
            "f26e69065ce088b55c035fa20d1c6b7b64e956c0d9ccdc3f1fde06a01ecd85eb"
        );
    }

    #[test]
    fn prompt_normalization_is_applied() {
        let image = gradient(2);
        let options = EditOptions::default();
        assert_eq!(
            key_for(&image, "Erase  the bin ", &options),
            key_for(&image, "erase the bin", &options)
        );
    }

    #[test]
    fn every_hashed_field_changes_the_key() {
        let image = gradient(3);
        let options = EditOptions::default();
        let base = key_for(&image, "erase the bin", &options);

        assert_ne!(base, key_for(&gradient(4), "erase the bin", &options));
        assert_ne!(base, key_for(&image, "erase the car", &options));
        assert_ne!(
            base,
            cache_key(&image, "erase the bin", "cloud", Some(EditTask::Cleanup), &options)
        );
        assert_ne!(
            base,
            cache_key(&image, "erase the bin", "on-device", Some(EditTask::Style), &options)
        );
        assert_ne!(
            base,
            cache_key(&image, "erase the bin", "on-device", None, &options)
        );

        let sized = EditOptions {
            target_size: Some(TargetSize::new(512, 384)),
            ..options.clone()
        };
        assert_ne!(base, key_for(&image, "erase the bin", &sized));

        let quality = EditOptions {
            quality: 70,
            ..options.clone()
        };
        assert_ne!(base, key_for(&image, "erase the bin", &quality));

        let watermark = EditOptions {
            watermark: true,
            ..options.clone()
        };
        assert_ne!(base, key_for(&image, "erase the bin", &watermark));
    }

    #[test]
    fn priority_is_not_hashed() {
        let image = gradient(5);
        let options = EditOptions::default();
        let priority = EditOptions {
            priority: true,
            ..options.clone()
        };
        assert_eq!(
            key_for(&image, "x", &options),
            key_for(&image, "x", &priority)
        );
    }

    #[test]
    fn key_shape_validation() {
        assert!(!is_valid_key("../../etc/passwd"));
        assert!(!is_valid_key(&"A".repeat(64)));
        assert!(is_valid_key(&"a".repeat(64)));
    }
}
