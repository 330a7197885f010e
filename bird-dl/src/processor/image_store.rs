//! The image loading and memory caching implementation.

use crate::common::*;

/// The canonical image resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

/// Image loader options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStoreInit {
    pub image_size: ImageSize,
    /// The number of channels, either 1 (grayscale) or 3 (color).
    pub image_channels: usize,
    /// Keep every decoded image in memory for reuse.
    ///
    /// The cache is never evicted, so it grows with the dataset.
    #[serde(default)]
    pub use_cache: bool,
}

impl ImageStoreInit {
    pub fn build(self) -> Result<ImageStore> {
        let Self {
            image_size,
            image_channels,
            use_cache,
        } = self;

        ensure!(
            image_size.width > 0 && image_size.height > 0,
            "image_size must be positive, but get {:?}",
            image_size
        );
        ensure!(
            image_channels == 1 || image_channels == 3,
            "image_channels must be 1 or 3, but get {}",
            image_channels
        );

        Ok(ImageStore {
            image_size,
            image_channels,
            use_cache,
            cache: DashMap::new(),
        })
    }
}

/// Decodes images into normalized tensors, optionally caching them by path.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ImageStore {
    image_size: ImageSize,
    image_channels: usize,
    use_cache: bool,
    #[derivative(Debug = "ignore")]
    cache: DashMap<PathBuf, Array3<f32>>,
}

impl ImageStore {
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn image_channels(&self) -> usize {
        self.image_channels
    }

    /// The (channel, height, width) shape of every loaded image.
    pub fn shape(&self) -> (usize, usize, usize) {
        let ImageSize { width, height } = self.image_size;
        (self.image_channels, height, width)
    }

    /// The number of cached images.
    pub fn num_cached(&self) -> usize {
        self.cache.len()
    }

    /// Load an image with the configured caching policy.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Array3<f32>> {
        self.load_with_cache(path, self.use_cache)
    }

    /// Load an image, storing it into the cache if `use_cache` is set.
    ///
    /// A cached image is returned regardless of `use_cache`. The caller
    /// receives its own copy, so mutating it never touches the cache.
    pub fn load_with_cache(&self, path: impl AsRef<Path>, use_cache: bool) -> Result<Array3<f32>> {
        let path = path.as_ref();

        if let Some(entry) = self.cache.get(path) {
            return Ok(entry.value().clone());
        }

        let image = self
            .decode(path)
            .with_context(|| format!("failed to load image file '{}'", path.display()))?;

        if use_cache {
            self.cache.insert(path.to_owned(), image.clone());
        }

        Ok(image)
    }

    fn decode(&self, path: &Path) -> Result<Array3<f32>> {
        let ImageSize { width, height } = self.image_size;
        let image = image::open(path)?;

        // convert color depth before resizing
        let image = match (image.color().has_color(), self.image_channels) {
            (true, 1) => DynamicImage::ImageLuma8(image.into_luma8()),
            (false, 3) => DynamicImage::ImageRgb8(image.into_rgb8()),
            _ => image,
        };
        let image = image.resize_exact(width as u32, height as u32, FilterType::Triangle);

        let tensor = match self.image_channels {
            1 => {
                let gray = image.into_luma8();
                Array3::from_shape_fn((1, height, width), |(_, y, x)| {
                    gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
                })
            }
            3 => {
                let rgb = image.into_rgb8();
                Array3::from_shape_fn((3, height, width), |(c, y, x)| {
                    rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
                })
            }
            channels => bail!("unsupported number of channels {}", channels),
        };

        Ok(tensor)
    }
}
