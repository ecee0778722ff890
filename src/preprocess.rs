use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use fast_image_resize::images::Image;
use fast_image_resize::{PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{FractureError, Result};

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// Central region examined for edge density, as a fraction of each axis.
const EDGE_ROI: (f32, f32) = (0.2, 0.8);
pub const EDGE_DENSITY_THRESHOLD: f32 = 0.08;
pub const EDGE_DISCONTINUITY_BOOST: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`, the Keras export layout.
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Multiplier applied to raw `0..=255` pixel values before mean subtraction.
    pub scale: f32,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub channel_order: ChannelOrder,
    pub layout: TensorLayout,
}

impl Default for PreprocessConfig {
    /// ResNet50 "caffe" normalisation: BGR, per-channel mean subtraction, no scaling.
    fn default() -> Self {
        Self {
            mean: [103.939, 116.779, 123.68],
            std: [1.0, 1.0, 1.0],
            scale: 1.0,
            height: 224,
            width: 224,
            channels: 3,
            channel_order: ChannelOrder::Bgr,
            layout: TensorLayout::Nhwc,
        }
    }
}

impl PreprocessConfig {
    /// ImageNet "torch" normalisation for NCHW exports.
    pub fn imagenet_nchw() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            scale: 1.0 / 255.0,
            channel_order: ChannelOrder::Rgb,
            layout: TensorLayout::Nchw,
            ..Self::default()
        }
    }
}

/// SHA-256 digest of the raw image bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContentKey {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an image comes from: a file, or bytes already in memory.
#[derive(Debug, Clone)]
pub enum ImageRef {
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl ImageRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageRef::Path(path.into())
    }

    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        ImageRef::Bytes {
            name: name.into(),
            data,
        }
    }

    /// File name without directories, used as the fallback cache key.
    pub fn display_name(&self) -> String {
        match self {
            ImageRef::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            ImageRef::Bytes { name, .. } => name.clone(),
        }
    }

    pub fn source_dir(&self) -> Option<&Path> {
        match self {
            ImageRef::Path(path) => path.parent().filter(|d| !d.as_os_str().is_empty()),
            ImageRef::Bytes { .. } => None,
        }
    }

    /// Content key without decoding. `None` when the bytes are unreadable.
    pub fn content_key(&self) -> Option<ContentKey> {
        self.read_bytes().ok().map(|data| ContentKey::from_bytes(&data))
    }

    fn read_bytes(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            ImageRef::Path(path) => std::fs::read(path)
                .map(Cow::Owned)
                .map_err(|e| FractureError::decode(self.display_name(), e)),
            ImageRef::Bytes { data, .. } => Ok(Cow::Borrowed(data.as_slice())),
        }
    }
}

/// A decoded source image together with its identity.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub content_key: ContentKey,
    pub image: DynamicImage,
}

impl SourceImage {
    /// Height over width of the original image.
    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = self.image.dimensions();
        if w == 0 {
            return 0.0;
        }
        h as f32 / w as f32
    }
}

/// Batch-of-one model input, owned by the inference call that made it.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
    layout: TensorLayout,
}

impl ImageTensor {
    pub fn from_array(data: Array4<f32>, layout: TensorLayout) -> Self {
        Self { data, layout }
    }

    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn into_dyn(self) -> ArrayD<f32> {
        self.data.into_dyn()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageCodec {
    pub config: PreprocessConfig,
}

impl ImageCodec {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Reads, hashes and decodes an image.
    pub fn load(&self, source: &ImageRef) -> Result<SourceImage> {
        let name = source.display_name();
        let data = source.read_bytes()?;
        let content_key = ContentKey::from_bytes(&data);
        let image =
            image::load_from_memory(&data).map_err(|e| FractureError::decode(name.clone(), e))?;
        Ok(SourceImage {
            name,
            content_key,
            image,
        })
    }

    /// Reads an image file and turns it into a normalised model input.
    pub fn decode(&self, path: &Path) -> Result<ImageTensor> {
        let source = self.load(&ImageRef::path(path))?;
        self.tensor(&source.image)
    }

    pub fn convert_to_dynamic(&self, image: Image<'static>) -> Result<DynamicImage> {
        let (width, height) = (image.width(), image.height());
        RgbImage::from_raw(width, height, image.buffer().to_vec())
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                FractureError::InvalidInput(format!("resized buffer does not match {width}x{height}"))
            })
    }

    /// Resizes to the model input size (nearest neighbour, aspect not kept),
    /// applies channel normalisation and adds the batch axis.
    pub fn tensor(&self, image: &DynamicImage) -> Result<ImageTensor> {
        let t = std::time::Instant::now();
        let (width, height) = (self.config.width, self.config.height);
        if image.width() == 0 || image.height() == 0 {
            return Err(FractureError::decode("image", "zero-sized image"));
        }

        let src = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut dst_image = Image::new(width as u32, height as u32, PixelType::U8x3);
        let mut resizer = Resizer::new();
        let resize_options = ResizeOptions::new().resize_alg(ResizeAlg::Nearest);
        resizer
            .resize(&src, &mut dst_image, &resize_options)
            .map_err(|e| FractureError::decode("image", e))?;
        let resized = self.convert_to_dynamic(dst_image)?.to_rgb8();

        let shape = match self.config.layout {
            TensorLayout::Nhwc => (1, height, width, self.config.channels),
            TensorLayout::Nchw => (1, self.config.channels, height, width),
        };
        let mut img_arr = Array4::<f32>::zeros(shape);

        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let src_channel = match self.config.channel_order {
                    ChannelOrder::Rgb => c,
                    ChannelOrder::Bgr => 2 - c,
                };
                let value = (rgb[src_channel] as f32 * self.config.scale - self.config.mean[c])
                    / self.config.std[c];
                match self.config.layout {
                    TensorLayout::Nhwc => img_arr[[0, y, x, c]] = value,
                    TensorLayout::Nchw => img_arr[[0, c, y, x]] = value,
                }
            }
        }
        debug!(elapsed = ?t.elapsed(), "preprocessing");

        Ok(ImageTensor::from_array(img_arr, self.config.layout))
    }

    /// Edge-density safety net. Never fails: unreadable input scores 0.0.
    pub fn edge_discontinuity_score(&self, path: &Path) -> f32 {
        match image::open(path) {
            Ok(image) => edge_discontinuity_boost(&image),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "edge analysis skipped");
                0.0
            }
        }
    }
}

/// Fraction of Canny edge pixels inside the central 60% x 60% region.
pub fn edge_density(image: &DynamicImage) -> f32 {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    let (x0, x1) = ((w as f32 * EDGE_ROI.0) as u32, (w as f32 * EDGE_ROI.1) as u32);
    let (y0, y1) = ((h as f32 * EDGE_ROI.0) as u32, (h as f32 * EDGE_ROI.1) as u32);
    if x1 <= x0 || y1 <= y0 {
        return 0.0;
    }

    // canny smooths internally
    let edges = imageproc::edges::canny(&gray, CANNY_LOW, CANNY_HIGH);

    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            if edges.get_pixel(x, y)[0] > 0 {
                count += 1;
            }
        }
    }
    count as f32 / ((x1 - x0) * (y1 - y0)) as f32
}

pub fn edge_discontinuity_boost(image: &DynamicImage) -> f32 {
    if edge_density(image) > EDGE_DENSITY_THRESHOLD {
        EDGE_DISCONTINUITY_BOOST
    } else {
        0.0
    }
}
