use derive_more::{Deref, DerefMut};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};

type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A single channel floating point image.
///
/// Intensity images and depth maps are both stored as a `Raster`. Pixels are
/// addressed as `(x, y)` with `x` in `[0, width)` (the column) and `y` in
/// `[0, height)` (the row), so `raster.get(x, y)` is the sample `I(y, x)`.
///
/// We use the image crate's buffer so that images can be loaded and converted
/// with the rest of the image ecosystem, but all sampling goes through
/// [`interpolate`](crate::interpolate) and [`Raster::get`].
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct Raster(pub GrayImageBuffer);

impl Raster {
    /// Creates a zeroed raster.
    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    /// Creates a raster where every pixel is computed from its `(x, y)` location.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([f(x as usize, y as usize)])
        }))
    }

    /// Creates a raster from row-major pixel data.
    ///
    /// Returns `None` if `data` does not contain exactly `width * height` samples.
    pub fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        ImageBuffer::from_raw(width as u32, height as u32, data).map(Self)
    }

    /// Converts an 8-bit image into a raster with pixel values between 0 and 1.
    pub fn from_luma8(image: &GrayImage) -> Self {
        Self(ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            Luma([f32::from(image[(x, y)][0]) / 255f32])
        }))
    }

    /// Converts any image into a unit intensity raster through its 8-bit grayscale version.
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::from_luma8(&image.to_luma8())
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    /// The `(width, height)` of the raster.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Checks if the integer location lies inside the raster.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width() && (y as usize) < self.height()
    }

    /// Retrieves the sample at column `x` and row `y`.
    ///
    /// Panics if the location is outside of the raster.
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.0.get_pixel(x as u32, y as u32)[0]
    }

    pub fn put(&mut self, x: usize, y: usize, value: f32) {
        self.0.put_pixel(x as u32, y as u32, Luma([value]));
    }

    /// Computes the gradient magnitude of every pixel with central differences.
    ///
    /// The one pixel wide border has no central difference and is set to `0`.
    pub fn gradient_magnitude(&self) -> Self {
        let (width, height) = self.dimensions();
        Self::from_fn(width, height, |x, y| {
            if x == 0 || y == 0 || x + 1 >= width || y + 1 >= height {
                return 0.0;
            }
            let gx = 0.5 * (self.get(x + 1, y) - self.get(x - 1, y));
            let gy = 0.5 * (self.get(x, y + 1) - self.get(x, y - 1));
            (gx * gx + gy * gy).sqrt()
        })
    }
}
