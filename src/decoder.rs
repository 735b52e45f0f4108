use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use ndarray::{Array, Array4};
use thiserror::Error;

/// Batch-of-one NHWC tensor with channels scaled to `[0, 1]`.
pub type PixelTensor = Array4<f32>;

pub const DEFAULT_INPUT_SIZE: u32 = 64;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty frame payload")]
    Empty,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Error decoding image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Error reading image: {0}")]
    Io(#[from] std::io::Error),
}

pub trait FrameDecoder: Send + Sync + 'static {
    fn decode(&self, payload: &str) -> Result<PixelTensor, DecodeError>;
}

#[derive(Debug, Clone)]
pub struct ImageDecoder {
    input_size: u32,
}

impl ImageDecoder {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    fn to_tensor(&self, image_data: &[u8]) -> Result<PixelTensor, DecodeError> {
        let original_img = image::ImageReader::new(std::io::Cursor::new(image_data))
            .with_guessed_format()?
            .decode()?;

        let size = self.input_size;
        let img = original_img
            .resize_exact(size, size, FilterType::CatmullRom)
            .to_rgb8();

        let mut input = Array::zeros((1, size as usize, size as usize, 3));
        for (x, y, pixel) in img.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            input[[0, y, x, 0]] = (r as f32) / 255.;
            input[[0, y, x, 1]] = (g as f32) / 255.;
            input[[0, y, x, 2]] = (b as f32) / 255.;
        }

        Ok(input)
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(&self, payload: &str) -> Result<PixelTensor, DecodeError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        let image_data = STANDARD.decode(payload)?;
        self.to_tensor(&image_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn encoded_png(width: u32, height: u32, color: [u8; 3]) -> String {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb(color));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        STANDARD.encode(image_data)
    }

    #[test]
    fn test_decode_resizes_to_input_size() {
        let decoder = ImageDecoder::default();
        let tensor = decoder.decode(&encoded_png(100, 40, [255, 0, 0])).unwrap();

        assert_eq!(tensor.shape(), &[1, 64, 64, 3]);
        assert!((tensor[[0, 10, 10, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 10, 10, 1]].abs() < 1e-6);
        assert!(tensor[[0, 10, 10, 2]].abs() < 1e-6);
    }

    #[test]
    fn test_decode_custom_size() {
        let decoder = ImageDecoder::new(32);
        let tensor = decoder.decode(&encoded_png(8, 8, [0, 0, 255])).unwrap();

        assert_eq!(tensor.shape(), &[1, 32, 32, 3]);
        assert!((tensor[[0, 31, 31, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let decoder = ImageDecoder::default();
        let err = decoder.decode("not*base64!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let decoder = ImageDecoder::default();
        let payload = STANDARD.encode(b"definitely not an image");
        let err = decoder.decode(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        let decoder = ImageDecoder::default();
        assert!(matches!(decoder.decode("  "), Err(DecodeError::Empty)));
    }
}
