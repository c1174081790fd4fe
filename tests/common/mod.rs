#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use uploadkit::orchestrator::MemoryConfirmationBackend;
use uploadkit::transfer::{MemoryStorage, TransferClient, TransferConfig};
use uploadkit::UploadOrchestrator;

/// Gradient PNG sized `width` x `height`
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x + y) % 256) as u8, 255])
    });
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    });
    encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub struct Stack {
    pub storage: Arc<MemoryStorage>,
    pub confirmations: Arc<MemoryConfirmationBackend>,
    pub transfer: Arc<TransferClient>,
}

impl Stack {
    pub fn new(config: TransferConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let transfer = Arc::new(TransferClient::new(storage.clone(), storage.clone(), config));
        Self {
            storage,
            confirmations: Arc::new(MemoryConfirmationBackend::new()),
            transfer,
        }
    }

    pub fn orchestrator(&self) -> UploadOrchestrator {
        UploadOrchestrator::new(self.transfer.clone(), self.confirmations.clone())
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}
