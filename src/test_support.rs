//! Shared fixtures for unit tests.

use crate::services::metadata_store::run_migrations;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{io::Cursor, sync::Arc};

/// Single-connection in-memory SQLite with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

fn encode(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode fixture");
    buf
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageOutputFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageOutputFormat::Jpeg(90))
}

pub fn dimensions(bytes: &[u8]) -> (u32, u32) {
    use image::GenericImageView;
    image::load_from_memory(bytes)
        .expect("decode output")
        .dimensions()
}
