use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;

use crate::error::LoadError;

/// Decoded bitmap shared between the session and in-flight renders.
/// Cloning is cheap; the pixels are freed when the last handle drops.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pixels: Arc<RgbaImage>,
}

impl ImageHandle {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.pixels)
    }
}

/// Fetches and decodes images from HTTP(S) URLs or local paths.
#[derive(Clone)]
pub struct ImageLoader {
    http: reqwest::Client,
}

impl ImageLoader {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn load(&self, source: &str) -> Result<ImageHandle, LoadError> {
        let bytes = if is_remote(source) {
            self.fetch(source).await?
        } else {
            let path = source.strip_prefix("file://").unwrap_or(source);
            tokio::fs::read(Path::new(path))
                .await
                .map_err(|error| LoadError::Read {
                    source_name: source.to_string(),
                    error,
                })?
        };

        let name = source.to_string();
        // Decoding a large photo takes long enough to stall the event loop.
        let decoded = tokio::task::spawn_blocking(move || decode(&name, &bytes))
            .await
            .map_err(|e| LoadError::Fetch {
                source_name: source.to_string(),
                message: format!("decode task failed: {}", e),
            })??;

        tracing::debug!(
            "Loaded {} ({}x{})",
            source,
            decoded.width(),
            decoded.height()
        );
        Ok(decoded)
    }

    /// Load the reference and the overlay concurrently; fails if either fails.
    pub async fn load_pair(
        &self,
        reference: &str,
        overlay: &str,
    ) -> Result<(ImageHandle, ImageHandle), LoadError> {
        futures::try_join!(self.load(reference), self.load(overlay))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let fetch_err = |e: reqwest::Error| LoadError::Fetch {
            source_name: url.to_string(),
            message: e.to_string(),
        };
        let response = self.http.get(url).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                source_name: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(fetch_err)?;
        Ok(body.to_vec())
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub fn decode(source_name: &str, bytes: &[u8]) -> Result<ImageHandle, LoadError> {
    let img = image::load_from_memory(bytes).map_err(|error| LoadError::Decode {
        source_name: source_name.to_string(),
        error,
    })?;
    Ok(ImageHandle::new(img.to_rgba8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn loads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, png_bytes(4, 3)).unwrap();

        let loader = ImageLoader::new(reqwest::Client::new());
        let handle = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!((handle.width(), handle.height()), (4, 3));
    }

    #[tokio::test]
    async fn missing_file_is_read_error() {
        let loader = ImageLoader::new(reqwest::Client::new());
        let err = loader.load("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
    }

    #[tokio::test]
    async fn garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"not an image").unwrap();

        let loader = ImageLoader::new(reqwest::Client::new());
        let err = loader.load(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));
    }

    #[tokio::test]
    async fn pair_fails_if_either_fails() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ref.png");
        std::fs::write(&good, png_bytes(2, 2)).unwrap();

        let loader = ImageLoader::new(reqwest::Client::new());
        let result = loader
            .load_pair(good.to_str().unwrap(), "/missing/overlay.png")
            .await;
        assert!(result.is_err());

        let (r, o) = loader
            .load_pair(good.to_str().unwrap(), good.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(r.width(), o.width());
    }

    #[tokio::test]
    async fn remote_status_error() {
        use axum::{http::StatusCode, routing::get, Router};

        let app = Router::new()
            .route("/ok.png", get(|| async { png_bytes(5, 5) }))
            .route("/gone.png", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let loader = ImageLoader::new(reqwest::Client::new());
        let ok = loader.load(&format!("http://{}/ok.png", addr)).await.unwrap();
        assert_eq!(ok.width(), 5);

        let err = loader
            .load(&format!("http://{}/gone.png", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Status { status: 404, .. }));
    }
}
