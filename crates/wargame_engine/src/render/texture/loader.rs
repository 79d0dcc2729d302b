//! Background texture decoding
//!
//! Images are decoded on a `rayon` pool and handed back over a `crossbeam` channel.
//! The render thread drains completions once per frame without blocking. Each request
//! carries the loader generation it was submitted in; `cancel_all` bumps the generation
//! so completions of canceled requests are dropped unseen.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::assets::{apply_team_color, team_mask_path, AssetError, ImageProvider, PixelFormat, TextureImage};
use crate::render::texture::TextureKey;
use crate::render::{RenderError, RenderResult, TextureFlags};

/// Decoded contents of one texture key
#[derive(Debug, Clone)]
pub enum LoadedImage {
    /// 2D image
    Flat(TextureImage),
    /// Six cube map faces
    Cube(Box<[TextureImage; 6]>),
}

/// A finished background load
#[derive(Debug)]
pub struct Completion {
    /// What was requested
    pub key: TextureKey,
    /// Decoded image or the error
    pub result: Result<LoadedImage, AssetError>,
    generation: u64,
}

/// Thread pool loader shared by a texture manager
pub struct TextureLoader {
    pool: rayon::ThreadPool,
    provider: Arc<dyn ImageProvider>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    generation: Arc<AtomicU64>,
    pending: Arc<Mutex<HashSet<TextureKey>>>,
}

impl TextureLoader {
    /// Create a loader with `threads` workers decoding through `provider`
    ///
    /// # Errors
    /// `ResourceCreationFailed` when the thread pool cannot be started.
    pub fn new(provider: Arc<dyn ImageProvider>, threads: usize) -> RenderResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("texture-loader-{i}"))
            .build()
            .map_err(|e| RenderError::ResourceCreationFailed(format!("Failed to start texture loader: {e}")))?;
        let (sender, receiver) = channel::unbounded();

        Ok(Self {
            pool,
            provider,
            sender,
            receiver,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Queue a background load; returns `false` when the key is already in flight
    pub fn submit(&self, key: TextureKey) -> bool {
        if !self.pending.lock().insert(key.clone()) {
            return false;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let current = Arc::clone(&self.generation);
        let provider = Arc::clone(&self.provider);
        let sender = self.sender.clone();
        log::debug!("Queued texture load {}", key);

        self.pool.spawn(move || {
            if current.load(Ordering::Acquire) != generation {
                return;
            }
            let result = decode(provider.as_ref(), &key);
            // The manager may be gone already; nobody is left to care.
            let _ = sender.send(Completion { key, result, generation });
        });
        true
    }

    /// Decode `key` on the calling thread
    ///
    /// # Errors
    /// Whatever the image provider reports.
    pub fn load_now(&self, key: &TextureKey) -> Result<LoadedImage, AssetError> {
        decode(self.provider.as_ref(), key)
    }

    /// Next current-generation completion, if one is waiting
    pub fn try_next(&self) -> Option<Completion> {
        loop {
            match self.receiver.try_recv() {
                Ok(completion) => {
                    if let Some(completion) = self.accept(completion) {
                        return Some(completion);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Block up to `timeout` for the next current-generation completion
    pub fn next_timeout(&self, timeout: Duration) -> Option<Completion> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    if let Some(completion) = self.accept(completion) {
                        return Some(completion);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(&self, completion: Completion) -> Option<Completion> {
        if completion.generation != self.generation.load(Ordering::Acquire) {
            log::trace!("Dropping canceled texture load {}", completion.key);
            return None;
        }
        self.pending.lock().remove(&completion.key);
        Some(completion)
    }

    /// Cancel every queued and running load
    pub fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            log::debug!("Canceled {} texture loads", pending.len());
        }
        pending.clear();
    }

    /// Whether `key` is queued or being decoded
    #[must_use]
    pub fn is_pending(&self, key: &TextureKey) -> bool {
        self.pending.lock().contains(key)
    }

    /// Number of loads in flight
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn decode(provider: &dyn ImageProvider, key: &TextureKey) -> Result<LoadedImage, AssetError> {
    if let Some(faces) = key.cube_faces() {
        let mut images = Vec::with_capacity(6);
        for face in faces {
            let image = provider.load(face)?;
            image.validate()?;
            images.push(image);
        }
        let faces: [TextureImage; 6] = images
            .try_into()
            .map_err(|_| AssetError::InvalidData(format!("cube map {key} needs six faces")))?;
        return Ok(LoadedImage::Cube(Box::new(faces)));
    }

    let mut image = provider.load(key.path())?;
    image.validate()?;
    if key.flags().contains(TextureFlags::BGRA) {
        image.format = match image.format {
            PixelFormat::Rgba8 => PixelFormat::Bgra8,
            PixelFormat::Rgb8 => PixelFormat::Bgr8,
            other => other,
        };
    }
    for team in key.team_colors() {
        let mask = provider.load(&team_mask_path(key.path(), &team.suffix))?;
        apply_team_color(&mut image, &mask, team.rgb)?;
    }
    Ok(LoadedImage::Flat(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TeamColor;
    use std::collections::HashMap;

    struct MapProvider(HashMap<String, TextureImage>);

    impl ImageProvider for MapProvider {
        fn load(&self, path: &str) -> Result<TextureImage, AssetError> {
            self.0.get(path).cloned().ok_or_else(|| AssetError::NotFound(path.to_string()))
        }
    }

    fn provider() -> Arc<dyn ImageProvider> {
        let mut images = HashMap::new();
        images.insert("tank.png".to_string(), TextureImage::solid_color(1, 1, [10, 10, 10, 255]));
        images.insert("tank_team.png".to_string(), TextureImage::solid_color(1, 1, [255, 255, 255, 255]));
        Arc::new(MapProvider(images))
    }

    #[test]
    fn test_background_load_completes() {
        let loader = TextureLoader::new(provider(), 1).unwrap();
        let key = TextureKey::new("tank.png", TextureFlags::empty(), &[]);
        assert!(loader.submit(key.clone()));
        assert!(!loader.submit(key.clone()));

        let completion = loader.next_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(completion.key, key);
        assert!(completion.result.is_ok());
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_canceled_load_never_completes() {
        let loader = TextureLoader::new(provider(), 1).unwrap();
        loader.submit(TextureKey::new("tank.png", TextureFlags::empty(), &[]));
        loader.cancel_all();

        assert!(loader.next_timeout(Duration::from_millis(200)).is_none());
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_team_color_is_applied_while_decoding() {
        let loader = TextureLoader::new(provider(), 1).unwrap();
        let key = TextureKey::new("tank.png", TextureFlags::empty(), &[TeamColor::new("_team", [0, 200, 0])]);
        match loader.load_now(&key).unwrap() {
            LoadedImage::Flat(image) => assert_eq!(image.data(), &[0, 200, 0, 255]),
            LoadedImage::Cube(_) => panic!("expected a flat image"),
        }
    }

    #[test]
    fn test_missing_file_reports_not_found() {
        let loader = TextureLoader::new(provider(), 1).unwrap();
        let key = TextureKey::new("missing.png", TextureFlags::empty(), &[]);
        assert!(matches!(loader.load_now(&key), Err(AssetError::NotFound(_))));
    }
}
