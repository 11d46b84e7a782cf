//! Loading glTF documents and their external resources.
//!
//! [`ModelLoader::load`] fetches the root document, every buffer it
//! references and, depending on `wait_for_textures`, its images. Images
//! with their own URI are fetched alongside the buffers. Buffers are
//! always awaited together; a single failed buffer fails the load. Images
//! are decoded into the document's [`ImageSlots`] one by one, and a failed
//! image only marks its slot as failed.

pub mod fetch;
pub mod gpu;

use std::sync::Arc;

use futures::future::{self, Either};

use crate::{
    data_structures::document::{Document, ImageSlot, ImageSlots},
    error::ViewerError,
    resources::fetch::{Fetch, FetchFuture, decode_image},
};

/// Resolves `relative` against the directory of `base`: everything up to
/// and including the last `/` of `base` is kept.
pub fn resolve_path(base: &str, relative: &str) -> String {
    if fetch::is_remote(relative) {
        return relative.to_string();
    }
    match base.rfind('/') {
        Some(end) => format!("{}{}", &base[..=end], relative),
        None => relative.to_string(),
    }
}

pub struct LoadedModel {
    pub document: Document,
    /// Fills the document's image slots when polled. Only present if the
    /// load did not wait for textures; the caller decides where it runs.
    pub pending_images: Option<FetchFuture<'static, ()>>,
}

enum ImageSource {
    Url(String),
    Embedded(Vec<u8>),
}

pub struct ModelLoader {
    fetcher: Arc<dyn Fetch>,
}

impl ModelLoader {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetch> {
        &self.fetcher
    }

    pub async fn load(&self, url: &str, wait_for_textures: bool) -> anyhow::Result<LoadedModel> {
        log::info!("Loading model {}", url);
        let started = instant::Instant::now();
        let root = self.fetcher.fetch_bytes(url).await?;
        let gltf = gltf::Gltf::from_slice(&root)
            .map_err(|e| ViewerError::InvalidDocument(format!("{}: {}", url, e)))?;

        let mut document = Document::from_gltf(&gltf.document, url)?;

        let mut linked = Vec::new();
        let mut embedded = Vec::new();
        for image in gltf.images() {
            match image.source() {
                gltf::image::Source::Uri { uri, .. } => {
                    linked.push((image.index(), ImageSource::Url(resolve_path(url, uri))))
                }
                gltf::image::Source::View { view, .. } => embedded.push((image.index(), view)),
            }
        }
        let image_count = linked.len() + embedded.len();
        // Polled alongside the buffer fetches below.
        let linked = self.load_images(url, linked, document.images.clone());

        let blob = gltf.blob.as_deref();
        let buffers = gltf.buffers().map(|buffer| {
            let fetcher = &self.fetcher;
            async move {
                let bytes = match buffer.source() {
                    gltf::buffer::Source::Bin => blob.map(<[u8]>::to_vec).ok_or_else(|| {
                        ViewerError::InvalidDocument(format!(
                            "buffer {} refers to a missing binary chunk",
                            buffer.index()
                        ))
                    })?,
                    gltf::buffer::Source::Uri(uri) if uri.starts_with("data:") => {
                        return Err(ViewerError::Unsupported {
                            what: "buffer URI",
                            detail: format!("buffer {} is an embedded data URI", buffer.index()),
                        });
                    }
                    gltf::buffer::Source::Uri(uri) => {
                        fetcher.fetch_bytes(&resolve_path(url, uri)).await?
                    }
                };
                if bytes.len() < buffer.length() {
                    return Err(ViewerError::InvalidDocument(format!(
                        "buffer {} has {} bytes but declares {}",
                        buffer.index(),
                        bytes.len(),
                        buffer.length()
                    )));
                }
                Ok(bytes)
            }
        });
        let buffers = Box::pin(future::try_join_all(buffers));
        let (buffers, linked) = match future::select(linked, buffers).await {
            Either::Left(((), buffers)) => (buffers.await?, None),
            Either::Right((buffers, linked)) => (buffers?, Some(linked)),
        };

        document.buffers = buffers;
        document.validate()?;

        let mut sources = Vec::with_capacity(embedded.len());
        for (index, view) in embedded {
            let bytes = document.buffer(view.buffer().index())?;
            let end = view.offset().checked_add(view.length()).unwrap_or(usize::MAX);
            let data = bytes
                .get(view.offset()..end)
                .ok_or(ViewerError::AccessorOverrun {
                    needed: end,
                    available: bytes.len(),
                })?;
            sources.push((index, ImageSource::Embedded(data.to_vec())));
        }
        log::info!(
            "Loaded {} in {:?}: {} buffers, {} meshes, {} images",
            url,
            started.elapsed(),
            document.buffers.len(),
            document.meshes.len(),
            image_count
        );

        let from_views = self.load_images(url, sources, document.images.clone());
        let images: FetchFuture<'static, ()> = match linked {
            Some(linked) => Box::pin(async move {
                future::join(linked, from_views).await;
            }),
            None => from_views,
        };
        if !wait_for_textures {
            return Ok(LoadedModel {
                document,
                pending_images: Some(images),
            });
        }
        images.await;
        let failed = document.images.failed_count();
        if failed > 0 {
            log::warn!("{} of {} images of {} failed", failed, document.images.len(), url);
        }
        Ok(LoadedModel {
            document,
            pending_images: None,
        })
    }

    fn load_images(
        &self,
        root: &str,
        sources: Vec<(usize, ImageSource)>,
        slots: ImageSlots,
    ) -> FetchFuture<'static, ()> {
        let root = root.to_string();
        let tasks: Vec<_> = sources
            .into_iter()
            .map(|(index, source)| {
                let fetcher = Arc::clone(&self.fetcher);
                let slots = slots.clone();
                let root = root.clone();
                async move {
                    let decoded = match source {
                        ImageSource::Url(url) => match fetcher.fetch_bytes(&url).await {
                            Ok(bytes) => decode_image(&bytes, &url),
                            Err(e) => Err(e),
                        },
                        ImageSource::Embedded(bytes) => {
                            decode_image(&bytes, &format!("{} image {}", root, index))
                        }
                    };
                    match decoded {
                        Ok(image) => slots.fill(index, ImageSlot::Ready(Arc::new(image))),
                        Err(e) => {
                            log::warn!("Image {} of {} failed: {}", index, root, e);
                            slots.fill(index, ImageSlot::Failed(e.to_string()));
                        }
                    }
                }
            })
            .collect();
        Box::pin(async move {
            future::join_all(tasks).await;
        })
    }
}
