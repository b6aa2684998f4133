use outreach_core::{Descriptor, Embedder, EmbedderError, FaceImage, OnnxEmbedder};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

/// Messages sent from D-Bus handlers to the engine thread.
struct DetectRequest {
    image: FaceImage,
    reply: oneshot::Sender<Result<Option<Descriptor>, EmbedderError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<DetectRequest>,
}

impl Embedder for EngineHandle {
    /// Queue the image for the engine thread and wait for its descriptor.
    ///
    /// If the caller gives up (timeout), the reply is dropped; the engine
    /// still finishes the inference it started.
    async fn detect(&self, image: &FaceImage) -> Result<Option<Descriptor>, EmbedderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DetectRequest {
                image: image.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EmbedderError::Unavailable)?;
        reply_rx.await.map_err(|_| EmbedderError::Unavailable)?
    }
}

/// Spawn the embedder on a dedicated OS thread.
///
/// Loads the ONNX model synchronously so startup fails fast when it is
/// missing, then serves detect requests one at a time.
pub fn spawn_engine(model_path: &Path, min_face_score: f32) -> anyhow::Result<EngineHandle> {
    let mut embedder = OnnxEmbedder::load(model_path, min_face_score)?;
    tracing::info!(path = %model_path.display(), min_face_score, "face descriptor model loaded");

    let (tx, rx) = mpsc::channel::<DetectRequest>(4);

    std::thread::Builder::new()
        .name("outreach-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            serve(rx, |image| embedder.extract(image));
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Engine loop. Requests whose caller already gave up (timed out while
/// queued) are dropped without running inference.
fn serve<F>(mut rx: mpsc::Receiver<DetectRequest>, mut extract: F)
where
    F: FnMut(&FaceImage) -> Result<Option<Descriptor>, EmbedderError>,
{
    while let Some(req) = rx.blocking_recv() {
        if req.reply.is_closed() {
            tracing::debug!("engine: skipping abandoned detect request");
            continue;
        }
        let result = extract(&req.image);
        // Receiver may have timed out meanwhile; nothing to do then.
        let _ = req.reply.send(result);
    }
}

#[cfg(test)]
impl EngineHandle {
    /// Handle backed by a closure instead of a model, for service tests.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&FaceImage) -> Result<Option<Descriptor>, EmbedderError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<DetectRequest>(4);
        std::thread::spawn(move || serve(rx, f));
        Self { tx }
    }
}
